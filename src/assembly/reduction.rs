use crate::assembly::{check_element_count, compute_element, AccumulatorMut, GlobalAssembler, GlobalSystem};
use crate::element::{Element, ElementOptions};
use crate::error::Error;
use crate::indexing::IndexTable;
use log::debug;
use nalgebra_sparse::pattern::SparsityPattern;
use rayon::{ThreadPool, ThreadPoolBuilder};
use std::ops::Range;
use std::sync::Arc;

/// Private partial sums of a fork-join reduction.
///
/// Every accumulator owns its values but shares the pattern of the global Jacobian.
#[derive(Debug, Clone)]
pub struct Accumulator<'a> {
    pattern: &'a SparsityPattern,
    values: Vec<f64>,
    rhs: Vec<f64>,
}

impl<'a> Accumulator<'a> {
    /// The neutral element of the reduction.
    pub fn identity(pattern: &'a SparsityPattern) -> Self {
        Self {
            pattern,
            values: vec![0.0; pattern.nnz()],
            rhs: vec![0.0; pattern.major_dim()],
        }
    }

    /// Sequentially adds the elements in `range`.
    pub fn accumulate(
        mut self,
        elements: &[Arc<dyn Element>],
        index_table: &IndexTable,
        options: &ElementOptions,
        range: Range<usize>,
    ) -> Result<Self, Error> {
        let mut accumulator = AccumulatorMut::from_parts(self.pattern, &mut self.values, &mut self.rhs);
        for index in range {
            let local = compute_element(index, elements[index].as_ref(), options)?;
            accumulator.add_element(index, index_table.element(index), &local)?;
        }
        Ok(self)
    }

    /// Combines two partial sums over the same pattern.
    pub fn merge(mut self, other: Self) -> Self {
        assert!(
            std::ptr::eq(self.pattern, other.pattern) || self.pattern == other.pattern,
            "Accumulators must share the same pattern."
        );
        for (a, b) in self.values.iter_mut().zip(&other.values) {
            *a += *b;
        }
        for (a, b) in self.rhs.iter_mut().zip(&other.rhs) {
            *a += *b;
        }
        self
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn rhs(&self) -> &[f64] {
        &self.rhs
    }

    fn into_parts(self) -> (Vec<f64>, Vec<f64>) {
        (self.values, self.rhs)
    }
}

/// Splits the element range recursively and merges the partial sums pairwise.
#[derive(Debug)]
pub struct ReductionAssembler {
    pool: ThreadPool,
}

impl ReductionAssembler {
    /// Creates an assembler with its own thread pool. `0` threads means one per available core.
    pub fn new(num_threads: usize) -> Result<Self, Error> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .thread_name(|index| format!("eqsys-assembly-{}", index))
            .build()
            .map_err(Error::ThreadPool)?;
        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

fn reduce<'a>(
    pattern: &'a SparsityPattern,
    elements: &[Arc<dyn Element>],
    index_table: &IndexTable,
    options: &ElementOptions,
    range: Range<usize>,
    grain_size: usize,
) -> Result<Accumulator<'a>, Error> {
    if range.len() <= grain_size {
        return Accumulator::identity(pattern).accumulate(elements, index_table, options, range);
    }

    let mid = range.start + range.len() / 2;
    let (left, right) = rayon::join(
        || reduce(pattern, elements, index_table, options, range.start..mid, grain_size),
        || reduce(pattern, elements, index_table, options, mid..range.end, grain_size),
    );
    Ok(left?.merge(right?))
}

impl GlobalAssembler for ReductionAssembler {
    fn assemble(
        &self,
        elements: &[Arc<dyn Element>],
        index_table: &IndexTable,
        options: &ElementOptions,
        system: &mut GlobalSystem,
    ) -> Result<(), Error> {
        check_element_count(elements, index_table);
        // Roughly four chunks per thread
        let num_chunks = 4 * self.num_threads();
        let grain_size = (elements.len() / num_chunks).max(1);
        debug!(
            "Reduction assembly of {} elements on {} threads (grain size {})",
            elements.len(),
            self.num_threads(),
            grain_size
        );

        let (values, rhs) = {
            let pattern = system.jacobian().pattern();
            let accumulator = self
                .pool
                .install(|| reduce(pattern, elements, index_table, options, 0..elements.len(), grain_size))?;
            accumulator.into_parts()
        };
        system.add_raw(&values, &rhs);
        Ok(())
    }
}
