//! Assembly of the global Jacobian and residual from element contributions.
//!
//! Every assembler produces the same result up to floating-point round-off: for each element,
//! the local residual is added to the rows of its free DOFs, and for every pair of free DOFs
//! ordered by global index the local Jacobian entry `(row, col)` is added to the global upper
//! triangular Jacobian. Entries belonging to fixed DOFs are skipped.
use crate::element::{Element, ElementOptions, LocalSystem};
use crate::error::Error;
use crate::indexing::{DofIndex, IndexTable};
use nalgebra::DVector;
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CscMatrix;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

mod pipeline;
mod reduction;
mod serial;

pub use pipeline::PipelineAssembler;
pub use reduction::{Accumulator, ReductionAssembler};
pub use serial::SerialAssembler;

/// The global Jacobian (upper triangle, CSC) and right-hand side over the free DOFs.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobalSystem {
    jacobian: CscMatrix<f64>,
    rhs: DVector<f64>,
}

impl GlobalSystem {
    /// Creates a zero system with the given (upper triangular, column-major) pattern.
    pub fn from_pattern(pattern: SparsityPattern) -> Self {
        let n = pattern.major_dim();
        let values = vec![0.0; pattern.nnz()];
        let jacobian = CscMatrix::try_from_pattern_and_values(pattern, values)
            .expect("Internal error: Number of values must match the pattern");
        Self {
            jacobian,
            rhs: DVector::zeros(n),
        }
    }

    pub fn jacobian(&self) -> &CscMatrix<f64> {
        &self.jacobian
    }

    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    pub fn nb_free(&self) -> usize {
        self.rhs.len()
    }

    pub fn set_zero(&mut self) {
        self.jacobian.values_mut().fill(0.0);
        self.rhs.fill(0.0);
    }

    /// An accumulator that adds element contributions directly into this system.
    pub fn accumulator(&mut self) -> AccumulatorMut<'_> {
        let (col_offsets, row_indices, values) = self.jacobian.csc_data_mut();
        AccumulatorMut {
            col_offsets,
            row_indices,
            values,
            rhs: self.rhs.as_mut_slice(),
        }
    }

    /// Adds raw Jacobian values (in pattern order) and right-hand side values.
    pub(crate) fn add_raw(&mut self, values: &[f64], rhs: &[f64]) {
        assert_eq!(values.len(), self.jacobian.nnz());
        assert_eq!(rhs.len(), self.rhs.len());
        for (a, b) in self.jacobian.values_mut().iter_mut().zip(values) {
            *a += *b;
        }
        for (a, b) in self.rhs.iter_mut().zip(rhs) {
            *a += *b;
        }
    }
}

/// Adds element contributions into borrowed CSC storage.
#[derive(Debug)]
pub struct AccumulatorMut<'a> {
    col_offsets: &'a [usize],
    row_indices: &'a [usize],
    values: &'a mut [f64],
    rhs: &'a mut [f64],
}

impl<'a> AccumulatorMut<'a> {
    pub(crate) fn from_parts(
        pattern: &'a SparsityPattern,
        values: &'a mut [f64],
        rhs: &'a mut [f64],
    ) -> Self {
        assert_eq!(values.len(), pattern.nnz());
        assert_eq!(rhs.len(), pattern.major_dim());
        Self {
            col_offsets: pattern.major_offsets(),
            row_indices: pattern.minor_indices(),
            values,
            rhs,
        }
    }

    /// Adds the local system of `element` with the given sorted indices.
    ///
    /// The dimensions of the local system are validated before anything is written.
    pub fn add_element(&mut self, element: usize, indices: &[DofIndex], local: &LocalSystem) -> Result<(), Error> {
        let n = indices.len();
        let (nrows, ncols) = local.jacobian.shape();
        if nrows != n || ncols != n || local.residual.len() != n {
            return Err(Error::DimensionMismatch {
                element,
                dofs: n,
                jacobian: (nrows, ncols),
                residual: local.residual.len(),
            });
        }

        let nb_free = self.rhs.len();
        for (q, col) in indices.iter().enumerate() {
            if col.global >= nb_free {
                break;
            }
            self.rhs[col.global] += local.residual[col.local];

            let begin = self.col_offsets[col.global];
            let end = self.col_offsets[col.global + 1];
            let lane = &self.row_indices[begin..end];
            for row in &indices[..=q] {
                // A DOF listed twice appears as row == col, which lands on the diagonal
                let position = lane
                    .binary_search(&row.global)
                    .expect("Could not find row index in the Jacobian pattern");
                self.values[begin + position] += local.jacobian[(row.local, col.local)];
            }
        }

        Ok(())
    }
}

/// Assembles the contributions of all elements into a [`GlobalSystem`].
///
/// The system is not zeroed: contributions are added to whatever it holds.
pub trait GlobalAssembler: Send + Sync {
    fn assemble(
        &self,
        elements: &[Arc<dyn Element>],
        index_table: &IndexTable,
        options: &ElementOptions,
        system: &mut GlobalSystem,
    ) -> Result<(), Error>;
}

/// Which assembler a [`System`](crate::system::System) uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssemblyStrategy {
    /// Elements are computed and added one after another on the calling thread.
    Serial,
    /// Fork-join reduction over element ranges. `0` threads means one per available core.
    Reduction {
        #[serde(default)]
        num_threads: usize,
    },
    /// A generator, `num_workers` compute workers and a single merging stage, with at most
    /// `depth` elements in flight. `0` workers means one per available core.
    Pipeline {
        #[serde(default)]
        num_workers: usize,
        #[serde(default = "default_pipeline_depth")]
        depth: usize,
    },
}

fn default_pipeline_depth() -> usize {
    PipelineAssembler::DEFAULT_DEPTH
}

impl Default for AssemblyStrategy {
    fn default() -> Self {
        AssemblyStrategy::Reduction { num_threads: 0 }
    }
}

impl AssemblyStrategy {
    pub fn build(&self) -> Result<Box<dyn GlobalAssembler>, Error> {
        Ok(match *self {
            AssemblyStrategy::Serial => Box::new(SerialAssembler),
            AssemblyStrategy::Reduction { num_threads } => Box::new(ReductionAssembler::new(num_threads)?),
            AssemblyStrategy::Pipeline { num_workers, depth } => Box::new(PipelineAssembler::new(num_workers, depth)),
        })
    }
}

pub(crate) fn compute_element(
    index: usize,
    element: &dyn Element,
    options: &ElementOptions,
) -> Result<LocalSystem, Error> {
    element
        .compute(options)
        .map_err(|report| Error::ElementFailure { element: index, report })
}

pub(crate) fn check_element_count(elements: &[Arc<dyn Element>], index_table: &IndexTable) {
    assert_eq!(
        elements.len(),
        index_table.len(),
        "Index table must have one entry per element."
    );
}
