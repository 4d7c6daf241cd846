//! Global DOF numbering, per-element index tables and sparsity pattern analysis.
//!
//! The global numbering places all free DOFs before all fixed DOFs, each group in the order
//! in which the DOFs are first encountered when walking the elements in order. Consequently
//! a global index `i` refers to a free DOF if and only if `i < nb_free`. The Jacobian only
//! has rows and columns for free DOFs.
use crate::dof::Dof;
use crate::element::Element;
use crate::error::Error;
use itertools::Itertools;
use log::debug;
use nalgebra_sparse::pattern::SparsityPattern;
use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Position of a DOF in an element (`local`) and in the system (`global`).
///
/// Indices are ordered by their global index first.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct DofIndex {
    pub local: usize,
    pub global: usize,
}

impl Ord for DofIndex {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.global, self.local).cmp(&(other.global, other.local))
    }
}

impl PartialOrd for DofIndex {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The mapping between DOFs and global indices.
#[derive(Debug, Clone, Default)]
pub struct DofNumbering {
    dofs: Vec<Dof>,
    indices: FxHashMap<Dof, usize>,
    nb_free: usize,
}

impl DofNumbering {
    pub fn from_element_dofs(element_dofs: &[Vec<Dof>]) -> Self {
        let mut seen = FxHashSet::default();
        let mut free = Vec::new();
        let mut fixed = Vec::new();
        for dof in element_dofs.iter().flatten() {
            if seen.insert(dof.clone()) {
                if dof.is_fixed() {
                    fixed.push(dof.clone());
                } else {
                    free.push(dof.clone());
                }
            }
        }

        let nb_free = free.len();
        let dofs = free.into_iter().chain(fixed).collect_vec();
        let indices = dofs
            .iter()
            .enumerate()
            .map(|(index, dof)| (dof.clone(), index))
            .collect();

        Self { dofs, indices, nb_free }
    }

    /// All DOFs, free DOFs first.
    pub fn dofs(&self) -> &[Dof] {
        &self.dofs
    }

    pub fn free_dofs(&self) -> &[Dof] {
        &self.dofs[..self.nb_free]
    }

    pub fn fixed_dofs(&self) -> &[Dof] {
        &self.dofs[self.nb_free..]
    }

    pub fn nb_dofs(&self) -> usize {
        self.dofs.len()
    }

    pub fn nb_free(&self) -> usize {
        self.nb_free
    }

    pub fn nb_fixed(&self) -> usize {
        self.dofs.len() - self.nb_free
    }

    pub fn index_of(&self, dof: &Dof) -> Option<usize> {
        self.indices.get(dof).copied()
    }
}

/// For every element, its DOF indices sorted by global index.
///
/// The lists are stored back to back in a single buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexTable {
    offsets: Vec<usize>,
    indices: Vec<DofIndex>,
}

impl IndexTable {
    pub fn from_element_dofs(numbering: &DofNumbering, element_dofs: &[Vec<Dof>]) -> Result<Self, Error> {
        let mut offsets = Vec::with_capacity(element_dofs.len() + 1);
        let mut indices = Vec::with_capacity(element_dofs.iter().map(Vec::len).sum());
        offsets.push(0);
        for dofs in element_dofs {
            let begin = indices.len();
            for (local, dof) in dofs.iter().enumerate() {
                let global = numbering.index_of(dof).ok_or(Error::UnknownDof)?;
                indices.push(DofIndex { local, global });
            }
            // Stable sort, so a DOF listed twice keeps its local order
            indices[begin..].sort_by_key(|index| index.global);
            offsets.push(indices.len());
        }
        Ok(Self { offsets, indices })
    }

    /// The number of elements.
    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The sorted indices of the given element.
    ///
    /// # Panics
    ///
    /// Panics if the element index is out of bounds.
    pub fn element(&self, element: usize) -> &[DofIndex] {
        &self.indices[self.offsets[element]..self.offsets[element + 1]]
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = &[DofIndex]> {
        (0..self.len()).map(move |element| self.element(element))
    }

    /// Total number of indices over all elements.
    pub fn nb_indices(&self) -> usize {
        self.indices.len()
    }
}

/// Computes the upper triangular sparsity pattern of the free-free block of the Jacobian.
///
/// The pattern is column-major: lanes are columns and minor indices are rows. It contains
/// `(row, col)` with `row <= col` if and only if some element couples both free DOFs.
pub fn analyze_pattern(table: &IndexTable, nb_free: usize) -> SparsityPattern {
    // A BTreeSet stores every entry exactly once and yields them in column-major order
    let mut entries = BTreeSet::new();
    for indices in table.iter() {
        for (q, col) in indices.iter().enumerate() {
            if col.global >= nb_free {
                // Sorted by global index, so the remaining indices are fixed too
                break;
            }
            for row in &indices[..=q] {
                entries.insert((col.global, row.global));
            }
        }
    }

    let mut offsets = Vec::with_capacity(nb_free + 1);
    let mut row_indices = Vec::with_capacity(entries.len());
    offsets.push(0);
    for (col, row) in entries {
        while col + 1 > offsets.len() {
            offsets.push(row_indices.len());
        }
        row_indices.push(row);
    }
    while offsets.len() < nb_free + 1 {
        offsets.push(row_indices.len());
    }

    SparsityPattern::try_from_offsets_and_indices(nb_free, nb_free, offsets, row_indices)
        .expect("Internal error: Analyzed pattern must be valid")
}

/// The numbering, index table and pattern of a list of elements.
#[derive(Debug, Clone)]
pub struct SystemLayout {
    pub numbering: DofNumbering,
    pub index_table: IndexTable,
    pub pattern: SparsityPattern,
}

impl SystemLayout {
    pub fn from_elements(elements: &[Arc<dyn Element>]) -> Result<Self, Error> {
        let element_dofs = elements.iter().map(|element| element.dofs()).collect_vec();
        Self::from_element_dofs(&element_dofs)
    }

    pub fn from_element_dofs(element_dofs: &[Vec<Dof>]) -> Result<Self, Error> {
        let numbering = DofNumbering::from_element_dofs(element_dofs);
        let index_table = IndexTable::from_element_dofs(&numbering, element_dofs)?;
        let pattern = analyze_pattern(&index_table, numbering.nb_free());
        debug!(
            "Analyzed {} elements: {} free and {} fixed DOFs, {} stored Jacobian entries",
            index_table.len(),
            numbering.nb_free(),
            numbering.nb_fixed(),
            pattern.nnz()
        );
        Ok(Self {
            numbering,
            index_table,
            pattern,
        })
    }
}
