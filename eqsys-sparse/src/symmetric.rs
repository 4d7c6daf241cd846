//! Helpers for symmetric matrices stored as their upper triangle in CSC format.
use crate::solver::SolverError;
use nalgebra::{DVectorView, DVectorViewMut};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CscMatrix;

/// Checks that the pattern is square and contains no entries below the diagonal.
///
/// The pattern is interpreted column-major, i.e. lanes are columns and minor indices are rows.
pub fn check_upper_triangular(pattern: &SparsityPattern) -> Result<(), SolverError> {
    if pattern.major_dim() != pattern.minor_dim() {
        return Err(SolverError::NotSquare {
            nrows: pattern.minor_dim(),
            ncols: pattern.major_dim(),
        });
    }

    for col in 0..pattern.major_dim() {
        if let Some(&row) = pattern.lane(col).iter().find(|&&row| row > col) {
            return Err(SolverError::NotUpperTriangular { row, col });
        }
    }

    Ok(())
}

/// Computes `y = A x` for the symmetric matrix `A` whose upper triangle is given.
pub fn spmv_upper(mut y: DVectorViewMut<f64>, a: &CscMatrix<f64>, x: DVectorView<f64>) {
    assert_eq!(a.nrows(), a.ncols(), "Matrix must be square.");
    assert_eq!(x.len(), a.ncols(), "Dimension mismatch between matrix and x.");
    assert_eq!(y.len(), a.nrows(), "Dimension mismatch between matrix and y.");

    y.fill(0.0);
    for (col, column) in a.col_iter().enumerate() {
        let x_col = x[col];
        for (&row, &value) in column.row_indices().iter().zip(column.values()) {
            y[row] += value * x_col;
            if row != col {
                y[col] += value * x[row];
            }
        }
    }
}
