use nalgebra::{DVectorView, DVectorViewMut};
use nalgebra_sparse::CscMatrix;
use std::error::Error;
use std::fmt;
use std::fmt::Display;

/// A solver for sparse symmetric linear systems `A x = b`.
///
/// The matrix passed to every method stores only the upper triangle of `A` in CSC format.
/// The protocol is:
///
/// 1. [`analyze_pattern`](Self::analyze_pattern) once for a given non-zero structure. Only
///    the pattern is inspected, values may be arbitrary.
/// 2. [`set_matrix`](Self::set_matrix) whenever the values change.
/// 3. [`solve`](Self::solve) any number of times for the current matrix.
pub trait LinearSolver: Send {
    fn analyze_pattern(&mut self, matrix: &CscMatrix<f64>) -> Result<(), SolverError>;

    fn set_matrix(&mut self, matrix: &CscMatrix<f64>) -> Result<(), SolverError>;

    fn solve(&mut self, rhs: DVectorView<f64>, x: DVectorViewMut<f64>) -> Result<(), SolverError>;
}

impl<S: ?Sized + LinearSolver> LinearSolver for Box<S> {
    fn analyze_pattern(&mut self, matrix: &CscMatrix<f64>) -> Result<(), SolverError> {
        S::analyze_pattern(self, matrix)
    }

    fn set_matrix(&mut self, matrix: &CscMatrix<f64>) -> Result<(), SolverError> {
        S::set_matrix(self, matrix)
    }

    fn solve(&mut self, rhs: DVectorView<f64>, x: DVectorViewMut<f64>) -> Result<(), SolverError> {
        S::solve(self, rhs, x)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SolverError {
    /// The matrix is not square.
    NotSquare { nrows: usize, ncols: usize },
    /// The matrix has an entry below the diagonal.
    NotUpperTriangular { row: usize, col: usize },
    /// The matrix does not have the sparsity pattern that was analyzed.
    PatternMismatch,
    /// `analyze_pattern` has not been called.
    NotAnalyzed,
    /// `set_matrix` has not completed successfully since the last pattern analysis.
    NotFactorized,
    /// The matrix is singular. `column` locates the zero pivot, or the first entry of the
    /// solution that is not finite.
    SingularMatrix { column: usize },
    /// The factorization backend failed for a reason other than a zero pivot.
    Factorization(String),
    /// A vector has the wrong length.
    DimensionMismatch { expected: usize, actual: usize },
    /// The iterative solver ran out of iterations.
    NotConverged { iterations: usize, residual_norm: f64 },
}

impl Display for SolverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SolverError::NotSquare { nrows, ncols } => {
                write!(f, "Matrix must be square, but has dimensions {}x{}.", nrows, ncols)
            }
            SolverError::NotUpperTriangular { row, col } => {
                write!(f, "Matrix must be upper triangular, found entry at ({}, {}).", row, col)
            }
            SolverError::PatternMismatch => {
                write!(f, "Matrix sparsity pattern differs from the analyzed pattern.")
            }
            SolverError::NotAnalyzed => write!(f, "No sparsity pattern has been analyzed."),
            SolverError::NotFactorized => {
                write!(f, "No matrix has been successfully set since the last pattern analysis.")
            }
            SolverError::SingularMatrix { column } => {
                write!(f, "Matrix is singular: zero pivot encountered at index {}.", column)
            }
            SolverError::Factorization(message) => write!(f, "Factorization failed: {}", message),
            SolverError::DimensionMismatch { expected, actual } => {
                write!(f, "Vector has length {}, expected {}.", actual, expected)
            }
            SolverError::NotConverged {
                iterations,
                residual_norm,
            } => write!(
                f,
                "Failed to converge within {} iterations (residual norm {:e}).",
                iterations, residual_norm
            ),
        }
    }
}

impl Error for SolverError {}
