//! Direct solver based on the sparse `L D L^T` factorization of [faer](https://docs.rs/faer).
//!
//! The symbolic factorization, including faer's fill-reducing AMD ordering, is computed once in
//! [`analyze_pattern`](LinearSolver::analyze_pattern) and reused by every numeric factorization.
//!
//! No pivoting is performed, so the factorization exists for symmetric positive definite
//! matrices and for those indefinite matrices whose leading principal minors (after reordering)
//! are non-zero. A zero pivot is reported as [`SolverError::SingularMatrix`].
use crate::solver::{LinearSolver, SolverError};
use crate::symmetric::check_upper_triangular;
use faer::linalg::cholesky::ldlt::factor::LdltError;
use faer::prelude::*;
use faer::sparse::linalg::solvers::{Ldlt, SymbolicLdlt};
use faer::sparse::linalg::LdltError as SparseLdltError;
use faer::sparse::{SparseColMat, SymbolicSparseColMat};
use faer::Side;
use log::debug;
use nalgebra::{DVectorView, DVectorViewMut};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CscMatrix;
use std::fmt;

#[derive(Default)]
pub struct LdltSolver {
    symbolic: Option<LdltSymbolic>,
    factor: Option<LdltFactor>,
}

struct LdltSymbolic {
    /// The pattern of the matrix as it was analyzed, used to validate later matrices.
    pattern: SparsityPattern,
    /// `None` for the empty system, which is never handed to faer.
    inner: Option<SymbolicLdlt<usize>>,
}

enum LdltFactor {
    Empty,
    Factorized(Ldlt<usize, f64>),
}

impl fmt::Debug for LdltSolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LdltSolver")
            .field("dim", &self.dim())
            .field("factorized", &self.is_factorized())
            .finish()
    }
}

impl LdltSolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dimension of the analyzed pattern, if any.
    pub fn dim(&self) -> Option<usize> {
        self.symbolic.as_ref().map(|symbolic| symbolic.pattern.major_dim())
    }

    /// Whether the last call to `set_matrix` succeeded.
    pub fn is_factorized(&self) -> bool {
        self.factor.is_some()
    }
}

/// Converts the upper triangular pattern into faer's column-major symbolic structure.
///
/// Both libraries store sorted, unique row indices per column, so the arrays carry over as-is.
fn pattern_to_faer(pattern: &SparsityPattern) -> SymbolicSparseColMat<usize> {
    SymbolicSparseColMat::new_checked(
        pattern.minor_dim(),
        pattern.major_dim(),
        pattern.major_offsets().to_vec(),
        None,
        pattern.minor_indices().to_vec(),
    )
}

fn upper_csc_to_faer(matrix: &CscMatrix<f64>) -> SparseColMat<usize, f64> {
    SparseColMat::new(pattern_to_faer(matrix.pattern()), matrix.values().to_vec())
}

impl LinearSolver for LdltSolver {
    fn analyze_pattern(&mut self, matrix: &CscMatrix<f64>) -> Result<(), SolverError> {
        self.factor = None;
        self.symbolic = None;
        let pattern = matrix.pattern();
        check_upper_triangular(pattern)?;

        let inner = if pattern.major_dim() == 0 {
            None
        } else {
            let symbolic = SymbolicLdlt::try_new(pattern_to_faer(pattern).as_ref(), Side::Upper)
                .map_err(|err| SolverError::Factorization(format!("{:?}", err)))?;
            Some(symbolic)
        };
        debug!("LDLT analysis: n = {}, nnz(A) = {}", pattern.major_dim(), pattern.nnz());

        self.symbolic = Some(LdltSymbolic {
            pattern: pattern.clone(),
            inner,
        });
        Ok(())
    }

    fn set_matrix(&mut self, matrix: &CscMatrix<f64>) -> Result<(), SolverError> {
        self.factor = None;
        let symbolic = self.symbolic.as_ref().ok_or(SolverError::NotAnalyzed)?;
        if matrix.pattern() != &symbolic.pattern {
            return Err(SolverError::PatternMismatch);
        }

        let factor = match &symbolic.inner {
            None => LdltFactor::Empty,
            Some(inner) => {
                let csc = upper_csc_to_faer(matrix);
                let ldlt = Ldlt::try_new_with_symbolic(inner.clone(), csc.as_ref(), Side::Upper).map_err(
                    |err| match err {
                        SparseLdltError::Numeric(LdltError::ZeroPivot { index }) => {
                            SolverError::SingularMatrix { column: index }
                        }
                        err => SolverError::Factorization(format!("{:?}", err)),
                    },
                )?;
                LdltFactor::Factorized(ldlt)
            }
        };
        self.factor = Some(factor);
        Ok(())
    }

    fn solve(&mut self, rhs: DVectorView<f64>, mut x: DVectorViewMut<f64>) -> Result<(), SolverError> {
        let n = self.dim().ok_or(SolverError::NotAnalyzed)?;
        let factor = self.factor.as_ref().ok_or(SolverError::NotFactorized)?;
        for len in [rhs.len(), x.len()] {
            if len != n {
                return Err(SolverError::DimensionMismatch {
                    expected: n,
                    actual: len,
                });
            }
        }

        let ldlt = match factor {
            LdltFactor::Empty => return Ok(()),
            LdltFactor::Factorized(ldlt) => ldlt,
        };

        let mut solution = faer::Mat::from_fn(n, 1, |i, _| rhs[i]);
        ldlt.solve_in_place(solution.as_mut());

        // A zero pivot that is not caught during factorization surfaces here
        if let Some(column) = (0..n).find(|&i| !solution[(i, 0)].is_finite()) {
            return Err(SolverError::SingularMatrix { column });
        }
        for i in 0..n {
            x[i] = solution[(i, 0)];
        }

        Ok(())
    }
}
