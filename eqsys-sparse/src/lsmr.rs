//! Iterative least-squares solver LSMR.
//!
//! See D. C.-L. Fong and M. A. Saunders, "LSMR: An iterative algorithm for sparse
//! least-squares problems", SIAM J. Sci. Comput. 33(5), 2011.
//!
//! The operator is the symmetric matrix whose upper triangle is given, so `A^T = A` and a
//! single symmetric product serves both Golub-Kahan bidiagonalization steps.
use crate::solver::{LinearSolver, SolverError};
use crate::symmetric::{check_upper_triangular, spmv_upper};
use log::debug;
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::CscMatrix;
use serde::{Deserialize, Serialize};

#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LsmrSettings {
    /// Relative error in the matrix entries.
    pub atol: f64,
    /// Relative error in the right-hand side.
    pub btol: f64,
    /// Iterations stop once the estimated condition number exceeds this value.
    /// A value of zero disables the test.
    pub conlim: f64,
    /// Maximum number of iterations. Defaults to `10 * n` if not given.
    pub max_iterations: Option<usize>,
}

impl Default for LsmrSettings {
    fn default() -> Self {
        Self {
            atol: 1e-12,
            btol: 1e-12,
            conlim: 1e12,
            max_iterations: None,
        }
    }
}

/// The reason the last LSMR solve terminated.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LsmrStatus {
    /// `x = 0` is the exact solution.
    ZeroSolution,
    /// `A x = b` is solved to the requested tolerances.
    Compatible,
    /// `x` solves the least-squares problem to the requested tolerance.
    LeastSquares,
    /// The estimated condition number exceeded `conlim`.
    ConditionLimit,
    /// `A x = b` is solved to machine precision.
    CompatibleMachinePrecision,
    /// The least-squares problem is solved to machine precision.
    LeastSquaresMachinePrecision,
    /// The condition number estimate reached machine precision.
    ConditionMachinePrecision,
    /// The iteration limit was reached.
    IterationLimit,
}

#[derive(Debug, Clone, Default)]
pub struct LsmrSolver {
    settings: LsmrSettings,
    matrix: Option<CscMatrix<f64>>,
    analyzed: Option<nalgebra_sparse::pattern::SparsityPattern>,
    status: Option<LsmrStatus>,
    iterations: usize,
}

impl LsmrSolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: LsmrSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    pub fn settings(&self) -> &LsmrSettings {
        &self.settings
    }

    /// Termination reason of the last call to `solve`.
    pub fn status(&self) -> Option<LsmrStatus> {
        self.status
    }

    /// Number of iterations performed by the last call to `solve`.
    pub fn iterations(&self) -> usize {
        self.iterations
    }
}

/// Stable Givens rotation, returns `(c, s, r)` with `c a + s b = r` and `-s a + c b = 0`.
fn sym_ortho(a: f64, b: f64) -> (f64, f64, f64) {
    let sign = |x: f64| if x == 0.0 { 0.0 } else { x.signum() };
    if b == 0.0 {
        (sign(a), 0.0, a.abs())
    } else if a == 0.0 {
        (0.0, sign(b), b.abs())
    } else if b.abs() > a.abs() {
        let tau = a / b;
        let s = sign(b) / (1.0 + tau * tau).sqrt();
        let c = s * tau;
        (c, s, b / s)
    } else {
        let tau = b / a;
        let c = sign(a) / (1.0 + tau * tau).sqrt();
        let s = c * tau;
        (c, s, a / c)
    }
}

struct LsmrOutcome {
    status: LsmrStatus,
    iterations: usize,
    residual_norm: f64,
}

#[allow(non_snake_case)]
fn lsmr(a: &CscMatrix<f64>, b: DVectorView<f64>, x: &mut DVector<f64>, settings: &LsmrSettings) -> LsmrOutcome {
    let n = a.ncols();
    let max_iterations = settings.max_iterations.unwrap_or(10 * n.max(1));

    x.fill(0.0);
    let mut u = b.clone_owned();
    let mut v = DVector::zeros(n);
    let mut Av = DVector::zeros(n);

    let mut beta = u.norm();
    let mut alpha: f64 = 0.0;
    if beta > 0.0 {
        u /= beta;
        spmv_upper(DVectorViewMut::from(&mut v), a, DVectorView::from(&u));
        alpha = v.norm();
    }
    if alpha > 0.0 {
        v /= alpha;
    }

    let normb = beta;
    let mut outcome = LsmrOutcome {
        status: LsmrStatus::ZeroSolution,
        iterations: 0,
        residual_norm: beta,
    };
    if alpha * beta == 0.0 {
        return outcome;
    }

    let mut zetabar = alpha * beta;
    let mut alphabar = alpha;
    let mut rho: f64 = 1.0;
    let mut rhobar = 1.0;
    let mut cbar = 1.0;
    let mut sbar = 0.0;

    let mut h = v.clone();
    let mut hbar = DVector::zeros(n);

    // Quantities for estimating ||r||
    let mut betadd = beta;
    let mut betad: f64 = 0.0;
    let mut rhodold = 1.0;
    let mut tautildeold = 0.0;
    let mut thetatilde = 0.0;
    let mut zeta = 0.0;
    let mut d: f64 = 0.0;

    // Quantities for estimating ||A|| and cond(A)
    let mut normA2 = alpha * alpha;
    let mut maxrbar: f64 = 0.0;
    let mut minrbar: f64 = 1e100;
    let ctol = if settings.conlim > 0.0 { 1.0 / settings.conlim } else { 0.0 };

    let mut iteration = 0;
    loop {
        iteration += 1;

        // Continue the bidiagonalization
        spmv_upper(DVectorViewMut::from(&mut Av), a, DVectorView::from(&v));
        u.axpy(1.0, &Av, -alpha);
        beta = u.norm();
        if beta > 0.0 {
            u /= beta;
            spmv_upper(DVectorViewMut::from(&mut Av), a, DVectorView::from(&u));
            v.axpy(1.0, &Av, -beta);
            alpha = v.norm();
            if alpha > 0.0 {
                v /= alpha;
            }
        }

        // Without damping the first rotation is the identity
        let (chat, shat, alphahat) = (1.0, 0.0, alphabar);

        let rhoold = rho;
        let (c, s, rho_new) = sym_ortho(alphahat, beta);
        rho = rho_new;
        let thetanew = s * alpha;
        alphabar = c * alpha;

        let rhobarold = rhobar;
        let zetaold = zeta;
        let thetabar = sbar * rho;
        let rhotemp = cbar * rho;
        let (cbar_new, sbar_new, rhobar_new) = sym_ortho(cbar * rho, thetanew);
        cbar = cbar_new;
        sbar = sbar_new;
        rhobar = rhobar_new;
        zeta = cbar * zetabar;
        zetabar = -sbar * zetabar;

        // Update h, hbar and x
        hbar *= -(thetabar * rho / (rhoold * rhobarold));
        hbar += &h;
        x.axpy(zeta / (rho * rhobar), &hbar, 1.0);
        h *= -(thetanew / rho);
        h += &v;

        // Estimate ||r||
        let betaacute = chat * betadd;
        let betacheck = -shat * betadd;
        let betahat = c * betaacute;
        betadd = -s * betaacute;

        let thetatildeold = thetatilde;
        let (ctildeold, stildeold, rhotildeold) = sym_ortho(rhodold, thetabar);
        thetatilde = stildeold * rhobar;
        rhodold = ctildeold * rhobar;
        betad = -stildeold * betad + ctildeold * betahat;

        tautildeold = (zetaold - thetatildeold * tautildeold) / rhotildeold;
        let taud = (zeta - thetatilde * tautildeold) / rhodold;
        d += betacheck * betacheck;
        let normr = (d + (betad - taud).powi(2) + betadd * betadd).sqrt();

        // Estimate ||A|| and cond(A)
        normA2 += beta * beta;
        let normA = normA2.sqrt();
        normA2 += alpha * alpha;

        maxrbar = maxrbar.max(rhobarold);
        if iteration > 1 {
            minrbar = minrbar.min(rhobarold);
        }
        let condA = maxrbar.max(rhotemp) / minrbar.min(rhotemp);

        // Convergence tests
        let normar = zetabar.abs();
        let normx = x.norm();

        let test1 = normr / normb;
        let test2 = if normA * normr != 0.0 {
            normar / (normA * normr)
        } else {
            f64::INFINITY
        };
        let test3 = 1.0 / condA;
        let t1 = test1 / (1.0 + normA * normx / normb);
        let rtol = settings.btol + settings.atol * normA * normx / normb;

        let mut status = None;
        if iteration >= max_iterations {
            status = Some(LsmrStatus::IterationLimit);
        }
        if 1.0 + test3 <= 1.0 {
            status = Some(LsmrStatus::ConditionMachinePrecision);
        }
        if 1.0 + test2 <= 1.0 {
            status = Some(LsmrStatus::LeastSquaresMachinePrecision);
        }
        if 1.0 + t1 <= 1.0 {
            status = Some(LsmrStatus::CompatibleMachinePrecision);
        }
        if test3 <= ctol {
            status = Some(LsmrStatus::ConditionLimit);
        }
        if test2 <= settings.atol {
            status = Some(LsmrStatus::LeastSquares);
        }
        if test1 <= rtol {
            status = Some(LsmrStatus::Compatible);
        }

        if let Some(status) = status {
            outcome.status = status;
            outcome.iterations = iteration;
            outcome.residual_norm = normr;
            return outcome;
        }
    }
}

impl LinearSolver for LsmrSolver {
    fn analyze_pattern(&mut self, matrix: &CscMatrix<f64>) -> Result<(), SolverError> {
        check_upper_triangular(matrix.pattern())?;
        self.matrix = None;
        self.analyzed = Some(matrix.pattern().clone());
        Ok(())
    }

    fn set_matrix(&mut self, matrix: &CscMatrix<f64>) -> Result<(), SolverError> {
        let analyzed = self.analyzed.as_ref().ok_or(SolverError::NotAnalyzed)?;
        if matrix.pattern() != analyzed {
            self.matrix = None;
            return Err(SolverError::PatternMismatch);
        }
        self.matrix = Some(matrix.clone());
        Ok(())
    }

    fn solve(&mut self, rhs: DVectorView<f64>, mut x: DVectorViewMut<f64>) -> Result<(), SolverError> {
        let matrix = self.matrix.as_ref().ok_or(SolverError::NotFactorized)?;
        let n = matrix.ncols();
        for len in [rhs.len(), x.len()] {
            if len != n {
                return Err(SolverError::DimensionMismatch {
                    expected: n,
                    actual: len,
                });
            }
        }

        let mut solution = DVector::zeros(n);
        let outcome = lsmr(matrix, rhs, &mut solution, &self.settings);
        self.status = Some(outcome.status);
        self.iterations = outcome.iterations;
        debug!(
            "LSMR finished after {} iterations with status {:?} (residual norm {:e})",
            outcome.iterations, outcome.status, outcome.residual_norm
        );

        if outcome.status == LsmrStatus::IterationLimit {
            return Err(SolverError::NotConverged {
                iterations: outcome.iterations,
                residual_norm: outcome.residual_norm,
            });
        }

        x.copy_from(&solution);
        Ok(())
    }
}
