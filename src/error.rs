//! Errors reported by system construction, assembly and the solve loop.
use eqsys_sparse::SolverError;
use std::error;
use std::fmt;
use std::fmt::Display;

#[derive(Debug)]
pub enum Error {
    /// No linear solver is registered under the given name.
    UnknownLinearSolver(String),
    /// The worker thread pool could not be created.
    ThreadPool(rayon::ThreadPoolBuildError),
    /// The DOF is not referenced by any element of the system.
    UnknownDof,
    /// An element returned local data whose dimensions do not match its DOF list.
    DimensionMismatch {
        element: usize,
        dofs: usize,
        jacobian: (usize, usize),
        residual: usize,
    },
    /// The element failed to compute its local system.
    ElementFailure { element: usize, report: eyre::Report },
    /// The linear solver rejected the system during setup.
    LinearSolver(SolverError),
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::UnknownLinearSolver(name) => write!(f, "Unknown linear solver \"{}\".", name),
            Error::ThreadPool(err) => write!(f, "Failed to build thread pool: {}", err),
            Error::UnknownDof => write!(f, "The DOF is not part of the system."),
            Error::DimensionMismatch {
                element,
                dofs,
                jacobian,
                residual,
            } => write!(
                f,
                "Element {} has {} DOFs, but returned a {}x{} jacobian and a residual of length {}.",
                element, dofs, jacobian.0, jacobian.1, residual
            ),
            Error::ElementFailure { element, report } => {
                write!(f, "Element {} failed to compute: {}", element, report)
            }
            Error::LinearSolver(err) => write!(f, "Linear solver error: {}", err),
        }
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::ThreadPool(err) => Some(err),
            Error::ElementFailure { report, .. } => Some(&**report),
            Error::LinearSolver(err) => Some(err),
            _ => None,
        }
    }
}

impl From<SolverError> for Error {
    fn from(err: SolverError) -> Self {
        Error::LinearSolver(err)
    }
}
