//! Sparse linear algebra for symmetric equation systems.
//!
//! All matrices handled by this crate are square CSC matrices storing only the *upper*
//! triangle (`row <= col`) of a symmetric matrix. The lower triangle is implied.

pub mod ldlt;
pub mod lsmr;
pub mod solver;
pub mod symmetric;

pub use ldlt::LdltSolver;
pub use lsmr::{LsmrSettings, LsmrSolver, LsmrStatus};
pub use solver::{LinearSolver, SolverError};

pub extern crate nalgebra_sparse;
