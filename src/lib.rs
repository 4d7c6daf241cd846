//! Assembly of sparse nonlinear equation systems from element contributions.
//!
//! Users describe a problem as a list of [`Element`](element::Element)s. Each element couples
//! a few [`Dof`](dof::Dof)s and computes a local residual and Jacobian from their current
//! values. A [`System`](system::System) numbers the DOFs, analyzes the sparsity pattern of the
//! global Jacobian once, and then repeatedly assembles and solves the global system in a
//! Newton loop until the residual vanishes.
//!
//! Assembly can run serially, as a fork-join reduction on a thread pool, or as a pipeline of
//! compute workers feeding a single merging stage. Linear systems are solved by one of the
//! solvers of [`sparse`].

pub mod assembly;
pub mod dof;
pub mod element;
pub mod error;
pub mod indexing;
pub mod node;
pub mod options;
pub mod report;
pub mod system;

pub mod sparse {
    pub use eqsys_sparse::*;
}

pub use dof::Dof;
pub use element::{Element, ElementOptions, LocalSystem};
pub use error::Error;
pub use node::Node;
pub use options::{SolveOptions, SystemOptions};
pub use system::{SolveReport, StoppingReason, System};

pub extern crate eyre;
pub extern crate nalgebra;
pub extern crate nalgebra_sparse;
