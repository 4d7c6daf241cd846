//! The contract between user-supplied elements and the assembly machinery.
use crate::dof::Dof;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A contribution to the global equation system.
///
/// An element couples an ordered list of DOFs. Given the current DOF state, it computes a local
/// residual vector and a local Jacobian whose rows and columns follow the order of
/// [`dofs`](Self::dofs). The local Jacobian is expected to be symmetric. For every pair of DOFs,
/// assembly reads the entry whose row belongs to the DOF with the smaller global index.
///
/// Assemblers may call [`compute`](Self::compute) for different elements concurrently.
pub trait Element: Send + Sync {
    fn dofs(&self) -> Vec<Dof>;

    fn compute(&self, options: &ElementOptions) -> eyre::Result<LocalSystem>;
}

/// Local residual and Jacobian of a single element.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalSystem {
    pub jacobian: DMatrix<f64>,
    pub residual: DVector<f64>,
}

impl LocalSystem {
    pub fn new(jacobian: DMatrix<f64>, residual: DVector<f64>) -> Self {
        Self { jacobian, residual }
    }

    pub fn zeros(n: usize) -> Self {
        Self {
            jacobian: DMatrix::zeros(n, n),
            residual: DVector::zeros(n),
        }
    }
}

/// Options passed through to [`Element::compute`].
///
/// Besides the current Newton iteration, which the solve loop sets before every assembly,
/// the options carry arbitrary named parameters for the elements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ElementOptions {
    iteration: Option<usize>,
    #[serde(flatten)]
    parameters: BTreeMap<String, f64>,
}

impl ElementOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn iteration(&self) -> Option<usize> {
        self.iteration
    }

    pub fn set_iteration(&mut self, iteration: usize) {
        self.iteration = Some(iteration);
    }

    pub fn with_iteration(mut self, iteration: usize) -> Self {
        self.set_iteration(iteration);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.parameters.get(name).copied()
    }

    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.get(name).unwrap_or(default)
    }

    pub fn set(&mut self, name: impl Into<String>, value: f64) {
        self.parameters.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.set(name, value);
        self
    }

    pub fn parameters(&self) -> impl Iterator<Item = (&str, f64)> {
        self.parameters.iter().map(|(name, value)| (name.as_str(), *value))
    }
}
