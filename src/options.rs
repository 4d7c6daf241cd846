//! Configuration of system construction and of the solve loop.
use crate::assembly::AssemblyStrategy;
use crate::element::ElementOptions;
use crate::error::Error;
use eqsys_sparse::{LdltSolver, LinearSolver, LsmrSettings, LsmrSolver};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The linear solvers that can be selected by name.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LinearSolverKind {
    /// Direct sparse `L D L^T` factorization, selected by `"ldlt"`.
    Ldlt,
    /// Iterative least-squares solver, selected by `"lsmr"`.
    Lsmr,
}

impl LinearSolverKind {
    pub fn name(&self) -> &'static str {
        match self {
            LinearSolverKind::Ldlt => "ldlt",
            LinearSolverKind::Lsmr => "lsmr",
        }
    }

    pub fn build(&self, options: &SystemOptions) -> Box<dyn LinearSolver> {
        match self {
            LinearSolverKind::Ldlt => Box::new(LdltSolver::new()),
            LinearSolverKind::Lsmr => Box::new(LsmrSolver::with_settings(options.lsmr)),
        }
    }
}

impl FromStr for LinearSolverKind {
    type Err = Error;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "ldlt" => Ok(LinearSolverKind::Ldlt),
            "lsmr" => Ok(LinearSolverKind::Lsmr),
            _ => Err(Error::UnknownLinearSolver(name.to_string())),
        }
    }
}

impl fmt::Display for LinearSolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Options used when a [`System`](crate::system::System) is constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemOptions {
    /// Name of the linear solver, `"ldlt"` or `"lsmr"`.
    pub linear_solver: String,
    /// Settings of the `lsmr` solver.
    pub lsmr: LsmrSettings,
    pub assembly: AssemblyStrategy,
}

impl Default for SystemOptions {
    fn default() -> Self {
        Self {
            linear_solver: LinearSolverKind::Ldlt.name().to_string(),
            lsmr: LsmrSettings::default(),
            assembly: AssemblyStrategy::default(),
        }
    }
}

impl SystemOptions {
    pub fn with_linear_solver(mut self, name: impl Into<String>) -> Self {
        self.linear_solver = name.into();
        self
    }

    pub fn with_lsmr_settings(mut self, settings: LsmrSettings) -> Self {
        self.lsmr = settings;
        self
    }

    pub fn with_assembly(mut self, assembly: AssemblyStrategy) -> Self {
        self.assembly = assembly;
        self
    }

    pub fn linear_solver_kind(&self) -> Result<LinearSolverKind, Error> {
        self.linear_solver.parse()
    }
}

/// Options of a single call to [`System::solve`](crate::system::System::solve).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolveOptions {
    /// Load factor applied to the DOF targets.
    pub lambda: f64,
    #[serde(alias = "maxiter")]
    pub max_iterations: usize,
    /// The loop stops once the residual norm drops below this value.
    pub rtol: f64,
    /// The loop stops once the norm of the Newton step drops below this value.
    pub xtol: f64,
    /// Passed to every element. The current iteration is filled in by the solve loop.
    pub element_options: ElementOptions,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            lambda: 1.0,
            max_iterations: 100,
            rtol: 1e-7,
            xtol: 1e-7,
            element_options: ElementOptions::default(),
        }
    }
}

impl SolveOptions {
    pub fn with_lambda(mut self, lambda: f64) -> Self {
        self.lambda = lambda;
        self
    }

    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_rtol(mut self, rtol: f64) -> Self {
        self.rtol = rtol;
        self
    }

    pub fn with_xtol(mut self, xtol: f64) -> Self {
        self.xtol = xtol;
        self
    }

    pub fn with_element_options(mut self, element_options: ElementOptions) -> Self {
        self.element_options = element_options;
        self
    }
}
