//! The equation system and its Newton solve loop.
use crate::assembly::{GlobalAssembler, GlobalSystem};
use crate::dof::Dof;
use crate::element::{Element, ElementOptions};
use crate::error::Error;
use crate::indexing::{DofNumbering, IndexTable, SystemLayout};
use crate::options::{SolveOptions, SystemOptions};
use crate::report::{LogReporter, ProgressReporter};
use eqsys_sparse::{LinearSolver, SolverError};
use log::{debug, warn};
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use nalgebra_sparse::pattern::SparsityPattern;
use nalgebra_sparse::CscMatrix;
use std::fmt;
use std::sync::Arc;

/// Why the last solve loop stopped.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub enum StoppingReason {
    #[default]
    NotSolved,
    ConvergedResidual,
    ConvergedStep,
    MaxIterationsReached,
    LinearSolverFailed,
}

impl StoppingReason {
    pub fn code(&self) -> i32 {
        match self {
            StoppingReason::NotSolved => -1,
            StoppingReason::ConvergedResidual => 0,
            StoppingReason::ConvergedStep => 1,
            StoppingReason::MaxIterationsReached => 2,
            StoppingReason::LinearSolverFailed => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            -1 => Some(StoppingReason::NotSolved),
            0 => Some(StoppingReason::ConvergedResidual),
            1 => Some(StoppingReason::ConvergedStep),
            2 => Some(StoppingReason::MaxIterationsReached),
            3 => Some(StoppingReason::LinearSolverFailed),
            _ => None,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            StoppingReason::NotSolved => "Not solved",
            StoppingReason::ConvergedResidual => "A solution was found, given rtol",
            StoppingReason::ConvergedStep => "A solution was found, given xtol",
            StoppingReason::MaxIterationsReached => "The iteration limit was reached",
            StoppingReason::LinearSolverFailed => "The linear solver failed",
        }
    }

    /// The message of the reason with the given code.
    pub fn message_for_code(code: i32) -> &'static str {
        Self::from_code(code)
            .map(|reason| reason.message())
            .unwrap_or("Error. Unknown stopping reason")
    }

    pub fn is_converged(&self) -> bool {
        matches!(self, StoppingReason::ConvergedResidual | StoppingReason::ConvergedStep)
    }
}

impl fmt::Display for StoppingReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message())
    }
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SolveReport {
    pub stopping_reason: StoppingReason,
    /// Number of Newton updates applied to the DOFs.
    pub iterations: usize,
    /// Norm of the last computed residual.
    pub residual_norm: f64,
}

/// A nonlinear equation system assembled from elements.
///
/// Construction numbers the DOFs of all elements, builds the per-element index tables and
/// analyzes the sparsity pattern of the Jacobian once. Afterwards the system can be assembled
/// and solved any number of times, as long as the DOF lists and the fixed flags of the DOFs do
/// not change. Values of the DOFs may change freely between solves.
pub struct System {
    elements: Vec<Arc<dyn Element>>,
    numbering: DofNumbering,
    index_table: IndexTable,
    global: GlobalSystem,
    target: DVector<f64>,
    residual: DVector<f64>,
    step: DVector<f64>,
    linear_solver: Box<dyn LinearSolver>,
    assembler: Box<dyn GlobalAssembler>,
    stopping_reason: StoppingReason,
    linear_solver_failure: Option<SolverError>,
}

impl fmt::Debug for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("System")
            .field("nb_elements", &self.elements.len())
            .field("nb_free_dofs", &self.nb_free_dofs())
            .field("nb_fixed_dofs", &self.nb_fixed_dofs())
            .field("nnz", &self.global.jacobian().nnz())
            .field("stopping_reason", &self.stopping_reason)
            .finish()
    }
}

impl System {
    /// Creates a system with the default options.
    pub fn new(elements: Vec<Arc<dyn Element>>) -> Result<Self, Error> {
        Self::with_options(elements, &SystemOptions::default())
    }

    pub fn with_options(elements: Vec<Arc<dyn Element>>, options: &SystemOptions) -> Result<Self, Error> {
        let kind = options.linear_solver_kind()?;
        let assembler = options.assembly.build()?;
        let SystemLayout {
            numbering,
            index_table,
            pattern,
        } = SystemLayout::from_elements(&elements)?;

        let global = GlobalSystem::from_pattern(pattern);
        let mut linear_solver = kind.build(options);
        linear_solver.analyze_pattern(global.jacobian())?;
        debug!("Using linear solver {} and {:?} assembly", kind, options.assembly);

        let nb_free = numbering.nb_free();
        Ok(Self {
            elements,
            numbering,
            index_table,
            global,
            target: DVector::zeros(nb_free),
            residual: DVector::zeros(nb_free),
            step: DVector::zeros(nb_free),
            linear_solver,
            assembler,
            stopping_reason: StoppingReason::NotSolved,
            linear_solver_failure: None,
        })
    }

    pub fn nb_dofs(&self) -> usize {
        self.numbering.nb_dofs()
    }

    pub fn nb_free_dofs(&self) -> usize {
        self.numbering.nb_free()
    }

    pub fn nb_fixed_dofs(&self) -> usize {
        self.numbering.nb_fixed()
    }

    /// All DOFs in global order: free DOFs first, then fixed DOFs.
    pub fn dofs(&self) -> &[Dof] {
        self.numbering.dofs()
    }

    pub fn dof_index(&self, dof: &Dof) -> Result<usize, Error> {
        self.numbering.index_of(dof).ok_or(Error::UnknownDof)
    }

    /// The last assembled Jacobian. Only the upper triangle is stored.
    pub fn jacobian(&self) -> &CscMatrix<f64> {
        self.global.jacobian()
    }

    /// The last assembled right-hand side, i.e. the sum of the element residuals.
    pub fn rhs(&self) -> &DVector<f64> {
        self.global.rhs()
    }

    pub fn target(&self) -> &DVector<f64> {
        &self.target
    }

    /// The residual `rhs - target` of the last iteration.
    pub fn residual(&self) -> &DVector<f64> {
        &self.residual
    }

    pub fn pattern(&self) -> &SparsityPattern {
        self.global.jacobian().pattern()
    }

    pub fn index_table(&self) -> &IndexTable {
        &self.index_table
    }

    pub fn elements(&self) -> &[Arc<dyn Element>] {
        &self.elements
    }

    pub fn stopping_reason(&self) -> StoppingReason {
        self.stopping_reason
    }

    pub fn stopping_reason_message(&self) -> &'static str {
        self.stopping_reason.message()
    }

    /// The error of the linear solver if the last solve stopped because of it.
    pub fn linear_solver_failure(&self) -> Option<&SolverError> {
        self.linear_solver_failure.as_ref()
    }

    /// Zeroes and assembles the Jacobian and right-hand side with the configured assembler.
    pub fn compute(&mut self, options: &ElementOptions) -> Result<(), Error> {
        self.global.set_zero();
        self.assembler
            .assemble(&self.elements, &self.index_table, options, &mut self.global)
    }

    /// Zeroes and assembles the Jacobian and right-hand side with the given assembler.
    pub fn compute_with(&mut self, assembler: &dyn GlobalAssembler, options: &ElementOptions) -> Result<(), Error> {
        self.global.set_zero();
        assembler.assemble(&self.elements, &self.index_table, options, &mut self.global)
    }

    /// Runs the Newton loop, reporting progress through the `log` facade.
    pub fn solve(&mut self, options: &SolveOptions) -> Result<SolveReport, Error> {
        self.solve_with_reporter(options, &mut LogReporter)
    }

    /// Runs the Newton loop until the residual or the step is small enough, the iteration
    /// limit is reached or the linear solver fails.
    ///
    /// Every iteration assembles the system, computes `residual = rhs - lambda * target`,
    /// solves `J step = residual` and subtracts `step` from the deltas of the free DOFs.
    /// When the loop stops, the residual of each free DOF is written back to it.
    ///
    /// Errors of elements abort the loop. In that case the DOF residuals are left untouched
    /// and the updates of completed iterations remain applied.
    pub fn solve_with_reporter(
        &mut self,
        options: &SolveOptions,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<SolveReport, Error> {
        self.stopping_reason = StoppingReason::NotSolved;
        self.linear_solver_failure = None;

        for (target, dof) in self.target.iter_mut().zip(self.numbering.free_dofs()) {
            *target = dof.target() * options.lambda;
        }

        let mut element_options = options.element_options.clone();
        let mut iteration = 0;
        let mut residual_norm = self.residual.norm();

        let stopping_reason = loop {
            if iteration >= options.max_iterations {
                break StoppingReason::MaxIterationsReached;
            }

            element_options.set_iteration(iteration);
            self.compute(&element_options)?;

            self.residual.copy_from(self.global.rhs());
            self.residual -= &self.target;
            residual_norm = self.residual.norm();
            reporter.report(iteration, residual_norm);

            if residual_norm < options.rtol {
                break StoppingReason::ConvergedResidual;
            }

            if let Err(err) = self.solve_step() {
                warn!("Linear solver failed in iteration {}: {}", iteration, err);
                self.linear_solver_failure = Some(err);
                break StoppingReason::LinearSolverFailed;
            }

            for (dof, step) in self.numbering.free_dofs().iter().zip(self.step.iter()) {
                dof.set_delta(dof.delta() - step);
            }
            iteration += 1;

            let step_norm = self.step.norm();
            debug!("Newton step norm at iteration {}: {:e}", iteration, step_norm);
            if step_norm < options.xtol {
                break StoppingReason::ConvergedStep;
            }
        };

        for (dof, residual) in self.numbering.free_dofs().iter().zip(self.residual.iter()) {
            dof.set_residual(*residual);
        }
        self.stopping_reason = stopping_reason;

        Ok(SolveReport {
            stopping_reason,
            iterations: iteration,
            residual_norm,
        })
    }

    /// Factorizes the current Jacobian and solves `J step = residual`.
    fn solve_step(&mut self) -> Result<(), SolverError> {
        self.linear_solver.set_matrix(self.global.jacobian())?;
        self.linear_solver
            .solve(DVectorView::from(&self.residual), DVectorViewMut::from(&mut self.step))
    }
}
