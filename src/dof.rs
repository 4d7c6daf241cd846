//! Degrees of freedom.
//!
//! A [`Dof`] is a shared handle to a single scalar unknown. Elements hold handles to the DOFs
//! they couple, and the [`System`](crate::system::System) writes increments and residuals back
//! through the same handles. Two handles are equal if and only if they refer to the same
//! variable, regardless of the values they hold.
use parking_lot::RwLock;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

#[derive(Debug, Copy, Clone, PartialEq)]
struct VariableState {
    ref_value: f64,
    delta: f64,
    target: f64,
    residual: f64,
    is_fixed: bool,
}

/// The shared state behind a [`Dof`].
pub struct Variable {
    state: RwLock<VariableState>,
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("Variable")
            .field("ref_value", &state.ref_value)
            .field("delta", &state.delta)
            .field("target", &state.target)
            .field("residual", &state.residual)
            .field("is_fixed", &state.is_fixed)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Dof {
    variable: Arc<Variable>,
}

impl Dof {
    /// Creates a free DOF with the given reference value.
    pub fn new(ref_value: f64) -> Self {
        Self::with_state(VariableState {
            ref_value,
            delta: 0.0,
            target: 0.0,
            residual: 0.0,
            is_fixed: false,
        })
    }

    /// Creates a fixed (prescribed) DOF with the given reference value.
    pub fn fixed(ref_value: f64) -> Self {
        let dof = Self::new(ref_value);
        dof.set_fixed(true);
        dof
    }

    fn with_state(state: VariableState) -> Self {
        Self {
            variable: Arc::new(Variable {
                state: RwLock::new(state),
            }),
        }
    }

    pub fn ref_value(&self) -> f64 {
        self.variable.state.read().ref_value
    }

    pub fn set_ref_value(&self, value: f64) {
        self.variable.state.write().ref_value = value;
    }

    pub fn delta(&self) -> f64 {
        self.variable.state.read().delta
    }

    pub fn set_delta(&self, value: f64) {
        self.variable.state.write().delta = value;
    }

    /// The actual value `ref_value + delta`.
    pub fn act_value(&self) -> f64 {
        let state = self.variable.state.read();
        state.ref_value + state.delta
    }

    /// Sets the actual value by adjusting `delta`. The reference value is left unchanged.
    pub fn set_act_value(&self, value: f64) {
        let mut state = self.variable.state.write();
        state.delta = value - state.ref_value;
    }

    pub fn target(&self) -> f64 {
        self.variable.state.read().target
    }

    pub fn set_target(&self, value: f64) {
        self.variable.state.write().target = value;
    }

    pub fn residual(&self) -> f64 {
        self.variable.state.read().residual
    }

    pub fn set_residual(&self, value: f64) {
        self.variable.state.write().residual = value;
    }

    pub fn is_fixed(&self) -> bool {
        self.variable.state.read().is_fixed
    }

    pub fn set_fixed(&self, is_fixed: bool) {
        self.variable.state.write().is_fixed = is_fixed;
    }

    /// Returns `true` if both handles refer to the same variable.
    pub fn ptr_eq(&self, other: &Dof) -> bool {
        Arc::ptr_eq(&self.variable, &other.variable)
    }
}

impl Default for Dof {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl PartialEq for Dof {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Dof {}

impl Hash for Dof {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.variable).hash(state)
    }
}
