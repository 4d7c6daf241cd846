use eqsys::Dof;
use std::collections::HashSet;

#[test]
fn dof_actual_value_is_reference_plus_delta() {
    let dof = Dof::new(2.0);
    assert_eq!(dof.act_value(), 2.0);
    assert!(!dof.is_fixed());

    dof.set_delta(0.5);
    assert_eq!(dof.act_value(), 2.5);

    dof.set_act_value(1.0);
    assert_eq!(dof.ref_value(), 2.0);
    assert_eq!(dof.delta(), -1.0);
    assert_eq!(dof.act_value(), 1.0);
}

#[test]
fn dof_state_is_shared_between_handles() {
    let dof = Dof::new(0.0);
    let other = dof.clone();
    other.set_target(3.0);
    other.set_residual(-1.0);
    other.set_fixed(true);

    assert_eq!(dof.target(), 3.0);
    assert_eq!(dof.residual(), -1.0);
    assert!(dof.is_fixed());
    assert!(Dof::fixed(1.0).is_fixed());
}

#[test]
fn dof_identity_ignores_values() {
    let a = Dof::new(1.0);
    let b = Dof::new(1.0);
    assert_ne!(a, b);
    assert_eq!(a, a.clone());
    assert!(a.ptr_eq(&a.clone()));

    let set: HashSet<Dof> = [a.clone(), b.clone(), a.clone()].into_iter().collect();
    assert_eq!(set.len(), 2);

    // Mutation must not change the identity
    a.set_delta(10.0);
    assert!(set.contains(&a));
}
