use crate::unit_tests::{elements_from_connectivity, FailingElement, LinearElement, OversizedElement};
use eqsys::assembly::{
    Accumulator, AssemblyStrategy, GlobalAssembler, GlobalSystem, PipelineAssembler, ReductionAssembler,
    SerialAssembler,
};
use eqsys::indexing::SystemLayout;
use eqsys::{Dof, Element, ElementOptions, Error, LocalSystem};
use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use proptest::collection::vec;
use proptest::prelude::*;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

fn assemble(
    assembler: &dyn GlobalAssembler,
    elements: &[Arc<dyn Element>],
    layout: &SystemLayout,
) -> Result<GlobalSystem, Error> {
    let mut system = GlobalSystem::from_pattern(layout.pattern.clone());
    assembler.assemble(elements, &layout.index_table, &ElementOptions::default(), &mut system)?;
    Ok(system)
}

/// Dense assembly of the free-free block, assuming no element lists a DOF twice.
fn dense_reference(elements: &[Arc<dyn Element>], layout: &SystemLayout) -> (DMatrix<f64>, DVector<f64>) {
    let nb_free = layout.numbering.nb_free();
    let mut jacobian = DMatrix::zeros(nb_free, nb_free);
    let mut rhs = DVector::zeros(nb_free);
    for element in elements {
        let local = element.compute(&ElementOptions::default()).unwrap();
        let globals: Vec<usize> = element
            .dofs()
            .iter()
            .map(|dof| layout.numbering.index_of(dof).unwrap())
            .collect();
        for (p, &gp) in globals.iter().enumerate() {
            if gp >= nb_free {
                continue;
            }
            rhs[gp] += local.residual[p];
            for (q, &gq) in globals.iter().enumerate() {
                if gq < nb_free {
                    jacobian[(gp, gq)] += local.jacobian[(p, q)];
                }
            }
        }
    }
    (jacobian, rhs)
}

fn assemblers() -> Vec<Box<dyn GlobalAssembler>> {
    vec![
        Box::new(SerialAssembler),
        Box::new(ReductionAssembler::new(3).unwrap()),
        Box::new(PipelineAssembler::new(3, 2)),
    ]
}

#[test]
fn assembly_matches_dense_reference() {
    let connectivity = vec![vec![0, 1, 2], vec![2, 3], vec![3, 4, 1], vec![5, 0], vec![4, 2, 0, 3]];
    let (_, elements) = elements_from_connectivity(6, &[1, 5], &connectivity);
    let layout = SystemLayout::from_elements(&elements).unwrap();
    let (dense_jacobian, dense_rhs) = dense_reference(&elements, &layout);

    for assembler in assemblers() {
        let system = assemble(assembler.as_ref(), &elements, &layout).unwrap();
        assert_eq!(system.nb_free(), 4);
        let jacobian = DMatrix::from(system.jacobian());
        assert_matrix_eq!(jacobian, dense_jacobian.upper_triangle(), comp = abs, tol = 1e-12);
        assert_matrix_eq!(system.rhs().clone(), dense_rhs, comp = abs, tol = 1e-12);
    }
}

#[test]
fn fixed_dofs_do_not_contribute() {
    let free = Dof::new(1.0);
    let fixed = Dof::fixed(5.0);
    let stiffness = DMatrix::from_row_slice(2, 2, &[2.0, -1.0, -1.0, 3.0]);
    let element: Arc<dyn Element> = Arc::new(LinearElement::new(
        vec![fixed.clone(), free.clone()],
        stiffness,
        DVector::zeros(2),
    ));
    let elements = vec![element];
    let layout = SystemLayout::from_elements(&elements).unwrap();
    let system = assemble(&SerialAssembler, &elements, &layout).unwrap();

    assert_eq!(system.jacobian().nrows(), 1);
    assert_eq!(system.jacobian().values(), &[3.0]);
    // The fixed DOF still enters the residual of the free DOF through the element
    assert_eq!(system.rhs().as_slice(), &[-1.0 * 5.0 + 3.0 * 1.0]);
}

#[test]
fn local_jacobian_is_read_in_global_order() {
    let first = Dof::new(0.0);
    let second = Dof::new(0.0);
    let numbering_element: Arc<dyn Element> = Arc::new(LinearElement::new(
        vec![first.clone(), second.clone()],
        DMatrix::zeros(2, 2),
        DVector::zeros(2),
    ));
    // Lists the DOFs in reverse global order, so local row 1 is global row 0
    #[rustfmt::skip]
    let stiffness = DMatrix::from_row_slice(2, 2, &[
        1.0, 2.0,
        3.0, 4.0
    ]);
    let reversed: Arc<dyn Element> = Arc::new(LinearElement::new(vec![second, first], stiffness, DVector::zeros(2)));
    let elements = vec![numbering_element, reversed];
    let layout = SystemLayout::from_elements(&elements).unwrap();

    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(2, 2, &[
        4.0, 3.0,
        0.0, 1.0
    ]);
    for assembler in assemblers() {
        let system = assemble(assembler.as_ref(), &elements, &layout).unwrap();
        assert_matrix_eq!(DMatrix::from(system.jacobian()), expected, comp = abs, tol = 1e-14);
    }
}

#[test]
fn serial_assembly_is_deterministic() {
    let connectivity: Vec<Vec<usize>> = (0..40).map(|e| vec![e % 17, (3 * e + 1) % 17, (7 * e + 2) % 17]).collect();
    let (_, elements) = elements_from_connectivity(17, &[0, 8], &connectivity);
    let layout = SystemLayout::from_elements(&elements).unwrap();
    let first = assemble(&SerialAssembler, &elements, &layout).unwrap();
    let second = assemble(&SerialAssembler, &elements, &layout).unwrap();
    assert_eq!(first, second);
}

#[test]
fn assembly_adds_to_existing_values() {
    let connectivity = vec![vec![0, 1], vec![1, 2]];
    let (_, elements) = elements_from_connectivity(3, &[], &connectivity);
    let layout = SystemLayout::from_elements(&elements).unwrap();

    let once = assemble(&SerialAssembler, &elements, &layout).unwrap();
    let mut twice = once.clone();
    SerialAssembler
        .assemble(&elements, &layout.index_table, &ElementOptions::default(), &mut twice)
        .unwrap();
    assert_matrix_eq!(DMatrix::from(twice.jacobian()), 2.0 * DMatrix::from(once.jacobian()));
    assert_eq!(twice.rhs(), &(2.0 * once.rhs()));

    twice.set_zero();
    assert!(twice.jacobian().values().iter().all(|&v| v == 0.0));
    assert!(twice.rhs().iter().all(|&v| v == 0.0));
}

#[test]
fn empty_element_list_assembles_empty_system() {
    let elements: Vec<Arc<dyn Element>> = Vec::new();
    let layout = SystemLayout::from_elements(&elements).unwrap();
    for assembler in assemblers() {
        let system = assemble(assembler.as_ref(), &elements, &layout).unwrap();
        assert_eq!(system.nb_free(), 0);
        assert_eq!(system.jacobian().nnz(), 0);
    }
}

#[test]
fn dimension_mismatch_is_detected_before_accumulation() {
    let dofs = [Dof::new(0.0), Dof::new(0.0)];
    let good: Arc<dyn Element> = Arc::new(LinearElement::new(
        dofs.to_vec(),
        DMatrix::identity(2, 2),
        DVector::from_column_slice(&[-1.0, -2.0]),
    ));
    let bad: Arc<dyn Element> = Arc::new(OversizedElement { dofs: dofs.to_vec() });
    let elements = vec![good, bad];
    let layout = SystemLayout::from_elements(&elements).unwrap();

    let mut system = GlobalSystem::from_pattern(layout.pattern.clone());
    let result = SerialAssembler.assemble(&elements, &layout.index_table, &ElementOptions::default(), &mut system);
    match result {
        Err(Error::DimensionMismatch {
            element,
            dofs,
            jacobian,
            residual,
        }) => {
            assert_eq!(element, 1);
            assert_eq!(dofs, 2);
            assert_eq!(jacobian, (3, 3));
            assert_eq!(residual, 3);
        }
        other => panic!("Expected dimension mismatch, got {:?}", other),
    }
    // Only the first element made it into the system
    assert_eq!(system.rhs().as_slice(), &[1.0, 2.0]);
    assert_eq!(system.jacobian().values(), &[1.0, 0.0, 1.0]);

    for assembler in assemblers() {
        let result = assemble(assembler.as_ref(), &elements, &layout);
        assert!(matches!(result, Err(Error::DimensionMismatch { element: 1, .. })));
    }
}

#[test]
fn element_failure_aborts_every_assembler() {
    let dofs: Vec<Dof> = (0..60).map(|_| Dof::new(0.0)).collect();
    let elements: Vec<Arc<dyn Element>> = dofs
        .windows(2)
        .enumerate()
        .map(|(index, pair)| {
            let fail_at = if index == 31 { 0 } else { usize::MAX };
            Arc::new(FailingElement {
                dofs: pair.to_vec(),
                fail_at,
            }) as Arc<dyn Element>
        })
        .collect();
    let layout = SystemLayout::from_elements(&elements).unwrap();

    let mut all_assemblers = assemblers();
    all_assemblers.push(Box::new(PipelineAssembler::new(1, 1)));
    all_assemblers.push(Box::new(PipelineAssembler::new(8, 3)));
    for assembler in all_assemblers {
        match assemble(assembler.as_ref(), &elements, &layout) {
            Err(Error::ElementFailure { element, report }) => {
                assert_eq!(element, 31);
                assert!(report.to_string().contains("gave up"));
            }
            other => panic!("Expected element failure, got {:?}", other),
        }
    }
}

/// Panics whenever it is computed.
struct PanickingElement {
    dofs: Vec<Dof>,
}

impl Element for PanickingElement {
    fn dofs(&self) -> Vec<Dof> {
        self.dofs.clone()
    }

    fn compute(&self, _options: &ElementOptions) -> eyre::Result<LocalSystem> {
        panic!("element exploded");
    }
}

#[test]
fn element_panic_propagates_from_every_assembler() {
    let dofs: Vec<Dof> = (0..10).map(|_| Dof::new(0.0)).collect();
    let elements: Vec<Arc<dyn Element>> = dofs
        .windows(2)
        .enumerate()
        .map(|(index, pair)| {
            if index == 0 {
                Arc::new(PanickingElement { dofs: pair.to_vec() }) as Arc<dyn Element>
            } else {
                Arc::new(LinearElement::new(pair.to_vec(), DMatrix::identity(2, 2), DVector::zeros(2)))
            }
        })
        .collect();
    let layout = SystemLayout::from_elements(&elements).unwrap();

    let mut all_assemblers = assemblers();
    all_assemblers.push(Box::new(PipelineAssembler::new(1, 1)));
    all_assemblers.push(Box::new(PipelineAssembler::new(2, 1)));
    all_assemblers.push(Box::new(PipelineAssembler::new(4, 8)));

    // Assemble on a separate thread so that a hanging assembler fails the test instead of
    // blocking it forever
    let (sender, receiver) = mpsc::channel();
    thread::spawn(move || {
        let messages: Vec<Option<String>> = all_assemblers
            .iter()
            .map(|assembler| {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    assemble(assembler.as_ref(), &elements, &layout)
                }));
                outcome.err().and_then(|payload| payload.downcast_ref::<&str>().map(|s| s.to_string()))
            })
            .collect();
        sender.send(messages).unwrap();
    });

    let messages = receiver
        .recv_timeout(Duration::from_secs(60))
        .expect("Assembly did not return after an element panicked");
    assert_eq!(messages.len(), 6);
    for message in messages {
        assert_eq!(message.as_deref(), Some("element exploded"));
    }
}

#[test]
fn reduction_accumulators_merge_by_addition() {
    let connectivity = vec![vec![0, 1], vec![1, 2], vec![2, 0]];
    let (_, elements) = elements_from_connectivity(3, &[], &connectivity);
    let layout = SystemLayout::from_elements(&elements).unwrap();
    let options = ElementOptions::default();

    let identity = Accumulator::identity(&layout.pattern);
    assert!(identity.values().iter().all(|&v| v == 0.0));
    assert_eq!(identity.rhs().len(), 3);

    let left = Accumulator::identity(&layout.pattern)
        .accumulate(&elements, &layout.index_table, &options, 0..1)
        .unwrap();
    let right = Accumulator::identity(&layout.pattern)
        .accumulate(&elements, &layout.index_table, &options, 1..3)
        .unwrap();
    let merged = left.merge(right).merge(identity);

    let serial = assemble(&SerialAssembler, &elements, &layout).unwrap();
    for (a, b) in merged.values().iter().zip(serial.jacobian().values()) {
        assert!((a - b).abs() <= 1e-14);
    }
    for (a, b) in merged.rhs().iter().zip(serial.rhs().iter()) {
        assert!((a - b).abs() <= 1e-14);
    }
}

#[test]
fn assembly_strategy_builds_assemblers() {
    assert_eq!(AssemblyStrategy::default(), AssemblyStrategy::Reduction { num_threads: 0 });
    for strategy in [
        AssemblyStrategy::Serial,
        AssemblyStrategy::Reduction { num_threads: 2 },
        AssemblyStrategy::Pipeline {
            num_workers: 2,
            depth: 4,
        },
    ] {
        assert!(strategy.build().is_ok());
    }

    let pipeline = PipelineAssembler::default();
    assert_eq!(pipeline.depth(), 8);
    assert!(pipeline.num_workers() >= 1);
    assert_eq!(PipelineAssembler::new(2, 0).depth(), 1);
    assert_eq!(ReductionAssembler::new(2).unwrap().num_threads(), 2);
}

fn relative_difference(a: &[f64], b: &[f64]) -> f64 {
    let norm = |v: &[f64]| v.iter().map(|x| x * x).sum::<f64>().sqrt();
    let diff: Vec<f64> = a.iter().zip(b).map(|(x, y)| x - y).collect();
    norm(&diff) / norm(b).max(1.0)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn parallel_assembly_matches_serial(
        (nb_dofs, fixed, connectivity) in (2..20usize).prop_flat_map(|nb_dofs| {
            (Just(nb_dofs), vec(0..nb_dofs, 0..3), vec(vec(0..nb_dofs, 1..6), 0..60))
        }),
        num_threads in 1..5usize,
        num_workers in 1..5usize,
        depth in 1..9usize,
    ) {
        let (_, elements) = elements_from_connectivity(nb_dofs, &fixed, &connectivity);
        let layout = SystemLayout::from_elements(&elements).unwrap();
        let serial = assemble(&SerialAssembler, &elements, &layout).unwrap();

        let reduction = ReductionAssembler::new(num_threads).unwrap();
        let pipeline = PipelineAssembler::new(num_workers, depth);
        for parallel in [&reduction as &dyn GlobalAssembler, &pipeline] {
            let system = assemble(parallel, &elements, &layout).unwrap();
            prop_assert!(relative_difference(system.jacobian().values(), serial.jacobian().values()) < 1e-12);
            prop_assert!(relative_difference(system.rhs().as_slice(), serial.rhs().as_slice()) < 1e-12);
        }
    }
}
