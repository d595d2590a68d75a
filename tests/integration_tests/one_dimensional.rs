use super::all_strategy_settings;
use std::f64::consts::PI;
use substruct::boundary::BoundaryConditions;
use substruct::procedural::SegmentMesh;
use substruct::{DiscretizationContext, ErrorCategory, MatrixKey, SolverSettings, SolverStrategy};

fn assert_close(actual: f64, expected: f64, tol: f64) {
    assert!(
        (actual - expected).abs() <= tol,
        "expected {expected}, got {actual} (tolerance {tol:e})"
    );
}

#[test]
fn two_elements_left_dirichlet_right_natural() {
    // -u'' = δ(x - 1) on [0, 2], u(0) = 1, u'(2) = 0: u = 1 + x on [0, 1], u = 2 on [1, 2]
    let mesh = SegmentMesh::uniform(0.0, 2.0, 2, 3).unwrap();
    let bcs = BoundaryConditions::new().with_dirichlet(mesh.first_vertex(), vec![1.0]);
    let rhs = mesh.point_load(1, 1.0);

    for settings in all_strategy_settings() {
        let context = DiscretizationContext::new(&mesh, bcs.clone(), settings.clone()).unwrap();
        let map = context.assembly_map();
        assert_eq!(map.num_free_bnd_dofs(), 2);
        assert_eq!(map.num_free_dofs(), 2 + 2 * 2);

        let output = context
            .solve(&MatrixKey::laplacian(), rhs.as_slice())
            .unwrap();
        let u = output.solution.as_slice();
        for &(x, expected) in &[(0.0, 1.0), (0.25, 1.25), (0.5, 1.5), (1.0, 2.0), (1.5, 2.0), (2.0, 2.0)] {
            assert_close(mesh.evaluate(u, x).unwrap(), expected, 1e-9);
        }
        if settings.strategy.is_direct() {
            assert_eq!(output.iterations, 0);
        }
    }
}

#[test]
fn two_elements_with_dirichlet_at_both_ends() {
    // -u'' = δ(x - 1) on [0, 2], u(0) = u(2) = 1: u = 1 + x / 2 on [0, 1], u = 2 - x / 2 on [1, 2]
    let mesh = SegmentMesh::uniform(0.0, 2.0, 2, 3).unwrap();
    let bcs = BoundaryConditions::new()
        .with_dirichlet(mesh.first_vertex(), vec![1.0])
        .with_dirichlet(mesh.last_vertex(), vec![1.0]);
    let rhs = mesh.point_load(1, 1.0);

    for settings in all_strategy_settings() {
        let context = DiscretizationContext::new(&mesh, bcs.clone(), settings).unwrap();
        assert_eq!(context.assembly_map().num_free_bnd_dofs(), 1);
        assert_eq!(context.dirichlet_values().as_slice(), &[1.0, 1.0]);

        let output = context
            .solve(&MatrixKey::laplacian(), rhs.as_slice())
            .unwrap();
        let u = output.solution.as_slice();
        assert_close(mesh.evaluate(u, 1.0).unwrap(), 1.5, 1e-9);
        assert_close(mesh.evaluate(u, 0.5).unwrap(), 1.25, 1e-9);
        assert_close(mesh.evaluate(u, 1.75).unwrap(), 1.125, 1e-9);
    }
}

#[test]
fn helmholtz_with_manufactured_solution() {
    let lambda = 3.0;
    let mesh = SegmentMesh::uniform(0.0, 1.0, 4, 6).unwrap();
    let bcs = BoundaryConditions::new()
        .with_dirichlet(mesh.first_vertex(), vec![0.0])
        .with_dirichlet(mesh.last_vertex(), vec![0.0]);
    let rhs = mesh.inner_products(|x| (PI * PI + lambda) * (PI * x).sin());

    for settings in all_strategy_settings() {
        let context = DiscretizationContext::new(&mesh, bcs.clone(), settings).unwrap();
        let output = context
            .solve(&MatrixKey::helmholtz(lambda), rhs.as_slice())
            .unwrap();
        for i in 0..=20 {
            let x = i as f64 / 20.0;
            assert_close(mesh.evaluate(output.solution.as_slice(), x).unwrap(), (PI * x).sin(), 1e-6);
        }
    }
}

#[test]
fn advection_diffusion_uses_direct_solvers_only() {
    // -u'' + u' = 0, u(0) = 0, u(1) = 1
    let exact = |x: f64| (x.exp() - 1.0) / (1f64.exp() - 1.0);
    let mesh = SegmentMesh::uniform(0.0, 1.0, 4, 6).unwrap();
    let bcs = BoundaryConditions::new()
        .with_dirichlet(mesh.first_vertex(), vec![0.0])
        .with_dirichlet(mesh.last_vertex(), vec![1.0]);
    let key = MatrixKey::advection_diffusion_reaction(1.0, 0.0);
    let rhs = vec![0.0; 4 * 7];

    for strategy in [SolverStrategy::DirectFull, SolverStrategy::DirectStaticCond] {
        let settings = SolverSettings::default().with_strategy(strategy);
        let context = DiscretizationContext::new(&mesh, bcs.clone(), settings).unwrap();
        let output = context.solve(&key, &rhs).unwrap();
        for i in 0..=10 {
            let x = i as f64 / 10.0;
            assert_close(mesh.evaluate(output.solution.as_slice(), x).unwrap(), exact(x), 1e-7);
        }
        assert!(output.relative_residual < 1e-10);
    }

    for strategy in [SolverStrategy::IterativeFull, SolverStrategy::IterativeStaticCond] {
        let settings = SolverSettings::default().with_strategy(strategy);
        let context = DiscretizationContext::new(&mesh, bcs.clone(), settings).unwrap();
        let err = context.global_lin_sys(&key).unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Configuration);
    }
}

#[test]
fn repeated_solves_are_bitwise_identical() {
    let mesh = SegmentMesh::uniform(0.0, 1.0, 5, 4).unwrap();
    let bcs = BoundaryConditions::new()
        .with_dirichlet(mesh.first_vertex(), vec![0.3])
        .with_dirichlet(mesh.last_vertex(), vec![-1.7]);
    let rhs = mesh.inner_products(|x| x * x - 0.5);

    for settings in all_strategy_settings() {
        let context = DiscretizationContext::new(&mesh, bcs.clone(), settings).unwrap();
        let key = MatrixKey::helmholtz(0.25);
        let first = context.solve(&key, rhs.as_slice()).unwrap();
        let second = context.solve(&key, rhs.as_slice()).unwrap();
        let bits = |v: &nalgebra::DVector<f64>| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&first.solution), bits(&second.solution));
        assert_eq!(first.iterations, second.iterations);
    }
}
