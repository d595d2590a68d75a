use matrixcompare::assert_matrix_eq;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::CsrMatrix;
use std::sync::Arc;
use substruct::assembly::global::{CsrAssembler, SignedElementMatrix};
use substruct::assembly::local::Sign;
use substruct::comm::SerialComm;
use substruct::linsys::{GlobalOperator, LinSysSolver};
use substruct::procedural::QuadMesh;
use substruct::{DiscretizationContext, MatrixKey, SolverSettings, SolverStrategy};

/// Dense free-free block of the operator, obtained by applying it to unit vectors.
fn dense_free_block(operator: &GlobalOperator) -> DMatrix<f64> {
    let (num_global, num_dirichlet) = (operator.num_global(), operator.num_dirichlet());
    let num_free = operator.num_free();
    let mut result = DMatrix::zeros(num_free, num_free);
    for j in 0..num_free {
        let mut x = vec![0.0; num_global];
        x[num_dirichlet + j] = 1.0;
        let mut y = vec![0.0; num_global];
        operator.apply(&x, &mut y, &SerialComm);
        result
            .column_mut(j)
            .copy_from(&DVector::from_column_slice(&y[num_dirichlet..]));
    }
    result
}

#[test]
fn csr_assembly_applies_signs_and_offset() {
    let m1 = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
    let m2 = DMatrix::from_row_slice(2, 2, &[10.0, 20.0, 30.0, 40.0]);
    let dofs1 = [(0, Sign::Positive), (1, Sign::Positive)];
    let dofs2 = [(1, Sign::Negative), (2, Sign::Positive)];
    let elements = [
        SignedElementMatrix {
            matrix: &m1,
            dofs: &dofs1,
        },
        SignedElementMatrix {
            matrix: &m2,
            dofs: &dofs2,
        },
    ];

    let full = CsrAssembler::default().assemble(&elements, 0, 3).unwrap();
    #[rustfmt::skip]
    let expected = DMatrix::from_row_slice(3, 3, &[
        1.0, 2.0, 0.0,
        3.0, 14.0, -20.0,
        0.0, -30.0, 40.0,
    ]);
    assert_matrix_eq!(DMatrix::from(&full), expected);

    // Leaving out global index 0
    let free = CsrAssembler::default().assemble(&elements, 1, 2).unwrap();
    let expected_free = DMatrix::from_row_slice(2, 2, &[14.0, -20.0, -30.0, 40.0]);
    assert_matrix_eq!(DMatrix::from(&free), expected_free);
    assert_eq!(free.nnz(), 4);
}

#[test]
fn csr_pattern_keeps_empty_rows() {
    let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
    let dofs = [(1, Sign::Positive), (3, Sign::Negative)];
    let elements = [SignedElementMatrix {
        matrix: &m,
        dofs: &dofs,
    }];

    // Rows 0, 2 and 4 have no entries, including the leading and trailing rows
    let pattern = CsrAssembler::default()
        .assemble_pattern(&elements, 0, 5)
        .unwrap();
    assert_eq!(pattern.major_offsets(), &[0, 0, 2, 2, 4, 4]);
    assert_eq!(pattern.minor_indices(), &[1, 3, 1, 3]);

    let matrix = CsrAssembler::default().assemble(&elements, 0, 5).unwrap();
    let mut expected = DMatrix::zeros(5, 5);
    expected[(1, 1)] = 1.0;
    expected[(1, 3)] = -2.0;
    expected[(3, 1)] = -3.0;
    expected[(3, 3)] = 4.0;
    assert_matrix_eq!(DMatrix::from(&matrix), expected);
}

#[test]
fn csr_assembly_rejects_indices_beyond_dimension() {
    let m = DMatrix::identity(2, 2);
    let dofs = [(0, Sign::Positive), (4, Sign::Positive)];
    let elements = [SignedElementMatrix {
        matrix: &m,
        dofs: &dofs,
    }];

    let err = CsrAssembler::default().assemble(&elements, 1, 3).unwrap_err();
    assert!(err.to_string().contains("global index 4"), "{err}");
    // The error can be moved to another thread
    std::thread::spawn(move || err.to_string()).join().unwrap();
}

#[test]
fn assembled_matrix_matches_matrix_free_operator() {
    let mesh = QuadMesh::new([2.0, 1.0], [3, 2], 4)
        .unwrap()
        .with_mirrored_elements([1, 3]);
    let bcs = mesh.dirichlet_from_vertex_values(|x, _| x);

    for strategy in [SolverStrategy::DirectStaticCond, SolverStrategy::DirectFull] {
        let settings = SolverSettings::default().with_strategy(strategy);
        let context = DiscretizationContext::new(&mesh, bcs.clone(), settings).unwrap();
        let system = context.global_lin_sys(&MatrixKey::helmholtz(2.0)).unwrap();

        let LinSysSolver::Direct(solver) = system.solver() else {
            panic!("direct strategy must build a direct solver");
        };
        let assembled: &CsrMatrix<f64> = solver.matrix();
        let dense = dense_free_block(system.operator());
        assert_matrix_eq!(DMatrix::from(assembled), dense, comp = abs, tol = 1e-12);
        assert_matrix_eq!(dense.clone(), dense.transpose(), comp = abs, tol = 1e-12);
    }
}

#[test]
fn operator_rejects_mismatching_element_matrices() {
    let mesh = QuadMesh::new([1.0, 1.0], [1, 1], 2).unwrap();
    let context = DiscretizationContext::new(&mesh, Default::default(), SolverSettings::default()).unwrap();
    let map = Arc::clone(context.assembly_map());
    let operator = context.element_operator(0, &MatrixKey::mass()).unwrap();

    // Full element matrices for two elements, but the map has a single element
    let result = GlobalOperator::new(
        map,
        substruct::linsys::SystemMatrices::Full(vec![Arc::clone(&operator), operator]),
    );
    assert!(result.is_err());
}
