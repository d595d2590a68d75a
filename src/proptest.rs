//! Strategies for property-based tests.
use crate::procedural::SegmentMesh;
use ::proptest::prelude::*;
use nalgebra::DMatrix;

/// Symmetric positive definite matrices `R Rᵀ + n I` with entries of `R` in `[-1, 1]`.
pub fn spd_matrix(n: usize) -> impl Strategy<Value = DMatrix<f64>> {
    proptest::collection::vec(-1.0..1.0, n * n).prop_map(move |entries| {
        let r = DMatrix::from_vec(n, n, entries);
        &r * r.transpose() + DMatrix::identity(n, n) * n as f64
    })
}

/// An element matrix that can be statically condensed, together with a boundary map and an
/// interior map that partition its coefficients.
#[derive(Debug, Clone)]
pub struct CondensableElement {
    pub matrix: DMatrix<f64>,
    pub boundary_map: Vec<usize>,
    pub interior_map: Vec<usize>,
}

pub fn condensable_element(max_boundary: usize, max_interior: usize) -> impl Strategy<Value = CondensableElement> {
    (1..=max_boundary, 0..=max_interior)
        .prop_flat_map(|(num_boundary, num_interior)| {
            let n = num_boundary + num_interior;
            let coeffs: Vec<usize> = (0..n).collect();
            (spd_matrix(n), Just(coeffs).prop_shuffle(), Just(num_boundary))
        })
        .prop_map(|(matrix, coeffs, num_boundary)| {
            let (boundary, interior) = coeffs.split_at(num_boundary);
            CondensableElement {
                matrix,
                boundary_map: boundary.to_vec(),
                interior_map: interior.to_vec(),
            }
        })
}

/// Uniform segment meshes on `[0, 1]`.
pub fn segment_mesh(max_elements: usize, max_order: usize) -> impl Strategy<Value = SegmentMesh> {
    (1..=max_elements, 1..=max_order).prop_filter_map("valid segment mesh", |(num_elements, order)| {
        SegmentMesh::uniform(0.0, 1.0, num_elements, order).ok()
    })
}
