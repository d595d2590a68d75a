//! Test helpers shared by the crates in the workspace.
use nalgebra::DVectorView;

/// Poor man's approx assertion for matrices
#[macro_export]
macro_rules! assert_approx_matrix_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        let diff = $x - $y;

        let max_absdiff = diff.abs().max();
        let approx_eq = max_absdiff <= $tol;

        if !approx_eq {
            println!("abstol: {:e}", $tol);
            println!("left: {}", $x);
            println!("right: {}", $y);
            println!("diff: {:e}", diff);
        }
        assert!(approx_eq);
    }};
}

/// Relative difference `|x - y| / max(|y|, 1)` in the Euclidean norm.
pub fn relative_difference<'a>(x: impl Into<DVectorView<'a, f64>>, y: impl Into<DVectorView<'a, f64>>) -> f64 {
    let x = x.into();
    let y = y.into();
    assert_eq!(x.len(), y.len(), "Vectors must have the same length.");
    (x - y).norm() / y.norm().max(1.0)
}
