//! Static condensation of element matrices onto their boundary degrees of freedom.
//!
//! With the element matrix split into boundary (b) and interior (i) blocks,
//!
//! ```text
//! [ A  B ] [u_b]   [f_b]
//! [ C  D ] [u_i] = [f_i]
//! ```
//!
//! eliminating `u_i` gives the Schur complement system `S u_b = f_b - B D⁻¹ f_i` with
//! `S = A - B D⁻¹ C`, after which `u_i = D⁻¹ (f_i - C u_b)`.
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut};
use once_cell::sync::OnceCell;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum CondensationError {
    SingularInterior,
    /// Estimated 1-norm condition number of the interior block exceeds `1 / (100 ε)`.
    IllConditionedInterior { condition_estimate: f64 },
}

impl fmt::Display for CondensationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SingularInterior => write!(f, "interior block is singular"),
            Self::IllConditionedInterior { condition_estimate } => write!(
                f,
                "interior block is ill-conditioned (condition number estimate {condition_estimate:e})"
            ),
        }
    }
}

impl Error for CondensationError {}

fn one_norm(matrix: &DMatrix<f64>) -> f64 {
    matrix
        .column_iter()
        .map(|column| column.iter().map(|x| x.abs()).sum::<f64>())
        .fold(0.0, f64::max)
}

/// Condensed form of one element matrix.
#[derive(Debug, Clone)]
pub struct StaticCondensedBlock {
    schur: DMatrix<f64>,
    inv_d: DMatrix<f64>,
    b_inv_d: DMatrix<f64>,
    c: DMatrix<f64>,
}

impl StaticCondensedBlock {
    /// Splits `matrix` with the given maps and condenses out the interior block.
    ///
    /// The maps hold coefficient indices and must partition the rows of `matrix`.
    pub fn from_element_matrix(
        matrix: &DMatrix<f64>,
        boundary_map: &[usize],
        interior_map: &[usize],
    ) -> Result<Self, CondensationError> {
        assert!(matrix.is_square(), "Element matrix must be square.");
        assert_eq!(
            boundary_map.len() + interior_map.len(),
            matrix.nrows(),
            "Boundary and interior maps must cover the element matrix."
        );

        let rows_b = matrix.select_rows(boundary_map);
        let rows_i = matrix.select_rows(interior_map);
        let a = rows_b.select_columns(boundary_map);

        if interior_map.is_empty() {
            let nb = boundary_map.len();
            return Ok(Self {
                schur: a,
                inv_d: DMatrix::zeros(0, 0),
                b_inv_d: DMatrix::zeros(nb, 0),
                c: DMatrix::zeros(0, nb),
            });
        }

        let b = rows_b.select_columns(interior_map);
        let c = rows_i.select_columns(boundary_map);
        let d = rows_i.select_columns(interior_map);

        let inv_d = d
            .clone()
            .lu()
            .try_inverse()
            .ok_or(CondensationError::SingularInterior)?;
        if inv_d.iter().any(|x| !x.is_finite()) {
            return Err(CondensationError::SingularInterior);
        }

        let condition_estimate = one_norm(&d) * one_norm(&inv_d);
        if condition_estimate > 1.0 / (100.0 * f64::EPSILON) {
            return Err(CondensationError::IllConditionedInterior { condition_estimate });
        }

        let b_inv_d = &b * &inv_d;
        let schur = a - &b_inv_d * &c;
        Ok(Self {
            schur,
            inv_d,
            b_inv_d,
            c,
        })
    }

    pub fn num_boundary(&self) -> usize {
        self.schur.nrows()
    }

    pub fn num_interior(&self) -> usize {
        self.inv_d.nrows()
    }

    /// `S = A - B D⁻¹ C`.
    pub fn schur_complement(&self) -> &DMatrix<f64> {
        &self.schur
    }

    pub fn inverse_interior(&self) -> &DMatrix<f64> {
        &self.inv_d
    }

    pub fn b_inv_d(&self) -> &DMatrix<f64> {
        &self.b_inv_d
    }

    pub fn c(&self) -> &DMatrix<f64> {
        &self.c
    }

    /// `f_b - B D⁻¹ f_i`.
    pub fn condense_rhs(&self, f_b: DVectorView<f64>, f_i: DVectorView<f64>) -> DVector<f64> {
        let mut result = f_b.clone_owned();
        result.gemv(-1.0, &self.b_inv_d, &f_i, 1.0);
        result
    }

    /// `D⁻¹ (f_i - C u_b)`.
    pub fn recover_interior(&self, u_b: DVectorView<f64>, f_i: DVectorView<f64>) -> DVector<f64> {
        let mut rhs = f_i.clone_owned();
        rhs.gemv(-1.0, &self.c, &u_b, 1.0);
        &self.inv_d * rhs
    }

    /// `y = S x`.
    pub fn apply_schur(&self, x: DVectorView<f64>, mut y: DVectorViewMut<f64>) {
        y.gemv(1.0, &self.schur, &x, 0.0);
    }
}

/// A cached element matrix together with its lazily computed condensed form.
#[derive(Debug)]
pub struct ElementOperator {
    matrix: DMatrix<f64>,
    condensed: OnceCell<Arc<StaticCondensedBlock>>,
}

impl ElementOperator {
    pub fn new(matrix: DMatrix<f64>) -> Self {
        Self {
            matrix,
            condensed: OnceCell::new(),
        }
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    /// Condensed form of the element matrix, computed on first request.
    ///
    /// The maps must be the element's boundary and interior maps, which never change for a given
    /// element.
    pub fn condensed(
        &self,
        boundary_map: &[usize],
        interior_map: &[usize],
    ) -> Result<Arc<StaticCondensedBlock>, CondensationError> {
        self.condensed
            .get_or_try_init(|| {
                StaticCondensedBlock::from_element_matrix(&self.matrix, boundary_map, interior_map).map(Arc::new)
            })
            .cloned()
    }

    pub fn is_condensed(&self) -> bool {
        self.condensed.get().is_some()
    }
}
