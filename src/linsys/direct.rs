use crate::assembly::global::CsrAssembler;
use crate::error::LinSysError;
use crate::linsys::GlobalOperator;
use log::debug;
use nalgebra::{DMatrix, DVector, Dyn, LU};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CscMatrix, CsrMatrix};

#[derive(Debug)]
enum Factorization {
    /// No free degrees of freedom.
    Empty,
    Cholesky(CscCholesky<f64>),
    Lu(LU<f64, Dyn, Dyn>),
}

/// Factorized free-free block of a global system.
///
/// Symmetric operators are factorized with a sparse Cholesky factorization. Non-symmetric
/// operators fall back to a dense LU factorization.
#[derive(Debug)]
pub struct DirectSolver {
    matrix: CsrMatrix<f64>,
    factorization: Factorization,
}

impl DirectSolver {
    pub fn new(operator: &GlobalOperator, symmetric: bool) -> Result<Self, LinSysError> {
        let num_free = operator.num_free();
        let elements = operator.signed_element_matrices();
        let matrix = CsrAssembler::default()
            .assemble(&elements, operator.num_dirichlet(), num_free)
            .map_err(|err| LinSysError::configuration(format!("failed to assemble global matrix: {err}")))?;

        let factorization = if num_free == 0 {
            Factorization::Empty
        } else if symmetric {
            let csc = CscMatrix::from(&matrix);
            let cholesky = CscCholesky::factor(&csc)
                .map_err(|err| LinSysError::Factorization(format!("sparse Cholesky factorization failed: {err}")))?;
            Factorization::Cholesky(cholesky)
        } else {
            let lu = DMatrix::from(&matrix).lu();
            if !lu.is_invertible() {
                return Err(LinSysError::Factorization("global matrix is singular".to_string()));
            }
            Factorization::Lu(lu)
        };

        debug!(
            "Factorized global matrix with {} rows and {} non-zeros",
            matrix.nrows(),
            matrix.nnz()
        );
        Ok(Self { matrix, factorization })
    }

    /// The assembled free-free block.
    pub fn matrix(&self) -> &CsrMatrix<f64> {
        &self.matrix
    }

    pub fn solve(&self, b_free: &DVector<f64>) -> Result<DVector<f64>, LinSysError> {
        match &self.factorization {
            Factorization::Empty => Ok(DVector::zeros(0)),
            Factorization::Cholesky(cholesky) => {
                let x = cholesky.solve(b_free);
                Ok(x.column(0).into_owned())
            }
            Factorization::Lu(lu) => lu
                .solve(b_free)
                .ok_or_else(|| LinSysError::Factorization("LU back substitution failed".to_string())),
        }
    }
}
