use crate::comm::Communicator;
use crate::error::LinSysError;
use crate::linsys::GlobalOperator;
use crate::preconditioner::Preconditioner;
use log::{debug, warn};
use nalgebra::{DVector, DVectorView, DVectorViewMut};
use std::cell::RefCell;
use substruct_krylov::{
    BoxedError, CgOutput, CgWorkspace, ConjugateGradient, InnerProduct, LinearOperator, RelativeResidualCriterion,
    SolveErrorKind,
};
use thread_local::ThreadLocal;

/// The global operator restricted to the free degrees of freedom.
struct FreeOperator<'a> {
    operator: &'a GlobalOperator,
    comm: &'a dyn Communicator,
}

impl<'a> LinearOperator<f64> for FreeOperator<'a> {
    fn apply(&self, mut y: DVectorViewMut<f64>, x: DVectorView<f64>) -> Result<(), BoxedError> {
        let num_dirichlet = self.operator.num_dirichlet();
        let num_global = self.operator.num_global();
        let mut x_global = vec![0.0; num_global];
        for (dst, src) in x_global[num_dirichlet..].iter_mut().zip(x.iter()) {
            *dst = *src;
        }
        let mut y_global = vec![0.0; num_global];
        self.operator.apply(&x_global, &mut y_global, self.comm);
        for (dst, src) in y.iter_mut().zip(&y_global[num_dirichlet..]) {
            *dst = *src;
        }
        Ok(())
    }
}

/// Inner product over the free degrees of freedom of all partitions.
///
/// Degrees of freedom shared by several partitions are weighted by the reciprocal of the number
/// of partitions holding them, so that each one counts exactly once in the global sum.
struct PartitionedInnerProduct<'a> {
    weights: &'a DVector<f64>,
    comm: &'a dyn Communicator,
}

impl<'a> InnerProduct<f64> for PartitionedInnerProduct<'a> {
    fn dot(&self, x: DVectorView<f64>, y: DVectorView<f64>) -> Result<f64, BoxedError> {
        let mut partial = [x.iter().zip(y.iter()).zip(self.weights.iter()).map(|((x, y), w)| w * x * y).sum::<f64>()];
        self.comm.sum_all(&mut partial);
        Ok(partial[0])
    }
}

/// Preconditioned conjugate gradient on the free degrees of freedom.
#[derive(Debug)]
pub struct IterativeSolver {
    preconditioner: Preconditioner,
    weights: DVector<f64>,
    tolerance: f64,
    max_iterations: usize,
    workspace: ThreadLocal<RefCell<CgWorkspace<f64>>>,
}

impl IterativeSolver {
    /// Computes the inner product weights of the free degrees of freedom. Collective.
    pub fn new(
        operator: &GlobalOperator,
        preconditioner: Preconditioner,
        tolerance: f64,
        max_iterations: usize,
        comm: &dyn Communicator,
    ) -> Self {
        let mut multiplicity = vec![1.0; operator.num_global()];
        operator.reduce_unsigned(&mut multiplicity, comm);
        let weights = DVector::from_iterator(
            operator.num_free(),
            multiplicity[operator.num_dirichlet()..].iter().map(|count| 1.0 / count),
        );
        Self {
            preconditioner,
            weights,
            tolerance,
            max_iterations,
            workspace: ThreadLocal::new(),
        }
    }

    pub fn preconditioner(&self) -> &Preconditioner {
        &self.preconditioner
    }

    /// Inner product weight of every free degree of freedom.
    pub fn weights(&self) -> &DVector<f64> {
        &self.weights
    }

    pub fn solve(
        &self,
        operator: &GlobalOperator,
        comm: &dyn Communicator,
        b_free: &DVector<f64>,
    ) -> Result<(DVector<f64>, CgOutput<f64>), LinSysError> {
        let mut x = DVector::zeros(b_free.len());
        let workspace = &mut *self.workspace.get_or_default().borrow_mut();
        let result = ConjugateGradient::with_workspace(workspace)
            .with_operator(FreeOperator { operator, comm })
            .with_preconditioner(&self.preconditioner)
            .with_inner_product(PartitionedInnerProduct {
                weights: &self.weights,
                comm,
            })
            .with_stopping_criterion(RelativeResidualCriterion::new(self.tolerance))
            .with_max_iter(self.max_iterations)
            .solve_with_guess(b_free, &mut x);

        match result {
            Ok(output) => {
                debug!(
                    "PCG converged in {} iterations (relative residual {:e})",
                    output.num_iterations,
                    output.relative_residual()
                );
                Ok((x, output))
            }
            Err(err) => match err.kind {
                SolveErrorKind::MaxIterationsReached { .. } => {
                    warn!(
                        "PCG did not converge within {} iterations (relative residual {:e})",
                        err.output.num_iterations,
                        err.output.relative_residual()
                    );
                    Err(LinSysError::NotConverged {
                        iterations: err.output.num_iterations,
                        relative_residual: err.output.relative_residual(),
                    })
                }
                kind => Err(LinSysError::Krylov(kind.to_string())),
            },
        }
    }
}
