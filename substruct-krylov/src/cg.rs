use core::fmt;
use log::debug;
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut, RealField, Scalar};
use num::Zero;
use std::error::Error;
use std::ops::{Deref, DerefMut};

/// Boxed error type returned by user-provided operators and inner products.
pub type BoxedError = Box<dyn Error + Send + Sync>;

/// A linear map `y = A x` over vectors of the same length.
pub trait LinearOperator<T: Scalar> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), BoxedError>;
}

impl<'a, T, A> LinearOperator<T> for &'a A
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), BoxedError> {
        <A as LinearOperator<T>>::apply(self, y, x)
    }
}

impl<T: RealField + Copy> LinearOperator<T> for DMatrix<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), BoxedError> {
        y.gemv(T::one(), self, &x, T::zero());
        Ok(())
    }
}

pub struct IdentityOperator;

impl<T: Scalar> LinearOperator<T> for IdentityOperator {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> Result<(), BoxedError> {
        y.copy_from(&x);
        Ok(())
    }
}

/// The inner product used for all reductions performed by the solver.
///
/// Solvers running over partitioned vectors supply an implementation that weights shared
/// entries and sums the partial results over all participants.
pub trait InnerProduct<T: Scalar> {
    fn dot(&self, x: DVectorView<T>, y: DVectorView<T>) -> Result<T, BoxedError>;
}

impl<'a, T, I> InnerProduct<T> for &'a I
where
    T: Scalar,
    I: ?Sized + InnerProduct<T>,
{
    fn dot(&self, x: DVectorView<T>, y: DVectorView<T>) -> Result<T, BoxedError> {
        <I as InnerProduct<T>>::dot(self, x, y)
    }
}

/// The standard dot product `xᵀy`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EuclideanInnerProduct;

impl<T: RealField + Copy> InnerProduct<T> for EuclideanInnerProduct {
    fn dot(&self, x: DVectorView<T>, y: DVectorView<T>) -> Result<T, BoxedError> {
        Ok(x.dot(&y))
    }
}

pub trait CgStoppingCriterion<T: Scalar> {
    /// Decide convergence from the norm of the right-hand side and the current residual norm,
    /// both measured in the solver's inner product.
    fn has_converged(&self, b_norm: T, residual_norm: T, iteration: usize) -> Result<bool, SolveErrorKind>;
}

/// Relative residual tolerance ||r|| <= tol * ||b||.
///
/// Note that we use the *approximate* residual given by Conjugate-Gradient. For ill-conditioned
/// problems, it is possible that CG's residual converges, but the real residual does not.
#[derive(Debug, Clone, Copy)]
pub struct RelativeResidualCriterion<T: Scalar> {
    tol: T,
}

impl<T: Scalar + Zero> RelativeResidualCriterion<T> {
    pub fn new(tol: T) -> Self {
        Self { tol }
    }

    pub fn tolerance(&self) -> &T {
        &self.tol
    }
}

impl Default for RelativeResidualCriterion<f64> {
    fn default() -> Self {
        Self::new(1e-8)
    }
}

impl<T> CgStoppingCriterion<T> for RelativeResidualCriterion<T>
where
    T: RealField + Copy,
{
    fn has_converged(&self, b_norm: T, residual_norm: T, _iteration: usize) -> Result<bool, SolveErrorKind> {
        Ok(residual_norm <= self.tol * b_norm)
    }
}

#[derive(Debug, Clone)]
pub struct CgWorkspace<T: Scalar> {
    r: DVector<T>,
    z: DVector<T>,
    p: DVector<T>,
    ap: DVector<T>,
}

struct Buffers<'a, T: Scalar> {
    r: &'a mut DVector<T>,
    z: &'a mut DVector<T>,
    p: &'a mut DVector<T>,
    ap: &'a mut DVector<T>,
}

impl<T: Scalar + Zero> Default for CgWorkspace<T> {
    fn default() -> Self {
        Self {
            r: DVector::zeros(0),
            z: DVector::zeros(0),
            p: DVector::zeros(0),
            ap: DVector::zeros(0),
        }
    }
}

impl<T: Scalar + Zero> CgWorkspace<T> {
    fn prepare_buffers(&mut self, dim: usize) -> Buffers<T> {
        self.r.resize_vertically_mut(dim, T::zero());
        self.z.resize_vertically_mut(dim, T::zero());
        self.p.resize_vertically_mut(dim, T::zero());
        self.ap.resize_vertically_mut(dim, T::zero());
        Buffers {
            r: &mut self.r,
            z: &mut self.z,
            p: &mut self.p,
            ap: &mut self.ap,
        }
    }
}

#[derive(Debug)]
enum OwnedOrMutRef<'a, T> {
    Owned(T),
    MutRef(&'a mut T),
}

impl<'a, T> Deref for OwnedOrMutRef<'a, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

impl<'a, T> DerefMut for OwnedOrMutRef<'a, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self {
            Self::Owned(owned) => owned,
            Self::MutRef(mutref) => mutref,
        }
    }
}

/// Preconditioned conjugate gradient for symmetric positive definite operators.
///
/// Built with a builder-style API:
///
/// ```ignore
/// let output = ConjugateGradient::new()
///     .with_operator(&a)
///     .with_preconditioner(&p)
///     .with_stopping_criterion(RelativeResidualCriterion::new(1e-10))
///     .with_max_iter(500)
///     .solve_with_guess(&b, &mut x)?;
/// ```
#[derive(Debug)]
pub struct ConjugateGradient<'a, T, A, P, Criterion, Inner = EuclideanInnerProduct>
where
    T: Scalar,
{
    workspace: OwnedOrMutRef<'a, CgWorkspace<T>>,
    operator: A,
    preconditioner: P,
    stopping_criterion: Criterion,
    inner_product: Inner,
    max_iter: Option<usize>,
}

impl<'a, T: Scalar + Zero> ConjugateGradient<'a, T, (), IdentityOperator, ()> {
    pub fn new() -> Self {
        Self {
            workspace: OwnedOrMutRef::Owned(CgWorkspace::default()),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            inner_product: EuclideanInnerProduct,
            max_iter: None,
        }
    }
}

impl<'a, T: Scalar> ConjugateGradient<'a, T, (), IdentityOperator, ()> {
    pub fn with_workspace(workspace: &'a mut CgWorkspace<T>) -> Self {
        Self {
            workspace: OwnedOrMutRef::MutRef(workspace),
            operator: (),
            preconditioner: IdentityOperator,
            stopping_criterion: (),
            inner_product: EuclideanInnerProduct,
            max_iter: None,
        }
    }
}

impl<'a, T: Scalar, P, Criterion, Inner> ConjugateGradient<'a, T, (), P, Criterion, Inner> {
    pub fn with_operator<A>(self, operator: A) -> ConjugateGradient<'a, T, A, P, Criterion, Inner> {
        ConjugateGradient {
            workspace: self.workspace,
            operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            inner_product: self.inner_product,
            max_iter: self.max_iter,
        }
    }
}

impl<'a, T: Scalar, A, P, Criterion, Inner> ConjugateGradient<'a, T, A, P, Criterion, Inner> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> ConjugateGradient<'a, T, A, P2, Criterion, Inner> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner,
            stopping_criterion: self.stopping_criterion,
            inner_product: self.inner_product,
            max_iter: self.max_iter,
        }
    }

    pub fn with_inner_product<Inner2>(self, inner_product: Inner2) -> ConjugateGradient<'a, T, A, P, Criterion, Inner2> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion: self.stopping_criterion,
            inner_product,
            max_iter: self.max_iter,
        }
    }

    pub fn with_max_iter(self, max_iter: usize) -> Self {
        Self {
            max_iter: Some(max_iter),
            ..self
        }
    }
}

impl<'a, T: Scalar, A, P, Inner> ConjugateGradient<'a, T, A, P, (), Inner> {
    pub fn with_stopping_criterion<Criterion>(
        self,
        stopping_criterion: Criterion,
    ) -> ConjugateGradient<'a, T, A, P, Criterion, Inner> {
        ConjugateGradient {
            workspace: self.workspace,
            operator: self.operator,
            preconditioner: self.preconditioner,
            stopping_criterion,
            inner_product: self.inner_product,
            max_iter: self.max_iter,
        }
    }
}

#[derive(Debug)]
#[non_exhaustive]
pub enum SolveErrorKind {
    OperatorError(BoxedError),
    PreconditionerError(BoxedError),
    InnerProductError(BoxedError),
    StoppingCriterionError(BoxedError),
    IndefiniteOperator,
    IndefinitePreconditioner,
    MaxIterationsReached { max_iter: usize },
}

impl fmt::Display for SolveErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperatorError(err) => write!(f, "error applying operator: {err}"),
            Self::PreconditionerError(err) => write!(f, "error applying preconditioner: {err}"),
            Self::InnerProductError(err) => write!(f, "error evaluating inner product: {err}"),
            Self::StoppingCriterionError(err) => write!(f, "error evaluating stopping criterion: {err}"),
            Self::IndefiniteOperator => write!(f, "operator appears to be indefinite"),
            Self::IndefinitePreconditioner => write!(f, "preconditioner appears to be indefinite"),
            Self::MaxIterationsReached { max_iter } => {
                write!(f, "max iterations ({}) reached", max_iter)
            }
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub struct SolveError<T> {
    pub output: CgOutput<T>,
    pub kind: SolveErrorKind,
}

impl<T> SolveError<T> {
    fn new(output: CgOutput<T>, kind: SolveErrorKind) -> Self {
        Self { output, kind }
    }
}

impl<T> fmt::Display for SolveError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CG solve failed after {} iterations: {}",
            self.output.num_iterations, self.kind
        )
    }
}

impl<T: fmt::Debug> std::error::Error for SolveError<T> {}

#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct CgOutput<T> {
    /// Number of iterations of the solver.
    ///
    /// Corresponds to the number of updates made to the (initial) solution vector.
    pub num_iterations: usize,
    /// Norm of the last residual computed by the CG recurrence.
    pub residual_norm: T,
    /// Norm of the right-hand side.
    pub b_norm: T,
}

impl<T: RealField + Copy> CgOutput<T> {
    fn new() -> Self {
        Self {
            num_iterations: 0,
            residual_norm: T::zero(),
            b_norm: T::zero(),
        }
    }

    /// `||r|| / ||b||`, or zero for a vanishing right-hand side.
    pub fn relative_residual(&self) -> T {
        if self.b_norm == T::zero() {
            T::zero()
        } else {
            self.residual_norm / self.b_norm
        }
    }
}

impl<'a, T, A, P, Criterion, Inner> ConjugateGradient<'a, T, A, P, Criterion, Inner>
where
    T: RealField + Copy,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
    Criterion: CgStoppingCriterion<T>,
    Inner: InnerProduct<T>,
{
    pub fn solve_with_guess<'b>(
        &mut self,
        b: impl Into<DVectorView<'b, T>>,
        x: impl Into<DVectorViewMut<'b, T>>,
    ) -> Result<CgOutput<T>, SolveError<T>> {
        self.solve_with_guess_(b.into(), x.into())
    }

    fn solve_with_guess_(&mut self, b: DVectorView<T>, mut x: DVectorViewMut<T>) -> Result<CgOutput<T>, SolveError<T>> {
        use SolveErrorKind::*;
        assert_eq!(b.len(), x.len());

        let mut output = CgOutput::new();
        let Buffers { r, z, p, ap } = self.workspace.prepare_buffers(x.len());
        let operator = &self.operator;
        let preconditioner = &self.preconditioner;
        let inner = &self.inner_product;

        macro_rules! try_or_fail {
            ($expr:expr, $kind:ident) => {
                match $expr {
                    Ok(value) => value,
                    Err(err) => return Err(SolveError::new(output, $kind(err))),
                }
            };
        }

        let b_norm = try_or_fail!(inner.dot(b.clone(), b.clone()), InnerProductError).sqrt();
        output.b_norm = b_norm;
        if b_norm == T::zero() {
            x.fill(T::zero());
            return Ok(output);
        }

        // r = b - Ax
        try_or_fail!(operator.apply(DVectorViewMut::from(&mut *r), DVectorView::from(&x)), OperatorError);
        r.axpy(T::one(), &b, -T::one());

        // z = Pr
        try_or_fail!(
            preconditioner.apply(DVectorViewMut::from(&mut *z), DVectorView::from(&*r)),
            PreconditionerError
        );

        // p = z
        p.copy_from(z);

        let mut z_dot_r = try_or_fail!(inner.dot(DVectorView::from(&*z), DVectorView::from(&*r)), InnerProductError);

        loop {
            let r_norm = try_or_fail!(inner.dot(DVectorView::from(&*r), DVectorView::from(&*r)), InnerProductError)
                .sqrt();
            output.residual_norm = r_norm;

            let has_converged = match self
                .stopping_criterion
                .has_converged(b_norm, r_norm, output.num_iterations)
            {
                Ok(converged) => converged,
                Err(kind) => return Err(SolveError::new(output, kind)),
            };

            if has_converged {
                break;
            } else if let Some(max_iter) = self.max_iter {
                if output.num_iterations >= max_iter {
                    return Err(SolveError::new(output, MaxIterationsReached { max_iter }));
                }
            }

            if z_dot_r <= T::zero() {
                return Err(SolveError::new(output, IndefinitePreconditioner));
            }

            // Ap = A * p
            try_or_fail!(operator.apply(DVectorViewMut::from(&mut *ap), DVectorView::from(&*p)), OperatorError);
            let p_dot_ap = try_or_fail!(inner.dot(DVectorView::from(&*p), DVectorView::from(&*ap)), InnerProductError);
            if p_dot_ap <= T::zero() {
                return Err(SolveError::new(output, IndefiniteOperator));
            }

            let alpha = z_dot_r / p_dot_ap;
            // x <- x + alpha * p
            x.axpy(alpha, &*p, T::one());
            // r <- r - alpha * Ap
            r.axpy(-alpha, &*ap, T::one());

            // Number of iterations corresponds to number of updates to the x vector
            output.num_iterations += 1;

            // z <- P r
            try_or_fail!(
                preconditioner.apply(DVectorViewMut::from(&mut *z), DVectorView::from(&*r)),
                PreconditionerError
            );
            let z_dot_r_next = try_or_fail!(inner.dot(DVectorView::from(&*z), DVectorView::from(&*r)), InnerProductError);
            let beta = z_dot_r_next / z_dot_r;

            // p <- z + beta * p
            p.axpy(T::one(), &*z, beta);

            z_dot_r = z_dot_r_next;
        }

        debug!(
            "CG converged after {} iterations (|r| = {:e}, |b| = {:e})",
            output.num_iterations,
            output.residual_norm.to_subset().unwrap_or(f64::NAN),
            b_norm.to_subset().unwrap_or(f64::NAN)
        );

        Ok(output)
    }
}
