//! Krylov solvers for the global systems assembled by `substruct`.
//!
//! The solvers only see a [`LinearOperator`] and an [`InnerProduct`], which lets the same
//! conjugate gradient implementation run matrix-free over partitioned data.

pub mod cg;

pub use cg::{
    BoxedError, CgOutput, CgStoppingCriterion, CgWorkspace, ConjugateGradient, EuclideanInnerProduct, IdentityOperator,
    InnerProduct, LinearOperator, RelativeResidualCriterion, SolveError, SolveErrorKind,
};
