//! Domain-decomposition linear algebra for spectral/hp element discretizations.
//!
//! Element matrices supplied by an [`ElementMatrixAssembler`](assembly::local::ElementMatrixAssembler)
//! are combined into global systems through an [`AssemblyMap`](assembly::map::AssemblyMap), which
//! numbers the degrees of freedom shared between elements and records orientation signs. Global
//! systems are solved directly or with preconditioned conjugate gradients, with or without
//! static condensation of element interiors, and are cached in a
//! [`DiscretizationContext`](context::DiscretizationContext).
pub mod assembly;
pub mod boundary;
pub mod cache;
pub mod comm;
pub mod condensation;
pub mod context;
pub mod error;
pub mod key;
pub mod linsys;
pub mod preconditioner;
pub mod procedural;
pub mod settings;

#[cfg(feature = "proptest")]
pub mod proptest;

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

pub use context::DiscretizationContext;
pub use error::{ErrorCategory, LinSysError};
pub use key::{ConstFactor, MatrixKey, MatrixType};
pub use settings::{PreconditionerKind, SolverSettings, SolverStrategy};
