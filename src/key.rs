//! Keys identifying element operators and global systems in the caches.
use crate::settings::{PreconditionerKind, SolverStrategy};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The operator an element matrix discretizes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatrixType {
    Mass,
    Laplacian,
    /// `-Δu + λu`.
    Helmholtz,
    /// `-Δu + V·∇u + λu`, not symmetric for non-zero velocity.
    LinearAdvectionDiffusionReaction,
}

impl MatrixType {
    pub fn is_symmetric(&self) -> bool {
        !matches!(self, MatrixType::LinearAdvectionDiffusionReaction)
    }
}

/// Named scalar parameters of an operator.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstFactor {
    Lambda,
    Velocity,
}

/// Identifies an element operator: its type together with every scalar parameter.
///
/// Parameters are stored as [`OrderedFloat`] so that keys can be hashed and compared exactly.
/// Two keys that differ in any constant refer to different cache entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MatrixKey {
    matrix_type: MatrixType,
    constants: BTreeMap<ConstFactor, OrderedFloat<f64>>,
}

impl MatrixKey {
    pub fn new(matrix_type: MatrixType) -> Self {
        Self {
            matrix_type,
            constants: BTreeMap::new(),
        }
    }

    pub fn mass() -> Self {
        Self::new(MatrixType::Mass)
    }

    pub fn laplacian() -> Self {
        Self::new(MatrixType::Laplacian)
    }

    pub fn helmholtz(lambda: f64) -> Self {
        Self::new(MatrixType::Helmholtz).with_constant(ConstFactor::Lambda, lambda)
    }

    pub fn advection_diffusion_reaction(velocity: f64, lambda: f64) -> Self {
        Self::new(MatrixType::LinearAdvectionDiffusionReaction)
            .with_constant(ConstFactor::Velocity, velocity)
            .with_constant(ConstFactor::Lambda, lambda)
    }

    pub fn with_constant(mut self, factor: ConstFactor, value: f64) -> Self {
        self.constants.insert(factor, OrderedFloat(value));
        self
    }

    pub fn matrix_type(&self) -> MatrixType {
        self.matrix_type
    }

    pub fn constant(&self, factor: ConstFactor) -> Option<f64> {
        self.constants.get(&factor).map(|value| value.0)
    }

    /// Whether element matrices for this key are symmetric.
    ///
    /// An advection operator with zero velocity is still treated as non-symmetric, since
    /// symmetry is decided from the operator type alone.
    pub fn is_symmetric(&self) -> bool {
        self.matrix_type.is_symmetric()
    }
}

impl fmt::Display for MatrixKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.matrix_type)?;
        for (factor, value) in &self.constants {
            write!(f, " {:?}={}", factor, value.0)?;
        }
        Ok(())
    }
}

/// Identifies a global linear system.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GlobalMatrixKey {
    pub matrix_key: MatrixKey,
    /// Unique id of the assembly map the system is numbered by.
    pub assembly_map_id: u64,
    pub strategy: SolverStrategy,
    pub preconditioner: PreconditionerKind,
}
