use serde::{Deserialize, Serialize};

/// How a global system is assembled and solved.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SolverStrategy {
    /// Sparse factorization of the full (uncondensed) system.
    DirectFull,
    /// Sparse factorization of the statically condensed boundary system.
    #[default]
    DirectStaticCond,
    /// Matrix-free PCG on the full system.
    IterativeFull,
    /// Matrix-free PCG on the statically condensed boundary system.
    IterativeStaticCond,
}

impl SolverStrategy {
    pub fn is_direct(&self) -> bool {
        matches!(self, Self::DirectFull | Self::DirectStaticCond)
    }

    pub fn is_static_cond(&self) -> bool {
        matches!(self, Self::DirectStaticCond | Self::IterativeStaticCond)
    }
}

/// Preconditioner used by the iterative strategies. Ignored by the direct strategies.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PreconditionerKind {
    Null,
    #[default]
    Diagonal,
    BlockDiagonal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverSettings {
    pub strategy: SolverStrategy,
    pub preconditioner: PreconditionerKind,
    /// Relative residual tolerance of the iterative strategies.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            strategy: SolverStrategy::default(),
            preconditioner: PreconditionerKind::default(),
            tolerance: 1e-9,
            max_iterations: 5000,
        }
    }
}

impl SolverSettings {
    pub fn with_strategy(self, strategy: SolverStrategy) -> Self {
        Self { strategy, ..self }
    }

    pub fn with_preconditioner(self, preconditioner: PreconditionerKind) -> Self {
        Self { preconditioner, ..self }
    }

    pub fn with_tolerance(self, tolerance: f64) -> Self {
        Self { tolerance, ..self }
    }

    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        Self { max_iterations, ..self }
    }
}
