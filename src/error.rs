use crate::condensation::CondensationError;
use std::error::Error;
use std::fmt;

/// Coarse classification of a [`LinSysError`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Invalid input: inconsistent connectivity, unsupported combinations of options, bad element data.
    Configuration,
    /// Factorization failed or the operator turned out to be singular/indefinite.
    Numerical,
    /// The iteration cap was reached.
    Convergence,
}

#[derive(Debug)]
#[non_exhaustive]
pub enum LinSysError {
    Configuration(String),
    ElementMatrix { element: usize, source: eyre::Report },
    Condensation { element: usize, source: CondensationError },
    Factorization(String),
    Preconditioner(String),
    Krylov(String),
    NotConverged { iterations: usize, relative_residual: f64 },
}

impl LinSysError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn category(&self) -> ErrorCategory {
        use LinSysError::*;
        match self {
            Configuration(_) | ElementMatrix { .. } => ErrorCategory::Configuration,
            Condensation { .. } | Factorization(_) | Preconditioner(_) | Krylov(_) => ErrorCategory::Numerical,
            NotConverged { .. } => ErrorCategory::Convergence,
        }
    }
}

impl fmt::Display for LinSysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use LinSysError::*;
        match self {
            Configuration(message) => write!(f, "invalid configuration: {message}"),
            ElementMatrix { element, source } => {
                write!(f, "failed to assemble matrix of element {element}: {source}")
            }
            Condensation { element, source } => {
                write!(f, "static condensation failed for element {element}: {source}")
            }
            Factorization(message) => write!(f, "factorization failed: {message}"),
            Preconditioner(message) => write!(f, "preconditioner setup failed: {message}"),
            Krylov(message) => write!(f, "iterative solve failed: {message}"),
            NotConverged {
                iterations,
                relative_residual,
            } => write!(
                f,
                "iterative solve did not converge after {iterations} iterations \
                 (relative residual {relative_residual:e})"
            ),
        }
    }
}

impl Error for LinSysError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::ElementMatrix { source, .. } => Some(&**source),
            Self::Condensation { source, .. } => Some(source),
            _ => None,
        }
    }
}
