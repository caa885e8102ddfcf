//! Error types for expression evaluation.

use factorad_core::ValuesError;
use thiserror::Error;

/// Errors that can occur while evaluating or linearizing an expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExpressionError {
    /// The trace buffer cannot hold the records of the expression.
    ///
    /// Reported before any node is evaluated.
    #[error("Trace buffer too small: expression needs {required} bytes, buffer holds {available}")]
    TraceTooSmall {
        /// Bytes required by the expression
        required: usize,
        /// Bytes available in the buffer
        available: usize,
    },

    /// A leaf could not be read from, or a perturbation applied to, the store.
    #[error(transparent)]
    Values(#[from] ValuesError),
}

impl ExpressionError {
    /// Create a TraceTooSmall error.
    pub fn trace_too_small(required: usize, available: usize) -> Self {
        Self::TraceTooSmall {
            required,
            available,
        }
    }
}

/// Result type alias for expression operations.
pub type Result<T> = std::result::Result<T, ExpressionError>;
