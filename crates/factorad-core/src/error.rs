//! Error types for value store operations.
//!
//! Every failure here is a caller contract violation: a key that was never
//! inserted, a value read back as the wrong type, or a tangent vector of the
//! wrong width. None of them are recoverable in the middle of an evaluation,
//! so callers are expected to propagate them with `?`.

use crate::key::Key;
use thiserror::Error;

/// Errors that can occur while reading or perturbing a [`Values`](crate::Values) store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValuesError {
    /// No value is stored under the key.
    #[error("Key {key} is not present in the values")]
    MissingKey {
        /// The key that was looked up
        key: Key,
    },

    /// A value exists but has a different type than requested.
    #[error("Value at key {key} has type {actual}, expected {expected}")]
    TypeMismatch {
        /// The key that was looked up
        key: Key,
        /// Name of the requested type
        expected: &'static str,
        /// Name of the stored type
        actual: &'static str,
    },

    /// Insertion of a key that is already present.
    #[error("Key {key} already exists in the values")]
    KeyExists {
        /// The duplicate key
        key: Key,
    },

    /// A tangent vector does not match the dimension of the value it perturbs.
    #[error("Dimension mismatch at key {key}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// The key whose value was perturbed
        key: Key,
        /// Tangent dimension of the stored value
        expected: usize,
        /// Length of the supplied vector
        actual: usize,
    },
}

impl ValuesError {
    /// Create a MissingKey error.
    pub fn missing_key(key: Key) -> Self {
        Self::MissingKey { key }
    }

    /// Create a TypeMismatch error.
    pub fn type_mismatch(key: Key, expected: &'static str, actual: &'static str) -> Self {
        Self::TypeMismatch {
            key,
            expected,
            actual,
        }
    }

    /// Create a KeyExists error.
    pub fn key_exists(key: Key) -> Self {
        Self::KeyExists { key }
    }

    /// Create a DimensionMismatch error.
    pub fn dimension_mismatch(key: Key, expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch {
            key,
            expected,
            actual,
        }
    }
}

/// Result type alias for value store operations.
pub type Result<T> = std::result::Result<T, ValuesError>;
