//! Core traits and types for expression-based factor graphs.
//!
//! This crate provides the pieces every other factorad crate builds on:
//! the integer keys that name unknowns, the manifold contract a value type
//! must satisfy to be optimized, the print/equals contract used by test
//! oracles, and the `Values` store that maps keys to their current values.
//!
//! # Key Concepts
//!
//! - **Keys**: Opaque integer identifiers, optionally built from a symbol
//!   character and an index
//! - **Manifold values**: Types with a fixed tangent dimension, a retraction
//!   and its local inverse
//! - **Values**: The store an expression is evaluated against
//!
//! # Modules
//!
//! - [`error`]: Error types for value store operations
//! - [`key`]: Keys and symbols
//! - [`manifold`]: Manifold and Lie group value contracts
//! - [`testable`]: Print/equals contract and `assert_equal`
//! - [`types`]: Type aliases and numerical constants
//! - [`values`]: The key to value store and its tangent-space companion

pub mod error;
pub mod key;
pub mod manifold;
pub mod testable;
pub mod types;
pub mod values;

// Re-export commonly used items at the crate root
pub use error::{Result, ValuesError};
pub use key::{symbol, Key, Symbol};
pub use manifold::{LieGroup, Manifold, OptionalJacobian};
pub use testable::{assert_equal, assert_equal_to, assert_near, Testable};
pub use values::{Value, Values, VectorValues};

/// Prelude module for convenient imports.
///
/// # Example
/// ```
/// use factorad_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{Result, ValuesError};
    pub use crate::key::{symbol, Key, Symbol};
    pub use crate::manifold::{LieGroup, Manifold, OptionalJacobian};
    pub use crate::testable::{assert_equal, assert_near, Testable};
    pub use crate::types::{constants, DMatrix, DVector, JacobianMap};
    pub use crate::values::{Values, VectorValues};
}
