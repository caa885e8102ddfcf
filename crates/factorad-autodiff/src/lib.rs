//! Expression trees with reverse-mode Jacobians.
//!
//! This crate turns compositions of manifold-valued functions into values
//! and exact Jacobians with respect to every unknown they read. It is the
//! linearization engine of an expression-based factor graph.
//!
//! # Features
//!
//! - **Expressions**: Constants, leaves and unary/binary/ternary function
//!   nodes, shared and immutable once built
//! - **Traced evaluation**: Local partials are recorded into a caller-owned
//!   buffer sized from the tree's shape; neither pass allocates per node
//! - **Reverse accumulation**: Partials are chained from the root down to
//!   the leaves, summing contributions of keys reached more than once
//! - **Factors**: Expressions against measurements, linearized into dense
//!   per-key blocks, optionally in parallel
//! - **Verification**: Central finite differences through the value store
//!
//! # Architecture
//!
//! 1. **Trace**: Buffer sizing and record layout
//! 2. **Nodes**: Forward and reverse passes per node kind
//! 3. **Expression**: The public handle and its construction API
//! 4. **Factor**: Error, linearization and graph-wide linearization
//! 5. **Numerical**: Finite-difference oracle

pub mod error;
pub mod expression;
pub mod factor;
pub mod nodes;
pub mod numerical;
pub mod trace;

// Re-export key types
pub use error::{ExpressionError, Result};
pub use expression::{create_unknowns, Expression};
pub use factor::{linearize_all, ExpressionFactor, JacobianFactor, NonlinearFactor};
pub use nodes::NodeKind;
pub use numerical::{
    check_matrices_near, compute_finite_difference_jacobians, test_expression_jacobians,
    DerivativeCheckConfig,
};
pub use trace::{record_size, up_aligned, TraceBuffer};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{ExpressionError, Result};
    pub use crate::expression::{create_unknowns, Expression};
    pub use crate::factor::{linearize_all, ExpressionFactor, JacobianFactor, NonlinearFactor};
    pub use crate::nodes::NodeKind;
    pub use crate::numerical::{test_expression_jacobians, DerivativeCheckConfig};
    pub use crate::trace::TraceBuffer;
}
