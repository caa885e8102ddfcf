//! Type definitions and aliases shared across the factorad crates.
//!
//! All numerics are `f64`. Jacobian blocks are dense column-major
//! `DMatrix<f64>` values at API boundaries; the concrete value types use
//! nalgebra's fixed-size matrices internally.

use crate::key::Key;
use nalgebra::{Dyn, OMatrix, OVector};
use std::collections::BTreeMap;

/// Type alias for a dynamically-sized matrix.
pub type DMatrix<T> = OMatrix<T, Dyn, Dyn>;

/// Type alias for a dynamically-sized vector.
pub type DVector<T> = OVector<T, Dyn>;

/// Jacobian blocks keyed by the unknown they differentiate against.
///
/// Each block has as many rows as the differentiated value's tangent
/// dimension and as many columns as the key's tangent dimension.
pub type JacobianMap = BTreeMap<Key, DMatrix<f64>>;

/// Tangent dimension of every key an expression depends on.
pub type KeyDims = BTreeMap<Key, usize>;

/// Numerical and layout constants.
pub mod constants {
    /// Byte boundary every trace record starts on.
    ///
    /// Matches the widest alignment requirement of the fixed-size blocks
    /// written into a trace, so records of different nodes can be packed
    /// back to back.
    pub const TRACE_ALIGNMENT: usize = 16;

    /// Tolerance used by [`assert_near`](crate::testable::assert_near).
    pub const DEFAULT_TOLERANCE: f64 = 1e-9;

    /// Default central-difference step used by derivative checks.
    pub const DEFAULT_FD_STEP: f64 = 1e-9;

    /// Default tolerance when comparing analytic and numerical Jacobians.
    pub const DEFAULT_JACOBIAN_TOLERANCE: f64 = 1e-5;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_type_aliases() {
        let _dm: DMatrix<f64> = DMatrix::zeros(3, 4);
        let _dv: DVector<f64> = DVector::zeros(10);
    }

    #[test]
    fn test_constants() {
        assert!(constants::TRACE_ALIGNMENT.is_power_of_two());
        assert_eq!(constants::TRACE_ALIGNMENT % std::mem::size_of::<f64>(), 0);
        assert!(constants::DEFAULT_TOLERANCE < constants::DEFAULT_JACOBIAN_TOLERANCE);
    }
}
