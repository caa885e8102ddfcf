//! Manifold and Lie group contracts for value types.
//!
//! A value type that can be optimized lives on a manifold with a fixed
//! tangent dimension. Optimizers and finite-difference checks move it with
//! [`Manifold::retract`] and measure displacements with
//! [`Manifold::local_coordinates`]; the two must be inverse to each other
//! near the base point:
//!
//! ```text
//! x.local_coordinates(&x.retract(&d)) ≈ d
//! x.retract(&x.local_coordinates(&y)) ≈ y
//! ```
//!
//! Functions that participate in expressions report derivatives through
//! [`OptionalJacobian`] slots expressed in these same tangent coordinates.

use crate::testable::Testable;
use crate::types::DVector;
use nalgebra::DMatrixViewMut;
use std::fmt::Debug;

/// An output Jacobian slot handed to a function.
///
/// `None` means the caller does not want this derivative and the function
/// must not compute it. `Some(block)` is a zero-initialized, pre-sized block
/// of `output_dim x argument_dim` entries the function must fill.
pub type OptionalJacobian<'a> = Option<DMatrixViewMut<'a, f64>>;

/// Trait for value types that live on a manifold with fixed tangent dimension.
///
/// # Implementation Notes
///
/// - `DIM` is the tangent dimension, identical for every instance
/// - `retract(&zeros)` must return a value equal to `self`
/// - `local_coordinates(self)` must return zeros
pub trait Manifold: Testable + Clone + Debug + Send + Sync + 'static {
    /// Tangent space dimension.
    const DIM: usize;

    /// Returns the tangent space dimension.
    fn dim(&self) -> usize {
        Self::DIM
    }

    /// Applies a tangent-space perturbation, producing a nearby value.
    ///
    /// # Panics
    ///
    /// May panic if `delta.len() != Self::DIM`.
    fn retract(&self, delta: &DVector<f64>) -> Self;

    /// Returns the tangent vector that retracts `self` onto `other`.
    fn local_coordinates(&self, other: &Self) -> DVector<f64>;
}

/// Manifold values that also form a group.
///
/// Jacobians of [`LieGroup::compose`] are taken in the tangent coordinates
/// defined by the type's retraction.
pub trait LieGroup: Manifold {
    /// The group identity.
    fn identity() -> Self;

    /// Group composition `self * other`.
    fn compose(&self, other: &Self, h1: OptionalJacobian<'_>, h2: OptionalJacobian<'_>) -> Self;
}

impl Manifold for f64 {
    const DIM: usize = 1;

    fn retract(&self, delta: &DVector<f64>) -> Self {
        self + delta[0]
    }

    fn local_coordinates(&self, other: &Self) -> DVector<f64> {
        DVector::from_element(1, other - self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_scalar_manifold() {
        let x = 2.5;
        assert_eq!(x.dim(), 1);
        assert_relative_eq!(x.retract(&DVector::from_element(1, 0.5)), 3.0);
        assert_relative_eq!(x.local_coordinates(&4.0)[0], 1.5);
    }

    proptest! {
        #[test]
        fn prop_scalar_retract_inverts_local(x in -1e3f64..1e3, y in -1e3f64..1e3) {
            let back = x.retract(&x.local_coordinates(&y));
            prop_assert!((back - y).abs() < 1e-9);
        }
    }
}
