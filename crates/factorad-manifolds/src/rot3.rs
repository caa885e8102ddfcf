//! 3D rotations, SO(3).
//!
//! # Tangent convention
//!
//! Rotations are perturbed on the right: `R.retract(w) = R * Exp(w)` and
//! `R.local_coordinates(S) = Log(R^T S)`. All Jacobians below are expressed
//! in these coordinates, which gives the familiar forms
//!
//! ```text
//! d(R1 R2)/dR1 = R2^T        d(R1 R2)/dR2 = I
//! d(R p)/dR    = -R [p]x     d(R p)/dp    = R
//! d(R^T p)/dR  = [R^T p]x    d(R^T p)/dp  = R^T
//! ```

use crate::utils::{skew, vector3_at};
use approx::AbsDiffEq;
use factorad_core::{types::DVector, LieGroup, Manifold, OptionalJacobian, Testable};
use nalgebra::{Matrix3, Rotation3, UnitQuaternion, Vector3};
use rand::Rng;
use std::fmt;

use crate::point::Point3;

/// A rotation in three dimensions.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rot3 {
    rotation: Rotation3<f64>,
}

impl Rot3 {
    /// Wraps a nalgebra rotation.
    pub fn from_rotation(rotation: Rotation3<f64>) -> Self {
        Self { rotation }
    }

    /// `Rz(z) * Ry(y) * Rx(x)`.
    pub fn rz_ry_rx(x: f64, y: f64, z: f64) -> Self {
        Self::from_rotation(Rotation3::from_euler_angles(x, y, z))
    }

    /// Exponential map from a rotation vector.
    pub fn expmap(omega: &Vector3<f64>) -> Self {
        Self::from_rotation(Rotation3::new(*omega))
    }

    /// Logarithm map to a rotation vector.
    ///
    /// Goes through the unit quaternion and `atan2`, which stays accurate
    /// for rotations of a few nanoradians where `acos` of the trace does not.
    pub fn logmap(&self) -> Vector3<f64> {
        let q = UnitQuaternion::from_rotation_matrix(&self.rotation);
        let (w, v) = if q.scalar() < 0.0 {
            (-q.scalar(), -q.imag())
        } else {
            (q.scalar(), q.imag())
        };
        let n = v.norm();
        if n < 1e-10 {
            return v * (2.0 / w);
        }
        v * (2.0 * n.atan2(w) / n)
    }

    /// Samples a rotation with angle uniform in `[0, pi)` about a random axis.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let axis = Vector3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        let norm = axis.norm();
        if norm < 1e-6 {
            return Self::identity();
        }
        let angle = rng.gen_range(0.0..std::f64::consts::PI);
        Self::expmap(&(axis * (angle / norm)))
    }

    /// The 3x3 rotation matrix.
    pub fn matrix(&self) -> &Matrix3<f64> {
        self.rotation.matrix()
    }

    /// The inverse rotation.
    pub fn inverse(&self) -> Self {
        Self::from_rotation(self.rotation.inverse())
    }

    /// Rotates a point, `R p`.
    pub fn rotate(&self, p: &Point3, h1: OptionalJacobian<'_>, h2: OptionalJacobian<'_>) -> Point3 {
        let r = self.matrix();
        if let Some(mut h1) = h1 {
            h1.copy_from(&(-r * skew(p.vector())));
        }
        if let Some(mut h2) = h2 {
            h2.copy_from(r);
        }
        Point3::from_vector(r * p.vector())
    }

    /// Rotates a point into the rotated frame, `R^T p`.
    pub fn unrotate(&self, p: &Point3, h1: OptionalJacobian<'_>, h2: OptionalJacobian<'_>) -> Point3 {
        let rt = self.matrix().transpose();
        let q = rt * p.vector();
        if let Some(mut h1) = h1 {
            h1.copy_from(&skew(&q));
        }
        if let Some(mut h2) = h2 {
            h2.copy_from(&rt);
        }
        Point3::from_vector(q)
    }
}

impl Testable for Rot3 {
    fn write_labeled(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{label}: R = {}", self.matrix())
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        self.matrix().abs_diff_eq(other.matrix(), tol)
    }
}

impl Manifold for Rot3 {
    const DIM: usize = 3;

    fn retract(&self, delta: &DVector<f64>) -> Self {
        Self::from_rotation(self.rotation * Rotation3::new(vector3_at(delta, 0)))
    }

    fn local_coordinates(&self, other: &Self) -> DVector<f64> {
        let omega = self.inverse().compose(other, None, None).logmap();
        DVector::from_column_slice(omega.as_slice())
    }
}

impl LieGroup for Rot3 {
    fn identity() -> Self {
        Self::from_rotation(Rotation3::identity())
    }

    fn compose(&self, other: &Self, h1: OptionalJacobian<'_>, h2: OptionalJacobian<'_>) -> Self {
        if let Some(mut h1) = h1 {
            h1.copy_from(&other.matrix().transpose());
        }
        if let Some(mut h2) = h2 {
            h2.fill_with_identity();
        }
        Self::from_rotation(self.rotation * other.rotation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use factorad_core::types::DMatrix;

    #[test]
    fn test_rz_ry_rx_order() {
        let r = Rot3::rz_ry_rx(0.1, 0.2, 0.3);
        let expected = Rotation3::from_axis_angle(&Vector3::z_axis(), 0.3)
            * Rotation3::from_axis_angle(&Vector3::y_axis(), 0.2)
            * Rotation3::from_axis_angle(&Vector3::x_axis(), 0.1);
        assert_relative_eq!(*r.matrix(), *expected.matrix(), epsilon = 1e-12);
    }

    #[test]
    fn test_chart_roundtrip() {
        let r = Rot3::rz_ry_rx(1.0, 2.0, 3.0);
        let d = DVector::from_vec(vec![0.1, -0.2, 0.05]);
        let s = r.retract(&d);
        assert_relative_eq!(r.local_coordinates(&s), d, epsilon = 1e-12);
        assert!(r.retract(&DVector::zeros(3)).equals(&r, 1e-12));
    }

    #[test]
    fn test_compose_jacobians_match_numerical() {
        let a = Rot3::rz_ry_rx(0.3, -0.4, 1.1);
        let b = Rot3::rz_ry_rx(-0.7, 0.2, 0.5);
        let mut h1 = DMatrix::zeros(3, 3);
        let mut h2 = DMatrix::zeros(3, 3);
        let ab = a.compose(&b, Some(h1.as_view_mut()), Some(h2.as_view_mut()));

        let eps = 1e-6;
        for j in 0..3 {
            let mut d = DVector::zeros(3);
            d[j] = eps;
            let col1 = ab.local_coordinates(&a.retract(&d).compose(&b, None, None)) / eps;
            let col2 = ab.local_coordinates(&a.compose(&b.retract(&d), None, None)) / eps;
            for i in 0..3 {
                assert_relative_eq!(h1[(i, j)], col1[i], epsilon = 1e-5);
                assert_relative_eq!(h2[(i, j)], col2[i], epsilon = 1e-5);
            }
        }
    }

    #[test]
    fn test_logmap_small_angles() {
        let omega = Vector3::new(1e-9, -2e-9, 0.5e-9);
        assert_relative_eq!(Rot3::expmap(&omega).logmap(), omega, epsilon = 1e-15);
        let omega = Vector3::new(0.3, 2.0, -1.2);
        assert_relative_eq!(Rot3::expmap(&omega).logmap(), omega, epsilon = 1e-12);
    }

    #[test]
    fn test_unrotate_inverts_rotate() {
        let r = Rot3::rz_ry_rx(0.2, 0.4, -0.6);
        let p = Point3::new(1.0, -2.0, 0.5);
        let q = r.rotate(&p, None, None);
        assert!(r.unrotate(&q, None, None).equals(&p, 1e-12));
    }

    #[test]
    fn test_identity_and_inverse() {
        let r = Rot3::rz_ry_rx(0.5, -0.1, 0.9);
        let i = r.compose(&r.inverse(), None, None);
        assert!(i.equals(&Rot3::identity(), 1e-12));
    }
}
