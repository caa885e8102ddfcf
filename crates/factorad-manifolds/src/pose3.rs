//! Rigid body transformations, SE(3).
//!
//! Tangent vectors are ordered rotation first, translation second:
//! `xi = [w; v]`. The retraction is
//! `(R, t).retract([w; v]) = (R Exp(w), t + R v)`, so translation
//! increments are expressed in the body frame.

use crate::point::Point3;
use crate::rot3::Rot3;
use crate::utils::{skew, vector3_at};
use approx::AbsDiffEq;
use factorad_core::{types::DVector, LieGroup, Manifold, OptionalJacobian, Testable};
use nalgebra::{Matrix3, Vector3};
use std::fmt;

/// A 3D pose: rotation and translation.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Pose3 {
    rotation: Rot3,
    translation: Vector3<f64>,
}

impl Pose3 {
    /// Creates a pose from a rotation and a translation.
    pub fn new(rotation: Rot3, translation: Point3) -> Self {
        Self {
            rotation,
            translation: *translation.vector(),
        }
    }

    /// Orientation of the pose.
    pub fn rotation(&self) -> &Rot3 {
        &self.rotation
    }

    /// Position of the pose origin.
    pub fn translation(&self) -> Point3 {
        Point3::from_vector(self.translation)
    }

    /// Transforms a world point into the pose frame, `R^T (p - t)`.
    ///
    /// Jacobians are 3x6 with respect to the pose and 3x3 with respect to
    /// the point.
    pub fn transform_to(
        &self,
        p: &Point3,
        h_pose: OptionalJacobian<'_>,
        h_point: OptionalJacobian<'_>,
    ) -> Point3 {
        let rt = self.rotation.matrix().transpose();
        let q = rt * (p.vector() - self.translation);
        if let Some(mut h) = h_pose {
            h.fixed_view_mut::<3, 3>(0, 0).copy_from(&skew(&q));
            h.fixed_view_mut::<3, 3>(0, 3).copy_from(&(-Matrix3::<f64>::identity()));
        }
        if let Some(mut h) = h_point {
            h.copy_from(&rt);
        }
        Point3::from_vector(q)
    }

    /// Transforms a point in the pose frame to the world, `R p + t`.
    pub fn transform_from(
        &self,
        p: &Point3,
        h_pose: OptionalJacobian<'_>,
        h_point: OptionalJacobian<'_>,
    ) -> Point3 {
        let r = self.rotation.matrix();
        if let Some(mut h) = h_pose {
            h.fixed_view_mut::<3, 3>(0, 0).copy_from(&(-r * skew(p.vector())));
            h.fixed_view_mut::<3, 3>(0, 3).copy_from(r);
        }
        if let Some(mut h) = h_point {
            h.copy_from(r);
        }
        Point3::from_vector(r * p.vector() + self.translation)
    }
}

impl Testable for Pose3 {
    fn write_labeled(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        self.rotation.write_labeled(label, out)?;
        writeln!(
            out,
            "t: {} {} {}",
            self.translation.x, self.translation.y, self.translation.z
        )
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        self.rotation.equals(&other.rotation, tol)
            && self.translation.abs_diff_eq(&other.translation, tol)
    }
}

impl Manifold for Pose3 {
    const DIM: usize = 6;

    fn retract(&self, delta: &DVector<f64>) -> Self {
        let omega = vector3_at(delta, 0);
        let v = vector3_at(delta, 3);
        Self {
            rotation: self.rotation.compose(&Rot3::expmap(&omega), None, None),
            translation: self.translation + self.rotation.matrix() * v,
        }
    }

    fn local_coordinates(&self, other: &Self) -> DVector<f64> {
        let omega = self.rotation.inverse().compose(&other.rotation, None, None).logmap();
        let v = self.rotation.matrix().transpose() * (other.translation - self.translation);
        DVector::from_iterator(6, omega.iter().chain(v.iter()).copied())
    }
}

impl LieGroup for Pose3 {
    fn identity() -> Self {
        Self {
            rotation: Rot3::identity(),
            translation: Vector3::zeros(),
        }
    }

    /// `(R1, t1) * (R2, t2) = (R1 R2, t1 + R1 t2)`.
    fn compose(&self, other: &Self, h1: OptionalJacobian<'_>, h2: OptionalJacobian<'_>) -> Self {
        if let Some(mut h) = h1 {
            let r2t = other.rotation.matrix().transpose();
            h.fill(0.0);
            h.fixed_view_mut::<3, 3>(0, 0).copy_from(&r2t);
            h.fixed_view_mut::<3, 3>(3, 0)
                .copy_from(&(-r2t * skew(&other.translation)));
            h.fixed_view_mut::<3, 3>(3, 3).copy_from(&r2t);
        }
        if let Some(mut h) = h2 {
            h.fill_with_identity();
        }
        Self {
            rotation: self.rotation.compose(&other.rotation, None, None),
            translation: self.translation + self.rotation.matrix() * other.translation,
        }
    }
}
