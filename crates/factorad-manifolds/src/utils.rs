//! Small linear algebra helpers shared by the value types.

use factorad_core::types::DVector;
use nalgebra::{Matrix3, Vector3};

/// Cross-product matrix: `skew(a) * b == a.cross(&b)`.
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Reads three consecutive tangent coordinates starting at `offset`.
pub(crate) fn vector3_at(delta: &DVector<f64>, offset: usize) -> Vector3<f64> {
    Vector3::new(delta[offset], delta[offset + 1], delta[offset + 2])
}
