//! Pinhole projection.

use factorad_core::OptionalJacobian;

use crate::point::{Point2, Point3};

/// Projects a point in camera coordinates onto the normalized image plane,
/// `(x / z, y / z)`.
///
/// No cheirality check is made: points behind the camera project through
/// the origin and `z == 0` yields non-finite coordinates.
pub fn project(p: &Point3, h: OptionalJacobian<'_>) -> Point2 {
    let d = 1.0 / p.z();
    let u = p.x() * d;
    let v = p.y() * d;
    if let Some(mut h) = h {
        h[(0, 0)] = d;
        h[(0, 1)] = 0.0;
        h[(0, 2)] = -u * d;
        h[(1, 0)] = 0.0;
        h[(1, 1)] = d;
        h[(1, 2)] = -v * d;
    }
    Point2::new(u, v)
}
