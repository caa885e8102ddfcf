//! Geometric value types for factorad expressions.
//!
//! Each type implements [`Manifold`](factorad_core::Manifold) and exposes
//! primitives that fill optional Jacobian blocks, so they can be lifted
//! directly into expression nodes:
//!
//! - [`Point2`], [`Point3`]: Euclidean points
//! - [`Rot3`]: SO(3) with right retraction
//! - [`Pose3`]: SE(3), tangent ordered rotation then translation
//! - [`Cal3S2`]: five-parameter pinhole calibration
//! - [`project`]: pinhole normalization `Point3 -> Point2`

pub mod cal3s2;
pub mod camera;
pub mod point;
pub mod pose3;
pub mod rot3;
pub mod utils;

pub use cal3s2::Cal3S2;
pub use camera::project;
pub use point::{Point2, Point3};
pub use pose3::Pose3;
pub use rot3::Rot3;

/// Convenient re-exports.
pub mod prelude {
    pub use crate::{project, Cal3S2, Point2, Point3, Pose3, Rot3};
}
