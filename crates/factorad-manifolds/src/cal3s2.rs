//! Five-parameter pinhole calibration.

use approx::AbsDiffEq;
use factorad_core::{types::DVector, Manifold, OptionalJacobian, Testable};
use nalgebra::{Matrix3, Vector5};
use std::fmt;

use crate::point::Point2;

/// Intrinsics `fx, fy, s, u0, v0` of a pinhole camera with skew.
///
/// The calibration is treated as a vector space so it can be estimated
/// alongside poses and points.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Cal3S2 {
    params: Vector5<f64>,
}

impl Cal3S2 {
    /// Creates a calibration from focal lengths, skew and principal point.
    pub fn new(fx: f64, fy: f64, s: f64, u0: f64, v0: f64) -> Self {
        Self {
            params: Vector5::new(fx, fy, s, u0, v0),
        }
    }

    /// Focal length along x, in pixels.
    pub fn fx(&self) -> f64 {
        self.params[0]
    }

    /// Focal length along y, in pixels.
    pub fn fy(&self) -> f64 {
        self.params[1]
    }

    /// Skew between the image axes.
    pub fn skew(&self) -> f64 {
        self.params[2]
    }

    /// Principal point, x coordinate.
    pub fn u0(&self) -> f64 {
        self.params[3]
    }

    /// Principal point, y coordinate.
    pub fn v0(&self) -> f64 {
        self.params[4]
    }

    /// The upper triangular calibration matrix `K`.
    pub fn k(&self) -> Matrix3<f64> {
        Matrix3::new(
            self.fx(),
            self.skew(),
            self.u0(),
            0.0,
            self.fy(),
            self.v0(),
            0.0,
            0.0,
            1.0,
        )
    }

    /// Maps intrinsic (normalized) coordinates to pixels.
    ///
    /// `h_cal` is 2x5, `h_point` is 2x2.
    pub fn uncalibrate(
        &self,
        p: &Point2,
        h_cal: OptionalJacobian<'_>,
        h_point: OptionalJacobian<'_>,
    ) -> Point2 {
        let (x, y) = (p.x(), p.y());
        if let Some(mut h) = h_cal {
            h.fill(0.0);
            h[(0, 0)] = x;
            h[(0, 2)] = y;
            h[(0, 3)] = 1.0;
            h[(1, 1)] = y;
            h[(1, 4)] = 1.0;
        }
        if let Some(mut h) = h_point {
            h[(0, 0)] = self.fx();
            h[(0, 1)] = self.skew();
            h[(1, 0)] = 0.0;
            h[(1, 1)] = self.fy();
        }
        Point2::new(
            self.fx() * x + self.skew() * y + self.u0(),
            self.fy() * y + self.v0(),
        )
    }
}

impl Default for Cal3S2 {
    fn default() -> Self {
        Self::new(1.0, 1.0, 0.0, 0.0, 0.0)
    }
}

impl Testable for Cal3S2 {
    fn write_labeled(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(
            out,
            "{label}: fx={} fy={} s={} u0={} v0={}",
            self.fx(),
            self.fy(),
            self.skew(),
            self.u0(),
            self.v0()
        )
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        self.params.abs_diff_eq(&other.params, tol)
    }
}

impl Manifold for Cal3S2 {
    const DIM: usize = 5;

    fn retract(&self, delta: &DVector<f64>) -> Self {
        let mut params = self.params;
        for i in 0..5 {
            params[i] += delta[i];
        }
        Self { params }
    }

    fn local_coordinates(&self, other: &Self) -> DVector<f64> {
        DVector::from_column_slice((other.params - self.params).as_slice())
    }
}
