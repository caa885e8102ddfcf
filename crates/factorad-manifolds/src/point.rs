//! Euclidean points in 2D and 3D.
//!
//! Points are vector spaces: retraction is addition and local coordinates
//! are differences, so every Jacobian below is exact everywhere.

use approx::AbsDiffEq;
use factorad_core::{types::DVector, Manifold, OptionalJacobian, Testable};
use nalgebra::{Vector2, Vector3};
use rand::Rng;
use std::fmt;

/// A point in the plane.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point2 {
    coords: Vector2<f64>,
}

impl Point2 {
    /// Creates a point from its coordinates.
    pub fn new(x: f64, y: f64) -> Self {
        Self {
            coords: Vector2::new(x, y),
        }
    }

    /// Wraps an existing vector.
    pub fn from_vector(coords: Vector2<f64>) -> Self {
        Self { coords }
    }

    /// The x coordinate.
    pub fn x(&self) -> f64 {
        self.coords.x
    }

    /// The y coordinate.
    pub fn y(&self) -> f64 {
        self.coords.y
    }

    /// The coordinates as a vector.
    pub fn vector(&self) -> &Vector2<f64> {
        &self.coords
    }
}

impl Testable for Point2 {
    fn write_labeled(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{label}({}, {})", self.x(), self.y())
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        self.coords.abs_diff_eq(&other.coords, tol)
    }
}

impl Manifold for Point2 {
    const DIM: usize = 2;

    fn retract(&self, delta: &DVector<f64>) -> Self {
        Self::new(self.x() + delta[0], self.y() + delta[1])
    }

    fn local_coordinates(&self, other: &Self) -> DVector<f64> {
        DVector::from_column_slice((other.coords - self.coords).as_slice())
    }
}

/// A point in space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Point3 {
    coords: Vector3<f64>,
}

impl Point3 {
    /// Creates a point from its coordinates.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            coords: Vector3::new(x, y, z),
        }
    }

    /// Wraps an existing vector.
    pub fn from_vector(coords: Vector3<f64>) -> Self {
        Self { coords }
    }

    /// Samples a point with coordinates uniform in `[-scale, scale]`.
    pub fn random<R: Rng + ?Sized>(rng: &mut R, scale: f64) -> Self {
        Self::new(
            rng.gen_range(-scale..=scale),
            rng.gen_range(-scale..=scale),
            rng.gen_range(-scale..=scale),
        )
    }

    /// The x coordinate.
    pub fn x(&self) -> f64 {
        self.coords.x
    }

    /// The y coordinate.
    pub fn y(&self) -> f64 {
        self.coords.y
    }

    /// The z coordinate.
    pub fn z(&self) -> f64 {
        self.coords.z
    }

    /// The coordinates as a vector.
    pub fn vector(&self) -> &Vector3<f64> {
        &self.coords
    }

    /// Euclidean norm, with its 1x3 Jacobian.
    ///
    /// At the origin the Jacobian is set to zero rather than NaN.
    pub fn norm(&self, h: OptionalJacobian<'_>) -> f64 {
        let r = self.coords.norm();
        if let Some(mut h) = h {
            if r > 0.0 {
                h.copy_from(&(self.coords.transpose() / r));
            } else {
                h.fill(0.0);
            }
        }
        r
    }

    /// Dot product, with 1x3 Jacobians for both points.
    pub fn dot(&self, other: &Point3, h1: OptionalJacobian<'_>, h2: OptionalJacobian<'_>) -> f64 {
        if let Some(mut h1) = h1 {
            h1.copy_from(&other.coords.transpose());
        }
        if let Some(mut h2) = h2 {
            h2.copy_from(&self.coords.transpose());
        }
        self.coords.dot(&other.coords)
    }

    /// Vector sum; both Jacobians are the identity.
    pub fn add(&self, other: &Point3, h1: OptionalJacobian<'_>, h2: OptionalJacobian<'_>) -> Point3 {
        if let Some(mut h1) = h1 {
            h1.fill_with_identity();
        }
        if let Some(mut h2) = h2 {
            h2.fill_with_identity();
        }
        Point3::from_vector(self.coords + other.coords)
    }
}

impl Testable for Point3 {
    fn write_labeled(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{label}({}, {}, {})", self.x(), self.y(), self.z())
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        self.coords.abs_diff_eq(&other.coords, tol)
    }
}

impl Manifold for Point3 {
    const DIM: usize = 3;

    fn retract(&self, delta: &DVector<f64>) -> Self {
        Self::new(self.x() + delta[0], self.y() + delta[1], self.z() + delta[2])
    }

    fn local_coordinates(&self, other: &Self) -> DVector<f64> {
        DVector::from_column_slice((other.coords - self.coords).as_slice())
    }
}
