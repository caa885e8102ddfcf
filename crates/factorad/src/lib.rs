//! Expression-based automatic differentiation for factor graphs.
//!
//! `factorad` builds measurement functions out of small differentiable
//! primitives over manifold values (rotations, poses, points, calibrations)
//! and linearizes them with exact reverse-mode Jacobians.
//!
//! # Example
//!
//! ```
//! use factorad::prelude::*;
//!
//! // Predicted pixel of landmark `l0` seen from pose `x0`
//! let x = Expression::<Pose3>::leaf(symbol('x', 0));
//! let l = Expression::<Point3>::leaf(symbol('l', 0));
//! let k = Expression::constant(Cal3S2::new(500.0, 500.0, 0.0, 320.0, 240.0));
//! let p_cam = Expression::binary(Pose3::transform_to, x, l);
//! let uv = Expression::binary(Cal3S2::uncalibrate, k, Expression::unary(project, p_cam));
//!
//! let mut values = Values::new();
//! values.insert(symbol('x', 0), Pose3::identity()).unwrap();
//! values.insert(symbol('l', 0), Point3::new(0.0, 0.0, 4.0)).unwrap();
//!
//! let factor = ExpressionFactor::new(Point2::new(322.0, 241.0), uv);
//! let linear = factor.linearize(&values).unwrap();
//! let (a, b) = linear.jacobian_unweighted();
//! assert_eq!(a.shape(), (2, 3 + 6));
//! assert_eq!(b.len(), 2);
//! ```
//!
//! # Crates
//!
//! - [`factorad_core`]: keys, value store, manifold contracts, `assert_equal`
//! - [`factorad_manifolds`]: concrete value types and their Jacobians
//! - [`factorad_autodiff`]: expressions, trace buffers, factors, derivative
//!   checks

pub use factorad_autodiff;
pub use factorad_core;
pub use factorad_manifolds;

pub use nalgebra;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use factorad_autodiff::prelude::*;
    pub use factorad_core::prelude::{
        assert_equal, assert_near, constants, symbol, DMatrix, DVector, JacobianMap, Key,
        LieGroup, Manifold, OptionalJacobian, Symbol, Testable, Values, ValuesError,
        VectorValues,
    };
    pub use factorad_manifolds::prelude::*;
}
