//! Finite-difference verification of analytic Jacobians.
//!
//! The oracle perturbs one tangent coordinate of one key at a time through
//! [`Values::retract`] and takes central differences of a factor's
//! unwhitened error. Comparing the result against
//! [`NonlinearFactor::linearize`] catches wrong hand-written Jacobians in
//! value-type primitives as well as mistakes in how the accumulator chains
//! them.

use crate::error::Result;
use crate::expression::Expression;
use crate::factor::{ExpressionFactor, JacobianFactor, NonlinearFactor};
use factorad_core::types::constants::{DEFAULT_FD_STEP, DEFAULT_JACOBIAN_TOLERANCE};
use factorad_core::types::{DMatrix, DVector};
use factorad_core::{Manifold, Values};

/// Settings for Jacobian checks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DerivativeCheckConfig {
    /// Central-difference step in tangent coordinates.
    pub fd_step: f64,
    /// Maximum absolute difference allowed per entry.
    pub tolerance: f64,
}

impl Default for DerivativeCheckConfig {
    fn default() -> Self {
        Self {
            fd_step: DEFAULT_FD_STEP,
            tolerance: DEFAULT_JACOBIAN_TOLERANCE,
        }
    }
}

impl DerivativeCheckConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the finite-difference step.
    pub fn with_fd_step(mut self, fd_step: f64) -> Self {
        self.fd_step = fd_step;
        self
    }

    /// Sets the comparison tolerance.
    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }
}

/// Linearizes `factor` by central differences.
///
/// Column `j` of the block for key `k` is
/// `(e(x.retract(h e_j)) - e(x.retract(-h e_j))) / 2h`, where only key `k`
/// is perturbed. The right-hand side is `-e(x)`.
pub fn compute_finite_difference_jacobians(
    factor: &dyn NonlinearFactor,
    values: &Values,
    fd_step: f64,
) -> Result<JacobianFactor> {
    let e = factor.unwhitened_error(values)?;
    let rows = e.len();

    let mut delta = values.zero_vectors();
    let mut blocks = Vec::with_capacity(factor.keys().len());
    for &key in factor.keys() {
        let cols = values.dim(key)?;
        let mut jacobian = DMatrix::zeros(rows, cols);
        for col in 0..cols {
            let mut dx = DVector::zeros(cols);
            dx[col] = fd_step;
            delta.insert(key, dx.clone());
            let plus = factor.unwhitened_error(&values.retract(&delta)?)?;

            dx[col] = -fd_step;
            delta.insert(key, dx);
            let minus = factor.unwhitened_error(&values.retract(&delta)?)?;

            jacobian.set_column(col, &((plus - minus) / (2.0 * fd_step)));
        }
        delta.insert(key, DVector::zeros(cols));
        blocks.push(jacobian);
    }

    Ok(JacobianFactor::new(factor.keys().to_vec(), blocks, -e))
}

/// Returns `true` if `lhs` and `rhs` have the same shape and every pair of
/// entries is finite and within `tolerance`.
///
/// Every offending position is logged at `warn` level.
pub fn check_matrices_near(lhs: &DMatrix<f64>, rhs: &DMatrix<f64>, tolerance: f64) -> bool {
    if lhs.shape() != rhs.shape() {
        tracing::warn!(lhs = ?lhs.shape(), rhs = ?rhs.shape(), "matrix shapes differ");
        return false;
    }

    let mut near = true;
    for i in 0..lhs.nrows() {
        for j in 0..lhs.ncols() {
            let (l, r) = (lhs[(i, j)], rhs[(i, j)]);
            if !l.is_finite() || !r.is_finite() || (l - r).abs() > tolerance {
                near = false;
                tracing::warn!(row = i, col = j, lhs = l, rhs = r, "position evaluates to different values");
            }
        }
    }
    near
}

/// Checks the analytic Jacobians of `expression` against finite differences.
///
/// The expression is wrapped in an [`ExpressionFactor`] measured at its own
/// current value, so the error is zero at `values` and both linearizations
/// are taken at the same point.
pub fn test_expression_jacobians<T: Manifold>(
    expression: &Expression<T>,
    values: &Values,
    config: &DerivativeCheckConfig,
) -> Result<bool> {
    let measured = expression.value(values)?;
    let factor = ExpressionFactor::new(measured, expression.clone());

    let analytic = factor.linearize(values)?.jacobian_unweighted();
    let numerical = compute_finite_difference_jacobians(&factor, values, config.fd_step)?
        .jacobian_unweighted();
    Ok(check_matrices_near(&analytic.0, &numerical.0, config.tolerance))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = DerivativeCheckConfig::default();
        assert_eq!(config.fd_step, 1e-9);
        assert_eq!(config.tolerance, 1e-5);

        let config = DerivativeCheckConfig::new()
            .with_fd_step(1e-6)
            .with_tolerance(1e-4);
        assert_eq!(config.fd_step, 1e-6);
        assert_eq!(config.tolerance, 1e-4);
    }

    #[test]
    fn test_check_matrices_near() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]);
        let mut b = a.clone();
        assert!(check_matrices_near(&a, &b, 1e-12));
        b[(1, 0)] += 1e-3;
        assert!(!check_matrices_near(&a, &b, 1e-5));
        assert!(check_matrices_near(&a, &b, 1e-2));
    }

    #[test]
    fn test_check_matrices_near_rejects_non_finite() {
        let a = DMatrix::from_element(1, 2, f64::NAN);
        assert!(!check_matrices_near(&a, &a, 1.0));
        let b = DMatrix::from_element(1, 2, f64::INFINITY);
        assert!(!check_matrices_near(&b, &b, f64::INFINITY));
    }

    #[test]
    fn test_check_matrices_near_rejects_shape_mismatch() {
        assert!(!check_matrices_near(
            &DMatrix::zeros(2, 3),
            &DMatrix::zeros(3, 2),
            1.0
        ));
    }
}
