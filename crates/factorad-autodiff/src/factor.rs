//! Factors built from expressions, and their linearization.
//!
//! An [`ExpressionFactor`] ties an expression to a measurement of the same
//! type. Its error is the tangent vector taking the measurement to the
//! predicted value, and linearizing it produces a [`JacobianFactor`]: one
//! dense block per key plus the right-hand side `b = -error`.
//!
//! Factors are `Send + Sync`, so a whole graph can be linearized in
//! parallel with [`linearize_all`]; each worker owns its own
//! [`TraceBuffer`].

use crate::error::Result;
use crate::expression::Expression;
use crate::trace::TraceBuffer;
use factorad_core::types::{DMatrix, DVector};
use factorad_core::{Key, Manifold, Testable, Values};
use std::fmt;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// A nonlinear factor over a set of keys.
pub trait NonlinearFactor: Send + Sync {
    /// Keys the factor depends on, in ascending order.
    fn keys(&self) -> &[Key];

    /// Dimension of the error vector.
    fn dim(&self) -> usize;

    /// The error vector before any noise weighting.
    fn unwhitened_error(&self, values: &Values) -> Result<DVector<f64>>;

    /// `0.5 * |e|^2`.
    fn error(&self, values: &Values) -> Result<f64> {
        Ok(0.5 * self.unwhitened_error(values)?.norm_squared())
    }

    /// Linearizes the factor using `trace` as scratch memory, growing it if
    /// necessary.
    fn linearize_with(&self, values: &Values, trace: &mut TraceBuffer) -> Result<JacobianFactor>;

    /// Linearizes the factor around `values`.
    fn linearize(&self, values: &Values) -> Result<JacobianFactor> {
        self.linearize_with(values, &mut TraceBuffer::default())
    }
}

/// A linear factor `|A x - b|^2` with one column block per key.
#[derive(Debug, Clone, PartialEq)]
pub struct JacobianFactor {
    keys: Vec<Key>,
    blocks: Vec<DMatrix<f64>>,
    rhs: DVector<f64>,
}

impl JacobianFactor {
    /// Creates a factor from per-key blocks and a right-hand side.
    ///
    /// # Panics
    ///
    /// Panics if the number of keys and blocks differ, or if a block does
    /// not have as many rows as `rhs`.
    pub fn new(keys: Vec<Key>, blocks: Vec<DMatrix<f64>>, rhs: DVector<f64>) -> Self {
        assert_eq!(keys.len(), blocks.len(), "One block per key is required");
        for (key, block) in keys.iter().zip(&blocks) {
            assert_eq!(
                block.nrows(),
                rhs.len(),
                "Block for key {key} has {} rows, expected {}",
                block.nrows(),
                rhs.len()
            );
        }
        Self { keys, blocks, rhs }
    }

    /// Keys in ascending order, one per block.
    pub fn keys(&self) -> &[Key] {
        &self.keys
    }

    /// Jacobian blocks, in key order.
    pub fn blocks(&self) -> &[DMatrix<f64>] {
        &self.blocks
    }

    /// The block for `key`, if the factor involves it.
    pub fn block(&self, key: Key) -> Option<&DMatrix<f64>> {
        self.keys
            .iter()
            .position(|&k| k == key)
            .map(|i| &self.blocks[i])
    }

    /// Right-hand side `b`.
    pub fn rhs(&self) -> &DVector<f64> {
        &self.rhs
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rhs.len()
    }

    /// Total number of columns over all blocks.
    pub fn cols(&self) -> usize {
        self.blocks.iter().map(|b| b.ncols()).sum()
    }

    /// The full matrix `A`, blocks side by side in key order, and `b`.
    pub fn jacobian_unweighted(&self) -> (DMatrix<f64>, DVector<f64>) {
        let mut a = DMatrix::zeros(self.rows(), self.cols());
        let mut col = 0;
        for block in &self.blocks {
            a.view_mut((0, col), block.shape()).copy_from(block);
            col += block.ncols();
        }
        (a, self.rhs.clone())
    }
}

impl Testable for JacobianFactor {
    fn write_labeled(&self, label: &str, out: &mut dyn fmt::Write) -> fmt::Result {
        writeln!(out, "{label}: JacobianFactor on {} keys", self.keys.len())?;
        for (key, block) in self.keys.iter().zip(&self.blocks) {
            block.write_labeled(&format!("  A[{key}]"), out)?;
        }
        self.rhs.write_labeled("  b", out)
    }

    fn equals(&self, other: &Self, tol: f64) -> bool {
        self.keys == other.keys
            && self
                .blocks
                .iter()
                .zip(&other.blocks)
                .all(|(a, b)| a.equals(b, tol))
            && self.rhs.equals(&other.rhs, tol)
    }
}

/// A factor comparing an expression against a measured value.
#[derive(Debug, Clone)]
pub struct ExpressionFactor<T> {
    measured: T,
    expression: Expression<T>,
    keys: Vec<Key>,
}

impl<T: Manifold> ExpressionFactor<T> {
    /// Creates a factor comparing `expression` against `measured`.
    pub fn new(measured: T, expression: Expression<T>) -> Self {
        let keys = expression.keys().iter().copied().collect();
        Self {
            measured,
            expression,
            keys,
        }
    }

    /// The measured value.
    pub fn measured(&self) -> &T {
        &self.measured
    }

    /// The expression predicting the measurement.
    pub fn expression(&self) -> &Expression<T> {
        &self.expression
    }

    /// Tangent dimension of each key, in key order.
    pub fn dims(&self) -> Vec<usize> {
        self.expression.dims().values().copied().collect()
    }

    /// Bytes of trace needed to linearize the factor.
    pub fn trace_size(&self) -> usize {
        self.expression.trace_size()
    }

    /// `measured.local_coordinates(value)`.
    pub fn unwhitened_error(&self, values: &Values) -> Result<DVector<f64>> {
        let value = self.expression.value(values)?;
        Ok(self.measured.local_coordinates(&value))
    }

    /// Linearizes with a caller-owned trace buffer, growing it if needed.
    pub fn linearize_with(&self, values: &Values, trace: &mut TraceBuffer) -> Result<JacobianFactor> {
        trace.reserve(self.trace_size());
        let (value, mut jacobians) = self.expression.value_and_jacobians(values, trace)?;
        let error = self.measured.local_coordinates(&value);
        tracing::debug!(
            keys = ?self.keys,
            rows = T::DIM,
            trace_bytes = self.trace_size(),
            "linearized expression factor"
        );

        let blocks = self
            .expression
            .dims()
            .iter()
            .map(|(key, &dim)| {
                jacobians
                    .remove(key)
                    .unwrap_or_else(|| DMatrix::zeros(T::DIM, dim))
            })
            .collect();
        Ok(JacobianFactor::new(self.keys.clone(), blocks, -error))
    }

    /// Linearizes with a freshly allocated trace buffer.
    pub fn linearize(&self, values: &Values) -> Result<JacobianFactor> {
        let mut trace = TraceBuffer::with_size(self.trace_size());
        self.linearize_with(values, &mut trace)
    }
}

impl<T: Manifold> NonlinearFactor for ExpressionFactor<T> {
    fn keys(&self) -> &[Key] {
        &self.keys
    }

    fn dim(&self) -> usize {
        T::DIM
    }

    fn unwhitened_error(&self, values: &Values) -> Result<DVector<f64>> {
        ExpressionFactor::unwhitened_error(self, values)
    }

    fn linearize_with(&self, values: &Values, trace: &mut TraceBuffer) -> Result<JacobianFactor> {
        ExpressionFactor::linearize_with(self, values, trace)
    }

    fn linearize(&self, values: &Values) -> Result<JacobianFactor> {
        ExpressionFactor::linearize(self, values)
    }
}

/// Linearizes every factor around `values`, in order.
///
/// With the `parallel` feature the work is spread over the rayon pool and
/// each worker reuses one trace buffer for all the factors it handles.
pub fn linearize_all(
    factors: &[Box<dyn NonlinearFactor>],
    values: &Values,
) -> Result<Vec<JacobianFactor>> {
    tracing::debug!(factors = factors.len(), keys = values.len(), "linearizing graph");

    #[cfg(feature = "parallel")]
    {
        factors
            .par_iter()
            .map_init(TraceBuffer::default, |trace, factor| {
                factor.linearize_with(values, trace)
            })
            .collect()
    }

    #[cfg(not(feature = "parallel"))]
    {
        let mut trace = TraceBuffer::default();
        factors
            .iter()
            .map(|factor| factor.linearize_with(values, &mut trace))
            .collect()
    }
}
