//! Expression trees over manifold values.
//!
//! An [`Expression<T>`] describes how to compute a `T` from the values of
//! some keys. It is built bottom-up from constants, leaves and functions
//! that report their own Jacobians, and is immutable once built: cloning is
//! a reference count bump and sub-expressions may be shared freely between
//! trees and threads.
//!
//! # Example
//!
//! ```
//! use factorad_autodiff::{Expression, TraceBuffer};
//! use factorad_core::{OptionalJacobian, Values};
//!
//! fn sum(a: &f64, b: &f64, h1: OptionalJacobian<'_>, h2: OptionalJacobian<'_>) -> f64 {
//!     if let Some(mut h1) = h1 {
//!         h1.fill(1.0);
//!     }
//!     if let Some(mut h2) = h2 {
//!         h2.fill(1.0);
//!     }
//!     a + b
//! }
//!
//! let x = Expression::<f64>::leaf(1);
//! let y = Expression::<f64>::leaf(2);
//! let e = Expression::binary(sum, x.clone(), Expression::binary(sum, x, y));
//!
//! let mut values = Values::new();
//! values.insert(1, 2.0).unwrap();
//! values.insert(2, 5.0).unwrap();
//!
//! let mut trace = TraceBuffer::with_size(e.trace_size());
//! let (value, jacobians) = e.value_and_jacobians(&values, &mut trace).unwrap();
//! assert_eq!(value, 9.0);
//! assert_eq!(jacobians[&1][(0, 0)], 2.0);
//! assert_eq!(jacobians[&2][(0, 0)], 1.0);
//! ```

use crate::error::{ExpressionError, Result};
use crate::nodes::{
    merge_dims, BinaryNode, ConstantNode, ExpressionNode, LeafNode, NodeInfo, NodeKind,
    TernaryNode, UnaryNode,
};
use crate::trace::{TraceBuffer, SLOT_BYTES};
use factorad_core::types::{DMatrix, JacobianMap, KeyDims};
use factorad_core::{symbol, Key, LieGroup, Manifold, OptionalJacobian, Values};
use nalgebra::{DMatrixView, DMatrixViewMut};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Mul;
use std::sync::Arc;

/// A shared, immutable expression producing a `T`.
pub struct Expression<T> {
    root: Arc<dyn ExpressionNode<T>>,
}

impl<T> Clone for Expression<T> {
    fn clone(&self) -> Self {
        Self {
            root: Arc::clone(&self.root),
        }
    }
}

impl<T: Manifold> Expression<T> {
    /// An expression that always evaluates to `value`.
    pub fn constant(value: T) -> Self {
        Self {
            root: Arc::new(ConstantNode::new(value)),
        }
    }

    /// An expression reading the value stored under `key`.
    pub fn leaf(key: Key) -> Self {
        Self {
            root: Arc::new(LeafNode::<T>::new(key)),
        }
    }

    /// Applies a one-argument function.
    ///
    /// The function receives `Some(block)` of shape `T::DIM x A1::DIM` only
    /// when the Jacobian is needed, and must fill it in that case.
    pub fn unary<A1, F>(function: F, a1: Expression<A1>) -> Self
    where
        A1: Manifold,
        F: Fn(&A1, OptionalJacobian<'_>) -> T + Send + Sync + 'static,
    {
        Self {
            root: Arc::new(UnaryNode::new(function, a1)),
        }
    }

    /// Applies a two-argument function.
    ///
    /// # Panics
    ///
    /// Panics if a key reachable through both arguments has different
    /// dimensions in each.
    pub fn binary<A1, A2, F>(function: F, a1: Expression<A1>, a2: Expression<A2>) -> Self
    where
        A1: Manifold,
        A2: Manifold,
        F: Fn(&A1, &A2, OptionalJacobian<'_>, OptionalJacobian<'_>) -> T + Send + Sync + 'static,
    {
        Self {
            root: Arc::new(BinaryNode::new(function, a1, a2)),
        }
    }

    /// Applies a three-argument function.
    ///
    /// # Panics
    ///
    /// Panics on inconsistent key dimensions, like [`Expression::binary`].
    pub fn ternary<A1, A2, A3, F>(
        function: F,
        a1: Expression<A1>,
        a2: Expression<A2>,
        a3: Expression<A3>,
    ) -> Self
    where
        A1: Manifold,
        A2: Manifold,
        A3: Manifold,
        F: Fn(&A1, &A2, &A3, OptionalJacobian<'_>, OptionalJacobian<'_>, OptionalJacobian<'_>) -> T
            + Send
            + Sync
            + 'static,
    {
        Self {
            root: Arc::new(TernaryNode::new(function, a1, a2, a3)),
        }
    }

    /// Kind of the root node.
    pub fn kind(&self) -> NodeKind {
        self.root.kind()
    }

    /// Every key the expression depends on, deduplicated.
    pub fn keys(&self) -> &BTreeSet<Key> {
        &self.info().keys
    }

    /// Tangent dimension of every key the expression depends on.
    pub fn dims(&self) -> &KeyDims {
        &self.info().dims
    }

    /// Merges this expression's key dimensions into `map`.
    ///
    /// # Panics
    ///
    /// Panics if `map` already holds one of the keys with another dimension.
    pub fn dims_into(&self, map: &mut KeyDims) {
        merge_dims(map, self.dims());
    }

    /// Bytes of trace needed by [`Expression::value_and_jacobians`].
    ///
    /// Zero for constants and leaves.
    pub fn trace_size(&self) -> usize {
        self.info().trace_size
    }

    /// Bytes of reverse-pass scratch needed by
    /// [`Expression::value_and_jacobians`].
    ///
    /// Holds the `T::DIM x T::DIM` seed plus one `T::DIM x dim` block per
    /// level of the deepest path that reaches a key.
    pub fn scratch_size(&self) -> usize {
        T::DIM * (T::DIM + self.info().reverse_width) * SLOT_BYTES
    }

    /// Evaluates the expression without computing any Jacobian.
    pub fn value(&self, values: &Values) -> Result<T> {
        self.root.value(values)
    }

    /// Evaluates the expression and its Jacobian with respect to every key.
    ///
    /// Each block in the returned map has `T::DIM` rows and as many columns
    /// as the key's tangent dimension. `trace` is scratch memory and may be
    /// reused across calls.
    ///
    /// The scratch region of `trace` is grown to
    /// [`scratch_size`](Self::scratch_size) on first use. After that the
    /// only allocations are the returned map and its blocks, one per key,
    /// whatever the depth of the tree.
    ///
    /// # Errors
    ///
    /// [`ExpressionError::TraceTooSmall`] if `trace` holds fewer than
    /// [`trace_size`](Self::trace_size) bytes; nothing is evaluated in that
    /// case. Store errors from leaves are propagated.
    pub fn value_and_jacobians(
        &self,
        values: &Values,
        trace: &mut TraceBuffer,
    ) -> Result<(T, JacobianMap)> {
        let required = self.trace_size();
        if trace.size() < required {
            return Err(ExpressionError::trace_too_small(required, trace.size()));
        }
        tracing::trace!(kind = ?self.kind(), keys = self.keys().len(), trace_bytes = required, "traced evaluation");
        trace.reserve_scratch(self.scratch_size());

        let value = self.root.forward(values, trace.slots_mut())?;
        let mut jacobians: JacobianMap = self
            .dims()
            .iter()
            .map(|(&key, &dim)| (key, DMatrix::zeros(T::DIM, dim)))
            .collect();

        let (records, scratch) = trace.records_and_scratch();
        let (seed, rest) = scratch.split_at_mut(T::DIM * T::DIM);
        DMatrixViewMut::from_slice(&mut *seed, T::DIM, T::DIM).fill_with_identity();
        let seed = DMatrixView::from_slice(&*seed, T::DIM, T::DIM);
        self.root.reverse(records, seed, rest, &mut jacobians);
        Ok((value, jacobians))
    }

    /// Evaluates the expression, writing one Jacobian block per key into
    /// `jacobians` in ascending key order.
    ///
    /// Allocates a trace buffer for the call; prefer
    /// [`value_and_jacobians`](Self::value_and_jacobians) in loops.
    pub fn value_with_jacobians(
        &self,
        values: &Values,
        jacobians: &mut Vec<DMatrix<f64>>,
    ) -> Result<T> {
        let mut trace = TraceBuffer::with_size(self.trace_size());
        let (value, mut map) = self.value_and_jacobians(values, &mut trace)?;
        jacobians.clear();
        for (&key, &dim) in self.dims() {
            jacobians.push(map.remove(&key).unwrap_or_else(|| DMatrix::zeros(T::DIM, dim)));
        }
        Ok(value)
    }
}

impl<T> Expression<T> {
    pub(crate) fn node(&self) -> &dyn ExpressionNode<T> {
        self.root.as_ref()
    }

    pub(crate) fn info(&self) -> &NodeInfo {
        self.root.info()
    }

    pub(crate) fn trace_slots(&self) -> usize {
        self.info().trace_size / SLOT_BYTES
    }
}

impl<T: Manifold> From<Key> for Expression<T> {
    fn from(key: Key) -> Self {
        Self::leaf(key)
    }
}

/// Group composition of two expressions.
impl<T: LieGroup> Mul for Expression<T> {
    type Output = Expression<T>;

    fn mul(self, rhs: Self) -> Self::Output {
        Expression::binary(T::compose, self, rhs)
    }
}

impl<T: LieGroup> Mul for &Expression<T> {
    type Output = Expression<T>;

    fn mul(self, rhs: Self) -> Self::Output {
        Expression::binary(T::compose, self.clone(), rhs.clone())
    }
}

impl<T> fmt::Debug for Expression<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expression")
            .field("kind", &self.root.kind())
            .field("keys", &self.info().keys)
            .field("trace_size", &self.info().trace_size)
            .finish()
    }
}

impl<T> fmt::Display for Expression<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.root.write_tree(f, 0)
    }
}

/// Creates `n` leaf expressions for the keys `chr{start}`, `chr{start + 1}`, ...
pub fn create_unknowns<T: Manifold>(n: usize, chr: char, start: u64) -> Vec<Expression<T>> {
    (0..n as u64)
        .map(|i| Expression::leaf(symbol(chr, start + i)))
        .collect()
}
