//! The closed set of expression node kinds.
//!
//! Every node caches its key set, key dimensions and trace size when it is
//! built. Evaluation comes in two flavors:
//!
//! - `value`: plain recursive evaluation, no Jacobians requested
//! - `forward` followed by `reverse`: the traced pass records each node's
//!   local partials into the trace, then the accumulator walks the same
//!   layout depth-first, chaining partials down to the leaves
//!
//! A node hands a Jacobian block to its function only when the matching
//! child depends on at least one key. Constant subtrees get `None` and
//! their blocks are skipped on the way back.
//!
//! The reverse pass allocates nothing. The derivative of the root with
//! respect to each node on the current path lives in the buffer's scratch
//! region, one `root_dim x node_dim` block per level, and products are
//! written in place with `gemm`. Only the per-key output blocks are
//! allocated, once per evaluation, before the walk starts.

use crate::error::Result;
use crate::expression::Expression;
use crate::trace::{record_size, up_aligned, SLOT_BYTES};
use factorad_core::types::{JacobianMap, KeyDims};
use factorad_core::{Key, Manifold, OptionalJacobian, Values};
use nalgebra::{DMatrixView, DMatrixViewMut};
use std::collections::btree_map::Entry;
use std::collections::BTreeSet;
use std::fmt;
use std::marker::PhantomData;

/// The kind of an expression's root node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// A fixed value with no keys.
    Constant,
    /// A value read from the store.
    Leaf,
    /// A function of one sub-expression.
    Unary,
    /// A function of two sub-expressions.
    Binary,
    /// A function of three sub-expressions.
    Ternary,
}

/// Shape information cached on every node.
#[derive(Debug, Clone, Default)]
pub(crate) struct NodeInfo {
    pub(crate) keys: BTreeSet<Key>,
    pub(crate) dims: KeyDims,
    /// Bytes of trace needed by the node and its descendants.
    pub(crate) trace_size: usize,
    /// Largest sum of child dimensions along any path below the node that
    /// reaches a key, i.e. the scratch columns the reverse pass needs.
    pub(crate) reverse_width: usize,
}

impl NodeInfo {
    fn leaf(key: Key, dim: usize) -> Self {
        Self {
            keys: BTreeSet::from([key]),
            dims: KeyDims::from([(key, dim)]),
            trace_size: 0,
            reverse_width: 0,
        }
    }

    /// Combines the children of a node, given as `(tangent dim, info)`.
    fn composite(record_bytes: usize, children: &[(usize, &NodeInfo)]) -> Self {
        let mut info = Self {
            trace_size: up_aligned(record_bytes),
            ..Self::default()
        };
        for &(dim, child) in children {
            info.keys.extend(child.keys.iter().copied());
            merge_dims(&mut info.dims, &child.dims);
            info.trace_size += child.trace_size;
            if !child.keys.is_empty() {
                info.reverse_width = info.reverse_width.max(dim + child.reverse_width);
            }
        }
        info
    }
}

/// Merges `from` into `into`.
///
/// # Panics
///
/// Panics if a key appears in both maps with different dimensions.
pub(crate) fn merge_dims(into: &mut KeyDims, from: &KeyDims) {
    for (&key, &dim) in from {
        let existing = *into.entry(key).or_insert(dim);
        assert_eq!(
            existing, dim,
            "Key {key} is used with inconsistent dimensions {existing} and {dim}"
        );
    }
}

/// Behavior shared by all node kinds producing a `T`.
pub(crate) trait ExpressionNode<T>: Send + Sync {
    fn kind(&self) -> NodeKind;

    fn info(&self) -> &NodeInfo;

    /// Evaluates without recording anything.
    fn value(&self, values: &Values) -> Result<T>;

    /// Evaluates and records local partials into `trace`, which must hold at
    /// least `info().trace_size` bytes.
    fn forward(&self, values: &Values, trace: &mut [f64]) -> Result<T>;

    /// Accumulates `d_self * d(self)/d(key)` into `jacobians` for every key
    /// below this node, reading the records left by `forward`.
    ///
    /// `scratch` must hold at least `d_self.nrows() * info().reverse_width`
    /// slots.
    fn reverse(
        &self,
        trace: &[f64],
        d_self: DMatrixView<'_, f64>,
        scratch: &mut [f64],
        jacobians: &mut JacobianMap,
    );

    fn write_tree(&self, out: &mut dyn fmt::Write, indent: usize) -> fmt::Result;
}

fn write_header(out: &mut dyn fmt::Write, indent: usize, kind: NodeKind, info: &NodeInfo) -> fmt::Result {
    writeln!(
        out,
        "{:indent$}{kind:?} keys={:?} trace={}",
        "",
        info.keys,
        info.trace_size,
        indent = indent
    )
}

/// Hands out the Jacobian block for one child, zeroed, or `None` when the
/// child has no keys.
fn jacobian_slot<'a, T: Manifold, A: Manifold>(
    child: &Expression<A>,
    block: &'a mut [f64],
) -> OptionalJacobian<'a> {
    if child.keys().is_empty() {
        return None;
    }
    block.fill(0.0);
    Some(DMatrixViewMut::from_slice(block, T::DIM, A::DIM))
}

/// Chains `d_self` through one child's recorded block.
///
/// The product lands at the front of `scratch`; the rest is handed down.
fn reverse_child<T: Manifold, A: Manifold>(
    child: &Expression<A>,
    block: &[f64],
    child_trace: &[f64],
    d_self: &DMatrixView<'_, f64>,
    scratch: &mut [f64],
    jacobians: &mut JacobianMap,
) {
    if child.keys().is_empty() {
        return;
    }
    let rows = d_self.nrows();
    let (d_child, rest) = scratch.split_at_mut(rows * A::DIM);
    let local = DMatrixView::from_slice(block, T::DIM, A::DIM);
    let mut product = DMatrixViewMut::from_slice(&mut *d_child, rows, A::DIM);
    product.gemm(1.0, d_self, &local, 0.0);

    let d_child = DMatrixView::from_slice(&*d_child, rows, A::DIM);
    child.node().reverse(child_trace, d_child, rest, jacobians);
}

pub(crate) struct ConstantNode<T> {
    value: T,
    info: NodeInfo,
}

impl<T: Manifold> ConstantNode<T> {
    pub(crate) fn new(value: T) -> Self {
        Self {
            value,
            info: NodeInfo::default(),
        }
    }
}

impl<T: Manifold> ExpressionNode<T> for ConstantNode<T> {
    fn kind(&self) -> NodeKind {
        NodeKind::Constant
    }

    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn value(&self, _values: &Values) -> Result<T> {
        Ok(self.value.clone())
    }

    fn forward(&self, _values: &Values, _trace: &mut [f64]) -> Result<T> {
        Ok(self.value.clone())
    }

    fn reverse(
        &self,
        _trace: &[f64],
        _d_self: DMatrixView<'_, f64>,
        _scratch: &mut [f64],
        _jacobians: &mut JacobianMap,
    ) {
    }

    fn write_tree(&self, out: &mut dyn fmt::Write, indent: usize) -> fmt::Result {
        write_header(out, indent, self.kind(), &self.info)?;
        self.value.write_labeled(&format!("{:indent$}  value", "", indent = indent), out)
    }
}

pub(crate) struct LeafNode<T> {
    key: Key,
    info: NodeInfo,
    _value: PhantomData<fn() -> T>,
}

impl<T: Manifold> LeafNode<T> {
    pub(crate) fn new(key: Key) -> Self {
        Self {
            key,
            info: NodeInfo::leaf(key, T::DIM),
            _value: PhantomData,
        }
    }
}

impl<T: Manifold> ExpressionNode<T> for LeafNode<T> {
    fn kind(&self) -> NodeKind {
        NodeKind::Leaf
    }

    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn value(&self, values: &Values) -> Result<T> {
        Ok(values.at::<T>(self.key)?.clone())
    }

    fn forward(&self, values: &Values, _trace: &mut [f64]) -> Result<T> {
        self.value(values)
    }

    fn reverse(
        &self,
        _trace: &[f64],
        d_self: DMatrixView<'_, f64>,
        _scratch: &mut [f64],
        jacobians: &mut JacobianMap,
    ) {
        match jacobians.entry(self.key) {
            Entry::Occupied(mut entry) => *entry.get_mut() += d_self,
            Entry::Vacant(entry) => {
                entry.insert(d_self.into_owned());
            }
        }
    }

    fn write_tree(&self, out: &mut dyn fmt::Write, indent: usize) -> fmt::Result {
        write_header(out, indent, self.kind(), &self.info)
    }
}

pub(crate) struct UnaryNode<T, A1, F> {
    function: F,
    a1: Expression<A1>,
    record_slots: usize,
    info: NodeInfo,
    _value: PhantomData<fn() -> T>,
}

impl<T, A1, F> UnaryNode<T, A1, F>
where
    T: Manifold,
    A1: Manifold,
    F: Fn(&A1, OptionalJacobian<'_>) -> T + Send + Sync + 'static,
{
    pub(crate) fn new(function: F, a1: Expression<A1>) -> Self {
        let record_bytes = record_size(T::DIM, &[A1::DIM]);
        let info = NodeInfo::composite(record_bytes, &[(A1::DIM, a1.info())]);
        Self {
            function,
            a1,
            record_slots: up_aligned(record_bytes) / SLOT_BYTES,
            info,
            _value: PhantomData,
        }
    }
}

impl<T, A1, F> ExpressionNode<T> for UnaryNode<T, A1, F>
where
    T: Manifold,
    A1: Manifold,
    F: Fn(&A1, OptionalJacobian<'_>) -> T + Send + Sync + 'static,
{
    fn kind(&self) -> NodeKind {
        NodeKind::Unary
    }

    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn value(&self, values: &Values) -> Result<T> {
        let x1 = self.a1.node().value(values)?;
        Ok((self.function)(&x1, None))
    }

    fn forward(&self, values: &Values, trace: &mut [f64]) -> Result<T> {
        let (record, trace1) = trace.split_at_mut(self.record_slots);
        let x1 = self.a1.node().forward(values, trace1)?;
        let (block1, _) = record.split_at_mut(T::DIM * A1::DIM);
        let h1 = jacobian_slot::<T, A1>(&self.a1, block1);
        Ok((self.function)(&x1, h1))
    }

    fn reverse(
        &self,
        trace: &[f64],
        d_self: DMatrixView<'_, f64>,
        scratch: &mut [f64],
        jacobians: &mut JacobianMap,
    ) {
        let (record, trace1) = trace.split_at(self.record_slots);
        reverse_child::<T, A1>(&self.a1, record, trace1, &d_self, scratch, jacobians);
    }

    fn write_tree(&self, out: &mut dyn fmt::Write, indent: usize) -> fmt::Result {
        write_header(out, indent, self.kind(), &self.info)?;
        self.a1.node().write_tree(out, indent + 2)
    }
}

pub(crate) struct BinaryNode<T, A1, A2, F> {
    function: F,
    a1: Expression<A1>,
    a2: Expression<A2>,
    record_slots: usize,
    info: NodeInfo,
    _value: PhantomData<fn() -> T>,
}

impl<T, A1, A2, F> BinaryNode<T, A1, A2, F>
where
    T: Manifold,
    A1: Manifold,
    A2: Manifold,
    F: Fn(&A1, &A2, OptionalJacobian<'_>, OptionalJacobian<'_>) -> T + Send + Sync + 'static,
{
    pub(crate) fn new(function: F, a1: Expression<A1>, a2: Expression<A2>) -> Self {
        let record_bytes = record_size(T::DIM, &[A1::DIM, A2::DIM]);
        let info =
            NodeInfo::composite(record_bytes, &[(A1::DIM, a1.info()), (A2::DIM, a2.info())]);
        Self {
            function,
            a1,
            a2,
            record_slots: up_aligned(record_bytes) / SLOT_BYTES,
            info,
            _value: PhantomData,
        }
    }
}

impl<T, A1, A2, F> ExpressionNode<T> for BinaryNode<T, A1, A2, F>
where
    T: Manifold,
    A1: Manifold,
    A2: Manifold,
    F: Fn(&A1, &A2, OptionalJacobian<'_>, OptionalJacobian<'_>) -> T + Send + Sync + 'static,
{
    fn kind(&self) -> NodeKind {
        NodeKind::Binary
    }

    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn value(&self, values: &Values) -> Result<T> {
        let x1 = self.a1.node().value(values)?;
        let x2 = self.a2.node().value(values)?;
        Ok((self.function)(&x1, &x2, None, None))
    }

    fn forward(&self, values: &Values, trace: &mut [f64]) -> Result<T> {
        let (record, children) = trace.split_at_mut(self.record_slots);
        let (trace1, trace2) = children.split_at_mut(self.a1.trace_slots());
        let x1 = self.a1.node().forward(values, trace1)?;
        let x2 = self.a2.node().forward(values, trace2)?;

        let (block1, rest) = record.split_at_mut(T::DIM * A1::DIM);
        let (block2, _) = rest.split_at_mut(T::DIM * A2::DIM);
        let h1 = jacobian_slot::<T, A1>(&self.a1, block1);
        let h2 = jacobian_slot::<T, A2>(&self.a2, block2);
        Ok((self.function)(&x1, &x2, h1, h2))
    }

    fn reverse(
        &self,
        trace: &[f64],
        d_self: DMatrixView<'_, f64>,
        scratch: &mut [f64],
        jacobians: &mut JacobianMap,
    ) {
        let (record, children) = trace.split_at(self.record_slots);
        let (trace1, trace2) = children.split_at(self.a1.trace_slots());
        let (block1, block2) = record.split_at(T::DIM * A1::DIM);
        reverse_child::<T, A1>(&self.a1, block1, trace1, &d_self, scratch, jacobians);
        reverse_child::<T, A2>(&self.a2, block2, trace2, &d_self, scratch, jacobians);
    }

    fn write_tree(&self, out: &mut dyn fmt::Write, indent: usize) -> fmt::Result {
        write_header(out, indent, self.kind(), &self.info)?;
        self.a1.node().write_tree(out, indent + 2)?;
        self.a2.node().write_tree(out, indent + 2)
    }
}

pub(crate) struct TernaryNode<T, A1, A2, A3, F> {
    function: F,
    a1: Expression<A1>,
    a2: Expression<A2>,
    a3: Expression<A3>,
    record_slots: usize,
    info: NodeInfo,
    _value: PhantomData<fn() -> T>,
}

impl<T, A1, A2, A3, F> TernaryNode<T, A1, A2, A3, F>
where
    T: Manifold,
    A1: Manifold,
    A2: Manifold,
    A3: Manifold,
    F: Fn(&A1, &A2, &A3, OptionalJacobian<'_>, OptionalJacobian<'_>, OptionalJacobian<'_>) -> T
        + Send
        + Sync
        + 'static,
{
    pub(crate) fn new(function: F, a1: Expression<A1>, a2: Expression<A2>, a3: Expression<A3>) -> Self {
        let record_bytes = record_size(T::DIM, &[A1::DIM, A2::DIM, A3::DIM]);
        let info = NodeInfo::composite(
            record_bytes,
            &[(A1::DIM, a1.info()), (A2::DIM, a2.info()), (A3::DIM, a3.info())],
        );
        Self {
            function,
            a1,
            a2,
            a3,
            record_slots: up_aligned(record_bytes) / SLOT_BYTES,
            info,
            _value: PhantomData,
        }
    }
}

impl<T, A1, A2, A3, F> ExpressionNode<T> for TernaryNode<T, A1, A2, A3, F>
where
    T: Manifold,
    A1: Manifold,
    A2: Manifold,
    A3: Manifold,
    F: Fn(&A1, &A2, &A3, OptionalJacobian<'_>, OptionalJacobian<'_>, OptionalJacobian<'_>) -> T
        + Send
        + Sync
        + 'static,
{
    fn kind(&self) -> NodeKind {
        NodeKind::Ternary
    }

    fn info(&self) -> &NodeInfo {
        &self.info
    }

    fn value(&self, values: &Values) -> Result<T> {
        let x1 = self.a1.node().value(values)?;
        let x2 = self.a2.node().value(values)?;
        let x3 = self.a3.node().value(values)?;
        Ok((self.function)(&x1, &x2, &x3, None, None, None))
    }

    fn forward(&self, values: &Values, trace: &mut [f64]) -> Result<T> {
        let (record, children) = trace.split_at_mut(self.record_slots);
        let (trace1, children) = children.split_at_mut(self.a1.trace_slots());
        let (trace2, trace3) = children.split_at_mut(self.a2.trace_slots());
        let x1 = self.a1.node().forward(values, trace1)?;
        let x2 = self.a2.node().forward(values, trace2)?;
        let x3 = self.a3.node().forward(values, trace3)?;

        let (block1, rest) = record.split_at_mut(T::DIM * A1::DIM);
        let (block2, rest) = rest.split_at_mut(T::DIM * A2::DIM);
        let (block3, _) = rest.split_at_mut(T::DIM * A3::DIM);
        let h1 = jacobian_slot::<T, A1>(&self.a1, block1);
        let h2 = jacobian_slot::<T, A2>(&self.a2, block2);
        let h3 = jacobian_slot::<T, A3>(&self.a3, block3);
        Ok((self.function)(&x1, &x2, &x3, h1, h2, h3))
    }

    fn reverse(
        &self,
        trace: &[f64],
        d_self: DMatrixView<'_, f64>,
        scratch: &mut [f64],
        jacobians: &mut JacobianMap,
    ) {
        let (record, children) = trace.split_at(self.record_slots);
        let (trace1, children) = children.split_at(self.a1.trace_slots());
        let (trace2, trace3) = children.split_at(self.a2.trace_slots());
        let (block1, rest) = record.split_at(T::DIM * A1::DIM);
        let (block2, block3) = rest.split_at(T::DIM * A2::DIM);
        reverse_child::<T, A1>(&self.a1, block1, trace1, &d_self, scratch, jacobians);
        reverse_child::<T, A2>(&self.a2, block2, trace2, &d_self, scratch, jacobians);
        reverse_child::<T, A3>(&self.a3, block3, trace3, &d_self, scratch, jacobians);
    }

    fn write_tree(&self, out: &mut dyn fmt::Write, indent: usize) -> fmt::Result {
        write_header(out, indent, self.kind(), &self.info)?;
        self.a1.node().write_tree(out, indent + 2)?;
        self.a2.node().write_tree(out, indent + 2)?;
        self.a3.node().write_tree(out, indent + 2)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use factorad_core::types::DMatrix;

    #[test]
    fn test_merge_dims_accepts_agreeing_keys() {
        let mut dims = KeyDims::from([(1, 3)]);
        merge_dims(&mut dims, &KeyDims::from([(1, 3), (2, 6)]));
        assert_eq!(dims, KeyDims::from([(1, 3), (2, 6)]));
    }

    #[test]
    #[should_panic(expected = "inconsistent dimensions")]
    fn test_merge_dims_rejects_conflicts() {
        let mut dims = KeyDims::from([(1, 3)]);
        merge_dims(&mut dims, &KeyDims::from([(1, 6)]));
    }

    #[test]
    fn test_composite_info_sums_children() {
        let a = NodeInfo::leaf(1, 6);
        let b = NodeInfo::leaf(2, 3);
        let info = NodeInfo::composite(record_size(3, &[6, 3]), &[(6, &a), (3, &b)]);
        assert_eq!(info.keys, BTreeSet::from([1, 2]));
        assert_eq!(info.trace_size, up_aligned(27 * 8));
        assert_eq!(info.reverse_width, 6);
    }

    #[test]
    fn test_reverse_width_follows_deepest_keyed_path() {
        let leaf = NodeInfo::leaf(1, 3);
        let constant = NodeInfo::default();
        let inner = NodeInfo::composite(record_size(2, &[3]), &[(3, &leaf)]);
        assert_eq!(inner.reverse_width, 3);

        // The constant child is wider but has no keys, so it is skipped.
        let outer =
            NodeInfo::composite(record_size(1, &[2, 9]), &[(2, &inner), (9, &constant)]);
        assert_eq!(outer.reverse_width, 5);
    }

    #[test]
    fn test_leaf_accumulates_repeated_keys() {
        let leaf = LeafNode::<f64>::new(4);
        let mut jacobians = JacobianMap::new();
        leaf.reverse(&[], DMatrixView::from_slice(&[2.0], 1, 1), &mut [], &mut jacobians);
        leaf.reverse(&[], DMatrixView::from_slice(&[0.5], 1, 1), &mut [], &mut jacobians);
        assert_eq!(jacobians[&4], DMatrix::from_element(1, 1, 2.5));
    }
}
