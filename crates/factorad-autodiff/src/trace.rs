//! Caller-owned scratch memory for traced evaluation.
//!
//! A traced forward pass writes one record per non-leaf node: the dense
//! column-major partial Jacobian of the node's output with respect to each
//! of its children. Records are laid out depth-first, each node's region
//! holding its own record followed by the regions of its children:
//!
//! ```text
//! | record(node) | region(child 1) | region(child 2) | region(child 3) |
//! ```
//!
//! Record sizes depend only on the value types involved, so the total size
//! of an expression's trace is known at construction
//! ([`Expression::trace_size`](crate::Expression::trace_size)) and one
//! buffer can be reused across any number of evaluations.
//!
//! The buffer also owns a second region used by the reverse pass to hold
//! the accumulated derivative of the root with respect to each node on the
//! current root-to-leaf path
//! ([`Expression::scratch_size`](crate::Expression::scratch_size)).

use factorad_core::types::constants::TRACE_ALIGNMENT;
use std::mem::size_of;

/// Size in bytes of one trace slot.
pub(crate) const SLOT_BYTES: usize = size_of::<f64>();

/// Rounds `bytes` up to the next multiple of [`TRACE_ALIGNMENT`].
pub fn up_aligned(bytes: usize) -> usize {
    bytes.div_ceil(TRACE_ALIGNMENT) * TRACE_ALIGNMENT
}

/// Bytes needed to record the partials of a node with output dimension
/// `output_dim` and children of the given tangent dimensions, before
/// alignment.
pub fn record_size(output_dim: usize, child_dims: &[usize]) -> usize {
    child_dims.iter().map(|&d| output_dim * d).sum::<usize>() * SLOT_BYTES
}

/// A reusable trace arena.
///
/// The buffer is sized in bytes but stored as `f64` slots; offsets into it
/// are slot indices derived from the expression's shape.
#[derive(Debug, Clone, Default)]
pub struct TraceBuffer {
    slots: Vec<f64>,
    scratch: Vec<f64>,
}

impl TraceBuffer {
    /// Allocates a zeroed buffer of at least `bytes` bytes.
    pub fn with_size(bytes: usize) -> Self {
        let slots = up_aligned(bytes) / SLOT_BYTES;
        tracing::trace!(bytes, slots, "allocating trace buffer");
        Self {
            slots: vec![0.0; slots],
            scratch: Vec::new(),
        }
    }

    /// Capacity in bytes.
    pub fn size(&self) -> usize {
        self.slots.len() * SLOT_BYTES
    }

    /// Grows the buffer to hold at least `bytes` bytes; never shrinks.
    pub fn reserve(&mut self, bytes: usize) {
        let slots = up_aligned(bytes) / SLOT_BYTES;
        if slots > self.slots.len() {
            tracing::trace!(from = self.size(), to = bytes, "growing trace buffer");
            self.slots.resize(slots, 0.0);
        }
    }

    /// Capacity of the reverse-pass scratch region in bytes.
    pub fn scratch_size(&self) -> usize {
        self.scratch.len() * SLOT_BYTES
    }

    /// Grows the scratch region to hold at least `bytes` bytes; never shrinks.
    pub fn reserve_scratch(&mut self, bytes: usize) {
        let slots = bytes.div_ceil(SLOT_BYTES);
        if slots > self.scratch.len() {
            tracing::trace!(from = self.scratch_size(), to = bytes, "growing scratch region");
            self.scratch.resize(slots, 0.0);
        }
    }

    #[cfg(test)]
    pub(crate) fn slots(&self) -> &[f64] {
        &self.slots
    }

    pub(crate) fn slots_mut(&mut self) -> &mut [f64] {
        &mut self.slots
    }

    /// Records for reading and scratch for writing, borrowed together.
    pub(crate) fn records_and_scratch(&mut self) -> (&[f64], &mut [f64]) {
        (&self.slots, &mut self.scratch)
    }
}
