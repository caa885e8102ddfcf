//! Heap allocations made by traced evaluation with a reused buffer.
//!
//! The binary installs a counting global allocator. Counts are kept per
//! thread so that the test harness's own threads do not interfere.

use factorad_autodiff::prelude::*;
use factorad_core::prelude::*;
use factorad_manifolds::Rot3;
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;

struct CountingAllocator;

thread_local! {
    static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let _ = ALLOCATIONS.try_with(|count| count.set(count.get() + 1));
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

fn allocations() -> usize {
    ALLOCATIONS.with(Cell::get)
}

fn double(x: &f64, h: OptionalJacobian<'_>) -> f64 {
    if let Some(mut h) = h {
        h[(0, 0)] = 2.0;
    }
    2.0 * x
}

fn doubling_chain(depth: usize) -> Expression<f64> {
    let mut e = Expression::<f64>::leaf(1);
    for _ in 0..depth {
        e = Expression::unary(double, e);
    }
    e
}

fn rotation_chain(depth: usize) -> Expression<Rot3> {
    let mut e = Expression::<Rot3>::leaf(1);
    for i in 0..depth {
        e = e * Expression::leaf(2 + (i as u64 % 2));
    }
    e
}

/// Allocations made by one evaluation after a warm-up on the same buffer.
fn allocations_per_evaluation<T: Manifold>(expression: &Expression<T>, values: &Values) -> usize {
    let mut trace = TraceBuffer::with_size(expression.trace_size());
    let warm_up = expression.value_and_jacobians(values, &mut trace);
    assert!(warm_up.is_ok());
    assert!(trace.scratch_size() >= expression.scratch_size());
    drop(warm_up);

    let before = allocations();
    let result = expression.value_and_jacobians(values, &mut trace);
    let after = allocations();
    assert!(result.is_ok());
    after - before
}

#[test]
fn test_allocations_do_not_grow_with_depth() {
    let mut scalars = Values::new();
    scalars.insert(1, 0.75).unwrap();

    let shallow = allocations_per_evaluation(&doubling_chain(1), &scalars);
    let medium = allocations_per_evaluation(&doubling_chain(10), &scalars);
    let deep = allocations_per_evaluation(&doubling_chain(100), &scalars);
    assert_eq!(shallow, medium);
    assert_eq!(shallow, deep);
    // Only the returned map and its single block.
    assert!(shallow < 8, "{shallow} allocations for one key");

    let mut rotations = Values::new();
    for key in 1..=3 {
        rotations.insert(key, Rot3::rz_ry_rx(0.1 * key as f64, 0.2, -0.3)).unwrap();
    }
    let shallow = allocations_per_evaluation(&rotation_chain(2), &rotations);
    let deep = allocations_per_evaluation(&rotation_chain(40), &rotations);
    assert_eq!(shallow, deep);
}

#[test]
fn test_reused_scratch_gives_same_jacobians() {
    let mut values = Values::new();
    for key in 1..=3 {
        values.insert(key, Rot3::rz_ry_rx(-0.2, 0.1 * key as f64, 0.4)).unwrap();
    }
    let deep = rotation_chain(12);
    let shallow = rotation_chain(3);

    // A buffer first used by the deeper tree keeps its larger scratch.
    let mut trace = TraceBuffer::with_size(deep.trace_size());
    let (_, deep_first) = deep.value_and_jacobians(&values, &mut trace).unwrap();
    let (_, shallow_reused) = shallow.value_and_jacobians(&values, &mut trace).unwrap();
    let (_, deep_again) = deep.value_and_jacobians(&values, &mut trace).unwrap();

    let mut fresh = TraceBuffer::with_size(shallow.trace_size());
    let (_, shallow_fresh) = shallow.value_and_jacobians(&values, &mut fresh).unwrap();

    assert_eq!(deep_first, deep_again);
    assert_eq!(shallow_reused, shallow_fresh);
    assert_eq!(shallow_fresh.len(), 3);
}
