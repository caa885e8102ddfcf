//! Analytic Jacobians against central finite differences, and the laws the
//! accumulator must obey.

use factorad_autodiff::prelude::*;
use factorad_autodiff::{compute_finite_difference_jacobians, record_size, up_aligned};
use factorad_core::prelude::*;
use factorad_manifolds::{project, Cal3S2, Point2, Point3, Pose3, Rot3};
use proptest::prelude::*;
use rand::rngs::SmallRng;
use rand::SeedableRng;

fn double(x: &f64, h: OptionalJacobian<'_>) -> f64 {
    if let Some(mut h) = h {
        h[(0, 0)] = 2.0;
    }
    2.0 * x
}

fn product(a: &f64, b: &f64, h1: OptionalJacobian<'_>, h2: OptionalJacobian<'_>) -> f64 {
    if let Some(mut h1) = h1 {
        h1[(0, 0)] = *b;
    }
    if let Some(mut h2) = h2 {
        h2[(0, 0)] = *a;
    }
    a * b
}

fn camera_values() -> Values {
    let mut values = Values::new();
    values
        .insert(
            symbol('x', 0),
            Pose3::new(Rot3::rz_ry_rx(0.1, -0.05, 0.2), Point3::new(0.3, -0.2, -1.0)),
        )
        .unwrap();
    values.insert(symbol('l', 0), Point3::new(0.5, 0.4, 6.0)).unwrap();
    values
        .insert(symbol('K', 0), Cal3S2::new(500.0, 480.0, 0.2, 320.0, 240.0))
        .unwrap();
    values
}

fn camera_expression() -> Expression<Point2> {
    let x = Expression::<Pose3>::leaf(symbol('x', 0));
    let l = Expression::<Point3>::leaf(symbol('l', 0));
    let k = Expression::<Cal3S2>::leaf(symbol('K', 0));
    let p_cam = Expression::binary(Pose3::transform_to, x, l);
    Expression::binary(Cal3S2::uncalibrate, k, Expression::unary(project, p_cam))
}

#[test]
fn test_camera_chain_matches_finite_differences() {
    // Pixel-scale errors need a larger step to keep roundoff below tolerance.
    let config = DerivativeCheckConfig::default().with_fd_step(1e-6);
    let check = test_expression_jacobians(&camera_expression(), &camera_values(), &config);
    assert!(check.unwrap());
}

#[test]
fn test_intrinsic_projection_matches_finite_differences() {
    let x = Expression::<Pose3>::leaf(symbol('x', 0));
    let l = Expression::<Point3>::leaf(symbol('l', 0));
    let uv = Expression::unary(project, Expression::binary(Pose3::transform_to, x, l));
    let config = DerivativeCheckConfig::default();
    assert!(test_expression_jacobians(&uv, &camera_values(), &config).unwrap());
}

#[test]
fn test_rotation_primitives_match_finite_differences() {
    let mut rng = SmallRng::seed_from_u64(17);
    let mut values = Values::new();
    values.insert(1, Rot3::random(&mut rng)).unwrap();
    values.insert(2, Rot3::random(&mut rng)).unwrap();
    values.insert(3, Point3::random(&mut rng, 2.0)).unwrap();

    let r1 = Expression::<Rot3>::leaf(1);
    let r2 = Expression::<Rot3>::leaf(2);
    let p = Expression::<Point3>::leaf(3);
    let config = DerivativeCheckConfig::default();

    let composed = &r1 * &r2;
    assert!(test_expression_jacobians(&composed, &values, &config).unwrap());

    let rotated = Expression::binary(Rot3::rotate, composed.clone(), p.clone());
    assert!(test_expression_jacobians(&rotated, &values, &config).unwrap());

    let back = Expression::binary(Rot3::unrotate, r2.clone(), rotated);
    assert!(test_expression_jacobians(&back, &values, &config).unwrap());

    let squared = &r1 * &r1;
    assert!(test_expression_jacobians(&squared, &values, &config).unwrap());
}

#[test]
fn test_pose_primitives_match_finite_differences() {
    let mut rng = SmallRng::seed_from_u64(3);
    let mut values = Values::new();
    for key in 1..=2 {
        let pose = Pose3::new(Rot3::random(&mut rng), Point3::random(&mut rng, 1.0));
        values.insert(key, pose).unwrap();
    }
    values.insert(3, Point3::random(&mut rng, 1.0)).unwrap();

    let x1 = Expression::<Pose3>::leaf(1);
    let x2 = Expression::<Pose3>::leaf(2);
    let p = Expression::<Point3>::leaf(3);
    let config = DerivativeCheckConfig::default();

    let between = x1.clone() * x2;
    assert!(test_expression_jacobians(&between, &values, &config).unwrap());

    let world = Expression::binary(Pose3::transform_from, between, p);
    assert!(test_expression_jacobians(&world, &values, &config).unwrap());

    let local = Expression::binary(Pose3::transform_to, x1, world);
    assert!(test_expression_jacobians(&local, &values, &config).unwrap());
}

#[test]
fn test_point_primitives_match_finite_differences() {
    let mut values = Values::new();
    values.insert(1, Point3::new(1.0, -2.0, 0.5)).unwrap();
    values.insert(2, Point3::new(0.3, 0.7, -1.1)).unwrap();

    let a = Expression::<Point3>::leaf(1);
    let b = Expression::<Point3>::leaf(2);
    let config = DerivativeCheckConfig::default();

    let added = Expression::binary(Point3::add, a.clone(), b.clone());
    let dotted = Expression::binary(Point3::dot, added.clone(), a);
    let norm = Expression::unary(Point3::norm, added);
    let scaled = Expression::binary(product, dotted.clone(), norm);

    assert!(test_expression_jacobians(&dotted, &values, &config).unwrap());
    assert!(test_expression_jacobians(&scaled, &values, &config).unwrap());
}

#[test]
fn test_finite_differences_flag_wrong_jacobian() {
    fn wrong(x: &f64, h: OptionalJacobian<'_>) -> f64 {
        if let Some(mut h) = h {
            h[(0, 0)] = 1.0;
        }
        3.0 * x
    }
    let mut values = Values::new();
    values.insert(1, 0.5).unwrap();
    let e = Expression::unary(wrong, Expression::leaf(1));
    assert!(!test_expression_jacobians(&e, &values, &DerivativeCheckConfig::default()).unwrap());
}

#[test]
fn test_finite_difference_factor_layout() {
    let factor = ExpressionFactor::new(Point2::new(300.0, 200.0), camera_expression());
    let numerical = compute_finite_difference_jacobians(&factor, &camera_values(), 1e-6).unwrap();
    assert_eq!(
        numerical.keys(),
        &[symbol('K', 0), symbol('l', 0), symbol('x', 0)]
    );
    assert_eq!(numerical.jacobian_unweighted().0.shape(), (2, 5 + 3 + 6));
    let error = factor.unwhitened_error(&camera_values()).unwrap();
    assert!(numerical.rhs().equals(&(-error), 1e-12));
}

#[test]
fn test_superposition_of_shared_key() {
    let mut rng = SmallRng::seed_from_u64(11);
    let r = Rot3::random(&mut rng);
    let mut values = Values::new();
    values.insert(1, r).unwrap();
    values.insert(2, r).unwrap();

    let shared = Expression::<Rot3>::leaf(1) * Expression::<Rot3>::leaf(1);
    let split = Expression::<Rot3>::leaf(1) * Expression::<Rot3>::leaf(2);

    let mut trace = TraceBuffer::with_size(shared.trace_size());
    let (_, shared_h) = shared.value_and_jacobians(&values, &mut trace).unwrap();
    let (_, split_h) = split.value_and_jacobians(&values, &mut trace).unwrap();

    let expected = &split_h[&1] + &split_h[&2];
    assert!(assert_equal(&expected, &shared_h[&1], 1e-12));
}

#[test]
fn test_constant_only_expression() {
    let e = Expression::binary(
        product,
        Expression::constant(2.0),
        Expression::unary(double, Expression::constant(1.5)),
    );
    assert!(e.keys().is_empty());
    assert!(e.dims().is_empty());
    assert_eq!(e.value(&Values::new()).unwrap(), 6.0);

    let mut trace = TraceBuffer::with_size(e.trace_size());
    let (value, jacobians) = e.value_and_jacobians(&Values::new(), &mut trace).unwrap();
    assert_eq!(value, 6.0);
    assert!(jacobians.is_empty());
}

#[test]
fn test_constant_leaves_have_zero_trace() {
    assert_eq!(Expression::constant(Rot3::identity()).trace_size(), 0);
    assert_eq!(Expression::<Pose3>::leaf(4).trace_size(), 0);
}

proptest! {
    #[test]
    fn prop_keys_are_deduplicated_union(leaf_keys in prop::collection::vec(0u64..6, 1..12)) {
        let mut iter = leaf_keys.iter();
        let first = *iter.next().unwrap();
        let mut e = Expression::<f64>::leaf(first);
        for &key in iter {
            e = Expression::binary(product, e, Expression::leaf(key));
        }
        let expected: std::collections::BTreeSet<Key> = leaf_keys.iter().copied().collect();
        prop_assert_eq!(e.keys(), &expected);
        prop_assert!(e.dims().values().all(|&d| d == 1));
    }

    #[test]
    fn prop_trace_size_depends_only_on_shape(depth in 0usize..10, x in -5.0f64..5.0) {
        let mut constant_chain = Expression::constant(x);
        let mut leaf_chain = Expression::<f64>::leaf(1);
        for _ in 0..depth {
            let before = leaf_chain.trace_size();
            constant_chain = Expression::unary(double, constant_chain);
            leaf_chain = Expression::unary(double, leaf_chain);
            prop_assert_eq!(leaf_chain.trace_size(), before + up_aligned(record_size(1, &[1])));
        }
        prop_assert_eq!(constant_chain.trace_size(), leaf_chain.trace_size());
        prop_assert_eq!(leaf_chain.trace_size(), depth * 16);
    }

    #[test]
    fn prop_chained_scalar_jacobian(depth in 1usize..8, x in -10.0f64..10.0) {
        let mut e = Expression::<f64>::leaf(1);
        for _ in 0..depth {
            e = Expression::unary(double, e);
        }
        let mut values = Values::new();
        values.insert(1, x).unwrap();
        let mut h = Vec::new();
        let value = e.value_with_jacobians(&values, &mut h).unwrap();
        let scale = 2.0f64.powi(depth as i32);
        prop_assert!((value - scale * x).abs() < 1e-9);
        prop_assert_eq!(h[0][(0, 0)], scale);
    }
}
