use hetla_core::contract::catch;
use hetla_core::{BackendDescriptor, BackendTag, Migrate, Vector, ViolationKind};
use std::sync::Arc;

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn backend() -> Arc<BackendDescriptor> {
    init_logger();
    BackendDescriptor::with_simulated_accelerator().unwrap()
}

// Helper for float comparison in tests
fn assert_approx_eq_vec(a: &[f64], b: &[f64], tolerance: f64) {
    assert_eq!(a.len(), b.len(), "Vector lengths differ");
    for i in 0..a.len() {
        let diff = (a[i] - b[i]).abs();
        assert!(
            diff <= tolerance,
            "Verification failed at index {}: expected {}, got {}, diff {}",
            i,
            b[i],
            a[i],
            diff
        );
    }
}

fn ramp(n: usize, shift: f64) -> Vec<f64> {
    (0..n).map(|i| ((i % 13) as f64 - 6.0) * 0.25 + shift).collect()
}

fn vector_on(
    backend: &Arc<BackendDescriptor>,
    name: &str,
    data: &[f64],
    accelerator: bool,
) -> Vector<f64> {
    let mut v = Vector::from_slice(backend, name, data);
    if accelerator {
        v.move_to_accelerator();
    }
    v
}

fn arithmetic_sequence(backend: &Arc<BackendDescriptor>, accelerator: bool) -> (Vec<f64>, f64) {
    let n = 10_000;
    let x = vector_on(backend, "x", &ramp(n, 1.0), accelerator);
    let z = vector_on(backend, "z", &ramp(n, -0.5), accelerator);
    let mut y = vector_on(backend, "y", &ramp(n, 0.0), accelerator);

    y.add_scale(&x, 2.0);
    y.scale_add(0.5, &x);
    y.scale_add_scale(-1.0, &z, 3.0);
    y.scale_add2(0.25, &x, -2.0, &z, 1.5);
    y.scale(2.0);
    y.pointwise_mult(&x);
    y.scale_add_scale_range(1.0, &z, 4.0, 10, 100, 50);
    let dot = y.dot(&x);
    (y.to_vec(), dot)
}

#[test]
fn host_and_accelerator_give_identical_results() {
    let backend = backend();
    let (host, host_dot) = arithmetic_sequence(&backend, false);
    let (device, device_dot) = arithmetic_sequence(&backend, true);
    assert_eq!(host, device);
    assert_eq!(host_dot, device_dot);
}

#[test]
fn arithmetic_matches_definitions() {
    let backend = backend();
    let x = Vector::from_slice(&backend, "x", &[1.0, 2.0, 3.0]);
    let z = Vector::from_slice(&backend, "z", &[-1.0, 0.5, 2.0]);
    let mut y = Vector::from_slice(&backend, "y", &[4.0, 5.0, 6.0]);

    y.add_scale(&x, 2.0);
    assert_eq!(y.to_vec(), vec![6.0, 9.0, 12.0]);
    y.scale_add(0.5, &x);
    assert_eq!(y.to_vec(), vec![4.0, 6.5, 9.0]);
    y.scale_add_scale(2.0, &x, -1.0);
    assert_eq!(y.to_vec(), vec![7.0, 11.0, 15.0]);
    y.scale_add2(0.0, &x, 1.0, &z, 2.0);
    assert_eq!(y.to_vec(), vec![-1.0, 3.0, 7.0]);
    y.pointwise_mult2(&x, &z);
    assert_eq!(y.to_vec(), vec![-1.0, 1.0, 6.0]);
    y.power(2.0);
    assert_eq!(y.to_vec(), vec![1.0, 1.0, 36.0]);
    y.power(0.5);
    assert_approx_eq_vec(&y.to_vec(), &[1.0, 1.0, 6.0], 1e-12);

    let mut r = Vector::from_slice(&backend, "r", &[0.0; 5]);
    let src = Vector::from_slice(&backend, "src", &[1.0, 2.0, 3.0, 4.0]);
    r.scale_add_scale_range(0.0, &src, 2.0, 1, 2, 3);
    assert_eq!(r.to_vec(), vec![0.0, 0.0, 4.0, 6.0, 8.0]);
}

#[test]
fn reductions() {
    let backend = backend();
    for accelerator in [false, true] {
        let data = ramp(9_000, 0.1);
        let x = vector_on(&backend, "x", &data, accelerator);
        let dot = x.dot(&x);
        let norm = x.norm();
        assert!((dot - norm * norm).abs() <= 1e-9 * dot);

        let v = vector_on(&backend, "v", &[1.0, -4.0, 2.0, 4.0], accelerator);
        assert_eq!(v.reduce(), 3.0);
        assert_eq!(v.asum(), 11.0);
        assert_eq!(v.amax(), (1, 4.0));
    }
}

#[test]
fn empty_vectors_are_no_ops() {
    let backend = backend();
    let mut x: Vector<f64> = Vector::new(&backend);
    let y: Vector<f64> = Vector::new(&backend);
    assert!(x.is_empty());
    x.add_scale(&y, 3.0);
    x.scale(2.0);
    assert_eq!(x.dot(&y), 0.0);
    assert_eq!(x.norm(), 0.0);
    assert_eq!(x.amax(), (0, 0.0));
    assert_eq!(x.reduce(), 0.0);

    x.move_to_accelerator();
    assert_eq!(x.backend_tag(), BackendTag::Accelerator);
    assert_eq!(x.amax(), (0, 0.0));
    x.move_to_host();
    assert!(x.is_host());
}

#[test]
fn allocate_clear_and_fill() {
    let backend = backend();
    let mut v: Vector<f32> = Vector::with_size(&backend, "v", 4);
    assert_eq!(v.to_vec(), vec![0.0; 4]);
    v.ones();
    assert_eq!(v.to_vec(), vec![1.0; 4]);
    v.set_values(2.5);
    assert_eq!(v.reduce(), 10.0);

    v.move_to_accelerator();
    v.allocate("w", 3);
    assert!(v.is_accelerator());
    assert_eq!(v.name(), "w");
    assert_eq!(v.to_vec(), vec![0.0; 3]);
    v.clear();
    assert!(v.is_empty());
    assert!(v.is_accelerator());
}

#[test]
fn copy_from_is_idempotent_and_allocates() {
    let backend = backend();
    let data = ramp(100, 0.0);
    let mut src = Vector::from_slice(&backend, "src", &data);
    src.set_index_array(&[5, 7, 99]);

    let mut dst: Vector<f64> = Vector::new(&backend);
    dst.copy_from(&src);
    let once = dst.to_vec();
    dst.copy_from(&src);
    assert_eq!(dst.to_vec(), once);
    assert_eq!(once, data);
    assert_eq!(dst.index_size(), 3);
    assert_eq!(dst.get_index_values(), vec![data[5], data[7], data[99]]);

    // Across memory spaces
    let mut device_dst: Vector<f64> = Vector::new(&backend);
    device_dst.move_to_accelerator();
    device_dst.copy_from(&src);
    assert!(device_dst.is_accelerator());
    assert_eq!(device_dst.to_vec(), data);
    let mut back: Vector<f64> = Vector::with_size(&backend, "back", 100);
    back.copy_from(&device_dst);
    assert_eq!(back.to_vec(), data);
}

#[test]
fn copy_to_and_from_data() {
    let backend = backend();
    let mut v: Vector<i32> = Vector::with_size(&backend, "v", 3);
    v.move_to_accelerator();
    v.copy_from_data(&[1, 2, 3]);
    let mut out = [0; 3];
    v.copy_to_data(&mut out);
    assert_eq!(out, [1, 2, 3]);

    v.set_continuous_values(1, &[8, 9]);
    assert_eq!(v.get_continuous_values(0, 3), vec![1, 8, 9]);
    assert_eq!(v.get_continuous_values(1, 1), Vec::<i32>::new());

    let err = catch(|| v.copy_from_data(&[1, 2])).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
    let err = catch(|| v.get_continuous_values(2, 4)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
}

#[test]
fn copy_from_range() {
    let backend = backend();
    let src = Vector::from_slice(&backend, "src", &[1.0, 2.0, 3.0, 4.0]);
    let mut dst: Vector<f64> = Vector::with_size(&backend, "dst", 6);
    dst.copy_from_range(&src, 1, 3, 3);
    assert_eq!(dst.to_vec(), vec![0.0, 0.0, 0.0, 2.0, 3.0, 4.0]);
    let err = catch(|| dst.copy_from_range(&src, 2, 0, 3)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
}

#[test]
fn precision_casts() {
    let backend = backend();
    for accelerator in [false, true] {
        let mut single = Vector::from_slice(&backend, "single", &[0.5f32, -1.25, 3.0]);
        let mut double: Vector<f64> = Vector::new(&backend);
        if accelerator {
            single.move_to_accelerator();
            double.move_to_accelerator();
        }
        double.copy_from_float(&single);
        assert_eq!(double.to_vec(), vec![0.5, -1.25, 3.0]);

        let mut back: Vector<f32> = Vector::new(&backend);
        if accelerator {
            back.move_to_accelerator();
        }
        back.copy_from_double(&double);
        assert_eq!(back.to_vec(), vec![0.5, -1.25, 3.0]);
    }
}

#[test]
fn permutations() {
    let backend = backend();
    for accelerator in [false, true] {
        let mut perm = Vector::from_slice(&backend, "perm", &[2, 0, 1]);
        let mut v = Vector::from_slice(&backend, "v", &[10.0, 20.0, 30.0]);
        if accelerator {
            perm.move_to_accelerator();
            v.move_to_accelerator();
        }
        v.permute(&perm);
        assert_eq!(v.to_vec(), vec![20.0, 30.0, 10.0]);
        v.permute_backward(&perm);
        assert_eq!(v.to_vec(), vec![10.0, 20.0, 30.0]);

        let mut out: Vector<f64> = Vector::new(&backend);
        if accelerator {
            out.move_to_accelerator();
        }
        out.copy_from_permute(&v, &perm);
        assert_eq!(out.to_vec(), vec![20.0, 30.0, 10.0]);
        let mut restored: Vector<f64> = Vector::with_size(&backend, "restored", 3);
        if accelerator {
            restored.move_to_accelerator();
        }
        restored.copy_from_permute_backward(&out, &perm);
        assert_eq!(restored.to_vec(), vec![10.0, 20.0, 30.0]);
    }
}

#[test]
fn permutation_out_of_range_is_a_violation() {
    let backend = backend();
    let perm = Vector::from_slice(&backend, "perm", &[0, 3, 1]);
    let mut v = Vector::from_slice(&backend, "v", &[1.0, 2.0, 3.0]);
    let err = catch(|| v.permute(&perm)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
    assert_eq!(v.to_vec(), vec![1.0, 2.0, 3.0]);
}

#[test]
fn index_subset_access() {
    let backend = backend();
    for accelerator in [false, true] {
        let mut v = vector_on(&backend, "v", &[0.0, 1.0, 2.0, 3.0, 4.0], accelerator);
        assert_eq!(v.index_size(), 0);
        let err = catch(|| v.get_index_values()).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Precondition);

        v.set_index_array(&[3, 1]);
        assert_eq!(v.index_size(), 2);
        assert_eq!(v.get_index_values(), vec![3.0, 1.0]);
        v.set_index_values(&[7.0, 8.0]);
        assert_eq!(v.to_vec(), vec![0.0, 8.0, 2.0, 7.0, 4.0]);

        let err = catch(|| v.set_index_array(&[5])).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Precondition);
        let err = catch(|| v.set_index_array(&[])).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Precondition);
        let err = catch(|| v.set_index_values(&[1.0])).unwrap_err();
        assert_eq!(err.kind, ViolationKind::Precondition);
    }
}

#[test]
fn mismatched_backends_are_violations() {
    let backend = backend();
    let host = Vector::from_slice(&backend, "host", &[1.0, 2.0]);
    let mut device = vector_on(&backend, "device", &[1.0, 2.0], true);

    let err = catch(|| device.add_scale(&host, 1.0)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
    assert!(err.message.contains("AddScale"));
    let err = catch(|| host.dot(&device)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);

    // A second accelerator is a different memory space too
    let other_backend = BackendDescriptor::with_simulated_accelerator().unwrap();
    let other = vector_on(&other_backend, "other", &[1.0, 2.0], true);
    let err = catch(|| device.dot(&other)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
}

#[test]
fn mismatched_sizes_are_violations() {
    let backend = backend();
    let x = Vector::from_slice(&backend, "x", &[1.0, 2.0, 3.0]);
    let mut y = Vector::from_slice(&backend, "y", &[1.0, 2.0]);
    let err = catch(|| y.scale_add(1.0, &x)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
    let err = catch(|| y.copy_from(&x)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
    assert_eq!(y.to_vec(), vec![1.0, 2.0]);
}

#[test]
fn integer_vectors() {
    let backend = backend();
    let mut host = Vector::from_slice(&backend, "ints", &[3, -7, 2]);
    assert_eq!(host.reduce(), -2);
    assert_eq!(host.asum(), 12);
    assert_eq!(host.amax(), (1, 7));
    host.scale(2);
    assert_eq!(host.to_vec(), vec![6, -14, 4]);

    host.move_to_accelerator();
    host.set_values(5);
    assert_eq!(host.to_vec(), vec![5, 5, 5]);
    let err = catch(|| host.reduce()).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Unsupported);
    let err = catch(|| host.scale(2)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Unsupported);
}

#[test]
fn integer_overflow_is_a_violation() {
    let backend = backend();
    let v = Vector::from_slice(&backend, "ints", &[i32::MAX, 1]);
    let err = catch(|| v.reduce()).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
    assert!(err.message.contains("overflow"));

    let min = Vector::from_slice(&backend, "min", &[i32::MIN]);
    let err = catch(|| min.asum()).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);

    let mut w = Vector::from_slice(&backend, "w", &[1 << 30, 2]);
    let err = catch(|| w.scale(4)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);
    let err = catch(|| w.add_scale(&v, 1)).unwrap_err();
    assert_eq!(err.kind, ViolationKind::Precondition);

    // values that fit are exact
    let near = Vector::from_slice(&backend, "near", &[i32::MIN + 1, 0]);
    assert_eq!(near.asum(), i32::MAX);
    assert_eq!(near.amax(), (0, i32::MAX));
}
