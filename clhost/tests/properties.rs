//! Property based tests of the session layer on the host driver.
//!
//! Verified invariants:
//! - `y[i] += a * x[i]` over a zeroed `y` reads back as `a * x[i]`.
//! - Offset or local size with a different number of dimensions than the
//!   global size is rejected before anything reaches the driver.
//! - Values outside of buffer, float, double, int and long can not be bound.
//! - Binding the same position twice, the second value is used.
//! - A blocking read right after a write observes the write.
//! - Without devices, no context is created.

use clhost::{ClError, HostDriver, Runtime, WorkItem};
use proptest::prelude::*;

const SAXPY: &str = "__kernel void SAXPY(__global float* x, __global float* y, float a){
    const int i = get_global_id(0);
    y[i] += a * x[i];
}";

const FILL: &str = "__kernel void fill(__global long* out, long value) {
    out[get_global_id(0)] = value;
}";

fn saxpy(item: &WorkItem<'_>) {
    let i = item.global_id(0);
    let a: f32 = item.scalar(2);
    let x: f32 = item.load(0, i);
    let y: f32 = item.load(1, i);
    item.store(1, i, y + a * x);
}

fn fill(item: &WorkItem<'_>) {
    item.store(0, item.global_id(0), item.scalar::<i64>(1));
}

fn driver() -> HostDriver {
    HostDriver::new().with_kernel("SAXPY", saxpy).with_kernel("fill", fill)
}

/// Work size vector of 0 to 4 dimensions, or absent
fn work_vector() -> impl Strategy<Value = Option<Vec<usize>>> {
    proptest::option::of(proptest::collection::vec(1..8_usize, 0..=4))
}

proptest! {
    #[test]
    fn saxpy_round_trip(x in proptest::collection::vec(-100.0..100.0_f32, 1..64), a in -10.0..10.0_f32) {
        let session = Runtime::with_host_driver(driver()).create_session()?;
        let xb = session.create_buffer(&x)?;
        let yb = session.create_buffer(&vec![0f32; x.len()])?;
        let mut kernel = session.compile(SAXPY, "SAXPY")?;
        kernel.set_arg(0, &xb)?;
        kernel.set_arg(1, &yb)?;
        kernel.set_arg(2, a)?;
        let event = kernel.enqueue(None, &[x.len()], None, &[])?;
        let mut y = vec![0f32; x.len()];
        yb.read(&mut y, &[&event])?;
        for (i, (x, y)) in x.iter().zip(&y).enumerate() {
            prop_assert_eq!(*y, a * x, "mismatch at {}", i);
        }
    }

    #[test]
    fn mismatched_dimensions_never_reach_the_driver(
        offset in work_vector(),
        global in proptest::collection::vec(1..8_usize, 1..=3),
        local in work_vector(),
    ) {
        let mismatch = |v: &Option<Vec<usize>>| v.as_ref().is_some_and(|v| v.len() != global.len());
        prop_assume!(mismatch(&offset) || mismatch(&local));

        let driver = driver();
        let session = Runtime::with_host_driver(driver.clone()).create_session()?;
        let kernel = session.compile(SAXPY, "SAXPY")?;
        let submissions = driver.submissions();
        let result = kernel.enqueue(offset.as_deref(), &global, local.as_deref(), &[]);
        prop_assert!(matches!(result, Err(ClError::DimensionMismatch(_))));
        prop_assert_eq!(driver.submissions(), submissions);
    }

    #[test]
    fn unsupported_argument_types(u in any::<u32>(), l in any::<u64>(), b in any::<bool>(), s in ".*") {
        let driver = driver();
        let session = Runtime::with_host_driver(driver.clone()).create_session()?;
        let mut kernel = session.compile(FILL, "fill")?;
        let calls = driver.argument_calls();
        let values: [&dyn std::any::Any; 5] = [&u, &l, &b, &s, &(u as f32, u as f32)];
        for value in values {
            let result = kernel.set_arg_any(1, value);
            prop_assert!(matches!(result, Err(ClError::UnsupportedArgumentType(_))));
        }
        prop_assert_eq!(driver.argument_calls(), calls);
        kernel.set_arg_any(1, &(u as i64))?;
        prop_assert_eq!(driver.argument_calls(), calls + 1);
    }

    #[test]
    fn last_binding_wins(first in any::<i64>(), second in any::<i64>(), len in 1..32_usize) {
        let session = Runtime::with_host_driver(driver()).create_session()?;
        let out = session.create_buffer(&vec![0i64; len])?;
        let mut kernel = session.compile(FILL, "fill")?;
        kernel.set_arg(0, &out)?;
        kernel.set_arg(1, first)?;
        kernel.set_arg(1, second)?;
        kernel.enqueue(None, &[len], None, &[])?;
        prop_assert_eq!(out.to_vec()?, vec![second; len]);
    }

    #[test]
    fn blocking_read_observes_preceding_write(values in proptest::collection::vec(any::<i64>(), 1..8)) {
        let session = Runtime::with_host_driver(driver()).create_session()?;
        let out = session.create_buffer(&[0i64; 4])?;
        let mut kernel = session.compile(FILL, "fill")?;
        kernel.set_arg(0, &out)?;
        let mut read = [0i64; 4];
        for value in values {
            kernel.set_arg(1, value)?;
            kernel.enqueue(None, &[4], None, &[])?;
            out.read(&mut read, &[])?;
            prop_assert_eq!(read, [value; 4]);
        }
    }

    #[test]
    fn no_devices_no_context(platforms in 0..4_u32) {
        let driver = driver().with_platforms(platforms).with_devices(0);
        let err = Runtime::with_host_driver(driver.clone()).create_session().unwrap_err();
        prop_assert!(matches!(err, ClError::Session(_)));
        prop_assert!(err.is_session_failure());
        prop_assert_eq!(driver.contexts_created(), 0);
    }
}
