use clhost::{wait_for_events, ClError, HostCall, HostDriver, Runtime, Status, WorkItem};
use rand::{rngs::SmallRng, Rng, SeedableRng};

const SAXPY: &str = "__kernel void SAXPY(__global float* x, __global float* y, float a){
    const int i = get_global_id(0);
    y[i] += a * x[i];
}";

fn saxpy(item: &WorkItem<'_>) {
    let i = item.global_id(0);
    let a: f32 = item.scalar(2);
    let x: f32 = item.load(0, i);
    let y: f32 = item.load(1, i);
    item.store(1, i, y + a * x);
}

fn driver() -> HostDriver {
    HostDriver::new().with_kernel("SAXPY", saxpy)
}

#[test]
fn saxpy_doubles() -> Result<(), ClError> {
    let session = Runtime::with_host_driver(driver()).create_session()?;
    let x = session.create_buffer(&[1f32, 2., 3., 4.])?;
    let y = session.create_buffer(&[0f32; 4])?;
    let mut kernel = session.compile(SAXPY, "SAXPY")?;
    kernel.set_arg(0, &x)?;
    kernel.set_arg(1, &y)?;
    kernel.set_arg(2, 2f32)?;
    let event = kernel.enqueue(None, &[4], None, &[])?;
    let mut out = [0f32; 4];
    y.read(&mut out, &[&event])?;
    assert_eq!(out, [2., 4., 6., 8.]);
    Ok(())
}

#[test]
fn saxpy_random() -> Result<(), ClError> {
    let mut rng = SmallRng::seed_from_u64(69420);
    let n = rng.gen_range(1..1024);
    let data: Vec<f32> = (0..n).map(|_| rng.gen_range(-1000f32..1000.)).collect();
    let a: f32 = rng.gen_range(-10f32..10.);

    let session = Runtime::with_host_driver(driver()).create_session()?;
    let x = session.create_buffer(&data)?;
    let y = session.create_buffer(&vec![0f32; n])?;
    let mut kernel = session.compile(SAXPY, "SAXPY")?;
    kernel.set_arg(0, &x)?;
    kernel.set_arg(1, &y)?;
    kernel.set_arg(2, a)?;
    kernel.enqueue(None, &[n], None, &[])?;
    let out = y.to_vec()?;
    for (x, y) in data.iter().zip(&out) {
        assert_eq!(*y, a * x);
    }
    Ok(())
}

#[test]
fn unregistered_kernel_fails_to_compile() -> Result<(), ClError> {
    let session = Runtime::with_host_driver(HostDriver::new()).create_session()?;
    let Err(err) = session.compile(SAXPY, "SAXPY") else {
        panic!("compiled without a host implementation");
    };
    let ClError::Compile { error, build_log } = &err else {
        panic!("expected compile error, got {err}");
    };
    assert_eq!(error.status, Status::CL_BUILD_PROGRAM_FAILURE);
    assert!(build_log.contains("SAXPY"));
    assert!(!err.is_session_failure());
    Ok(())
}

#[test]
fn missing_entry_point() -> Result<(), ClError> {
    let session = Runtime::with_host_driver(driver()).create_session()?;
    let Err(err) = session.compile(SAXPY, "saxpy") else {
        panic!("entry point names are case sensitive");
    };
    assert!(matches!(&err, ClError::EntryPoint { name, .. } if &**name == "saxpy"));
    assert_eq!(err.status(), Some(Status::CL_INVALID_KERNEL_NAME));
    let err = session.compile(SAXPY, "SAX\0PY").unwrap_err();
    assert!(matches!(err, ClError::EntryPoint { .. }));
    Ok(())
}

#[test]
fn driver_rejects_bad_arguments() -> Result<(), ClError> {
    let session = Runtime::with_host_driver(driver()).create_session()?;
    let x = session.create_buffer(&[1f32; 8])?;
    let mut kernel = session.compile(SAXPY, "SAXPY")?;
    let err = kernel.set_arg(3, 1f32).unwrap_err();
    assert!(matches!(err, ClError::Argument(_)));
    assert_eq!(err.status(), Some(Status::CL_INVALID_ARG_INDEX));
    assert_eq!(kernel.set_arg(2, 1f64).unwrap_err().status(), Some(Status::CL_INVALID_ARG_SIZE));
    assert_eq!(kernel.set_arg(2, &x).unwrap_err().status(), Some(Status::CL_INVALID_ARG_SIZE));
    kernel.set_arg(0, &x)?;
    kernel.set_arg(2, 1f32)?;

    // Position 1 was never bound
    let err = kernel.enqueue(None, &[8], None, &[]).unwrap_err();
    assert!(matches!(err, ClError::Enqueue(_)));
    assert_eq!(err.status(), Some(Status::CL_INVALID_KERNEL_ARGS));
    assert!(!err.is_session_failure());
    Ok(())
}

#[test]
fn invalid_work_sizes_are_rejected_by_the_driver() -> Result<(), ClError> {
    let session = Runtime::with_host_driver(driver()).create_session()?;
    let x = session.create_buffer(&[1f32; 8])?;
    let mut kernel = session.compile(SAXPY, "SAXPY")?;
    kernel.set_arg(0, &x)?;
    kernel.set_arg(1, &x)?;
    kernel.set_arg(2, 1f32)?;
    let err = kernel.enqueue(None, &[0], None, &[]).unwrap_err();
    assert_eq!(err.status(), Some(Status::CL_INVALID_GLOBAL_WORK_SIZE));
    let err = kernel.enqueue(None, &[8], Some(&[3]), &[]).unwrap_err();
    assert_eq!(err.status(), Some(Status::CL_INVALID_WORK_GROUP_SIZE));
    kernel.enqueue(None, &[8], Some(&[4]), &[])?.wait()?;
    // x aliased as both arguments, so each element became x + x
    assert_eq!(x.to_vec()?, [2f32; 8]);
    Ok(())
}

#[test]
fn offsets_and_multiple_dimensions() -> Result<(), ClError> {
    let driver = HostDriver::new().with_kernel("index", |item| {
        let width = item.scalar::<i32>(1) as usize;
        let (col, row) = (item.global_id(0), item.global_id(1));
        item.store(0, row * width + col, (row * 10 + col) as i32);
    });
    let session = Runtime::with_host_driver(driver).create_session()?;
    let out = session.create_buffer(&[-1i32; 12])?;
    let mut kernel = session.compile("kernel void index(global int *out, int width) {}", "index")?;
    kernel.set_arg(0, &out)?;
    kernel.set_arg(1, 4i32)?;
    kernel.enqueue(Some(&[1, 1]), &[3, 2], Some(&[1, 2]), &[])?;
    assert_eq!(out.to_vec()?, [-1, -1, -1, -1, -1, 11, 12, 13, -1, 21, 22, 23]);
    Ok(())
}

#[test]
fn events_order_dependent_commands() -> Result<(), ClError> {
    let session = Runtime::with_host_driver(driver()).create_session()?;
    let x = session.create_buffer(&[1f32; 16])?;
    let y = session.create_buffer(&[0f32; 16])?;
    let mut kernel = session.compile(SAXPY, "SAXPY")?;
    kernel.set_arg(0, &x)?;
    kernel.set_arg(1, &y)?;
    kernel.set_arg(2, 1f32)?;
    let first = kernel.enqueue(None, &[16], None, &[])?;
    let second = kernel.enqueue(None, &[16], None, &[&first])?;
    let pending = y.read_async(vec![0f32; 16], &[&first, &second])?;
    wait_for_events(&[&first, &second, pending.event()])?;
    assert_eq!(pending.wait()?, [2f32; 16]);
    wait_for_events(&[])?;
    session.finish()?;
    Ok(())
}

#[test]
fn failed_kernel_fails_dependent_read() -> Result<(), ClError> {
    let session = Runtime::with_host_driver(driver()).create_session()?;
    let x = session.create_buffer(&[1f32; 4])?;
    let y = session.create_buffer(&[0f32; 4])?;
    let mut kernel = session.compile(SAXPY, "SAXPY")?;
    kernel.set_arg(0, &x)?;
    kernel.set_arg(1, &y)?;
    kernel.set_arg(2, 1f32)?;
    // Work items past the end of the buffers fault the launch
    let event = kernel.enqueue(None, &[8], None, &[])?;
    let err = event.wait().unwrap_err();
    assert!(matches!(err, ClError::Enqueue(_)), "{err}");

    let mut out = [0f32; 4];
    let err = y.read(&mut out, &[&event]).unwrap_err();
    assert!(matches!(err, ClError::Transfer(_)), "{err}");
    assert_eq!(err.status(), Some(Status::CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST));
    assert!(y.read_async(vec![0f32; 4], &[&event])?.wait().is_err());
    Ok(())
}

#[test]
fn reads_are_range_checked() -> Result<(), ClError> {
    let session = Runtime::with_host_driver(HostDriver::new()).create_session()?;
    let buffer = session.create_buffer(&[1u64, 2, 3])?;
    let mut short = [0u64; 2];
    buffer.read(&mut short, &[])?;
    assert_eq!(short, [1, 2]);
    let mut long = [0u64; 4];
    let err = buffer.read(&mut long, &[]).unwrap_err();
    assert_eq!(err.status(), Some(Status::CL_INVALID_VALUE));
    assert!(buffer.read(&mut [], &[]).is_err());
    Ok(())
}

#[test]
fn every_object_is_released() -> Result<(), ClError> {
    let driver = driver();
    {
        let session = Runtime::with_host_driver(driver.clone()).create_session()?;
        let x = session.create_buffer(&[1f32; 4])?;
        let y = session.create_buffer(&[1f32; 4])?;
        let mut kernel = session.compile(SAXPY, "SAXPY")?;
        kernel.set_arg(0, &x)?;
        kernel.set_arg(1, &y)?;
        kernel.set_arg(2, 3f32)?;
        let event = kernel.enqueue(None, &[4], None, &[])?;
        // Dropping a pending read waits for it
        drop(y.read_async(vec![0f32; 4], &[&event])?);
        assert!(driver.live_objects() > 0);
    }
    assert_eq!(driver.live_objects(), 0);
    assert_eq!(driver.allocated_bytes(), 0);
    Ok(())
}

#[test]
fn overflowing_offset_is_an_enqueue_error() -> Result<(), ClError> {
    let driver = driver();
    let session = Runtime::with_host_driver(driver.clone()).create_session()?;
    let x = session.create_buffer(&[1f32, 2., 3., 4.])?;
    let mut kernel = session.compile(SAXPY, "SAXPY")?;
    kernel.set_arg(0, &x)?;
    kernel.set_arg(1, &x)?;
    kernel.set_arg(2, 1f32)?;
    let err = kernel.enqueue(Some(&[usize::MAX]), &[2], None, &[]).unwrap_err();
    assert!(matches!(err, ClError::Enqueue(_)), "{err}");
    assert_eq!(err.status(), Some(Status::CL_INVALID_GLOBAL_OFFSET));
    assert_eq!(x.to_vec()?, [1., 2., 3., 4.]);
    assert_eq!(driver.allocated_bytes(), 16);
    Ok(())
}

#[test]
fn panicking_kernel_keeps_buffer_contents() -> Result<(), ClError> {
    let driver = HostDriver::new().with_kernel("explode", |item| {
        item.store(0, item.global_id(0), -1i32);
        if item.global_id(0) == 2 {
            panic!("host kernel failure");
        }
    });
    {
        let session = Runtime::with_host_driver(driver.clone()).create_session()?;
        let out = session.create_buffer(&[1i32, 2, 3, 4])?;
        let mut kernel = session.compile("__kernel void explode(__global int* out) {}", "explode")?;
        kernel.set_arg(0, &out)?;
        let launch = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            kernel.enqueue(None, &[4], None, &[]).map(drop)
        }));
        assert!(launch.is_err());
        // Stores before the panic are kept, nothing is lost
        assert_eq!(out.to_vec()?, [-1, -1, -1, 4]);
        assert_eq!(driver.allocated_bytes(), 16);
    }
    assert_eq!(driver.live_objects(), 0);
    assert_eq!(driver.allocated_bytes(), 0);
    Ok(())
}

#[test]
fn enumeration_failures_are_discovery_errors() -> Result<(), ClError> {
    let driver = HostDriver::new().with_failure(HostCall::Platforms, Status::CL_OUT_OF_HOST_MEMORY);
    let runtime = Runtime::with_host_driver(driver.clone());
    let err = runtime.count_platforms().unwrap_err();
    assert!(matches!(err, ClError::Discovery(_)), "{err}");
    assert_eq!(err.status(), Some(Status::CL_OUT_OF_HOST_MEMORY));
    assert!(matches!(runtime.create_session(), Err(ClError::Discovery(_))));
    assert_eq!(driver.contexts_created(), 0);

    let driver = HostDriver::new().with_failure(HostCall::Devices, Status::CL_INVALID_DEVICE_TYPE);
    let runtime = Runtime::with_host_driver(driver.clone());
    let platform = &runtime.platforms()?[0];
    assert!(matches!(runtime.count_devices(platform), Err(ClError::Discovery(_))));
    let err = runtime.devices(platform).unwrap_err();
    assert!(matches!(err, ClError::Discovery(_)), "{err}");
    assert_eq!(err.status(), Some(Status::CL_INVALID_DEVICE_TYPE));
    assert!(matches!(runtime.create_session(), Err(ClError::Discovery(_))));
    assert_eq!(driver.contexts_created(), 0);
    Ok(())
}

#[test]
fn rejected_context_or_queue_is_a_session_error() {
    let driver = HostDriver::new().with_failure(HostCall::CreateContext, Status::CL_OUT_OF_HOST_MEMORY);
    let err = Runtime::with_host_driver(driver.clone()).create_session().unwrap_err();
    assert!(matches!(err, ClError::Session(_)), "{err}");
    assert!(err.is_session_failure());
    assert_eq!(err.status(), Some(Status::CL_OUT_OF_HOST_MEMORY));
    assert_eq!(driver.contexts_created(), 0);
    assert_eq!(driver.live_objects(), 0);

    let driver =
        HostDriver::new().with_failure(HostCall::CreateCommandQueue, Status::CL_INVALID_QUEUE_PROPERTIES);
    let err = Runtime::with_host_driver(driver.clone()).create_session().unwrap_err();
    assert!(matches!(err, ClError::Session(_)), "{err}");
    assert_eq!(err.status(), Some(Status::CL_INVALID_QUEUE_PROPERTIES));
    // The context was created, and released again
    assert_eq!(driver.contexts_created(), 1);
    assert_eq!(driver.live_objects(), 0);
}

#[test]
fn events_of_different_sessions_can_not_be_waited_together() -> Result<(), ClError> {
    let runtime = Runtime::with_host_driver(HostDriver::new());
    let first = runtime.create_session()?;
    let second = runtime.create_session()?;
    let a = first.create_buffer(&[1u32; 4])?;
    let b = second.create_buffer(&[2u32; 4])?;
    let mut out = [0u32; 4];
    let read_a = a.read(&mut out, &[])?;
    let read_b = b.read(&mut out, &[])?;
    wait_for_events(&[&read_a])?;
    wait_for_events(&[&read_b, &read_b])?;
    let err = wait_for_events(&[&read_a, &read_b]).unwrap_err();
    assert!(matches!(err, ClError::Transfer(_)), "{err}");
    assert_eq!(err.status(), Some(Status::CL_INVALID_EVENT));
    Ok(())
}
