//! Context and command queue of one session

use crate::{
    discovery::{Device, Platform},
    driver::{release, Driver, Handle, Kind},
    error::{ClError, DriverError},
    runtime::Runtime,
    status::Status,
};
use core::cell::Cell;
use core::marker::PhantomData;
use std::ffi::CString;
use std::sync::Arc;
use tracing::{debug, info};

struct Context {
    driver: Arc<dyn Driver>,
    handle: Handle,
}

impl Drop for Context {
    fn drop(&mut self) {
        release(&*self.driver, Kind::Context, self.handle);
    }
}

struct CommandQueue {
    driver: Arc<dyn Driver>,
    handle: Handle,
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        release(&*self.driver, Kind::CommandQueue, self.handle);
    }
}

/// Execution context over the devices of one platform, with one in order
/// command queue on the first of them.
///
/// Buffers, kernels and events borrow the session, so it outlives all of them.
/// A session may be moved to another thread, but it can not be shared between
/// threads.
pub struct Session {
    // Queue is released before the context it was created in
    queue: CommandQueue,
    context: Context,
    driver: Arc<dyn Driver>,
    platform: Platform,
    devices: Vec<Device>,
    build_options: CString,
    status: Status,
    _not_sync: PhantomData<Cell<()>>,
}

impl core::fmt::Debug for Session {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Session")
            .field("platform", &self.platform)
            .field("devices", &self.devices)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

fn session_error(operation: &'static str) -> impl FnOnce(Status) -> ClError {
    move |status| ClError::Session(DriverError { operation, status })
}

impl Runtime {
    /// Creates a session on the first platform, over all of its devices.
    ///
    /// The command queue is bound to the first device.
    ///
    /// # Errors
    ///
    /// [`ClError::Discovery`] if enumeration fails, [`ClError::Session`] if
    /// there is no platform or device, or if the driver rejects the context or
    /// the queue.
    pub fn create_session(&self) -> Result<Session, ClError> {
        let Some(platform) = self.platforms()?.into_iter().next() else {
            return Err(session_error("select platform")(Status::CL_PLATFORM_NOT_FOUND_KHR));
        };
        let devices = self.devices(&platform)?;
        let Some(device) = devices.first() else {
            return Err(session_error("select devices")(Status::CL_DEVICE_NOT_FOUND));
        };
        let driver = self.driver().clone();
        let handles: Vec<Handle> = devices.iter().map(Device::handle).collect();
        let context = driver
            .create_context(platform.handle(), &handles)
            .map_err(session_error("create context"))?;
        let context = Context { driver: driver.clone(), handle: context };
        let queue = driver
            .create_command_queue(context.handle, device.handle())
            .map_err(session_error("create command queue"))?;
        let queue = CommandQueue { driver: driver.clone(), handle: queue };
        if tracing::enabled!(tracing::Level::INFO) {
            let name = |r: Result<String, ClError>| r.unwrap_or_else(|e| e.to_string());
            info!(
                "Created session on platform {} with {} devices, queue on {}",
                name(platform.name()),
                devices.len(),
                name(device.name())
            );
        }
        Ok(Session {
            queue,
            context,
            driver,
            platform,
            devices,
            build_options: self.build_options().clone(),
            status: Status::CL_SUCCESS,
            _not_sync: PhantomData,
        })
    }
}

impl Session {
    /// Loads the system `OpenCL` runtime and creates a session on it.
    ///
    /// # Errors
    ///
    /// See [`Runtime::opencl`] and [`Runtime::create_session`].
    pub fn new() -> Result<Self, ClError> {
        Runtime::opencl()?.create_session()
    }

    /// Platform the session was created on
    #[must_use]
    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Devices bound to the context
    #[must_use]
    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// Device of the command queue
    #[must_use]
    pub fn device(&self) -> &Device {
        // Sessions are only created with at least one device
        &self.devices[0]
    }

    /// Name of the device of the command queue.
    ///
    /// # Errors
    ///
    /// [`ClError::Discovery`] if the driver rejects the query.
    pub fn device_name(&self) -> Result<String, ClError> {
        self.device().name()
    }

    /// Last driver status seen while establishing the session.
    #[must_use]
    pub fn status(&self) -> Status {
        self.status
    }

    /// Blocks until every command submitted to the queue has completed.
    ///
    /// # Errors
    ///
    /// [`ClError::Enqueue`] if the driver reports a failure.
    pub fn finish(&self) -> Result<(), ClError> {
        debug!("Finishing command queue");
        self.driver.finish(self.queue.handle).check("finish").map_err(ClError::Enqueue)
    }

    pub(crate) fn driver(&self) -> &dyn Driver {
        &*self.driver
    }

    pub(crate) fn context(&self) -> Handle {
        self.context.handle
    }

    pub(crate) fn queue(&self) -> Handle {
        self.queue.handle
    }

    pub(crate) fn device_handles(&self) -> Vec<Handle> {
        self.devices.iter().map(Device::handle).collect()
    }

    pub(crate) fn build_options(&self) -> &CString {
        &self.build_options
    }
}

#[cfg(test)]
mod tests {
    use crate::{ClError, HostDriver, Runtime, Status};

    #[test]
    fn session_without_devices_creates_no_context() {
        let driver = HostDriver::new().with_devices(0);
        let err = Runtime::with_host_driver(driver.clone()).create_session().unwrap_err();
        assert!(matches!(err, ClError::Session(_)), "{err}");
        assert!(err.is_session_failure());
        assert_eq!(driver.contexts_created(), 0);
    }

    #[test]
    fn session_without_platforms_fails() {
        let driver = HostDriver::new().with_platforms(0);
        let err = Runtime::with_host_driver(driver.clone()).create_session().unwrap_err();
        assert_eq!(err.status(), Some(Status::CL_PLATFORM_NOT_FOUND_KHR));
        assert!(matches!(err, ClError::Session(_)));
        assert_eq!(driver.contexts_created(), 0);
    }

    #[test]
    fn session_binds_all_devices_of_first_platform() -> Result<(), ClError> {
        let driver = HostDriver::new().with_platforms(2).with_devices(2);
        let session = Runtime::with_host_driver(driver.clone()).create_session()?;
        assert_eq!(session.platform().name()?, "Host Platform 0");
        assert_eq!(session.devices().len(), 2);
        assert_eq!(session.device_name()?, "Host Device 0");
        assert_eq!(session.status(), Status::CL_SUCCESS);
        session.finish()?;
        assert_eq!(driver.live_objects(), 2);
        drop(session);
        assert_eq!(driver.live_objects(), 0);
        Ok(())
    }
}
