//! Platform and device enumeration

use crate::{
    driver::{Driver, Handle},
    error::{ClError, DriverError},
    runtime::Runtime,
    status::Status,
};
use std::sync::Arc;
use tracing::debug;

/// Compute platform of one vendor runtime. Owned by the driver, never released.
#[derive(Debug, Clone)]
pub struct Platform {
    driver: Arc<dyn Driver>,
    handle: Handle,
}

/// Compute device under a [`Platform`]. Owned by the driver, never released.
#[derive(Debug, Clone)]
pub struct Device {
    driver: Arc<dyn Driver>,
    handle: Handle,
}

fn discovery_error(operation: &'static str) -> impl FnOnce(Status) -> ClError {
    move |status| ClError::Discovery(DriverError { operation, status })
}

impl Runtime {
    /// Number of available platforms.
    ///
    /// # Errors
    ///
    /// [`ClError::Discovery`] if the driver fails to enumerate platforms.
    pub fn count_platforms(&self) -> Result<u32, ClError> {
        match self.driver().platform_count() {
            // Returned by ICD loaders when there is no platform at all
            Err(Status::CL_PLATFORM_NOT_FOUND_KHR) => Ok(0),
            result => result.map_err(discovery_error("count platforms")),
        }
    }

    /// All available platforms, in driver order.
    ///
    /// # Errors
    ///
    /// [`ClError::Discovery`] if the driver fails to enumerate platforms.
    pub fn platforms(&self) -> Result<Vec<Platform>, ClError> {
        let count = self.count_platforms()?;
        let ids = self.driver().platform_ids(count).map_err(discovery_error("list platforms"))?;
        debug!("Found {} platforms", ids.len());
        Ok(ids
            .into_iter()
            .map(|handle| Platform { driver: self.driver().clone(), handle })
            .collect())
    }

    /// Number of devices of `platform`.
    ///
    /// # Errors
    ///
    /// [`ClError::Discovery`] if the driver fails to enumerate devices.
    pub fn count_devices(&self, platform: &Platform) -> Result<u32, ClError> {
        match self.driver().device_count(platform.handle) {
            Err(Status::CL_DEVICE_NOT_FOUND) => Ok(0),
            result => result.map_err(discovery_error("count devices")),
        }
    }

    /// All devices of `platform`, in driver order.
    ///
    /// # Errors
    ///
    /// [`ClError::Discovery`] if the driver fails to enumerate devices.
    pub fn devices(&self, platform: &Platform) -> Result<Vec<Device>, ClError> {
        let count = self.count_devices(platform)?;
        if count == 0 {
            return Ok(Vec::new());
        }
        let ids = self
            .driver()
            .device_ids(platform.handle, count)
            .map_err(discovery_error("list devices"))?;
        debug!("Found {} devices", ids.len());
        Ok(ids
            .into_iter()
            .map(|handle| Device { driver: self.driver().clone(), handle })
            .collect())
    }
}

impl Platform {
    /// Name reported by the platform.
    ///
    /// # Errors
    ///
    /// [`ClError::Discovery`] if the driver rejects the query.
    pub fn name(&self) -> Result<String, ClError> {
        self.driver.platform_name(self.handle).map_err(discovery_error("get platform name"))
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }
}

impl Device {
    /// Name reported by the device.
    ///
    /// # Errors
    ///
    /// [`ClError::Discovery`] if the driver rejects the query.
    pub fn name(&self) -> Result<String, ClError> {
        self.driver.device_name(self.handle).map_err(discovery_error("get device name"))
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }
}
