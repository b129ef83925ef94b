use crate::{
    config::SessionConfig,
    driver::{host::HostDriver, opencl::OpenCL, Driver},
    error::{ClError, DriverError},
};
use std::ffi::CString;
use std::sync::Arc;
use tracing::warn;

/// Loaded accelerator runtime.
///
/// Entry point of the crate. Discovery and session creation go through it,
/// sessions keep the runtime alive on their own.
#[derive(Debug, Clone)]
pub struct Runtime {
    driver: Arc<dyn Driver>,
    build_options: CString,
}

impl Runtime {
    /// Loads the system `OpenCL` runtime, configured by [`SessionConfig::load`].
    ///
    /// # Errors
    ///
    /// [`ClError::Discovery`] if no `OpenCL` runtime could be loaded.
    pub fn opencl() -> Result<Self, ClError> {
        Self::opencl_with_config(&SessionConfig::load())
    }

    /// Loads the system `OpenCL` runtime with explicit configuration.
    ///
    /// # Errors
    ///
    /// [`ClError::Discovery`] if no `OpenCL` runtime could be loaded.
    pub fn opencl_with_config(config: &SessionConfig) -> Result<Self, ClError> {
        let driver = OpenCL::load(config).map_err(|status| {
            ClError::Discovery(DriverError { operation: "load OpenCL runtime", status })
        })?;
        Ok(Self { driver: Arc::new(driver), build_options: CString::default() }
            .with_config(config))
    }

    /// Runtime backed by the in-process host driver
    #[must_use]
    pub fn with_host_driver(driver: HostDriver) -> Self {
        Self { driver: Arc::new(driver), build_options: CString::default() }
    }

    /// Applies the parts of `config` that do not concern loading the driver.
    #[must_use]
    pub fn with_config(mut self, config: &SessionConfig) -> Self {
        self.build_options = match config.build_options.as_deref() {
            Some(options) => CString::new(options).unwrap_or_else(|_| {
                warn!("Build options contain a NUL byte, ignoring them.");
                CString::default()
            }),
            None => CString::default(),
        };
        self
    }

    pub(crate) fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub(crate) fn build_options(&self) -> &CString {
        &self.build_options
    }
}

#[test]
fn build_options_from_config() {
    let config = SessionConfig { build_options: Some("-cl-mad-enable".into()), ..Default::default() };
    let runtime = Runtime::with_host_driver(HostDriver::new()).with_config(&config);
    assert_eq!(runtime.build_options().to_str(), Ok("-cl-mad-enable"));
    let config = SessionConfig { build_options: Some("bad\0option".into()), ..Default::default() };
    let runtime = runtime.with_config(&config);
    assert!(runtime.build_options().as_bytes().is_empty());
}
