//! Boundary to the accelerator runtime.
//!
//! Everything this crate asks from the runtime goes through [`Driver`].
//! Handles are opaque, pointer sized and never dereferenced on the host.

use crate::status::Status;
use core::ffi::{c_void, CStr};
use core::fmt::Debug;
use tracing::warn;

pub(crate) mod host;
pub(crate) mod opencl;

/// Opaque runtime object identifier.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[repr(transparent)]
pub(crate) struct Handle(*mut c_void);

// Handles are plain identifiers, the runtime itself synchronizes access to the
// objects behind them.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Handle {
    pub(crate) const fn from_raw(ptr: *mut c_void) -> Self {
        Self(ptr)
    }

    pub(crate) const fn as_raw(self) -> *mut c_void {
        self.0
    }

    pub(crate) fn from_id(id: usize) -> Self {
        Self(id as *mut c_void)
    }

    pub(crate) fn id(self) -> usize {
        self.0 as usize
    }

    /// Bytes passed to the runtime when this handle is a kernel argument
    pub(crate) fn to_ne_bytes(self) -> [u8; core::mem::size_of::<usize>()] {
        self.id().to_ne_bytes()
    }
}

/// Calls consumed from the accelerator runtime.
///
/// Enumeration uses the two call pattern, first the count, then the ids.
/// Creation calls return the new handle or the rejecting status. Release
/// calls return their status, callers decide what to do with it.
pub(crate) trait Driver: Send + Sync + Debug {
    fn platform_count(&self) -> Result<u32, Status>;
    fn platform_ids(&self, count: u32) -> Result<Vec<Handle>, Status>;
    fn platform_name(&self, platform: Handle) -> Result<String, Status>;

    fn device_count(&self, platform: Handle) -> Result<u32, Status>;
    fn device_ids(&self, platform: Handle, count: u32) -> Result<Vec<Handle>, Status>;
    fn device_name(&self, device: Handle) -> Result<String, Status>;

    fn create_context(&self, platform: Handle, devices: &[Handle]) -> Result<Handle, Status>;
    fn release_context(&self, context: Handle) -> Status;

    /// In order queue on `device`
    fn create_command_queue(&self, context: Handle, device: Handle) -> Result<Handle, Status>;
    fn finish(&self, queue: Handle) -> Status;
    fn release_command_queue(&self, queue: Handle) -> Status;

    /// Read only device buffer initialized with a copy of `data`
    fn create_buffer(&self, context: Handle, data: &[u8]) -> Result<Handle, Status>;
    fn release_mem_object(&self, mem: Handle) -> Status;

    fn create_program_with_source(&self, context: Handle, source: &str) -> Result<Handle, Status>;
    fn build_program(&self, program: Handle, devices: &[Handle], options: &CStr) -> Status;
    fn program_build_log(&self, program: Handle, device: Handle) -> Result<String, Status>;
    fn release_program(&self, program: Handle) -> Status;

    fn create_kernel(&self, program: Handle, name: &CStr) -> Result<Handle, Status>;
    /// `value` holds the argument bytes, for buffers the bytes of the mem handle
    fn set_kernel_arg(&self, kernel: Handle, index: u32, value: &[u8]) -> Status;
    fn release_kernel(&self, kernel: Handle) -> Status;

    /// Work dimension is `global.len()`, `offset` and `local` have the same length if present
    fn enqueue_nd_range_kernel(
        &self,
        queue: Handle,
        kernel: Handle,
        offset: Option<&[usize]>,
        global: &[usize],
        local: Option<&[usize]>,
        wait: &[Handle],
    ) -> Result<Handle, Status>;

    /// Copies `size` bytes starting at `offset` of `mem` into `dst`.
    ///
    /// # Safety
    ///
    /// `dst` must be valid for writes of `size` bytes. If `blocking` is false it
    /// must stay valid and unaliased until the returned event completes.
    #[allow(clippy::too_many_arguments)]
    unsafe fn enqueue_read_buffer(
        &self,
        queue: Handle,
        mem: Handle,
        blocking: bool,
        offset: usize,
        size: usize,
        dst: *mut u8,
        wait: &[Handle],
    ) -> Result<Handle, Status>;

    fn wait_for_events(&self, events: &[Handle]) -> Status;
    fn release_event(&self, event: Handle) -> Status;
}

/// Kind of an owned runtime object, selects the matching release call
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Kind {
    Context,
    CommandQueue,
    MemObject,
    Program,
    Kernel,
    Event,
}

/// Releases `handle`. Drop can not fail, so a rejected release is only logged.
pub(crate) fn release(driver: &dyn Driver, kind: Kind, handle: Handle) {
    let (operation, status) = match kind {
        Kind::Context => ("release context", driver.release_context(handle)),
        Kind::CommandQueue => ("release command queue", driver.release_command_queue(handle)),
        Kind::MemObject => ("release buffer", driver.release_mem_object(handle)),
        Kind::Program => ("release program", driver.release_program(handle)),
        Kind::Kernel => ("release kernel", driver.release_kernel(handle)),
        Kind::Event => ("release event", driver.release_event(handle)),
    };
    if let Err(e) = status.check(operation) {
        warn!("{e}");
    }
}
