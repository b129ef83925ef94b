//! In-process driver that runs kernels as host closures.
//!
//! Program source is only scanned for `__kernel void name(...)` declarations,
//! every declared name must have a host implementation registered with
//! [`HostDriver::with_kernel`]. Commands execute eagerly in submission order,
//! so every event is already complete when it is returned.

use super::{Driver, Handle};
use crate::{
    dtype::{DType, Scalar},
    status::Status,
};
use core::cell::Cell;
use core::ffi::CStr;
use core::fmt::{Debug, Formatter};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, trace};

const PLATFORM_TAG: usize = 0x1000_0000;
const DEVICE_TAG: usize = 0x2000_0000;
const TAG_MASK: usize = 0xF000_0000;

type HostKernelFn = Arc<dyn Fn(&WorkItem<'_>) + Send + Sync>;

/// Reference driver executing kernels on the calling thread.
///
/// Cloning is cheap, clones share all driver state, so a test can keep one
/// clone to inspect what the session did with the other.
///
/// ```
/// use clhost::{HostDriver, Runtime};
///
/// let driver = HostDriver::new().with_kernel("fill", |item| {
///     let i = item.global_id(0);
///     item.store(0, i, item.scalar::<i32>(1));
/// });
/// let runtime = Runtime::with_host_driver(driver.clone());
/// let session = runtime.create_session()?;
/// let out = session.create_buffer(&[0i32; 4])?;
/// let mut kernel = session.compile("__kernel void fill(__global int* out, int v) {}", "fill")?;
/// kernel.set_arg(0, &out)?;
/// kernel.set_arg(1, 7i32)?;
/// kernel.enqueue(None, &[4], None, &[])?;
/// assert_eq!(out.to_vec()?, [7; 4]);
/// assert_eq!(driver.submissions(), 2);
/// # Ok::<(), clhost::ClError>(())
/// ```
#[derive(Clone)]
pub struct HostDriver {
    state: Arc<Mutex<HostState>>,
}

struct HostState {
    platforms: u32,
    devices: u32,
    memory: usize,
    allocated: usize,
    kernels: BTreeMap<String, HostKernelFn>,
    objects: BTreeMap<usize, Object>,
    next_id: usize,
    submissions: usize,
    contexts_created: usize,
    argument_calls: usize,
    failures: BTreeMap<HostCall, Status>,
}

/// Driver call that can be made to fail with [`HostDriver::with_failure`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HostCall {
    /// Platform counting and listing
    Platforms,
    /// Device counting and listing
    Devices,
    /// Context creation
    CreateContext,
    /// Command queue creation
    CreateCommandQueue,
}

#[derive(Debug, Clone)]
struct KernelDecl {
    name: String,
    params: Vec<Param>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Param {
    Global,
    // None if the type is not a known scalar, any argument size is accepted then
    Value(Option<DType>),
}

#[derive(Debug)]
enum Bound {
    Mem(usize),
    Value(Vec<u8>),
}

enum Object {
    Context {
        devices: Vec<usize>,
    },
    Queue {
        context: usize,
    },
    Mem {
        context: usize,
        data: Vec<u8>,
    },
    Program {
        context: usize,
        source: String,
        decls: Vec<KernelDecl>,
        built: bool,
        log: String,
    },
    Kernel {
        program: usize,
        decl: KernelDecl,
        args: Vec<Option<Bound>>,
    },
    Event {
        status: Status,
    },
}

impl Default for HostDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for HostDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        let state = self.lock();
        f.debug_struct("HostDriver")
            .field("platforms", &state.platforms)
            .field("devices", &state.devices)
            .field("memory", &state.memory)
            .field("kernels", &state.kernels.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl HostDriver {
    /// One platform with one device and 256 MiB of device memory, no kernels.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(HostState {
                platforms: 1,
                devices: 1,
                memory: 256 * 1024 * 1024,
                allocated: 0,
                kernels: BTreeMap::new(),
                objects: BTreeMap::new(),
                next_id: 1,
                submissions: 0,
                contexts_created: 0,
                argument_calls: 0,
                failures: BTreeMap::new(),
            })),
        }
    }

    /// Number of platforms reported by discovery
    #[must_use]
    pub fn with_platforms(self, count: u32) -> Self {
        self.lock().platforms = count;
        self
    }

    /// Number of devices reported for every platform
    #[must_use]
    pub fn with_devices(self, count: u32) -> Self {
        self.lock().devices = count;
        self
    }

    /// Device memory limit in bytes, shared by all contexts
    #[must_use]
    pub fn with_memory(self, bytes: usize) -> Self {
        self.lock().memory = bytes;
        self
    }

    /// Makes every later `call` fail with `status`.
    ///
    /// ```
    /// use clhost::{ClError, HostCall, HostDriver, Runtime, Status};
    ///
    /// let driver = HostDriver::new().with_failure(HostCall::CreateContext, Status::CL_OUT_OF_HOST_MEMORY);
    /// let err = Runtime::with_host_driver(driver.clone()).create_session().unwrap_err();
    /// assert!(matches!(err, ClError::Session(_)));
    /// assert_eq!(driver.contexts_created(), 0);
    /// ```
    #[must_use]
    pub fn with_failure(self, call: HostCall, status: Status) -> Self {
        self.lock().failures.insert(call, status);
        self
    }

    /// Registers the host implementation of kernel `name`.
    ///
    /// The closure runs once per work item. It runs while the driver is locked,
    /// so it must not call back into this driver.
    #[must_use]
    pub fn with_kernel<F>(self, name: &str, kernel: F) -> Self
    where
        F: Fn(&WorkItem<'_>) + Send + Sync + 'static,
    {
        self.lock().kernels.insert(name.into(), Arc::new(kernel));
        self
    }

    /// Number of commands (kernel launches and reads) submitted to the driver,
    /// including rejected ones.
    #[must_use]
    pub fn submissions(&self) -> usize {
        self.lock().submissions
    }

    /// Number of contexts successfully created
    #[must_use]
    pub fn contexts_created(&self) -> usize {
        self.lock().contexts_created
    }

    /// Number of kernel argument bindings passed to the driver, including
    /// rejected ones.
    #[must_use]
    pub fn argument_calls(&self) -> usize {
        self.lock().argument_calls
    }

    /// Number of driver objects not yet released
    #[must_use]
    pub fn live_objects(&self) -> usize {
        self.lock().objects.len()
    }

    /// Bytes of device memory currently allocated
    #[must_use]
    pub fn allocated_bytes(&self) -> usize {
        self.lock().allocated
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        // State is consistent between calls, a panicking kernel can not leave it half written
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HostState {
    fn injected(&self, call: HostCall) -> Result<(), Status> {
        match self.failures.get(&call) {
            Some(status) => Err(*status),
            None => Ok(()),
        }
    }

    fn insert(&mut self, object: Object) -> Handle {
        let id = self.next_id;
        self.next_id += 1;
        self.objects.insert(id, object);
        Handle::from_id(id)
    }

    fn platform(&self, platform: Handle) -> Option<usize> {
        let id = platform.id();
        let index = id & !TAG_MASK;
        (id & TAG_MASK == PLATFORM_TAG && index < self.platforms as usize).then_some(index)
    }

    fn device_platform(&self, device: Handle) -> Option<usize> {
        let id = device.id();
        let platform = (id & !TAG_MASK) >> 12;
        let index = id & 0xFFF;
        (id & TAG_MASK == DEVICE_TAG
            && platform < self.platforms as usize
            && index < self.devices as usize)
            .then_some(platform)
    }

    fn context_devices(&self, context: usize) -> Option<&[usize]> {
        match self.objects.get(&context) {
            Some(Object::Context { devices }) => Some(devices),
            _ => None,
        }
    }

    fn queue_context(&self, queue: Handle) -> Option<usize> {
        match self.objects.get(&queue.id()) {
            Some(Object::Queue { context }) => Some(*context),
            _ => None,
        }
    }

    fn mem_context(&self, mem: usize) -> Option<usize> {
        match self.objects.get(&mem) {
            Some(Object::Mem { context, .. }) => Some(*context),
            _ => None,
        }
    }

    fn program_context(&self, program: usize) -> Option<usize> {
        match self.objects.get(&program) {
            Some(Object::Program { context, .. }) => Some(*context),
            _ => None,
        }
    }

    /// Status of the first failed dependency, error if a handle is not an event
    fn wait_list_status(&self, wait: &[Handle]) -> Result<Status, Status> {
        let mut result = Status::CL_SUCCESS;
        for event in wait {
            match self.objects.get(&event.id()) {
                Some(Object::Event { status }) => {
                    if result.is_success() && !status.is_success() {
                        result = *status;
                    }
                }
                _ => return Err(Status::CL_INVALID_EVENT_WAIT_LIST),
            }
        }
        Ok(result)
    }

    fn release(&mut self, handle: Handle, matches: fn(&Object) -> bool, invalid: Status) -> Status {
        if !self.objects.get(&handle.id()).is_some_and(matches) {
            return invalid;
        }
        if let Some(Object::Mem { data, .. }) = self.objects.remove(&handle.id()) {
            self.allocated = self.allocated.saturating_sub(data.len());
        }
        Status::CL_SUCCESS
    }
}

/// One work item of a host kernel launch.
///
/// Arguments are addressed by their position in the kernel signature.
/// Accesses out of bounds, to a missing argument or with the wrong element
/// type do not panic, they fault the launch and its event completes with
/// [`Status::CL_OUT_OF_RESOURCES`].
pub struct WorkItem<'a> {
    id: [usize; 3],
    size: [usize; 3],
    offset: [usize; 3],
    dims: usize,
    args: &'a [Slot],
    memory: &'a [Cell<Vec<u8>>],
    faulted: Cell<bool>,
}

#[derive(Debug)]
enum Slot {
    Mem(usize),
    Value(Vec<u8>),
}

impl WorkItem<'_> {
    /// Global id in dimension `dim`, offset included, 0 past the work dimension
    #[must_use]
    pub fn global_id(&self, dim: usize) -> usize {
        if dim < self.dims {
            self.id[dim]
        } else {
            0
        }
    }

    /// Global size in dimension `dim`, 1 past the work dimension
    #[must_use]
    pub fn global_size(&self, dim: usize) -> usize {
        if dim < self.dims {
            self.size[dim]
        } else {
            1
        }
    }

    /// Global offset in dimension `dim`
    #[must_use]
    pub fn global_offset(&self, dim: usize) -> usize {
        if dim < self.dims {
            self.offset[dim]
        } else {
            0
        }
    }

    /// Number of dimensions of this launch
    #[must_use]
    pub fn work_dim(&self) -> usize {
        self.dims
    }

    /// Element `index` of the buffer bound at `arg`
    pub fn load<T: Scalar>(&self, arg: usize, index: usize) -> T {
        let value = self.with_mem(arg, |data| {
            let size = core::mem::size_of::<T>();
            let start = index.checked_mul(size)?;
            T::from_ne_slice(data.get(start..start.checked_add(size)?)?)
        });
        value.unwrap_or_else(|| self.fault())
    }

    /// Writes `value` to element `index` of the buffer bound at `arg`
    pub fn store<T: Scalar>(&self, arg: usize, index: usize, value: T) {
        let stored = self.with_mem(arg, |data| {
            let size = core::mem::size_of::<T>();
            let start = index.checked_mul(size)?;
            let end = start.checked_add(size)?;
            value.write_ne_slice(data.get_mut(start..end)?).then_some(())
        });
        if stored.is_none() {
            self.fault::<()>();
        }
    }

    /// Scalar bound at `arg`
    pub fn scalar<T: Scalar>(&self, arg: usize) -> T {
        match self.args.get(arg) {
            Some(Slot::Value(bytes)) => T::from_ne_slice(bytes).unwrap_or_else(|| self.fault()),
            _ => self.fault(),
        }
    }

    fn with_mem<R>(&self, arg: usize, f: impl FnOnce(&mut Vec<u8>) -> Option<R>) -> Option<R> {
        let Some(Slot::Mem(slot)) = self.args.get(arg) else {
            return None;
        };
        let cell = self.memory.get(*slot)?;
        let mut data = cell.take();
        let result = f(&mut data);
        cell.set(data);
        result
    }

    fn fault<T: Default>(&self) -> T {
        self.faulted.set(true);
        T::default()
    }
}

/// Parses every `__kernel void name(params)` declaration in `source`
fn parse_kernels(source: &str) -> Result<Vec<KernelDecl>, String> {
    let mut decls = Vec::new();
    for (start, keyword) in source.match_indices("kernel") {
        let qualified = source[..start].ends_with("__");
        let begin = if qualified { start - 2 } else { start };
        let before = source[..begin].chars().next_back();
        let after = source[start + keyword.len()..].chars().next();
        if before.is_some_and(is_ident) || !after.is_some_and(char::is_whitespace) {
            continue;
        }
        let rest = source[start + keyword.len()..].trim_start();
        let Some(rest) = rest.strip_prefix("void") else {
            continue;
        };
        let rest = rest.trim_start();
        let name_len = rest.find(|c: char| !is_ident(c)).unwrap_or(rest.len());
        let name = &rest[..name_len];
        if name.is_empty() {
            return Err(format!("error: expected kernel name at byte {begin}"));
        }
        let rest = rest[name_len..].trim_start();
        let Some(close) = rest.strip_prefix('(').and_then(|r| r.find(')')) else {
            return Err(format!("error: expected parameter list for kernel {name}"));
        };
        let params = &rest[1..=close];
        let params = if params.trim().is_empty() || params.trim() == "void" {
            Vec::new()
        } else {
            params.split(',').map(parse_param).collect()
        };
        decls.push(KernelDecl { name: name.into(), params });
    }
    Ok(decls)
}

fn parse_param(param: &str) -> Param {
    if param.contains('*') {
        return Param::Global;
    }
    let mut words: Vec<&str> = param
        .split_whitespace()
        .filter(|w| !matches!(*w, "const" | "__private" | "private" | "restrict"))
        .collect();
    // Last word is the parameter name
    words.pop();
    Param::Value(DType::from_ocl(&words.join(" ")))
}

fn is_ident(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Buffer contents moved out of the arena for the duration of a launch,
/// put back on drop, also when a host kernel panics
struct Borrowed<'a> {
    objects: &'a mut BTreeMap<usize, Object>,
    mems: &'a [usize],
    memory: Vec<Cell<Vec<u8>>>,
}

impl<'a> Borrowed<'a> {
    fn take(objects: &'a mut BTreeMap<usize, Object>, mems: &'a [usize]) -> Self {
        let memory = mems
            .iter()
            .map(|mem| match objects.get_mut(mem) {
                Some(Object::Mem { data, .. }) => Cell::new(core::mem::take(data)),
                _ => Cell::new(Vec::new()),
            })
            .collect();
        Self { objects, mems, memory }
    }
}

impl Drop for Borrowed<'_> {
    fn drop(&mut self) {
        for (mem, cell) in self.mems.iter().zip(&mut self.memory) {
            if let Some(Object::Mem { data, .. }) = self.objects.get_mut(mem) {
                *data = cell.take();
            }
        }
    }
}

/// Every global id of the range, in row major order.
/// `offset + global` must not overflow in any dimension.
fn for_each_global_id(offset: [usize; 3], global: [usize; 3], mut f: impl FnMut([usize; 3])) {
    for z in 0..global[2] {
        for y in 0..global[1] {
            for x in 0..global[0] {
                f([offset[0] + x, offset[1] + y, offset[2] + z]);
            }
        }
    }
}

fn padded(values: Option<&[usize]>, fill: usize) -> [usize; 3] {
    let mut padded = [fill; 3];
    if let Some(values) = values {
        for (p, v) in padded.iter_mut().zip(values) {
            *p = *v;
        }
    }
    padded
}

impl Driver for HostDriver {
    fn platform_count(&self) -> Result<u32, Status> {
        let state = self.lock();
        state.injected(HostCall::Platforms)?;
        match state.platforms {
            0 => Err(Status::CL_PLATFORM_NOT_FOUND_KHR),
            n => Ok(n),
        }
    }

    fn platform_ids(&self, count: u32) -> Result<Vec<Handle>, Status> {
        let state = self.lock();
        state.injected(HostCall::Platforms)?;
        let available = state.platforms;
        Ok((0..count.min(available) as usize)
            .map(|p| Handle::from_id(PLATFORM_TAG | p))
            .collect())
    }

    fn platform_name(&self, platform: Handle) -> Result<String, Status> {
        let p = self.lock().platform(platform).ok_or(Status::CL_INVALID_PLATFORM)?;
        Ok(format!("Host Platform {p}"))
    }

    fn device_count(&self, platform: Handle) -> Result<u32, Status> {
        let state = self.lock();
        state.platform(platform).ok_or(Status::CL_INVALID_PLATFORM)?;
        state.injected(HostCall::Devices)?;
        match state.devices {
            0 => Err(Status::CL_DEVICE_NOT_FOUND),
            n => Ok(n),
        }
    }

    fn device_ids(&self, platform: Handle, count: u32) -> Result<Vec<Handle>, Status> {
        let state = self.lock();
        let p = state.platform(platform).ok_or(Status::CL_INVALID_PLATFORM)?;
        state.injected(HostCall::Devices)?;
        if state.devices == 0 {
            return Err(Status::CL_DEVICE_NOT_FOUND);
        }
        Ok((0..count.min(state.devices) as usize)
            .map(|d| Handle::from_id(DEVICE_TAG | p << 12 | d))
            .collect())
    }

    fn device_name(&self, device: Handle) -> Result<String, Status> {
        self.lock().device_platform(device).ok_or(Status::CL_INVALID_DEVICE)?;
        Ok(format!("Host Device {}", device.id() & 0xFFF))
    }

    fn create_context(&self, platform: Handle, devices: &[Handle]) -> Result<Handle, Status> {
        let mut state = self.lock();
        let p = state.platform(platform).ok_or(Status::CL_INVALID_PLATFORM)?;
        state.injected(HostCall::CreateContext)?;
        if devices.is_empty() {
            return Err(Status::CL_INVALID_VALUE);
        }
        if devices.iter().any(|d| state.device_platform(*d) != Some(p)) {
            return Err(Status::CL_INVALID_DEVICE);
        }
        state.contexts_created += 1;
        Ok(state.insert(Object::Context { devices: devices.iter().map(|d| d.id()).collect() }))
    }

    fn release_context(&self, context: Handle) -> Status {
        let mut state = self.lock();
        state.release(context, |o| matches!(o, Object::Context { .. }), Status::CL_INVALID_CONTEXT)
    }

    fn create_command_queue(&self, context: Handle, device: Handle) -> Result<Handle, Status> {
        let mut state = self.lock();
        state.injected(HostCall::CreateCommandQueue)?;
        let devices = state.context_devices(context.id()).ok_or(Status::CL_INVALID_CONTEXT)?;
        if !devices.contains(&device.id()) {
            return Err(Status::CL_INVALID_DEVICE);
        }
        Ok(state.insert(Object::Queue { context: context.id() }))
    }

    fn finish(&self, queue: Handle) -> Status {
        match self.lock().queue_context(queue) {
            Some(_) => Status::CL_SUCCESS,
            None => Status::CL_INVALID_COMMAND_QUEUE,
        }
    }

    fn release_command_queue(&self, queue: Handle) -> Status {
        let mut state = self.lock();
        state.release(queue, |o| matches!(o, Object::Queue { .. }), Status::CL_INVALID_COMMAND_QUEUE)
    }

    fn create_buffer(&self, context: Handle, data: &[u8]) -> Result<Handle, Status> {
        let mut state = self.lock();
        state.context_devices(context.id()).ok_or(Status::CL_INVALID_CONTEXT)?;
        if data.is_empty() {
            return Err(Status::CL_INVALID_BUFFER_SIZE);
        }
        let free = state.memory.saturating_sub(state.allocated);
        if free < data.len() {
            debug!("Host driver out of memory, requested {} B, free {free} B", data.len());
            return Err(Status::CL_MEM_OBJECT_ALLOCATION_FAILURE);
        }
        state.allocated += data.len();
        Ok(state.insert(Object::Mem { context: context.id(), data: data.to_vec() }))
    }

    fn release_mem_object(&self, mem: Handle) -> Status {
        let mut state = self.lock();
        state.release(mem, |o| matches!(o, Object::Mem { .. }), Status::CL_INVALID_MEM_OBJECT)
    }

    fn create_program_with_source(&self, context: Handle, source: &str) -> Result<Handle, Status> {
        let mut state = self.lock();
        state.context_devices(context.id()).ok_or(Status::CL_INVALID_CONTEXT)?;
        if source.is_empty() {
            return Err(Status::CL_INVALID_VALUE);
        }
        Ok(state.insert(Object::Program {
            context: context.id(),
            source: source.into(),
            decls: Vec::new(),
            built: false,
            log: String::new(),
        }))
    }

    fn build_program(&self, program: Handle, devices: &[Handle], options: &CStr) -> Status {
        let mut state = self.lock();
        let Some(Object::Program { context, source, .. }) = state.objects.get(&program.id()) else {
            return Status::CL_INVALID_PROGRAM;
        };
        let Some(context_devices) = state.context_devices(*context) else {
            return Status::CL_INVALID_CONTEXT;
        };
        if devices.iter().any(|d| !context_devices.contains(&d.id())) {
            return Status::CL_INVALID_DEVICE;
        }
        trace!("Host build with options {options:?}");
        let parsed = parse_kernels(source).and_then(|parsed| {
            if parsed.is_empty() {
                return Err("error: program declares no kernels".into());
            }
            match parsed.iter().find(|d| !state.kernels.contains_key(&d.name)) {
                Some(d) => Err(format!("error: no host implementation for kernel {}", d.name)),
                None => Ok(parsed),
            }
        });
        let Some(Object::Program { decls, built, log, .. }) = state.objects.get_mut(&program.id())
        else {
            return Status::CL_INVALID_PROGRAM;
        };
        match parsed {
            Ok(parsed) => {
                *decls = parsed;
                *built = true;
                log.clear();
                Status::CL_SUCCESS
            }
            Err(message) => {
                *built = false;
                *log = message;
                Status::CL_BUILD_PROGRAM_FAILURE
            }
        }
    }

    fn program_build_log(&self, program: Handle, device: Handle) -> Result<String, Status> {
        let state = self.lock();
        let Some(Object::Program { log, .. }) = state.objects.get(&program.id()) else {
            return Err(Status::CL_INVALID_PROGRAM);
        };
        state.device_platform(device).ok_or(Status::CL_INVALID_DEVICE)?;
        Ok(log.clone())
    }

    fn release_program(&self, program: Handle) -> Status {
        let mut state = self.lock();
        state.release(program, |o| matches!(o, Object::Program { .. }), Status::CL_INVALID_PROGRAM)
    }

    fn create_kernel(&self, program: Handle, name: &CStr) -> Result<Handle, Status> {
        let mut state = self.lock();
        let Some(Object::Program { decls, built, .. }) = state.objects.get(&program.id()) else {
            return Err(Status::CL_INVALID_PROGRAM);
        };
        if !built {
            return Err(Status::CL_INVALID_PROGRAM_EXECUTABLE);
        }
        let name = name.to_str().map_err(|_| Status::CL_INVALID_KERNEL_NAME)?;
        let decl = decls
            .iter()
            .find(|d| d.name == name)
            .cloned()
            .ok_or(Status::CL_INVALID_KERNEL_NAME)?;
        let args = decl.params.iter().map(|_| None).collect();
        Ok(state.insert(Object::Kernel { program: program.id(), decl, args }))
    }

    fn set_kernel_arg(&self, kernel: Handle, index: u32, value: &[u8]) -> Status {
        let mut state = self.lock();
        state.argument_calls += 1;
        let Some(Object::Kernel { program, decl, .. }) = state.objects.get(&kernel.id()) else {
            return Status::CL_INVALID_KERNEL;
        };
        let Some(param) = decl.params.get(index as usize).copied() else {
            return Status::CL_INVALID_ARG_INDEX;
        };
        let bound = match param {
            Param::Global => {
                let Ok(bytes) = value.try_into() else {
                    return Status::CL_INVALID_ARG_SIZE;
                };
                let mem = usize::from_ne_bytes(bytes);
                let context = state.program_context(*program);
                if context.is_none() || state.mem_context(mem) != context {
                    return Status::CL_INVALID_MEM_OBJECT;
                }
                Bound::Mem(mem)
            }
            Param::Value(Some(dtype)) if dtype.byte_size() != value.len() => {
                return Status::CL_INVALID_ARG_SIZE;
            }
            Param::Value(_) if value.is_empty() => return Status::CL_INVALID_ARG_SIZE,
            Param::Value(_) => Bound::Value(value.to_vec()),
        };
        if let Some(Object::Kernel { args, .. }) = state.objects.get_mut(&kernel.id()) {
            args[index as usize] = Some(bound);
        }
        Status::CL_SUCCESS
    }

    fn release_kernel(&self, kernel: Handle) -> Status {
        let mut state = self.lock();
        state.release(kernel, |o| matches!(o, Object::Kernel { .. }), Status::CL_INVALID_KERNEL)
    }

    fn enqueue_nd_range_kernel(
        &self,
        queue: Handle,
        kernel: Handle,
        offset: Option<&[usize]>,
        global: &[usize],
        local: Option<&[usize]>,
        wait: &[Handle],
    ) -> Result<Handle, Status> {
        let mut state = self.lock();
        state.submissions += 1;
        let context = state.queue_context(queue).ok_or(Status::CL_INVALID_COMMAND_QUEUE)?;
        let Some(Object::Kernel { program, decl, args }) = state.objects.get(&kernel.id()) else {
            return Err(Status::CL_INVALID_KERNEL);
        };
        if state.program_context(*program) != Some(context) {
            return Err(Status::CL_INVALID_CONTEXT);
        }
        if !(1..=3).contains(&global.len()) {
            return Err(Status::CL_INVALID_WORK_DIMENSION);
        }
        if offset.is_some_and(|o| o.len() != global.len())
            || local.is_some_and(|l| l.len() != global.len())
        {
            return Err(Status::CL_INVALID_VALUE);
        }
        if global.contains(&0) {
            return Err(Status::CL_INVALID_GLOBAL_WORK_SIZE);
        }
        if let Some(offset) = offset {
            if offset.iter().zip(global).any(|(o, g)| o.checked_add(*g).is_none()) {
                return Err(Status::CL_INVALID_GLOBAL_OFFSET);
            }
        }
        if let Some(local) = local {
            if local.iter().zip(global).any(|(l, g)| *l == 0 || g % l != 0) {
                return Err(Status::CL_INVALID_WORK_GROUP_SIZE);
            }
        }
        let dependency = state.wait_list_status(wait)?;

        // Map distinct mem objects to slots, a buffer bound twice shares its slot
        let mut mems: Vec<usize> = Vec::new();
        let mut slots = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                Some(Bound::Mem(mem)) => {
                    if state.mem_context(*mem) != Some(context) {
                        return Err(Status::CL_INVALID_MEM_OBJECT);
                    }
                    let slot = mems.iter().position(|m| m == mem).unwrap_or_else(|| {
                        mems.push(*mem);
                        mems.len() - 1
                    });
                    slots.push(Slot::Mem(slot));
                }
                Some(Bound::Value(bytes)) => slots.push(Slot::Value(bytes.clone())),
                None => return Err(Status::CL_INVALID_KERNEL_ARGS),
            }
        }
        let name = decl.name.clone();
        if !dependency.is_success() {
            debug!("Host kernel {name} skipped, dependency failed with {dependency}");
            return Ok(state.insert(Object::Event {
                status: Status::CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST,
            }));
        }
        let Some(host_kernel) = state.kernels.get(&name).cloned() else {
            return Err(Status::CL_INVALID_KERNEL);
        };

        let offset = padded(offset, 0);
        let size = padded(Some(global), 1);
        let faulted = {
            let borrowed = Borrowed::take(&mut state.objects, &mems);
            let mut item = WorkItem {
                id: offset,
                size,
                offset,
                dims: global.len(),
                args: &slots,
                memory: &borrowed.memory,
                faulted: Cell::new(false),
            };
            for_each_global_id(offset, size, |id| {
                item.id = id;
                host_kernel(&item);
            });
            item.faulted.get()
        };
        let status = if faulted {
            debug!("Host kernel {name} faulted on an invalid access");
            Status::CL_OUT_OF_RESOURCES
        } else {
            Status::CL_SUCCESS
        };
        Ok(state.insert(Object::Event { status }))
    }

    unsafe fn enqueue_read_buffer(
        &self,
        queue: Handle,
        mem: Handle,
        blocking: bool,
        offset: usize,
        size: usize,
        dst: *mut u8,
        wait: &[Handle],
    ) -> Result<Handle, Status> {
        let _ = blocking;
        let mut state = self.lock();
        state.submissions += 1;
        let context = state.queue_context(queue).ok_or(Status::CL_INVALID_COMMAND_QUEUE)?;
        let Some(Object::Mem { context: mem_context, data }) = state.objects.get(&mem.id()) else {
            return Err(Status::CL_INVALID_MEM_OBJECT);
        };
        if *mem_context != context {
            return Err(Status::CL_INVALID_CONTEXT);
        }
        let Some(src) = offset
            .checked_add(size)
            .filter(|_| size > 0)
            .and_then(|end| data.get(offset..end))
        else {
            return Err(Status::CL_INVALID_VALUE);
        };
        let dependency = state.wait_list_status(wait)?;
        let status = if dependency.is_success() {
            // Caller guarantees dst is valid for size bytes
            core::ptr::copy_nonoverlapping(src.as_ptr(), dst, size);
            Status::CL_SUCCESS
        } else {
            Status::CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST
        };
        Ok(state.insert(Object::Event { status }))
    }

    fn wait_for_events(&self, events: &[Handle]) -> Status {
        if events.is_empty() {
            return Status::CL_INVALID_VALUE;
        }
        let state = self.lock();
        let mut result = Status::CL_SUCCESS;
        for event in events {
            match state.objects.get(&event.id()) {
                Some(Object::Event { status }) if !status.is_success() => {
                    result = Status::CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST;
                }
                Some(Object::Event { .. }) => {}
                _ => return Status::CL_INVALID_EVENT,
            }
        }
        result
    }

    fn release_event(&self, event: Handle) -> Status {
        let mut state = self.lock();
        state.release(event, |o| matches!(o, Object::Event { .. }), Status::CL_INVALID_EVENT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAXPY: &str = "__kernel void SAXPY(__global float* x, __global float* y, float a){
        const int i = get_global_id(0);
        y[i] += a * x[i];
    }";

    fn saxpy(item: &WorkItem<'_>) {
        let i = item.global_id(0);
        let a: f32 = item.scalar(2);
        let y: f32 = item.load(1, i);
        item.store(1, i, y + a * item.load::<f32>(0, i));
    }

    fn context(driver: &HostDriver) -> (Handle, Handle) {
        let platform = driver.platform_ids(1).unwrap()[0];
        let devices = driver.device_ids(platform, 1).unwrap();
        let context = driver.create_context(platform, &devices).unwrap();
        (context, devices[0])
    }

    #[test]
    fn parses_kernel_declarations() {
        let decls = parse_kernels(
            "kernel void a(void) {}\n__kernel void b(__global const float *x, const unsigned int n, float4 v) {}\nint not_a_kernel;",
        )
        .unwrap();
        assert_eq!(decls.len(), 2);
        assert_eq!(decls[0].name, "a");
        assert!(decls[0].params.is_empty());
        assert_eq!(
            decls[1].params,
            [Param::Global, Param::Value(Some(DType::U32)), Param::Value(None)]
        );
        assert!(parse_kernels("__kernel int f() {}").unwrap().is_empty());
        assert!(parse_kernels("__kernel void f {}").is_err());
        assert!(parse_kernels("void mykernel (int x) {}").unwrap().is_empty());
    }

    #[test]
    fn unregistered_kernel_fails_build_with_log() {
        let driver = HostDriver::new();
        let (context, device) = context(&driver);
        let program = driver.create_program_with_source(context, SAXPY).unwrap();
        let status = driver.build_program(program, &[device], c"");
        assert_eq!(status, Status::CL_BUILD_PROGRAM_FAILURE);
        let log = driver.program_build_log(program, device).unwrap();
        assert!(log.contains("SAXPY"), "{log}");
        assert_eq!(driver.create_kernel(program, c"SAXPY"), Err(Status::CL_INVALID_PROGRAM_EXECUTABLE));
    }

    #[test]
    fn memory_limit_is_enforced() {
        let driver = HostDriver::new().with_memory(16);
        let (context, _) = context(&driver);
        let a = driver.create_buffer(context, &[0; 12]).unwrap();
        assert_eq!(driver.create_buffer(context, &[0; 8]), Err(Status::CL_MEM_OBJECT_ALLOCATION_FAILURE));
        assert_eq!(driver.release_mem_object(a), Status::CL_SUCCESS);
        assert!(driver.create_buffer(context, &[0; 16]).is_ok());
        assert_eq!(driver.release_mem_object(a), Status::CL_INVALID_MEM_OBJECT);
    }

    #[test]
    fn lowering_the_limit_below_allocated_rejects_allocations() {
        let driver = HostDriver::new().with_memory(16);
        let (context, _) = context(&driver);
        let a = driver.create_buffer(context, &[0; 12]).unwrap();
        let driver = driver.with_memory(4);
        assert_eq!(driver.create_buffer(context, &[0; 1]), Err(Status::CL_MEM_OBJECT_ALLOCATION_FAILURE));
        assert_eq!(driver.release_mem_object(a), Status::CL_SUCCESS);
        assert_eq!(driver.allocated_bytes(), 0);
        assert!(driver.create_buffer(context, &[0; 4]).is_ok());
    }

    #[test]
    fn injected_failures_are_returned() {
        let driver = HostDriver::new()
            .with_failure(HostCall::Devices, Status::CL_OUT_OF_HOST_MEMORY)
            .with_failure(HostCall::CreateCommandQueue, Status::CL_INVALID_QUEUE_PROPERTIES);
        let platform = driver.platform_ids(1).unwrap()[0];
        assert_eq!(driver.device_count(platform), Err(Status::CL_OUT_OF_HOST_MEMORY));
        assert_eq!(driver.device_ids(platform, 1), Err(Status::CL_OUT_OF_HOST_MEMORY));
        let device = Handle::from_id(DEVICE_TAG);
        let context = driver.create_context(platform, &[device]).unwrap();
        assert_eq!(driver.create_command_queue(context, device), Err(Status::CL_INVALID_QUEUE_PROPERTIES));
    }

    #[test]
    fn out_of_bounds_access_faults_the_event() {
        let driver = HostDriver::new().with_kernel("SAXPY", saxpy);
        let (context, device) = context(&driver);
        let queue = driver.create_command_queue(context, device).unwrap();
        let x = driver.create_buffer(context, &[0; 8]).unwrap();
        let y = driver.create_buffer(context, &[0; 8]).unwrap();
        let program = driver.create_program_with_source(context, SAXPY).unwrap();
        assert_eq!(driver.build_program(program, &[device], c""), Status::CL_SUCCESS);
        let kernel = driver.create_kernel(program, c"SAXPY").unwrap();
        assert_eq!(driver.set_kernel_arg(kernel, 0, &x.to_ne_bytes()), Status::CL_SUCCESS);
        assert_eq!(driver.set_kernel_arg(kernel, 1, &y.to_ne_bytes()), Status::CL_SUCCESS);
        assert_eq!(driver.set_kernel_arg(kernel, 2, &1.0f64.to_ne_bytes()), Status::CL_INVALID_ARG_SIZE);
        assert_eq!(driver.set_kernel_arg(kernel, 3, &1.0f32.to_ne_bytes()), Status::CL_INVALID_ARG_INDEX);
        assert_eq!(
            driver.enqueue_nd_range_kernel(queue, kernel, None, &[2], None, &[]),
            Err(Status::CL_INVALID_KERNEL_ARGS)
        );
        assert_eq!(driver.set_kernel_arg(kernel, 2, &1.0f32.to_ne_bytes()), Status::CL_SUCCESS);
        let ok = driver.enqueue_nd_range_kernel(queue, kernel, None, &[2], None, &[]).unwrap();
        assert_eq!(driver.wait_for_events(&[ok]), Status::CL_SUCCESS);
        let faulted = driver.enqueue_nd_range_kernel(queue, kernel, None, &[3], None, &[]).unwrap();
        assert_eq!(driver.wait_for_events(&[faulted]), Status::CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
        let skipped = driver.enqueue_nd_range_kernel(queue, kernel, None, &[2], None, &[faulted]).unwrap();
        assert_eq!(driver.wait_for_events(&[skipped]), Status::CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST);
        assert_eq!(driver.submissions(), 4);
    }

    #[test]
    fn rejects_invalid_ranges() {
        let driver = HostDriver::new().with_kernel("SAXPY", saxpy);
        let (context, device) = context(&driver);
        let queue = driver.create_command_queue(context, device).unwrap();
        let program = driver.create_program_with_source(context, SAXPY).unwrap();
        assert_eq!(driver.build_program(program, &[device], c""), Status::CL_SUCCESS);
        let kernel = driver.create_kernel(program, c"SAXPY").unwrap();
        let enqueue = |global: &[usize], local: Option<&[usize]>| {
            driver.enqueue_nd_range_kernel(queue, kernel, None, global, local, &[])
        };
        assert_eq!(enqueue(&[1, 1, 1, 1], None), Err(Status::CL_INVALID_WORK_DIMENSION));
        assert_eq!(enqueue(&[0], None), Err(Status::CL_INVALID_GLOBAL_WORK_SIZE));
        assert_eq!(enqueue(&[6], Some(&[4])), Err(Status::CL_INVALID_WORK_GROUP_SIZE));
        assert_eq!(
            driver.enqueue_nd_range_kernel(queue, kernel, Some(&[usize::MAX - 1]), &[2], None, &[]),
            Err(Status::CL_INVALID_GLOBAL_OFFSET)
        );
        assert_eq!(
            driver.enqueue_nd_range_kernel(queue, kernel, None, &[4], None, &[Handle::from_id(999)]),
            Err(Status::CL_INVALID_EVENT_WAIT_LIST)
        );
    }
}
