//! Program compilation and kernel argument binding

use crate::{
    buffer::Buffer,
    driver::{release, Handle, Kind},
    dtype::Scalar,
    error::{ClError, DriverError},
    session::Session,
    status::Status,
};
use core::any::Any;
use core::marker::PhantomData;
use std::ffi::CString;
use tracing::{debug, trace};

struct Program<'s> {
    session: &'s Session,
    handle: Handle,
}

impl Drop for Program<'_> {
    fn drop(&mut self) {
        release(self.session.driver(), Kind::Program, self.handle);
    }
}

/// Entry point of a compiled program.
///
/// Arguments are bound by position and stay bound across launches. Buffers
/// bound to a kernel stay borrowed for as long as the kernel lives.
pub struct Kernel<'s> {
    session: &'s Session,
    handle: Handle,
    name: Box<str>,
    // Released after the kernel
    _program: Program<'s>,
}

impl core::fmt::Debug for Kernel<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kernel").field("name", &self.name).finish_non_exhaustive()
    }
}

/// Buffer bound as a kernel argument
#[derive(Debug, Clone, Copy)]
pub struct BufferArg<'a> {
    handle: Handle,
    _buffer: PhantomData<&'a ()>,
}

/// Value that can be bound to a kernel parameter
#[derive(Debug, Clone, Copy)]
pub enum KernelArg<'a> {
    /// Device buffer, passed to `__global` pointer parameters
    Buffer(BufferArg<'a>),
    /// `float`
    F32(f32),
    /// `double`
    F64(f64),
    /// `int`
    I32(i32),
    /// `long`
    I64(i64),
}

impl<'a, 's: 'a, T: Scalar> From<&'a Buffer<'s, T>> for KernelArg<'a> {
    fn from(buffer: &'a Buffer<'s, T>) -> Self {
        Self::Buffer(BufferArg { handle: buffer.handle(), _buffer: PhantomData })
    }
}

impl From<f32> for KernelArg<'_> {
    fn from(value: f32) -> Self {
        Self::F32(value)
    }
}

impl From<f64> for KernelArg<'_> {
    fn from(value: f64) -> Self {
        Self::F64(value)
    }
}

impl From<i32> for KernelArg<'_> {
    fn from(value: i32) -> Self {
        Self::I32(value)
    }
}

impl From<i64> for KernelArg<'_> {
    fn from(value: i64) -> Self {
        Self::I64(value)
    }
}

impl Session {
    /// Compiles `source` for all devices of the session and extracts
    /// `entry_point` from it.
    ///
    /// Compilation is synchronous.
    ///
    /// # Errors
    ///
    /// [`ClError::Compile`] with the build log if the program does not build,
    /// [`ClError::EntryPoint`] if it has no kernel named `entry_point`.
    pub fn compile(&self, source: &str, entry_point: &str) -> Result<Kernel<'_>, ClError> {
        let driver = self.driver();
        trace!("Compiling program:\n{source}");
        let compile_error = |status| ClError::Compile {
            error: DriverError { operation: "create program", status },
            build_log: "".into(),
        };
        let program = driver.create_program_with_source(self.context(), source).map_err(compile_error)?;
        let program = Program { session: self, handle: program };
        let devices = self.device_handles();
        let status = driver.build_program(program.handle, &devices, self.build_options());
        if let Err(error) = status.check("build program") {
            let build_log = match driver.program_build_log(program.handle, self.device().handle()) {
                Ok(log) => log,
                Err(status) => {
                    debug!("Build log unavailable, {status}");
                    String::new()
                }
            };
            return Err(ClError::Compile { error, build_log: build_log.into() });
        }
        let entry_point_error = |status| ClError::EntryPoint {
            error: DriverError { operation: "create kernel", status },
            name: entry_point.into(),
        };
        let name = CString::new(entry_point)
            .map_err(|_| entry_point_error(Status::CL_INVALID_KERNEL_NAME))?;
        let handle = driver.create_kernel(program.handle, &name).map_err(entry_point_error)?;
        debug!("Compiled kernel {entry_point}");
        Ok(Kernel { session: self, handle, name: entry_point.into(), _program: program })
    }
}

impl<'s> Kernel<'s> {
    /// Binds `value` at `position`, replacing any earlier binding there.
    ///
    /// Positions are not checked against the kernel signature here, the
    /// driver rejects what does not fit.
    ///
    /// # Errors
    ///
    /// [`ClError::Argument`] if the driver rejects the argument.
    pub fn set_arg(&mut self, position: u32, value: impl Into<KernelArg<'s>>) -> Result<(), ClError> {
        let value = value.into();
        trace!("Kernel {} arg {position} = {value:?}", self.name);
        let driver = self.session.driver();
        let status = match value {
            KernelArg::Buffer(buffer) => {
                driver.set_kernel_arg(self.handle, position, &buffer.handle.to_ne_bytes())
            }
            KernelArg::F32(v) => driver.set_kernel_arg(self.handle, position, &v.to_ne_bytes()),
            KernelArg::F64(v) => driver.set_kernel_arg(self.handle, position, &v.to_ne_bytes()),
            KernelArg::I32(v) => driver.set_kernel_arg(self.handle, position, &v.to_ne_bytes()),
            KernelArg::I64(v) => driver.set_kernel_arg(self.handle, position, &v.to_ne_bytes()),
        };
        status.check("set kernel argument").map_err(ClError::Argument)
    }

    /// Binds a dynamically typed scalar at `position`.
    ///
    /// Accepts `f32`, `f64`, `i32` and `i64`. Buffers are bound with
    /// [`Kernel::set_arg`].
    ///
    /// # Errors
    ///
    /// [`ClError::UnsupportedArgumentType`] for any other type, without calling
    /// the driver, or [`ClError::Argument`] if the driver rejects the argument.
    #[track_caller]
    pub fn set_arg_any(&mut self, position: u32, value: &dyn Any) -> Result<(), ClError> {
        let value: KernelArg<'s> = if let Some(v) = value.downcast_ref::<f32>() {
            KernelArg::F32(*v)
        } else if let Some(v) = value.downcast_ref::<f64>() {
            KernelArg::F64(*v)
        } else if let Some(v) = value.downcast_ref::<i32>() {
            KernelArg::I32(*v)
        } else if let Some(v) = value.downcast_ref::<i64>() {
            KernelArg::I64(*v)
        } else {
            return Err(ClError::unsupported_argument_type(format!(
                "for argument {position} of kernel {}",
                self.name
            )));
        };
        self.set_arg(position, value)
    }

    /// Entry point name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn session(&self) -> &'s Session {
        self.session
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }
}

impl Drop for Kernel<'_> {
    fn drop(&mut self) {
        release(self.session.driver(), Kind::Kernel, self.handle);
    }
}
