use crate::{
    driver::{release, Handle, Kind},
    dtype::{as_bytes, DType, Scalar},
    error::{ClError, DriverError},
    session::Session,
    status::Status,
};
use core::marker::PhantomData;
use tracing::debug;

/// Read only device buffer with a copy of host data.
///
/// The size is fixed at creation. Contents come back to the host only through
/// an explicit read.
pub struct Buffer<'s, T: Scalar> {
    session: &'s Session,
    handle: Handle,
    len: usize,
    _dtype: PhantomData<T>,
}

impl<T: Scalar> core::fmt::Debug for Buffer<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Buffer")
            .field("dtype", &T::DTYPE)
            .field("len", &self.len)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Allocates a device buffer and copies `data` into it.
    ///
    /// # Errors
    ///
    /// [`ClError::Allocation`] if `data` is empty or the driver can not
    /// allocate the buffer.
    pub fn create_buffer<T: Scalar>(&self, data: &[T]) -> Result<Buffer<'_, T>, ClError> {
        let bytes = as_bytes(data);
        if bytes.is_empty() {
            return Err(ClError::Allocation(DriverError {
                operation: "create buffer",
                status: Status::CL_INVALID_BUFFER_SIZE,
            }));
        }
        debug!("Allocating buffer of {} x {}, {} B", data.len(), T::DTYPE, bytes.len());
        let handle = self
            .driver()
            .create_buffer(self.context(), bytes)
            .map_err(|status| ClError::Allocation(DriverError { operation: "create buffer", status }))?;
        Ok(Buffer { session: self, handle, len: data.len(), _dtype: PhantomData })
    }
}

impl<'s, T: Scalar> Buffer<'s, T> {
    /// Number of elements
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Always false, empty buffers can not be created
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Size in bytes
    #[must_use]
    pub fn byte_size(&self) -> usize {
        self.len * T::DTYPE.byte_size()
    }

    /// Element type
    #[must_use]
    pub fn dtype(&self) -> DType {
        T::DTYPE
    }

    pub(crate) fn session(&self) -> &'s Session {
        self.session
    }

    pub(crate) fn handle(&self) -> Handle {
        self.handle
    }
}

impl<T: Scalar> Drop for Buffer<'_, T> {
    fn drop(&mut self) {
        release(self.session.driver(), Kind::MemObject, self.handle);
    }
}
