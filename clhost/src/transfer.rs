//! Device to host reads

use crate::{
    buffer::Buffer,
    dtype::Scalar,
    error::{ClError, DriverError},
    event::{handles, Command, Event},
    status::Status,
};
use tracing::{debug, warn};

impl<'s, T: Scalar> Buffer<'s, T> {
    /// # Safety
    ///
    /// `dst` must be valid for writes of `len` elements until the returned
    /// event completed, or the call returned if `blocking`.
    unsafe fn enqueue_read(
        &self,
        dst: *mut T,
        len: usize,
        blocking: bool,
        wait: &[&Event<'_>],
    ) -> Result<Event<'s>, ClError> {
        let session = self.session();
        let size = len * core::mem::size_of::<T>();
        debug!("Reading {size} B from buffer, blocking {blocking}, after {} events", wait.len());
        let event = session
            .driver()
            .enqueue_read_buffer(
                session.queue(),
                self.handle(),
                blocking,
                0,
                size,
                dst.cast(),
                &handles(wait),
            )
            .map_err(|status| ClError::Transfer(DriverError { operation: "enqueue read buffer", status }))?;
        Ok(Event::new(session, event, Command::Read))
    }

    /// Copies the first `target.len()` elements of this buffer into `target`.
    ///
    /// Blocks until the data is in `target`. The read starts after every
    /// event in `wait` completed.
    ///
    /// # Errors
    ///
    /// [`ClError::Transfer`] if the driver rejects the read, `target` is longer
    /// than the buffer, or a dependency failed.
    pub fn read(&self, target: &mut [T], wait: &[&Event<'_>]) -> Result<Event<'s>, ClError> {
        // Blocking, target is not used by the driver after the call returns
        let event = unsafe { self.enqueue_read(target.as_mut_ptr(), target.len(), true, wait)? };
        event.wait()?;
        Ok(event)
    }

    /// Reads the whole buffer.
    ///
    /// # Errors
    ///
    /// [`ClError::Transfer`] if the read fails.
    pub fn to_vec(&self) -> Result<Vec<T>, ClError> {
        let mut data = vec![T::default(); self.len()];
        self.read(&mut data, &[])?;
        Ok(data)
    }

    /// Starts copying the first `target.len()` elements of this buffer into
    /// `target` without blocking.
    ///
    /// `target` is owned by the returned [`PendingRead`] until the read
    /// completed, see [`PendingRead::wait`].
    ///
    /// # Errors
    ///
    /// [`ClError::Transfer`] if the driver rejects the read.
    pub fn read_async(
        &self,
        mut target: Vec<T>,
        wait: &[&Event<'_>],
    ) -> Result<PendingRead<'s, T>, ClError> {
        // Heap storage of target does not move with the vec, and the vec is
        // only handed back or freed after the event completed
        let event = unsafe { self.enqueue_read(target.as_mut_ptr(), target.len(), false, wait)? };
        Ok(PendingRead { event, target, done: false })
    }
}

/// Non-blocking read in flight.
///
/// Dropping it waits for the read to complete. Leaking it leaks the target.
#[must_use = "data is only valid after waiting for the read"]
pub struct PendingRead<'s, T: Scalar> {
    event: Event<'s>,
    target: Vec<T>,
    done: bool,
}

impl<T: Scalar> core::fmt::Debug for PendingRead<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PendingRead")
            .field("len", &self.target.len())
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<'s, T: Scalar> PendingRead<'s, T> {
    /// Completion event of the read, usable as a wait dependency
    pub fn event(&self) -> &Event<'s> {
        &self.event
    }

    /// Blocks until the read completed and returns the target.
    ///
    /// # Errors
    ///
    /// [`ClError::Transfer`] if the read failed. The target is dropped then,
    /// its contents are not valid.
    pub fn wait(mut self) -> Result<Vec<T>, ClError> {
        let result = self.event.wait();
        self.settle(&result);
        result.map(|()| core::mem::take(&mut self.target))
    }

    fn settle(&mut self, result: &Result<(), ClError>) {
        self.done = true;
        // A failed command is complete, any other failure leaves the read possibly in flight
        if let Err(e) = result {
            if e.status() != Some(Status::CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST) {
                core::mem::forget(core::mem::take(&mut self.target));
            }
        }
    }
}

impl<T: Scalar> Drop for PendingRead<'_, T> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let result = self.event.wait();
        if let Err(e) = &result {
            warn!("Pending read failed, {e}");
        }
        self.settle(&result);
    }
}
