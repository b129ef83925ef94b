use crate::{
    driver::{release, Handle, Kind},
    error::{ClError, DriverError},
    session::Session,
    status::Status,
};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Kernel,
    Read,
}

/// Completion token of one enqueued command.
///
/// Pass it as a wait dependency to later commands, or wait on it directly.
/// Released on drop, dropping does not wait.
pub struct Event<'s> {
    session: &'s Session,
    handle: Handle,
    command: Command,
}

impl core::fmt::Debug for Event<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Event").field("command", &self.command).finish_non_exhaustive()
    }
}

impl<'s> Event<'s> {
    pub(crate) fn new(session: &'s Session, handle: Handle, command: Command) -> Self {
        Self { session, handle, command }
    }

    /// Blocks until the command completed.
    ///
    /// # Errors
    ///
    /// [`ClError::Enqueue`] for a failed kernel, [`ClError::Transfer`] for a
    /// failed read.
    pub fn wait(&self) -> Result<(), ClError> {
        wait_for_events(&[self])
    }
}

impl Drop for Event<'_> {
    fn drop(&mut self) {
        release(self.session.driver(), Kind::Event, self.handle);
    }
}

pub(crate) fn handles(events: &[&Event<'_>]) -> Vec<Handle> {
    events.iter().map(|e| e.handle).collect()
}

/// Blocks until every event in `events` completed.
///
/// All events must come from the same [`Session`]. Waiting on no events
/// returns immediately.
///
/// # Errors
///
/// [`ClError::Enqueue`] if any of the events belongs to a kernel launch,
/// [`ClError::Transfer`] if all of them belong to reads. Events of different
/// sessions fail with [`Status::CL_INVALID_EVENT`] without calling the driver.
pub fn wait_for_events(events: &[&Event<'_>]) -> Result<(), ClError> {
    let Some(first) = events.first() else {
        return Ok(());
    };
    debug!("Waiting for {} events", events.len());
    let status = if events.iter().all(|e| core::ptr::eq(e.session, first.session)) {
        first.session.driver().wait_for_events(&handles(events))
    } else {
        Status::CL_INVALID_EVENT
    };
    status.check("wait for events").map_err(|e: DriverError| {
        if events.iter().any(|event| event.command == Command::Kernel) {
            ClError::Enqueue(e)
        } else {
            ClError::Transfer(e)
        }
    })
}
