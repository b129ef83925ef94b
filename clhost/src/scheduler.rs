//! Kernel launches

use crate::{
    error::{ClError, DriverError},
    event::{handles, Command, Event},
    kernel::Kernel,
};
use tracing::debug;

/// Checks that offset and local size, when present, have one entry per
/// dimension of `global`, and that `global` has one to three dimensions.
///
/// Absent vectors are fine, present but empty ones are a mismatch.
#[track_caller]
pub(crate) fn validate_work_size(
    offset: Option<&[usize]>,
    global: &[usize],
    local: Option<&[usize]>,
) -> Result<(), ClError> {
    if global.is_empty() || global.len() > 3 {
        return Err(ClError::dimension_mismatch(format!(
            "global work size has {} dimensions, expected 1 to 3",
            global.len()
        )));
    }
    for (name, vector) in [("global work offset", offset), ("local work size", local)] {
        if let Some(vector) = vector {
            if vector.len() != global.len() {
                return Err(ClError::dimension_mismatch(format!(
                    "{name} has {} dimensions, global work size has {}",
                    vector.len(),
                    global.len()
                )));
            }
        }
    }
    Ok(())
}

impl<'s> Kernel<'s> {
    /// Enqueues one launch of this kernel over `global` work items.
    ///
    /// The launch starts after every event in `wait` completed. Returns once
    /// the launch is queued, the returned event tracks its completion.
    ///
    /// # Errors
    ///
    /// [`ClError::DimensionMismatch`] if `offset` or `local` do not match the
    /// dimensions of `global`, detected before anything is submitted.
    /// [`ClError::Enqueue`] if the driver rejects the launch.
    #[track_caller]
    pub fn enqueue(
        &self,
        offset: Option<&[usize]>,
        global: &[usize],
        local: Option<&[usize]>,
        wait: &[&Event<'_>],
    ) -> Result<Event<'s>, ClError> {
        validate_work_size(offset, global, local)?;
        let session = self.session();
        debug!(
            "Enqueue {} offset {offset:?} global {global:?} local {local:?} after {} events",
            self.name(),
            wait.len()
        );
        let event = session
            .driver()
            .enqueue_nd_range_kernel(session.queue(), self.handle(), offset, global, local, &handles(wait))
            .map_err(|status| ClError::Enqueue(DriverError { operation: "enqueue kernel", status }))?;
        Ok(Event::new(session, event, Command::Kernel))
    }
}

#[test]
fn absent_and_empty_vectors_differ() {
    assert!(validate_work_size(None, &[4], None).is_ok());
    assert!(validate_work_size(Some(&[0, 0]), &[4, 4], Some(&[2, 2])).is_ok());
    assert!(matches!(
        validate_work_size(Some(&[]), &[4], None),
        Err(ClError::DimensionMismatch(_))
    ));
    assert!(validate_work_size(None, &[4], Some(&[2, 2])).is_err());
    assert!(validate_work_size(None, &[], None).is_err());
    assert!(validate_work_size(None, &[1, 1, 1, 1], None).is_err());
}
