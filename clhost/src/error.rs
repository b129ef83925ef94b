use crate::status::Status;
use std::fmt::{Display, Formatter};

/// Non-success status reported by the driver for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverError {
    /// Name of the driver operation that failed
    pub operation: &'static str,
    /// Status the driver returned
    pub status: Status,
}

impl Display for DriverError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_fmt(format_args!("{} failed with {}", self.operation, self.status))
    }
}

/// Enumeration representing the errors that can occur within clhost.
///
/// Kinds are never collapsed. [`ClError::is_session_failure`] tells
/// establishment failures apart from failures of a single operation.
#[derive(Debug)]
pub enum ClError {
    /// Platforms or devices could not be enumerated, or no runtime was found
    Discovery(DriverError),
    /// Session could not be established
    Session(DriverError),
    /// Device buffer could not be allocated
    Allocation(DriverError),
    /// Program source failed to compile
    Compile {
        /// Failed driver call
        error: DriverError,
        /// Build log of the first session device, empty if unavailable
        build_log: Box<str>,
    },
    /// Entry point does not exist in the compiled program
    EntryPoint {
        /// Failed driver call
        error: DriverError,
        /// Requested entry point
        name: Box<str>,
    },
    /// Driver rejected a kernel argument
    Argument(DriverError),
    /// Value kind can not be bound as a kernel argument
    UnsupportedArgumentType(Box<str>),
    /// Work size vectors disagree on the number of dimensions
    DimensionMismatch(Box<str>),
    /// Driver rejected a kernel submission or the kernel failed
    Enqueue(DriverError),
    /// Driver rejected a buffer transfer or the transfer failed
    Transfer(DriverError),
}

impl ClError {
    /// Unsupported argument type error
    #[track_caller]
    pub(crate) fn unsupported_argument_type(e: impl Into<String>) -> Self {
        Self::UnsupportedArgumentType(with_location(e.into()))
    }

    /// Dimension mismatch error
    #[track_caller]
    pub(crate) fn dimension_mismatch(e: impl Into<String>) -> Self {
        Self::DimensionMismatch(with_location(e.into()))
    }

    /// Status reported by the driver, `None` for errors detected before any driver call.
    #[must_use]
    pub fn status(&self) -> Option<Status> {
        match self {
            Self::Discovery(e)
            | Self::Session(e)
            | Self::Allocation(e)
            | Self::Argument(e)
            | Self::Enqueue(e)
            | Self::Transfer(e)
            | Self::Compile { error: e, .. }
            | Self::EntryPoint { error: e, .. } => Some(e.status),
            Self::UnsupportedArgumentType(_) | Self::DimensionMismatch(_) => None,
        }
    }

    /// True if no session could be established, the caller can not continue
    /// without recreating the runtime or session.
    #[must_use]
    pub const fn is_session_failure(&self) -> bool {
        matches!(self, Self::Discovery(_) | Self::Session(_))
    }
}

#[track_caller]
fn with_location(mut e: String) -> Box<str> {
    use std::fmt::Write;
    let location = std::panic::Location::caller();
    let _ = write!(e, ", {}:{}:{}", location.file(), location.line(), location.column());
    e.into()
}

impl Display for ClError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ClError::Discovery(e) => f.write_fmt(format_args!("Discovery error: {e}")),
            ClError::Session(e) => f.write_fmt(format_args!("Session error: {e}")),
            ClError::Allocation(e) => f.write_fmt(format_args!("Allocation error: {e}")),
            ClError::Compile { error, build_log } => {
                f.write_fmt(format_args!("Compile error: {error}"))?;
                if !build_log.is_empty() {
                    f.write_fmt(format_args!("\n{build_log}"))?;
                }
                Ok(())
            }
            ClError::EntryPoint { error, name } => {
                f.write_fmt(format_args!("Entry point {name:?} not found: {error}"))
            }
            ClError::Argument(e) => f.write_fmt(format_args!("Kernel argument error: {e}")),
            ClError::UnsupportedArgumentType(e) => {
                f.write_fmt(format_args!("Unsupported argument type {e}"))
            }
            ClError::DimensionMismatch(e) => f.write_fmt(format_args!("Dimension mismatch: {e}")),
            ClError::Enqueue(e) => f.write_fmt(format_args!("Enqueue error: {e}")),
            ClError::Transfer(e) => f.write_fmt(format_args!("Transfer error: {e}")),
        }
    }
}

impl std::error::Error for ClError {}

#[test]
fn session_failures_are_distinguishable() {
    let e = ClError::Session(DriverError { operation: "create context", status: Status::CL_DEVICE_NOT_FOUND });
    assert!(e.is_session_failure());
    assert_eq!(e.status(), Some(Status::CL_DEVICE_NOT_FOUND));
    let e = ClError::Enqueue(DriverError { operation: "enqueue kernel", status: Status::CL_INVALID_KERNEL_ARGS });
    assert!(!e.is_session_failure());
    let e = ClError::dimension_mismatch("local work size has 2 dimensions, expected 1");
    assert_eq!(e.status(), None);
    assert!(e.to_string().contains("error.rs"));
}
