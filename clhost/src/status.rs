use crate::error::DriverError;
use core::fmt::{Debug, Display, Formatter};

#[allow(non_camel_case_types)]
pub(crate) type cl_int = i32;

/// Status code returned by every driver call.
///
/// This is the raw `cl_int` of the underlying runtime. Unknown codes are kept
/// as they are, so nothing reported by the driver is lost.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct Status(pub cl_int);

macro_rules! status_codes {
    ($($name:ident = $code:literal,)*) => {
        impl Status {
            $(
                #[doc = concat!("`", stringify!($name), "` (", stringify!($code), ")")]
                pub const $name: Self = Self($code);
            )*

            /// Symbolic name of this status, if it is a known code.
            #[must_use]
            pub const fn name(self) -> Option<&'static str> {
                match self.0 {
                    $($code => Some(stringify!($name)),)*
                    _ => None,
                }
            }
        }
    };
}

status_codes! {
    CL_SUCCESS = 0,
    CL_DEVICE_NOT_FOUND = -1,
    CL_DEVICE_NOT_AVAILABLE = -2,
    CL_COMPILER_NOT_AVAILABLE = -3,
    CL_MEM_OBJECT_ALLOCATION_FAILURE = -4,
    CL_OUT_OF_RESOURCES = -5,
    CL_OUT_OF_HOST_MEMORY = -6,
    CL_BUILD_PROGRAM_FAILURE = -11,
    CL_EXEC_STATUS_ERROR_FOR_EVENTS_IN_WAIT_LIST = -14,
    CL_INVALID_VALUE = -30,
    CL_INVALID_DEVICE_TYPE = -31,
    CL_INVALID_PLATFORM = -32,
    CL_INVALID_DEVICE = -33,
    CL_INVALID_CONTEXT = -34,
    CL_INVALID_QUEUE_PROPERTIES = -35,
    CL_INVALID_COMMAND_QUEUE = -36,
    CL_INVALID_HOST_PTR = -37,
    CL_INVALID_MEM_OBJECT = -38,
    CL_INVALID_BUILD_OPTIONS = -43,
    CL_INVALID_PROGRAM = -44,
    CL_INVALID_PROGRAM_EXECUTABLE = -45,
    CL_INVALID_KERNEL_NAME = -46,
    CL_INVALID_KERNEL_DEFINITION = -47,
    CL_INVALID_KERNEL = -48,
    CL_INVALID_ARG_INDEX = -49,
    CL_INVALID_ARG_VALUE = -50,
    CL_INVALID_ARG_SIZE = -51,
    CL_INVALID_KERNEL_ARGS = -52,
    CL_INVALID_WORK_DIMENSION = -53,
    CL_INVALID_WORK_GROUP_SIZE = -54,
    CL_INVALID_WORK_ITEM_SIZE = -55,
    CL_INVALID_GLOBAL_OFFSET = -56,
    CL_INVALID_EVENT_WAIT_LIST = -57,
    CL_INVALID_EVENT = -58,
    CL_INVALID_OPERATION = -59,
    CL_INVALID_BUFFER_SIZE = -61,
    CL_INVALID_GLOBAL_WORK_SIZE = -63,
    CL_INVALID_PROPERTY = -64,
    CL_PLATFORM_NOT_FOUND_KHR = -1001,
}

impl Status {
    /// Returns `Ok` on success, otherwise a [`DriverError`] naming the operation.
    pub fn check(self, operation: &'static str) -> Result<(), DriverError> {
        if self == Self::CL_SUCCESS {
            Ok(())
        } else {
            Err(DriverError { operation, status: self })
        }
    }

    /// Whether this is `CL_SUCCESS`
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }
}

impl From<cl_int> for Status {
    fn from(status: cl_int) -> Self {
        Self(status)
    }
}

impl Debug for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => f.write_fmt(format_args!("UNKNOWN({})", self.0)),
        }
    }
}

impl Display for Status {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_fmt(format_args!("{self:?} ({})", self.0))
    }
}

#[test]
fn known_and_unknown_codes() {
    assert_eq!(Status(-30), Status::CL_INVALID_VALUE);
    assert_eq!(Status::CL_INVALID_VALUE.name(), Some("CL_INVALID_VALUE"));
    assert_eq!(format!("{}", Status::CL_INVALID_KERNEL_ARGS), "CL_INVALID_KERNEL_ARGS (-52)");
    assert_eq!(format!("{:?}", Status(-9999)), "UNKNOWN(-9999)");
    assert!(Status::CL_SUCCESS.check("noop").is_ok());
    let err = Status::CL_OUT_OF_RESOURCES.check("enqueue kernel").unwrap_err();
    assert_eq!(err.status, Status::CL_OUT_OF_RESOURCES);
    assert_eq!(err.operation, "enqueue kernel");
}
