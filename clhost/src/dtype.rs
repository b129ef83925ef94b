use core::fmt::{Display, Formatter};

/// Element type of a device buffer
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DType {
    /// 32 bit float
    F32,
    /// 64 bit float
    F64,
    /// 32 bit signed integer
    I32,
    /// 64 bit signed integer
    I64,
    /// 32 bit unsigned integer
    U32,
    /// 64 bit unsigned integer
    U64,
}

impl DType {
    /// Size of one element in bytes
    #[must_use]
    pub const fn byte_size(self) -> usize {
        match self {
            Self::F32 | Self::I32 | Self::U32 => 4,
            Self::F64 | Self::I64 | Self::U64 => 8,
        }
    }

    /// Name of this type in OpenCL C
    #[must_use]
    pub const fn ocl(self) -> &'static str {
        match self {
            Self::F32 => "float",
            Self::F64 => "double",
            Self::I32 => "int",
            Self::I64 => "long",
            Self::U32 => "uint",
            Self::U64 => "ulong",
        }
    }

    pub(crate) fn from_ocl(name: &str) -> Option<Self> {
        Some(match name {
            "float" => Self::F32,
            "double" => Self::F64,
            "int" | "signed int" => Self::I32,
            "long" | "signed long" => Self::I64,
            "uint" | "unsigned int" | "unsigned" => Self::U32,
            "ulong" | "unsigned long" | "size_t" => Self::U64,
            _ => return None,
        })
    }
}

impl Display for DType {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.ocl())
    }
}

mod sealed {
    pub trait Sealed {}
}

/// Plain numeric element that can live in a device buffer.
///
/// Sealed, every implementor is a primitive without padding or invalid bit
/// patterns, so buffers can be viewed as bytes.
pub trait Scalar: sealed::Sealed + Copy + Default + PartialEq + core::fmt::Debug + Send + Sync + 'static {
    /// Matching [`DType`]
    const DTYPE: DType;

    /// Reads a value from native endian bytes, `None` if `bytes` has the wrong length
    fn from_ne_slice(bytes: &[u8]) -> Option<Self>;

    /// Writes this value as native endian bytes, returns false if `dst` has the wrong length
    fn write_ne_slice(self, dst: &mut [u8]) -> bool;
}

macro_rules! impl_scalar {
    ($($t:ty => $dtype:ident),*) => {
        $(
            impl sealed::Sealed for $t {}

            impl Scalar for $t {
                const DTYPE: DType = DType::$dtype;

                fn from_ne_slice(bytes: &[u8]) -> Option<Self> {
                    Some(<$t>::from_ne_bytes(bytes.try_into().ok()?))
                }

                fn write_ne_slice(self, dst: &mut [u8]) -> bool {
                    if dst.len() != core::mem::size_of::<$t>() {
                        return false;
                    }
                    dst.copy_from_slice(&self.to_ne_bytes());
                    true
                }
            }
        )*
    };
}

impl_scalar!(f32 => F32, f64 => F64, i32 => I32, i64 => I64, u32 => U32, u64 => U64);

pub(crate) fn as_bytes<T: Scalar>(data: &[T]) -> &[u8] {
    // Scalar is sealed to primitives without padding
    unsafe { core::slice::from_raw_parts(data.as_ptr().cast(), core::mem::size_of_val(data)) }
}

#[test]
fn dtype_sizes_match_scalars() {
    assert_eq!(DType::F32.byte_size(), core::mem::size_of::<f32>());
    assert_eq!(DType::U64.byte_size(), core::mem::size_of::<u64>());
    assert_eq!(DType::from_ocl("unsigned int"), Some(DType::U32));
    assert_eq!(DType::from_ocl("float4"), None);
    assert_eq!(as_bytes(&[1u32, 2]).len(), 8);
    let mut buf = [0u8; 8];
    assert!(2.5f64.write_ne_slice(&mut buf));
    assert_eq!(f64::from_ne_slice(&buf), Some(2.5));
    assert_eq!(f32::from_ne_slice(&buf), None);
}
