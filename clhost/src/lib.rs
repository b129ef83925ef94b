//! # clhost
//!
//! Host side session layer over `OpenCL`. It discovers platforms and devices,
//! creates a context with one in order command queue, manages read only
//! device buffers, compiles and binds kernels, launches them and reads
//! results back.
//!
//! Every driver object is owned by a Rust value and released when it is
//! dropped. Every driver status is checked where the call is made and
//! reported as a typed [`ClError`].
//!
//! ```no_run
//! use clhost::Session;
//!
//! let session = Session::new()?;
//! let x = session.create_buffer(&[1f32, 2., 3., 4.])?;
//! let y = session.create_buffer(&[0f32; 4])?;
//! let mut kernel = session.compile(
//!     "__kernel void SAXPY(__global float* x, __global float* y, float a) {
//!         const int i = get_global_id(0);
//!         y[i] += a * x[i];
//!     }",
//!     "SAXPY",
//! )?;
//! kernel.set_arg(0, &x)?;
//! kernel.set_arg(1, &y)?;
//! kernel.set_arg(2, 2f32)?;
//! let event = kernel.enqueue(None, &[4], None, &[])?;
//! let mut out = [0f32; 4];
//! y.read(&mut out, &[&event])?;
//! assert_eq!(out, [2., 4., 6., 8.]);
//! # Ok::<(), clhost::ClError>(())
//! ```
//!
//! Without an accelerator, [`HostDriver`] runs kernels registered as Rust
//! closures through the same API.
//!
#![forbid(rustdoc::broken_intra_doc_links)]
#![forbid(rustdoc::private_intra_doc_links)]
#![forbid(missing_docs)]
#![forbid(rustdoc::missing_crate_level_docs)]
#![forbid(rustdoc::private_doc_tests)]
#![forbid(rustdoc::invalid_codeblock_attributes)]
#![forbid(rustdoc::invalid_html_tags)]
#![forbid(rustdoc::invalid_rust_codeblocks)]
#![forbid(rustdoc::bare_urls)]
#![forbid(rustdoc::unescaped_backticks)]
#![forbid(rustdoc::redundant_explicit_links)]

mod buffer;
mod config;
mod discovery;
mod driver;
mod dtype;
mod error;
mod event;
mod kernel;
mod runtime;
mod scheduler;
mod session;
mod status;
mod transfer;

pub use buffer::Buffer;
pub use config::SessionConfig;
pub use discovery::{Device, Platform};
pub use driver::host::{HostCall, HostDriver, WorkItem};
pub use dtype::{DType, Scalar};
pub use error::{ClError, DriverError};
pub use event::{wait_for_events, Event};
pub use kernel::{BufferArg, Kernel, KernelArg};
pub use runtime::Runtime;
pub use session::Session;
pub use status::Status;
pub use transfer::PendingRead;
