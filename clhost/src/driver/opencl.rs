//! `OpenCL` driver, resolved from the system runtime at load time

#![allow(non_camel_case_types)]
#![allow(non_snake_case)]

use super::{Driver, Handle};
use crate::{config::SessionConfig, status::Status};
use core::ffi::{c_char, c_void, CStr};
use libloading::Library;
use std::ptr;
use tracing::{debug, warn};

type cl_uint = u32;
type cl_bitfield = u64;

const CL_PLATFORM_NAME: cl_uint = 0x0902; // 2306
const CL_DEVICE_NAME: cl_uint = 0x102B; // 4139
const CL_DEVICE_TYPE_ALL: cl_bitfield = 0xFFFF_FFFF;
const CL_CONTEXT_PLATFORM: isize = 0x1084;
const CL_MEM_READ_ONLY: cl_bitfield = 1 << 2;
const CL_MEM_COPY_HOST_PTR: cl_bitfield = 1 << 5;
const CL_PROGRAM_BUILD_LOG: cl_uint = 0x1183; // 4483
const CL_BLOCKING: cl_uint = 1;
const CL_NON_BLOCKING: cl_uint = 0;

const OPENCL_PATHS: [&str; 12] = [
    "libOpenCL.so.1",
    "libOpenCL.so",
    "/lib/libOpenCL.so",
    "/lib64/libOpenCL.so",
    "/lib/x86_64-linux-gnu/libOpenCL.so",
    "/lib64/x86_64-linux-gnu/libOpenCL.so",
    "/usr/lib/libOpenCL.so",
    "/usr/lib64/libOpenCL.so",
    "/usr/lib/x86_64-linux-gnu/libOpenCL.so",
    "/usr/lib64/x86_64-linux-gnu/libOpenCL.so",
    "/System/Library/Frameworks/OpenCL.framework/OpenCL",
    "OpenCL.dll",
];

type InfoFn = unsafe extern "C" fn(*mut c_void, cl_uint, usize, *mut c_void, *mut usize) -> Status;
type ReleaseFn = unsafe extern "C" fn(*mut c_void) -> Status;

pub(crate) struct OpenCL {
    // Keeps the runtime mapped for as long as the function pointers live
    #[allow(unused)]
    library: Library,
    clGetPlatformIDs: unsafe extern "C" fn(cl_uint, *mut *mut c_void, *mut cl_uint) -> Status,
    clGetPlatformInfo: InfoFn,
    clGetDeviceIDs: unsafe extern "C" fn(
        *mut c_void,
        cl_bitfield,
        cl_uint,
        *mut *mut c_void,
        *mut cl_uint,
    ) -> Status,
    clGetDeviceInfo: InfoFn,
    clCreateContext: unsafe extern "C" fn(
        *const isize,
        cl_uint,
        *const *mut c_void,
        Option<unsafe extern "C" fn(*const c_char, *const c_void, usize, *mut c_void)>,
        *mut c_void,
        *mut Status,
    ) -> *mut c_void,
    clReleaseContext: ReleaseFn,
    clCreateCommandQueue:
        unsafe extern "C" fn(*mut c_void, *mut c_void, cl_bitfield, *mut Status) -> *mut c_void,
    clFinish: ReleaseFn,
    clReleaseCommandQueue: ReleaseFn,
    clCreateBuffer: unsafe extern "C" fn(
        *mut c_void,
        cl_bitfield,
        usize,
        *mut c_void,
        *mut Status,
    ) -> *mut c_void,
    clReleaseMemObject: ReleaseFn,
    clCreateProgramWithSource: unsafe extern "C" fn(
        *mut c_void,
        cl_uint,
        *const *const c_char,
        *const usize,
        *mut Status,
    ) -> *mut c_void,
    clBuildProgram: unsafe extern "C" fn(
        *mut c_void,
        cl_uint,
        *const *mut c_void,
        *const c_char,
        Option<unsafe extern "C" fn(*mut c_void, *mut c_void)>,
        *mut c_void,
    ) -> Status,
    clGetProgramBuildInfo: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        usize,
        *mut c_void,
        *mut usize,
    ) -> Status,
    clReleaseProgram: ReleaseFn,
    clCreateKernel: unsafe extern "C" fn(*mut c_void, *const c_char, *mut Status) -> *mut c_void,
    clSetKernelArg: unsafe extern "C" fn(*mut c_void, cl_uint, usize, *const c_void) -> Status,
    clReleaseKernel: ReleaseFn,
    clEnqueueNDRangeKernel: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        *const usize,
        *const usize,
        *const usize,
        cl_uint,
        *const *mut c_void,
        *mut *mut c_void,
    ) -> Status,
    clEnqueueReadBuffer: unsafe extern "C" fn(
        *mut c_void,
        *mut c_void,
        cl_uint,
        usize,
        usize,
        *mut c_void,
        cl_uint,
        *const *mut c_void,
        *mut *mut c_void,
    ) -> Status,
    clWaitForEvents: unsafe extern "C" fn(cl_uint, *const *mut c_void) -> Status,
    clReleaseEvent: ReleaseFn,
}

impl core::fmt::Debug for OpenCL {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OpenCL").finish_non_exhaustive()
    }
}

unsafe fn symbol<T: Copy>(library: &Library, name: &'static [u8]) -> Result<T, Status> {
    match library.get::<T>(name) {
        Ok(symbol) => Ok(*symbol),
        Err(e) => {
            warn!("OpenCL runtime does not export {}: {e}", String::from_utf8_lossy(name));
            Err(Status::CL_PLATFORM_NOT_FOUND_KHR)
        }
    }
}

impl OpenCL {
    /// Opens the first `OpenCL` runtime found, configured paths are tried first.
    pub(crate) fn load(config: &SessionConfig) -> Result<Self, Status> {
        let configured = config.library_paths.iter().flatten().map(String::as_str);
        let library = configured.chain(OPENCL_PATHS).find_map(|path| {
            // Loading runs the library initializers, OpenCL ICD loaders are fine with that
            match unsafe { Library::new(path) } {
                Ok(library) => {
                    debug!("Loaded OpenCL runtime from {path}");
                    Some(library)
                }
                Err(_) => None,
            }
        });
        let Some(library) = library else {
            warn!("OpenCL runtime not found.");
            return Err(Status::CL_PLATFORM_NOT_FOUND_KHR);
        };
        unsafe {
            Ok(Self {
                clGetPlatformIDs: symbol(&library, b"clGetPlatformIDs\0")?,
                clGetPlatformInfo: symbol(&library, b"clGetPlatformInfo\0")?,
                clGetDeviceIDs: symbol(&library, b"clGetDeviceIDs\0")?,
                clGetDeviceInfo: symbol(&library, b"clGetDeviceInfo\0")?,
                clCreateContext: symbol(&library, b"clCreateContext\0")?,
                clReleaseContext: symbol(&library, b"clReleaseContext\0")?,
                clCreateCommandQueue: symbol(&library, b"clCreateCommandQueue\0")?,
                clFinish: symbol(&library, b"clFinish\0")?,
                clReleaseCommandQueue: symbol(&library, b"clReleaseCommandQueue\0")?,
                clCreateBuffer: symbol(&library, b"clCreateBuffer\0")?,
                clReleaseMemObject: symbol(&library, b"clReleaseMemObject\0")?,
                clCreateProgramWithSource: symbol(&library, b"clCreateProgramWithSource\0")?,
                clBuildProgram: symbol(&library, b"clBuildProgram\0")?,
                clGetProgramBuildInfo: symbol(&library, b"clGetProgramBuildInfo\0")?,
                clReleaseProgram: symbol(&library, b"clReleaseProgram\0")?,
                clCreateKernel: symbol(&library, b"clCreateKernel\0")?,
                clSetKernelArg: symbol(&library, b"clSetKernelArg\0")?,
                clReleaseKernel: symbol(&library, b"clReleaseKernel\0")?,
                clEnqueueNDRangeKernel: symbol(&library, b"clEnqueueNDRangeKernel\0")?,
                clEnqueueReadBuffer: symbol(&library, b"clEnqueueReadBuffer\0")?,
                clWaitForEvents: symbol(&library, b"clWaitForEvents\0")?,
                clReleaseEvent: symbol(&library, b"clReleaseEvent\0")?,
                library,
            })
        }
    }

    fn get_info(&self, info: InfoFn, object: Handle, param_name: cl_uint) -> Result<Vec<u8>, Status> {
        let mut size: usize = 0;
        let status = unsafe { info(object.as_raw(), param_name, 0, ptr::null_mut(), &mut size) };
        status.check("query info").map_err(|e| e.status)?;
        if size == 0 {
            return Ok(Vec::new());
        }
        let mut data: Vec<u8> = vec![0; size];
        let status = unsafe {
            info(object.as_raw(), param_name, size, data.as_mut_ptr().cast(), ptr::null_mut())
        };
        status.check("query info").map_err(|e| e.status)?;
        Ok(data)
    }
}

fn info_string(mut data: Vec<u8>) -> String {
    while data.last() == Some(&0) {
        data.pop();
    }
    String::from_utf8_lossy(&data).into_owned()
}

fn wait_list(wait: &[Handle]) -> (cl_uint, *const *mut c_void) {
    if wait.is_empty() {
        (0, ptr::null())
    } else {
        (wait.len() as cl_uint, wait.as_ptr().cast())
    }
}

fn handle_or_status(handle: *mut c_void, status: Status) -> Result<Handle, Status> {
    if status.is_success() {
        Ok(Handle::from_raw(handle))
    } else {
        Err(status)
    }
}

impl Driver for OpenCL {
    fn platform_count(&self) -> Result<u32, Status> {
        let mut count: cl_uint = 0;
        let status = unsafe { (self.clGetPlatformIDs)(0, ptr::null_mut(), &mut count) };
        if status.is_success() {
            Ok(count)
        } else {
            Err(status)
        }
    }

    fn platform_ids(&self, count: u32) -> Result<Vec<Handle>, Status> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut ids: Vec<*mut c_void> = vec![ptr::null_mut(); count as usize];
        let mut found: cl_uint = 0;
        let status = unsafe { (self.clGetPlatformIDs)(count, ids.as_mut_ptr(), &mut found) };
        if !status.is_success() {
            return Err(status);
        }
        ids.truncate(found.min(count) as usize);
        Ok(ids.into_iter().map(Handle::from_raw).collect())
    }

    fn platform_name(&self, platform: Handle) -> Result<String, Status> {
        self.get_info(self.clGetPlatformInfo, platform, CL_PLATFORM_NAME).map(info_string)
    }

    fn device_count(&self, platform: Handle) -> Result<u32, Status> {
        let mut count: cl_uint = 0;
        let status = unsafe {
            (self.clGetDeviceIDs)(
                platform.as_raw(),
                CL_DEVICE_TYPE_ALL,
                0,
                ptr::null_mut(),
                &mut count,
            )
        };
        if status.is_success() {
            Ok(count)
        } else {
            Err(status)
        }
    }

    fn device_ids(&self, platform: Handle, count: u32) -> Result<Vec<Handle>, Status> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let mut ids: Vec<*mut c_void> = vec![ptr::null_mut(); count as usize];
        let mut found: cl_uint = 0;
        let status = unsafe {
            (self.clGetDeviceIDs)(
                platform.as_raw(),
                CL_DEVICE_TYPE_ALL,
                count,
                ids.as_mut_ptr(),
                &mut found,
            )
        };
        if !status.is_success() {
            return Err(status);
        }
        ids.truncate(found.min(count) as usize);
        Ok(ids.into_iter().map(Handle::from_raw).collect())
    }

    fn device_name(&self, device: Handle) -> Result<String, Status> {
        self.get_info(self.clGetDeviceInfo, device, CL_DEVICE_NAME).map(info_string)
    }

    fn create_context(&self, platform: Handle, devices: &[Handle]) -> Result<Handle, Status> {
        let properties = [CL_CONTEXT_PLATFORM, platform.id() as isize, 0];
        let mut status = Status::CL_SUCCESS;
        let context = unsafe {
            (self.clCreateContext)(
                properties.as_ptr(),
                devices.len() as cl_uint,
                devices.as_ptr().cast(),
                None,
                ptr::null_mut(),
                &mut status,
            )
        };
        handle_or_status(context, status)
    }

    fn release_context(&self, context: Handle) -> Status {
        unsafe { (self.clReleaseContext)(context.as_raw()) }
    }

    fn create_command_queue(&self, context: Handle, device: Handle) -> Result<Handle, Status> {
        let mut status = Status::CL_SUCCESS;
        let queue = unsafe {
            (self.clCreateCommandQueue)(context.as_raw(), device.as_raw(), 0, &mut status)
        };
        handle_or_status(queue, status)
    }

    fn finish(&self, queue: Handle) -> Status {
        unsafe { (self.clFinish)(queue.as_raw()) }
    }

    fn release_command_queue(&self, queue: Handle) -> Status {
        unsafe { (self.clReleaseCommandQueue)(queue.as_raw()) }
    }

    fn create_buffer(&self, context: Handle, data: &[u8]) -> Result<Handle, Status> {
        let mut status = Status::CL_SUCCESS;
        // COPY_HOST_PTR only reads from the host pointer
        let mem = unsafe {
            (self.clCreateBuffer)(
                context.as_raw(),
                CL_MEM_READ_ONLY | CL_MEM_COPY_HOST_PTR,
                data.len(),
                data.as_ptr().cast_mut().cast(),
                &mut status,
            )
        };
        handle_or_status(mem, status)
    }

    fn release_mem_object(&self, mem: Handle) -> Status {
        unsafe { (self.clReleaseMemObject)(mem.as_raw()) }
    }

    fn create_program_with_source(&self, context: Handle, source: &str) -> Result<Handle, Status> {
        let sources: [*const c_char; 1] = [source.as_ptr().cast()];
        let lengths = [source.len()];
        let mut status = Status::CL_SUCCESS;
        let program = unsafe {
            (self.clCreateProgramWithSource)(
                context.as_raw(),
                1,
                sources.as_ptr(),
                lengths.as_ptr(),
                &mut status,
            )
        };
        handle_or_status(program, status)
    }

    fn build_program(&self, program: Handle, devices: &[Handle], options: &CStr) -> Status {
        unsafe {
            (self.clBuildProgram)(
                program.as_raw(),
                devices.len() as cl_uint,
                devices.as_ptr().cast(),
                options.as_ptr(),
                None,
                ptr::null_mut(),
            )
        }
    }

    fn program_build_log(&self, program: Handle, device: Handle) -> Result<String, Status> {
        let mut size: usize = 0;
        let status = unsafe {
            (self.clGetProgramBuildInfo)(
                program.as_raw(),
                device.as_raw(),
                CL_PROGRAM_BUILD_LOG,
                0,
                ptr::null_mut(),
                &mut size,
            )
        };
        if !status.is_success() {
            return Err(status);
        }
        if size == 0 {
            return Ok(String::new());
        }
        let mut data: Vec<u8> = vec![0; size];
        let status = unsafe {
            (self.clGetProgramBuildInfo)(
                program.as_raw(),
                device.as_raw(),
                CL_PROGRAM_BUILD_LOG,
                size,
                data.as_mut_ptr().cast(),
                ptr::null_mut(),
            )
        };
        if !status.is_success() {
            return Err(status);
        }
        Ok(info_string(data))
    }

    fn release_program(&self, program: Handle) -> Status {
        unsafe { (self.clReleaseProgram)(program.as_raw()) }
    }

    fn create_kernel(&self, program: Handle, name: &CStr) -> Result<Handle, Status> {
        let mut status = Status::CL_SUCCESS;
        let kernel = unsafe { (self.clCreateKernel)(program.as_raw(), name.as_ptr(), &mut status) };
        handle_or_status(kernel, status)
    }

    fn set_kernel_arg(&self, kernel: Handle, index: u32, value: &[u8]) -> Status {
        unsafe { (self.clSetKernelArg)(kernel.as_raw(), index, value.len(), value.as_ptr().cast()) }
    }

    fn release_kernel(&self, kernel: Handle) -> Status {
        unsafe { (self.clReleaseKernel)(kernel.as_raw()) }
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
        let (wait_len, wait_ptr) = wait_list(wait);
        let mut event: *mut c_void = ptr::null_mut();
        let status = unsafe {
            (self.clEnqueueNDRangeKernel)(
                queue.as_raw(),
                kernel.as_raw(),
                global.len() as cl_uint,
                offset.map_or(ptr::null(), <[usize]>::as_ptr),
                global.as_ptr(),
                local.map_or(ptr::null(), <[usize]>::as_ptr),
                wait_len,
                wait_ptr,
                &mut event,
            )
        };
        handle_or_status(event, status)
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
        let (wait_len, wait_ptr) = wait_list(wait);
        let mut event: *mut c_void = ptr::null_mut();
        let status = (self.clEnqueueReadBuffer)(
            queue.as_raw(),
            mem.as_raw(),
            if blocking { CL_BLOCKING } else { CL_NON_BLOCKING },
            offset,
            size,
            dst.cast(),
            wait_len,
            wait_ptr,
            &mut event,
        );
        handle_or_status(event, status)
    }

    fn wait_for_events(&self, events: &[Handle]) -> Status {
        let (len, events) = wait_list(events);
        unsafe { (self.clWaitForEvents)(len, events) }
    }

    fn release_event(&self, event: Handle) -> Status {
        unsafe { (self.clReleaseEvent)(event.as_raw()) }
    }
}
