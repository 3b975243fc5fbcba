//! Реализация ускорителя поверх OpenCL

use super::bindings::*;
use super::types::*;
use crate::device::{Accelerator, DeviceInfo, DevicePtr, Kernel, LaunchConfig};
use crate::error::{DeviceError, Result};
use crate::matrix::{MATRIX_ADD_KERNEL, MATRIX_MULTIPLY_KERNEL};
use crate::{cl_check, cl_create};
use std::ffi::{c_void, CString};
use std::ptr;
use std::sync::{mpsc, Mutex};
use std::thread;
use std::time::Duration;

/// GPU устройство OpenCL с собранной программой матричных ядер
pub struct OpenClAccelerator {
    name: String,
    device: cl_device_id,
    context: cl_context,
    queue: cl_command_queue,
    program: cl_program,
    matmul: cl_kernel,
    matadd: cl_kernel,
    last_error: Mutex<Option<DeviceError>>,
    // clSetKernelArg + clEnqueueNDRangeKernel должны идти парой
    launch_lock: Mutex<()>,
}

// Объекты OpenCL потокобезопасны, кроме cl_kernel, который защищён launch_lock
unsafe impl Send for OpenClAccelerator {}
unsafe impl Sync for OpenClAccelerator {}

impl OpenClAccelerator {
    /// Выбирает GPU с номером `ordinal` на первой платформе и собирает ядра
    pub fn select(ordinal: usize) -> Result<Self> {
        let mut platform: cl_platform_id = ptr::null_mut();
        let mut num_platforms = 0;
        cl_check!(Query, clGetPlatformIDs(1, &mut platform, &mut num_platforms))?;
        if num_platforms == 0 {
            return Err(DeviceError::Query("no OpenCL platform found".to_string()));
        }

        let mut num_devices = 0;
        cl_check!(Query, clGetDeviceIDs(platform, CL_DEVICE_TYPE_GPU, 0, ptr::null_mut(), &mut num_devices))?;
        if ordinal >= num_devices as usize {
            return Err(DeviceError::Query(format!(
                "GPU #{} requested, {} available",
                ordinal, num_devices
            )));
        }
        let mut device_ids = vec![ptr::null_mut(); num_devices as usize];
        cl_check!(Query, clGetDeviceIDs(
            platform,
            CL_DEVICE_TYPE_GPU,
            num_devices,
            device_ids.as_mut_ptr(),
            ptr::null_mut()
        ))?;
        let device = device_ids[ordinal];

        let mut accel = Self {
            name: device_name(device).unwrap_or_else(|_| format!("OpenCL GPU #{}", ordinal)),
            device,
            context: ptr::null_mut(),
            queue: ptr::null_mut(),
            program: ptr::null_mut(),
            matmul: ptr::null_mut(),
            matadd: ptr::null_mut(),
            last_error: Mutex::new(None),
            launch_lock: Mutex::new(()),
        };

        // При ошибке Drop освободит уже созданные объекты
        accel.context = cl_create!(Query, clCreateContext(ptr::null(), 1, &device, None, ptr::null_mut()))?;
        accel.queue = cl_create!(Query, clCreateCommandQueue(accel.context, device, 0))?;
        accel.program = build_program(accel.context, device)?;
        accel.matmul = create_kernel(accel.program, "matrix_multiply")?;
        accel.matadd = create_kernel(accel.program, "matrix_add")?;
        Ok(accel)
    }

    fn fail<T>(&self, err: DeviceError) -> Result<T> {
        *self.last_error.lock().unwrap_or_else(|p| p.into_inner()) = Some(err.clone());
        Err(err)
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        result.or_else(|err| self.fail(err))
    }
}

impl Drop for OpenClAccelerator {
    fn drop(&mut self) {
        unsafe {
            if !self.matadd.is_null() {
                clReleaseKernel(self.matadd);
            }
            if !self.matmul.is_null() {
                clReleaseKernel(self.matmul);
            }
            if !self.program.is_null() {
                clReleaseProgram(self.program);
            }
            if !self.queue.is_null() {
                clReleaseCommandQueue(self.queue);
            }
            if !self.context.is_null() {
                clReleaseContext(self.context);
            }
        }
    }
}

fn device_name(device: cl_device_id) -> Result<String> {
    let mut size = 0usize;
    cl_check!(Query, clGetDeviceInfo(device, CL_DEVICE_NAME, 0, ptr::null_mut(), &mut size))?;
    let mut raw = vec![0u8; size];
    cl_check!(Query, clGetDeviceInfo(
        device,
        CL_DEVICE_NAME,
        size,
        raw.as_mut_ptr() as *mut c_void,
        ptr::null_mut()
    ))?;
    Ok(String::from_utf8_lossy(&raw).trim_end_matches('\0').to_string())
}

fn build_program(context: cl_context, device: cl_device_id) -> Result<cl_program> {
    let sources = [MATRIX_MULTIPLY_KERNEL, MATRIX_ADD_KERNEL];
    let pointers: Vec<*const i8> = sources.iter().map(|s| s.as_ptr() as *const i8).collect();
    let lengths: Vec<usize> = sources.iter().map(|s| s.len()).collect();
    let program = cl_create!(Launch, clCreateProgramWithSource(
        context,
        sources.len() as cl_uint,
        pointers.as_ptr(),
        lengths.as_ptr()
    ))?;

    let status = unsafe { clBuildProgram(program, 1, &device, ptr::null(), None, ptr::null_mut()) };
    if status != CL_SUCCESS {
        // Получение лога ошибок компиляции
        let mut log_size = 0usize;
        let mut build_log = Vec::new();
        unsafe {
            clGetProgramBuildInfo(program, device, CL_PROGRAM_BUILD_LOG, 0, ptr::null_mut(), &mut log_size);
            build_log.resize(log_size, 0u8);
            clGetProgramBuildInfo(
                program,
                device,
                CL_PROGRAM_BUILD_LOG,
                log_size,
                build_log.as_mut_ptr() as *mut c_void,
                ptr::null_mut(),
            );
            clReleaseProgram(program);
        }
        return Err(DeviceError::Launch(format!(
            "clBuildProgram returned {}: {}",
            status,
            String::from_utf8_lossy(&build_log).trim_end_matches('\0')
        )));
    }
    Ok(program)
}

fn create_kernel(program: cl_program, name: &str) -> Result<cl_kernel> {
    let name = CString::new(name).map_err(|e| DeviceError::Launch(e.to_string()))?;
    cl_create!(Launch, clCreateKernel(program, name.as_ptr()))
}

fn mem(ptr: DevicePtr) -> cl_mem {
    ptr.0 as usize as cl_mem
}

fn set_arg<T>(kernel: cl_kernel, index: cl_uint, value: &T) -> Result<()> {
    cl_check!(Launch, clSetKernelArg(
        kernel,
        index,
        std::mem::size_of::<T>(),
        value as *const T as *const c_void
    ))
}

impl Accelerator for OpenClAccelerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn query_info(&self) -> Result<DeviceInfo> {
        let query = || -> Result<DeviceInfo> {
            let mut max_work_group_size = 0usize;
            cl_check!(Query, clGetDeviceInfo(
                self.device,
                CL_DEVICE_MAX_WORK_GROUP_SIZE,
                std::mem::size_of::<usize>(),
                &mut max_work_group_size as *mut _ as *mut c_void,
                ptr::null_mut()
            ))?;
            let mut item_sizes = [0usize; 3];
            cl_check!(Query, clGetDeviceInfo(
                self.device,
                CL_DEVICE_MAX_WORK_ITEM_SIZES,
                std::mem::size_of_val(&item_sizes),
                item_sizes.as_mut_ptr() as *mut c_void,
                ptr::null_mut()
            ))?;
            let mut global_mem: cl_ulong = 0;
            cl_check!(Query, clGetDeviceInfo(
                self.device,
                CL_DEVICE_GLOBAL_MEM_SIZE,
                std::mem::size_of::<cl_ulong>(),
                &mut global_mem as *mut _ as *mut c_void,
                ptr::null_mut()
            ))?;
            Ok(DeviceInfo {
                name: self.name.clone(),
                max_work_group_size,
                max_block_dims: [item_sizes[0], item_sizes[1]],
                // NDRange ограничен только размером size_t
                max_grid_dims: [usize::MAX, usize::MAX],
                global_mem_bytes: global_mem,
            })
        };
        let result = query();
        self.track(result)
    }

    fn allocate(&self, len: usize) -> Result<DevicePtr> {
        let bytes = len * std::mem::size_of::<f32>();
        let result = cl_create!(Allocation, clCreateBuffer(
            self.context,
            CL_MEM_READ_WRITE,
            bytes,
            ptr::null_mut()
        ));
        let buffer = self.track(result)?;
        Ok(DevicePtr(buffer as usize as u64))
    }

    fn release(&self, ptr: DevicePtr) {
        let status = unsafe { clReleaseMemObject(mem(ptr)) };
        if status != CL_SUCCESS {
            log::warn!("{}: clReleaseMemObject returned {}", self.name, status);
        }
    }

    fn copy_to_device(&self, dst: DevicePtr, src: &[f32]) -> Result<()> {
        let result = cl_check!(Transfer, clEnqueueWriteBuffer(
            self.queue,
            mem(dst),
            CL_TRUE,
            0,
            std::mem::size_of_val(src),
            src.as_ptr() as *const c_void,
            0,
            ptr::null(),
            ptr::null_mut()
        ));
        self.track(result)
    }

    fn copy_to_host(&self, src: DevicePtr, dst: &mut [f32]) -> Result<()> {
        let result = cl_check!(Transfer, clEnqueueReadBuffer(
            self.queue,
            mem(src),
            CL_TRUE,
            0,
            std::mem::size_of_val(dst),
            dst.as_mut_ptr() as *mut c_void,
            0,
            ptr::null(),
            ptr::null_mut()
        ));
        self.track(result)
    }

    fn launch(&self, kernel: &Kernel, config: &LaunchConfig) -> Result<()> {
        let _guard = self.launch_lock.lock().unwrap_or_else(|p| p.into_inner());
        let result = (|| -> Result<()> {
            let cl_kernel = match *kernel {
                Kernel::MatMul { a, b, c, size } => {
                    set_arg(self.matmul, 0, &mem(a))?;
                    set_arg(self.matmul, 1, &mem(b))?;
                    set_arg(self.matmul, 2, &mem(c))?;
                    set_arg(self.matmul, 3, &(size as cl_int))?;
                    self.matmul
                }
                Kernel::MatAdd { a, b, c, rows, cols } => {
                    set_arg(self.matadd, 0, &mem(a))?;
                    set_arg(self.matadd, 1, &mem(b))?;
                    set_arg(self.matadd, 2, &mem(c))?;
                    set_arg(self.matadd, 3, &(rows as cl_int))?;
                    set_arg(self.matadd, 4, &(cols as cl_int))?;
                    self.matadd
                }
            };
            let covered = config.covered()?;
            let global_size = [covered.x, covered.y];
            let local_size = [config.block.x, config.block.y];
            cl_check!(Launch, clEnqueueNDRangeKernel(
                self.queue,
                cl_kernel,
                2,
                ptr::null(),
                global_size.as_ptr(),
                local_size.as_ptr(),
                0,
                ptr::null(),
                ptr::null_mut()
            ))
        })();
        self.track(result)
    }

    fn synchronize(&self, timeout: Option<Duration>) -> Result<()> {
        // clFinish нельзя прервать, поэтому ждём его в отдельном потоке
        let queue = self.queue as usize;
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("opencl-finish".to_string())
            .spawn(move || {
                let status = unsafe { clFinish(queue as cl_command_queue) };
                let _ = tx.send(status);
            });
        if let Err(e) = spawned {
            return self.fail(DeviceError::Execution(format!("cannot wait for queue: {}", e)));
        }
        let status = match timeout {
            Some(limit) => rx.recv_timeout(limit).map_err(|_| {
                DeviceError::Execution(format!("kernel did not finish within {:?}", limit))
            }),
            None => rx
                .recv()
                .map_err(|_| DeviceError::Execution("clFinish thread exited".to_string())),
        };
        let result = status.and_then(|status| {
            if status == CL_SUCCESS {
                Ok(())
            } else {
                Err(DeviceError::Execution(format!("clFinish returned OpenCL error code {}", status)))
            }
        });
        self.track(result)
    }

    fn last_error(&self) -> Option<DeviceError> {
        self.last_error.lock().unwrap_or_else(|p| p.into_inner()).take()
    }
}
