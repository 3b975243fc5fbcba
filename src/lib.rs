//! Accelerator vs host matrix operations: addition and multiplication labs

pub mod bench;
pub mod config;
pub mod device;
pub mod error;
pub mod matrix;
#[cfg(feature = "opencl")]
pub mod opencl;
pub mod utils;

// Реэкспортируем макросы на уровень крейта
#[cfg(feature = "opencl")]
#[macro_use]
mod macros {
    /// Макрос для обработки ошибок OpenCL (коды возврата)
    ///
    /// `cl_check!(Transfer, clFinish(queue))` даёт `Result<(), DeviceError>`
    /// с вариантом ошибки `Transfer`.
    #[macro_export]
    macro_rules! cl_check {
        ($kind:ident, $func:ident($($arg:expr),* $(,)?)) => {{
            let code = unsafe { $func($($arg),*) };
            if code != $crate::opencl::types::CL_SUCCESS {
                Err($crate::error::DeviceError::$kind(format!(
                    concat!(stringify!($func), " returned OpenCL error code {}"),
                    code
                )))
            } else {
                Ok(())
            }
        }};
    }

    /// Макрос для создания объектов OpenCL
    ///
    /// Дописывает последний аргумент `errcode_ret` и проверяет результат.
    #[macro_export]
    macro_rules! cl_create {
        ($kind:ident, $func:ident($($arg:expr),* $(,)?)) => {{
            let mut code: $crate::opencl::types::cl_int = 0;
            let obj = unsafe { $func($($arg,)* &mut code) };
            if obj.is_null() || code != $crate::opencl::types::CL_SUCCESS {
                Err($crate::error::DeviceError::$kind(format!(
                    concat!("Failed to create OpenCL object: ", stringify!($func), " (code {})"),
                    code
                )))
            } else {
                Ok(obj)
            }
        }};
    }
}

// Реэкспорт основных типов для удобства
pub use config::{Backend, BenchConfig};
pub use device::{Accelerator, DeviceBuffer, DeviceInfo, Dim2, HostAccelerator, LaunchConfig};
pub use error::{DeviceError, Result, ShapeError};
pub use matrix::Matrix;
