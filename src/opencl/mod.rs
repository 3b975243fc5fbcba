//! Модуль для работы с OpenCL
//! 
//! Содержит низкоуровневые привязки и реализацию [`crate::device::Accelerator`]
//! поверх них

pub mod bindings;
pub mod types;
mod device;

pub use device::OpenClAccelerator;
