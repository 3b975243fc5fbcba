//! Буфер в памяти устройства с автоматическим освобождением

use super::{Accelerator, DevicePtr};
use crate::error::{DeviceError, Result};

/// Буфер устройства, освобождаемый при выходе из области видимости
///
/// Любой путь выхода (успех, `?`, паника) освобождает память ровно один раз.
pub struct DeviceBuffer<'a> {
    device: &'a dyn Accelerator,
    ptr: DevicePtr,
    len: usize,
}

impl<'a> DeviceBuffer<'a> {
    /// Выделяет буфер на `len` элементов
    pub fn new(device: &'a dyn Accelerator, len: usize) -> Result<Self> {
        let ptr = device.allocate(len)?;
        log::debug!("{}: allocated {:?} ({} floats)", device.name(), ptr, len);
        Ok(Self { device, ptr, len })
    }

    /// Выделяет буфер и копирует в него данные хоста
    pub fn from_host(device: &'a dyn Accelerator, data: &[f32]) -> Result<Self> {
        let buffer = Self::new(device, data.len())?;
        buffer.upload(data)?;
        Ok(buffer)
    }

    pub fn upload(&self, data: &[f32]) -> Result<()> {
        if data.len() != self.len {
            return Err(DeviceError::Transfer(format!(
                "host slice has {} floats, device buffer {}",
                data.len(),
                self.len
            )));
        }
        self.device.copy_to_device(self.ptr, data)
    }

    pub fn download(&self, out: &mut [f32]) -> Result<()> {
        if out.len() != self.len {
            return Err(DeviceError::Transfer(format!(
                "host slice has {} floats, device buffer {}",
                out.len(),
                self.len
            )));
        }
        self.device.copy_to_host(self.ptr, out)
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Drop for DeviceBuffer<'_> {
    fn drop(&mut self) {
        log::debug!("{}: releasing {:?}", self.device.name(), self.ptr);
        self.device.release(self.ptr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostAccelerator;

    #[test]
    fn test_buffer_released_on_drop() {
        let device = HostAccelerator::select(0).unwrap();
        {
            let _a = DeviceBuffer::new(&device, 16).unwrap();
            let _b = DeviceBuffer::new(&device, 16).unwrap();
            assert_eq!(device.live_allocations(), 2);
        }
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_round_trip_through_device() {
        let device = HostAccelerator::select(0).unwrap();
        let buffer = DeviceBuffer::from_host(&device, &[1.0, 2.0, 3.0]).unwrap();
        let mut out = [0.0; 3];
        buffer.download(&mut out).unwrap();
        assert_eq!(out, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_length_mismatch_is_transfer_error() {
        let device = HostAccelerator::select(0).unwrap();
        let buffer = DeviceBuffer::new(&device, 4).unwrap();
        assert!(matches!(buffer.upload(&[1.0; 3]), Err(DeviceError::Transfer(_))));
        let mut out = [0.0; 5];
        assert!(matches!(buffer.download(&mut out), Err(DeviceError::Transfer(_))));
    }

    #[test]
    fn test_buffer_released_when_upload_fails() {
        let device = HostAccelerator::with_faults(crate::device::FaultInjection {
            fail_transfer: true,
            ..Default::default()
        });
        assert!(DeviceBuffer::from_host(&device, &[1.0; 8]).is_err());
        assert_eq!(device.live_allocations(), 0);
    }
}
