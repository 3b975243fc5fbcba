//! Вычисления на ускорителе
//!
//! Порядок одного вызова: проверка запуска, выделение A, B, C на
//! устройстве, копирование A и B, событие старта, запуск, синхронизация,
//! событие остановки, копирование C обратно. Буферы освобождаются на любом
//! пути выхода при уничтожении [`DeviceBuffer`].

use crate::device::{Accelerator, DeviceBuffer, DeviceInfo, Kernel, LaunchConfig};
use crate::error::{DeviceError, Result};
use crate::matrix::Matrix;
use crate::utils::as_millis_f64;
use std::time::{Duration, Instant};

/// Замер одного запуска
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceleratedTiming {
    /// Только ядро: от события перед запуском до события после синхронизации
    pub kernel_ms: f64,
    /// Вместе с выделением памяти и копированием
    pub total_ms: f64,
}

/// Матричные операции на выбранном устройстве
pub struct AcceleratedOps<'d> {
    device: &'d dyn Accelerator,
    info: DeviceInfo,
    timeout: Option<Duration>,
}

impl<'d> AcceleratedOps<'d> {
    pub fn new(device: &'d dyn Accelerator, info: DeviceInfo, timeout: Option<Duration>) -> Self {
        Self { device, info, timeout }
    }

    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// `c = a * b` для квадратных матриц, один рабочий элемент на элемент `c`
    pub fn multiply(&self, a: &Matrix, b: &Matrix, c: &mut Matrix, launch: &LaunchConfig) -> Result<AcceleratedTiming> {
        let n = match (a.dim(), b.dim(), c.dim()) {
            (Some(n), Some(nb), Some(nc)) if n == nb && n == nc => n,
            _ => {
                return Err(DeviceError::Launch(format!(
                    "multiply needs equal square matrices, got {}x{}, {}x{}, {}x{}",
                    a.rows(),
                    a.cols(),
                    b.rows(),
                    b.cols(),
                    c.rows(),
                    c.cols()
                )))
            }
        };
        launch.validate(n, n, &self.info)?;
        self.run(a, b, c, launch, |da, db, dc| Kernel::matmul(da, db, dc, n))
    }

    /// `c = a + b` поэлементно
    pub fn add(&self, a: &Matrix, b: &Matrix, c: &mut Matrix, launch: &LaunchConfig) -> Result<AcceleratedTiming> {
        let (rows, cols) = (a.rows(), a.cols());
        if (b.rows(), b.cols()) != (rows, cols) || (c.rows(), c.cols()) != (rows, cols) {
            return Err(DeviceError::Launch(format!(
                "add needs matrices of one shape, got {}x{}, {}x{}, {}x{}",
                rows,
                cols,
                b.rows(),
                b.cols(),
                c.rows(),
                c.cols()
            )));
        }
        launch.validate(rows, cols, &self.info)?;
        self.run(a, b, c, launch, |da, db, dc| Kernel::matadd(da, db, dc, rows, cols))
    }

    fn run<F>(&self, a: &Matrix, b: &Matrix, c: &mut Matrix, launch: &LaunchConfig, kernel: F) -> Result<AcceleratedTiming>
    where
        F: FnOnce(&DeviceBuffer<'d>, &DeviceBuffer<'d>, &DeviceBuffer<'d>) -> Kernel,
    {
        if let Some(stale) = self.device.last_error() {
            log::warn!("{}: discarding stale error: {}", self.device.name(), stale);
        }
        let started = Instant::now();

        let d_a = DeviceBuffer::new(self.device, a.len())?;
        let d_b = DeviceBuffer::new(self.device, b.len())?;
        let d_c = DeviceBuffer::new(self.device, c.len())?;
        d_a.upload(a.as_slice())?;
        d_b.upload(b.as_slice())?;

        let kernel = kernel(&d_a, &d_b, &d_c);
        let start = self.device.record_event()?;
        self.device.launch(&kernel, launch)?;
        self.device.synchronize(self.timeout)?;
        let stop = self.device.record_event()?;

        d_c.download(c.as_mut_slice())?;
        let timing = AcceleratedTiming {
            kernel_ms: start.elapsed_ms(&stop),
            total_ms: as_millis_f64(started.elapsed()),
        };
        log::debug!(
            "{}: {} grid {} block {} took {:.3} ms ({:.3} ms with transfers)",
            self.device.name(),
            kernel.name(),
            launch.grid,
            launch.block,
            timing.kernel_ms,
            timing.total_ms
        );
        Ok(timing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceOp, Dim2, FaultInjection, HostAccelerator};
    use crate::matrix::{compare_matrices, expected_product, verify_constant, Comparison};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn ops(device: &HostAccelerator) -> AcceleratedOps<'_> {
        let info = device.query_info().unwrap();
        AcceleratedOps::new(device, info, Some(Duration::from_secs(30)))
    }

    fn constant_product(device: &HostAccelerator, group_shape: i64, group_count: i64) -> Result<Matrix> {
        let launch = LaunchConfig::square(group_shape, group_count)?;
        let n = launch.matrix_dim()?;
        let a = Matrix::filled(n, 1.0);
        let b = Matrix::filled(n, 0.01);
        let mut c = Matrix::square(n);
        ops(device).multiply(&a, &b, &mut c, &launch)?;
        Ok(c)
    }

    #[test]
    fn test_scenario_two_by_two() {
        let device = HostAccelerator::select(0).unwrap();
        let c = constant_product(&device, 2, 2).unwrap();
        assert_eq!(c.dim(), Some(4));
        assert!(c.as_slice().iter().all(|&v| v == 0.04));
        assert!(verify_constant(&c, expected_product(1.0, 0.01, 4), Comparison::Exact).passed());
    }

    #[test]
    fn test_scenario_sixteen_by_four() {
        let device = HostAccelerator::select(0).unwrap();
        let c = constant_product(&device, 16, 4).unwrap();
        assert_eq!(c.dim(), Some(64));
        assert!(c.as_slice().iter().all(|&v| v == 0.64));
    }

    #[test]
    fn test_constant_fills_for_many_sizes() {
        let device = HostAccelerator::select(0).unwrap();
        for (shape, count) in [(1, 1), (1, 7), (3, 5), (8, 3), (32, 2)] {
            let c = constant_product(&device, shape, count).unwrap();
            let n = (shape * count) as usize;
            let report = verify_constant(&c, expected_product(1.0, 0.01, n), Comparison::Exact);
            assert!(report.passed(), "n = {}: {:?}", n, report.mismatch);
        }
    }

    #[test]
    fn test_repeat_runs_are_bitwise_equal() {
        let device = HostAccelerator::select(0).unwrap();
        let first = constant_product(&device, 8, 4).unwrap();
        let second = constant_product(&device, 8, 4).unwrap();
        let bits = |m: &Matrix| m.as_slice().iter().map(|v| v.to_bits()).collect::<Vec<_>>();
        assert_eq!(bits(&first), bits(&second));
    }

    #[test]
    fn test_matches_host_on_random_inputs() {
        let n = 24;
        let mut rng = StdRng::seed_from_u64(7);
        let a = Matrix::from_vec(n, n, (0..n * n).map(|_| rng.gen_range(-1.0..1.0)).collect()).unwrap();
        let b = Matrix::from_vec(n, n, (0..n * n).map(|_| rng.gen_range(-1.0..1.0)).collect()).unwrap();

        let device = HostAccelerator::select(0).unwrap();
        let mut gpu = Matrix::square(n);
        ops(&device).multiply(&a, &b, &mut gpu, &LaunchConfig::square(8, 3).unwrap()).unwrap();
        let mut cpu = Matrix::square(n);
        crate::bench::sequential::multiply(&a, &b, &mut cpu).unwrap();

        assert!(compare_matrices(&cpu, &gpu, Comparison::Tolerance(1e-6)).passed());
    }

    #[test]
    fn test_mismatched_launch_rejected_before_allocation() {
        let device = HostAccelerator::select(0).unwrap();
        let a = Matrix::filled(5, 1.0);
        let mut c = Matrix::square(5);
        let err = ops(&device)
            .multiply(&a, &a, &mut c, &LaunchConfig::square(2, 2).unwrap())
            .unwrap_err();
        assert!(matches!(err, DeviceError::Launch(_)));
        assert!(device.trace().is_empty());
    }

    #[test]
    fn test_allocation_failure_skips_copy_and_launch() {
        let device = HostAccelerator::with_faults(FaultInjection {
            fail_allocation_at: Some(0),
            ..Default::default()
        });
        let err = constant_product(&device, 2, 2).unwrap_err();
        assert!(matches!(err, DeviceError::Allocation(_)));
        assert_eq!(device.trace(), vec![DeviceOp::Allocate]);
    }

    #[test]
    fn test_late_allocation_failure_releases_earlier_buffers() {
        let device = HostAccelerator::with_faults(FaultInjection {
            fail_allocation_at: Some(2),
            ..Default::default()
        });
        let err = constant_product(&device, 2, 2).unwrap_err();
        assert!(matches!(err, DeviceError::Allocation(_)));
        let trace = device.trace();
        assert!(!trace.contains(&DeviceOp::CopyToDevice));
        assert!(!trace.contains(&DeviceOp::Launch));
        assert_eq!(trace.iter().filter(|op| **op == DeviceOp::Release).count(), 2);
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_out_of_device_memory() {
        // 3 буфера 16x16 = 3 KiB не помещаются в 2 KiB
        let device = HostAccelerator::select(0).unwrap().with_memory_limit(2048);
        let err = constant_product(&device, 4, 4).unwrap_err();
        assert!(matches!(err, DeviceError::Allocation(_)));
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_every_failure_releases_device_memory() {
        let faults = [
            FaultInjection { fail_transfer: true, ..Default::default() },
            FaultInjection { reject_launch: true, ..Default::default() },
            FaultInjection { faulting_worker: Some((3, 0)), ..Default::default() },
        ];
        for fault in faults {
            let device = HostAccelerator::with_faults(fault.clone());
            assert!(constant_product(&device, 2, 2).is_err(), "{:?}", fault);
            assert_eq!(device.live_allocations(), 0, "{:?}", fault);
            assert_eq!(device.used_bytes(), 0);
        }
    }

    #[test]
    fn test_hung_kernel_is_bounded_by_timeout() {
        let device = HostAccelerator::with_faults(FaultInjection {
            kernel_delay: Some(Duration::from_millis(500)),
            ..Default::default()
        });
        let info = device.query_info().unwrap();
        let ops = AcceleratedOps::new(&device, info, Some(Duration::from_millis(20)));
        let a = Matrix::filled(4, 1.0);
        let mut c = Matrix::square(4);
        let err = ops.multiply(&a, &a, &mut c, &LaunchConfig::square(2, 2).unwrap()).unwrap_err();
        assert!(matches!(err, DeviceError::Execution(_)));
        assert_eq!(device.live_allocations(), 0);
    }

    #[test]
    fn test_add_on_device() {
        let device = HostAccelerator::select(0).unwrap();
        let a = Matrix::from_vec(2, 4, vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]).unwrap();
        let b = Matrix::from_vec(2, 4, vec![8.0; 8]).unwrap();
        let mut c = Matrix::zeros(2, 4);
        let launch = LaunchConfig::covering(2, 4, Dim2::new(2, 2));
        ops(&device).add(&a, &b, &mut c, &launch).unwrap();
        assert_eq!(c.as_slice(), &[8.0, 9.0, 10.0, 11.0, 12.0, 13.0, 14.0, 15.0]);
    }

    #[test]
    fn test_timing_is_reported() {
        let device = HostAccelerator::select(0).unwrap();
        let a = Matrix::filled(8, 1.0);
        let mut c = Matrix::square(8);
        let timing = ops(&device).multiply(&a, &a, &mut c, &LaunchConfig::square(4, 2).unwrap()).unwrap();
        assert!(timing.kernel_ms >= 0.0);
        assert!(timing.total_ms >= timing.kernel_ms);
    }
}
