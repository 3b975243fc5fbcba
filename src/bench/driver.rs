//! Диалог с оператором и итерации бенчмарка

use super::accelerated::AcceleratedOps;
use super::report::{self, IterationReport};
use super::sequential;
use crate::config::BenchConfig;
use crate::device::{Accelerator, DeviceInfo, LaunchConfig};
use crate::error::{DeviceError, Result};
use crate::matrix::{expected_product, fill, verify_constant, Matrix};
use crate::utils::as_millis_f64;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, Write};

/// Бенчмарк умножения на одном устройстве
pub struct Benchmark<'d> {
    device: &'d dyn Accelerator,
    ops: AcceleratedOps<'d>,
    config: BenchConfig,
}

impl<'d> Benchmark<'d> {
    /// Запрашивает свойства устройства; при ошибке работает с ограничениями
    /// по умолчанию
    pub fn new(device: &'d dyn Accelerator, config: BenchConfig) -> Self {
        let info = match device.query_info() {
            Ok(info) => info,
            Err(err) => {
                log::warn!("{}: {}, using default limits", device.name(), err);
                DeviceInfo { name: device.name().to_string(), ..DeviceInfo::default() }
            }
        };
        let ops = AcceleratedOps::new(device, info, config.sync_timeout());
        Self { device, ops, config }
    }

    pub fn info(&self) -> &DeviceInfo {
        self.ops.info()
    }

    /// Конфигурация запуска из ответов оператора, проверенная до выделения памяти
    pub fn plan(&self, group_shape: i64, group_count: i64) -> Result<LaunchConfig> {
        let launch = LaunchConfig::square(group_shape, group_count)?;
        let n = launch.matrix_dim()?;
        launch.validate(n, n, self.info())?;
        self.check_memory(n)?;
        Ok(launch)
    }

    /// Три матрицы `n x n` должны поместиться в память устройства
    ///
    /// Нулевой объём означает, что он неизвестен, и проверка пропускается.
    fn check_memory(&self, n: usize) -> Result<()> {
        let capacity = self.info().global_mem_bytes;
        if capacity == 0 {
            return Ok(());
        }
        let required = n
            .checked_mul(n)
            .and_then(|len| len.checked_mul(3 * std::mem::size_of::<f32>()))
            .and_then(|bytes| u64::try_from(bytes).ok());
        match required {
            Some(bytes) if bytes <= capacity => Ok(()),
            _ => Err(DeviceError::Allocation(format!(
                "three {0}x{0} f32 matrices do not fit in {1} bytes of device memory",
                n, capacity
            ))),
        }
    }

    /// Одна итерация: ускоритель, затем CPU, затем проверка обоих результатов
    pub fn run_iteration(&self, launch: &LaunchConfig) -> anyhow::Result<IterationReport> {
        let n = launch.matrix_dim()?;
        let (fill_a, fill_b) = (self.config.fill_a, self.config.fill_b);

        let mut a = Matrix::try_square(n)?;
        let mut b = Matrix::try_square(n)?;
        fill(a.as_mut_slice(), fill_a);
        fill(b.as_mut_slice(), fill_b);

        let mut accelerated_c = Matrix::try_square(n)?;
        let timing = self.ops.multiply(&a, &b, &mut accelerated_c, launch)?;

        let mut sequential_c = Matrix::try_square(n)?;
        let spinner = spinner(format!("CPU: умножение {}x{}...", n, n));
        let elapsed = sequential::multiply(&a, &b, &mut sequential_c);
        spinner.finish_and_clear();
        let elapsed = elapsed?;

        let expected = expected_product(fill_a, fill_b, n);
        let comparison = self.config.comparison();
        let sequential_ms = as_millis_f64(elapsed);
        Ok(IterationReport {
            group_shape: launch.block.x,
            group_count: launch.grid.x,
            n,
            accelerated_ms: timing.kernel_ms,
            accelerated_total_ms: timing.total_ms,
            sequential_ms,
            speedup: report::speedup(sequential_ms, timing.kernel_ms),
            accelerated_check: verify_constant(&accelerated_c, expected, comparison),
            sequential_check: verify_constant(&sequential_c, expected, comparison),
        })
    }

    /// Цикл диалога: до неположительной формы группы или конца ввода
    ///
    /// Ошибка устройства прерывает цикл; буферы к этому моменту уже
    /// освобождены.
    pub fn run<R: BufRead, W: Write>(&self, mut input: R, mut out: W) -> anyhow::Result<Vec<IterationReport>> {
        writeln!(out, "Устройство: {}", self.device.name())?;
        writeln!(
            out,
            "Максимальный размер рабочей группы: {}",
            self.info().max_work_group_size
        )?;

        let mut reports = Vec::new();
        loop {
            let Some(group_shape) =
                read_number(&mut input, &mut out, "\nРазмер рабочей группы (<= 0 для выхода): ")?
            else {
                break;
            };
            if group_shape <= 0 {
                break;
            }
            let Some(group_count) = read_number(&mut input, &mut out, "Число групп: ")? else {
                break;
            };

            let launch = match self.plan(group_shape, group_count) {
                Ok(launch) => launch,
                Err(err) => {
                    writeln!(out, "Конфигурация отклонена: {}", err)?;
                    continue;
                }
            };
            writeln!(
                out,
                "Умножение матриц {0}x{0}: блок {1}, сетка {2}",
                launch.matrix_dim()?,
                launch.block,
                launch.grid
            )?;

            let report = self.run_iteration(&launch)?;
            report::write_summary(&mut out, &report)?;
            if let Some(path) = &self.config.report_path {
                report::append_json_line(path, &report)?;
            }
            reports.push(report);
        }
        Ok(reports)
    }
}

/// Спиннер рисуется один раз до замера: фоновый тик не должен
/// попадать во время циклов CPU
fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.tick();
    pb
}

/// Читает целое число; повторяет вопрос при нечисловом ответе
///
/// `None` в конце ввода.
fn read_number<R: BufRead, W: Write>(input: &mut R, out: &mut W, prompt: &str) -> io::Result<Option<i64>> {
    loop {
        write!(out, "{}", prompt)?;
        out.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        match line.trim().parse::<i64>() {
            Ok(value) => return Ok(Some(value)),
            Err(_) => writeln!(out, "Ожидалось целое число, получено {:?}", line.trim())?,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::HostAccelerator;
    use std::io::Cursor;

    #[test]
    fn test_spinner_is_drawn_once_and_cleared() {
        let pb = spinner("CPU: умножение 4x4...".to_string());
        assert_eq!(pb.message(), "CPU: умножение 4x4...");
        assert!(!pb.is_finished());
        pb.finish_and_clear();
        assert!(pb.is_finished());
    }

    #[test]
    fn test_read_number_retries_on_garbage() {
        let mut input = Cursor::new("abc\n 12 \n");
        let mut out = Vec::new();
        assert_eq!(read_number(&mut input, &mut out, "> ").unwrap(), Some(12));
        assert_eq!(read_number(&mut input, &mut out, "> ").unwrap(), None);
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("Ожидалось целое число, получено \"abc\""));
    }

    #[test]
    fn test_plan_rejects_bad_shapes() {
        let device = HostAccelerator::select(0).unwrap();
        let bench = Benchmark::new(&device, BenchConfig::default());
        assert!(bench.plan(2, 0).is_err());
        assert!(bench.plan(64, 1).is_err());
        assert_eq!(bench.plan(16, 4).unwrap().matrix_dim().unwrap(), 64);
    }

    #[test]
    fn test_plan_rejects_huge_block_without_panic() {
        let device = HostAccelerator::select(0).unwrap();
        let bench = Benchmark::new(&device, BenchConfig::default());
        assert!(matches!(bench.plan(1 << 32, 1), Err(DeviceError::Launch(_))));
    }

    #[test]
    fn test_plan_rejects_matrices_larger_than_device_memory() {
        let device = HostAccelerator::select(0).unwrap();
        let bench = Benchmark::new(&device, BenchConfig::default());
        // n = 2097120: форма допустима, но матрицы не помещаются в 1 ГиБ
        let err = bench.plan(32, 65535).unwrap_err();
        assert!(matches!(err, DeviceError::Allocation(_)));
        assert!(device.trace().is_empty());

        let small = HostAccelerator::select(0).unwrap().with_memory_limit(3 * 4 * 64 * 64);
        let bench = Benchmark::new(&small, BenchConfig::default());
        assert!(bench.plan(16, 4).is_ok());
        assert!(matches!(bench.plan(8, 9), Err(DeviceError::Allocation(_))));
    }

    #[test]
    fn test_unknown_memory_size_skips_memory_check() {
        let device = HostAccelerator::with_faults(crate::device::FaultInjection {
            fail_query: true,
            ..Default::default()
        });
        let bench = Benchmark::new(&device, BenchConfig::default());
        assert_eq!(bench.info().global_mem_bytes, 0);
        assert!(bench.plan(16, 64).is_ok());
    }

    #[test]
    fn test_iteration_reports_both_paths() {
        let device = HostAccelerator::select(0).unwrap();
        let bench = Benchmark::new(&device, BenchConfig::default());
        let report = bench.run_iteration(&bench.plan(2, 2).unwrap()).unwrap();
        assert_eq!(report.n, 4);
        assert!(report.passed());
        assert_eq!(report.accelerated_check.inspected, 16);
    }

    #[test]
    fn test_query_failure_falls_back_to_defaults() {
        let device = HostAccelerator::with_faults(crate::device::FaultInjection {
            fail_query: true,
            ..Default::default()
        });
        let bench = Benchmark::new(&device, BenchConfig::default());
        assert_eq!(bench.info().max_work_group_size, DeviceInfo::default().max_work_group_size);
        assert_eq!(bench.info().name, device.name());
        // Блок 32x32 больше ограничения по умолчанию
        assert!(bench.plan(32, 1).is_err());
        assert!(bench.plan(8, 2).is_ok());
    }
}
