//! Настройки бенчмарка
//!
//! По умолчанию используются константы ниже; файл JSON, указанный в
//! переменной окружения [`CONFIG_ENV`], может переопределить любые поля.

use crate::device::{Accelerator, HostAccelerator};
use crate::error::DeviceError;
use crate::matrix::Comparison;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CONFIG_ENV: &str = "ACCEL_MATRIX_CONFIG";

const FILL_A: f32 = 1.0;
const FILL_B: f32 = 0.01;
const SYNC_TIMEOUT_MS: u64 = 60_000;
const DEVICE_MEMORY_MB: u64 = 1024;

/// Реализация ускорителя
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Эмуляция на процессоре хоста
    #[default]
    Host,
    /// GPU через OpenCL (фича `opencl`)
    OpenCl,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BenchConfig {
    /// Константа заполнения матрицы A
    pub fill_a: f32,
    /// Константа заполнения матрицы B
    pub fill_b: f32,
    /// Допуск сравнения; `None` означает точное равенство
    pub tolerance: Option<f32>,
    /// Предел ожидания ядра; `None` ждёт бесконечно
    pub sync_timeout_ms: Option<u64>,
    pub backend: Backend,
    pub device_ordinal: usize,
    /// Объём памяти эмулируемого устройства
    pub device_memory_mb: u64,
    /// Файл, в который дописывается JSON-строка на каждую итерацию
    pub report_path: Option<PathBuf>,
}

impl Default for BenchConfig {
    fn default() -> Self {
        Self {
            fill_a: FILL_A,
            fill_b: FILL_B,
            tolerance: None,
            sync_timeout_ms: Some(SYNC_TIMEOUT_MS),
            backend: Backend::Host,
            device_ordinal: 0,
            device_memory_mb: DEVICE_MEMORY_MB,
            report_path: None,
        }
    }
}

impl BenchConfig {
    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text).context("Некорректный JSON настроек")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Не удалось прочитать файл настроек {}", path.display()))?;
        Self::from_json(&text).with_context(|| format!("Ошибка в файле настроек {}", path.display()))
    }

    /// Настройки из файла в `ACCEL_MATRIX_CONFIG` или значения по умолчанию
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !self.fill_a.is_finite() || !self.fill_b.is_finite() {
            anyhow::bail!("fill values must be finite, got {} and {}", self.fill_a, self.fill_b);
        }
        if let Some(tolerance) = self.tolerance {
            if tolerance.is_nan() || tolerance < 0.0 {
                anyhow::bail!("tolerance must be non-negative, got {}", tolerance);
            }
        }
        if self.device_memory_bytes().is_none() {
            anyhow::bail!("device_memory_mb {} does not fit in 64 bits of bytes", self.device_memory_mb);
        }
        Ok(())
    }

    /// Объём памяти эмулируемого устройства в байтах; `None` при переполнении
    pub fn device_memory_bytes(&self) -> Option<u64> {
        self.device_memory_mb.checked_mul(1 << 20)
    }

    pub fn comparison(&self) -> Comparison {
        Comparison::from_tolerance(self.tolerance)
    }

    pub fn sync_timeout(&self) -> Option<Duration> {
        self.sync_timeout_ms.map(Duration::from_millis)
    }

    /// Выбирает устройство один раз на процесс
    pub fn select_device(&self) -> std::result::Result<Box<dyn Accelerator>, DeviceError> {
        match self.backend {
            Backend::Host => {
                let capacity = self.device_memory_bytes().ok_or_else(|| {
                    DeviceError::Allocation(format!("device_memory_mb {} overflows", self.device_memory_mb))
                })?;
                Ok(Box::new(HostAccelerator::select(self.device_ordinal)?.with_memory_limit(capacity)))
            }
            #[cfg(feature = "opencl")]
            Backend::OpenCl => Ok(Box::new(crate::opencl::OpenClAccelerator::select(self.device_ordinal)?)),
            #[cfg(not(feature = "opencl"))]
            Backend::OpenCl => Err(DeviceError::Query(
                "OpenCL backend requested, but the binary was built without the `opencl` feature".to_string(),
            )),
        }
    }
}
