//! Абстракция ускорителя
//!
//! Ядро бенчмарка зависит только от возможностей, перечисленных в
//! [`Accelerator`]: выбор устройства, выделение и освобождение линейной
//! памяти, копирование между хостом и устройством, запуск ядра с двумерной
//! сеткой, замер времени событиями, синхронизация и запрос последней ошибки.

mod buffer;
mod host;
mod launch;

pub use buffer::DeviceBuffer;
pub use host::{DeviceOp, FaultInjection, HostAccelerator};
pub use launch::{Dim2, LaunchConfig};

use crate::error::Result;
use std::time::{Duration, Instant};

/// Непрозрачный дескриптор буфера в памяти устройства
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DevicePtr(pub u64);

/// Свойства устройства
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    /// Максимум рабочих элементов в одной группе
    pub max_work_group_size: usize,
    /// Максимальный размер группы по осям x, y
    pub max_block_dims: [usize; 2],
    /// Максимальное число групп по осям x, y
    pub max_grid_dims: [usize; 2],
    pub global_mem_bytes: u64,
}

impl Default for DeviceInfo {
    /// Консервативные ограничения на случай, если запрос свойств не удался
    fn default() -> Self {
        Self {
            name: "unknown device".to_string(),
            max_work_group_size: 256,
            max_block_dims: [256, 256],
            max_grid_dims: [65535, 65535],
            global_mem_bytes: 0,
        }
    }
}

/// Метка времени в потоке команд устройства
#[derive(Debug, Clone, Copy)]
pub struct Event(Instant);

impl Event {
    pub fn now() -> Self {
        Event(Instant::now())
    }

    /// Миллисекунды от `self` до `stop`
    pub fn elapsed_ms(&self, stop: &Event) -> f64 {
        stop.0.saturating_duration_since(self.0).as_secs_f64() * 1000.0
    }
}

/// Ядро с привязанными аргументами
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Kernel {
    /// `c = a * b`, квадратные матрицы `size x size`
    MatMul { a: DevicePtr, b: DevicePtr, c: DevicePtr, size: usize },
    /// `c = a + b`, матрицы `rows x cols`
    MatAdd { a: DevicePtr, b: DevicePtr, c: DevicePtr, rows: usize, cols: usize },
}

impl Kernel {
    pub fn matmul(a: &DeviceBuffer<'_>, b: &DeviceBuffer<'_>, c: &DeviceBuffer<'_>, size: usize) -> Self {
        Kernel::MatMul { a: a.ptr(), b: b.ptr(), c: c.ptr(), size }
    }

    pub fn matadd(
        a: &DeviceBuffer<'_>,
        b: &DeviceBuffer<'_>,
        c: &DeviceBuffer<'_>,
        rows: usize,
        cols: usize,
    ) -> Self {
        Kernel::MatAdd { a: a.ptr(), b: b.ptr(), c: c.ptr(), rows, cols }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Kernel::MatMul { .. } => "matrix_multiply",
            Kernel::MatAdd { .. } => "matrix_add",
        }
    }
}

/// Возможности ускорителя, которые использует бенчмарк
///
/// Выбор устройства выполняется конструктором конкретной реализации
/// (`select`) один раз за процесс.
pub trait Accelerator: Send + Sync {
    /// Имя устройства для вывода оператору
    fn name(&self) -> &str;

    /// Запрос свойств устройства
    fn query_info(&self) -> Result<DeviceInfo>;

    /// Выделяет буфер на `len` элементов `f32`
    fn allocate(&self, len: usize) -> Result<DevicePtr>;

    /// Освобождает буфер. Вызывается из `Drop` у [`DeviceBuffer`]
    fn release(&self, ptr: DevicePtr);

    /// Полное копирование хост -> устройство, завершённое к моменту возврата
    fn copy_to_device(&self, dst: DevicePtr, src: &[f32]) -> Result<()>;

    /// Полное копирование устройство -> хост, завершённое к моменту возврата
    fn copy_to_host(&self, src: DevicePtr, dst: &mut [f32]) -> Result<()>;

    /// Ставит ядро в очередь. Не ждёт завершения
    fn launch(&self, kernel: &Kernel, config: &LaunchConfig) -> Result<()>;

    /// Записывает событие в поток команд
    fn record_event(&self) -> Result<Event> {
        Ok(Event::now())
    }

    /// Ждёт завершения всех поставленных ядер, не дольше `timeout`
    fn synchronize(&self, timeout: Option<Duration>) -> Result<()>;

    /// Возвращает и сбрасывает последнюю зафиксированную ошибку
    fn last_error(&self) -> Option<crate::error::DeviceError>;
}
