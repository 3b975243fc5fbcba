//! Эмулируемый ускоритель на CPU
//!
//! Собственная "память устройства", асинхронный запуск ядра в отдельном
//! потоке и исполнение групп на пуле rayon: каждый рабочий элемент считает
//! ровно один элемент результата. Поддерживает внедрение сбоев для тестов.

use super::{Accelerator, DeviceInfo, DevicePtr, Kernel, LaunchConfig};
use crate::error::{DeviceError, Result};
use crate::matrix::kernels::{matadd_worker, matmul_worker};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex, MutexGuard, RwLock};
use std::thread;
use std::time::Duration;

const MAX_WORK_GROUP_SIZE: usize = 1024;
const MAX_BLOCK_DIMS: [usize; 2] = [1024, 1024];
const MAX_GRID_DIMS: [usize; 2] = [2_147_483_647, 65535];
const DEFAULT_MEMORY_BYTES: u64 = 1 << 30;

/// Сбои, которые устройство должно сымитировать
#[derive(Debug, Clone, Default)]
pub struct FaultInjection {
    /// Номер вызова `allocate` (с нуля), который завершится ошибкой
    pub fail_allocation_at: Option<usize>,
    pub fail_transfer: bool,
    pub reject_launch: bool,
    /// Рабочий элемент `(row, col)`, падающий при исполнении
    pub faulting_worker: Option<(usize, usize)>,
    pub fail_query: bool,
    /// Задержка перед исполнением ядра
    pub kernel_delay: Option<Duration>,
}

/// Операция, полученная устройством
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceOp {
    Allocate,
    Release,
    CopyToDevice,
    CopyToHost,
    Launch,
    Synchronize,
}

type Memory = Arc<RwLock<Vec<f32>>>;

#[derive(Default)]
struct State {
    next_id: u64,
    buffers: HashMap<u64, (usize, Memory)>,
    used_bytes: u64,
    allocations: usize,
    pending: Option<mpsc::Receiver<Result<()>>>,
    last_error: Option<DeviceError>,
    trace: Vec<DeviceOp>,
}

/// Ускоритель, эмулируемый на процессоре хоста
pub struct HostAccelerator {
    name: String,
    capacity_bytes: u64,
    faults: FaultInjection,
    state: Mutex<State>,
}

impl HostAccelerator {
    /// Выбирает эмулируемое устройство по номеру. Есть только устройство 0
    pub fn select(ordinal: usize) -> Result<Self> {
        if ordinal != 0 {
            return Err(DeviceError::Query(format!("no emulated device with ordinal {}", ordinal)));
        }
        Ok(Self::with_faults(FaultInjection::default()))
    }

    /// Устройство 0 с заданными сбоями
    pub fn with_faults(faults: FaultInjection) -> Self {
        Self {
            name: format!(
                "Host emulated accelerator #0 ({} worker threads)",
                rayon::current_num_threads()
            ),
            capacity_bytes: DEFAULT_MEMORY_BYTES,
            faults,
            state: Mutex::new(State::default()),
        }
    }

    /// Ограничивает объём "памяти устройства"
    pub fn with_memory_limit(mut self, bytes: u64) -> Self {
        self.capacity_bytes = bytes;
        self
    }

    /// Число живых буферов
    pub fn live_allocations(&self) -> usize {
        self.state().buffers.len()
    }

    pub fn used_bytes(&self) -> u64 {
        self.state().used_bytes
    }

    /// Все операции, полученные устройством, в порядке поступления
    pub fn trace(&self) -> Vec<DeviceOp> {
        self.state().trace.clone()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fail<T>(&self, err: DeviceError) -> Result<T> {
        self.state().last_error = Some(err.clone());
        Err(err)
    }

    fn memory(&self, ptr: DevicePtr) -> Option<Memory> {
        self.state().buffers.get(&ptr.0).map(|(_, memory)| memory.clone())
    }

    /// Команды исполняются по порядку: копирование ждёт ядро перед ним
    fn wait_pending(&self, timeout: Option<Duration>) -> Result<()> {
        let pending = self.state().pending.take();
        let Some(rx) = pending else {
            return Ok(());
        };
        let outcome = match timeout {
            Some(limit) => rx.recv_timeout(limit).map_err(|e| match e {
                mpsc::RecvTimeoutError::Timeout => {
                    DeviceError::Execution(format!("kernel did not finish within {:?}", limit))
                }
                mpsc::RecvTimeoutError::Disconnected => {
                    DeviceError::Execution("kernel thread exited without a result".to_string())
                }
            }),
            None => rx
                .recv()
                .map_err(|_| DeviceError::Execution("kernel thread exited without a result".to_string())),
        };
        match outcome.and_then(|result| result) {
            Ok(()) => Ok(()),
            Err(err) => self.fail(err),
        }
    }
}

impl Accelerator for HostAccelerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn query_info(&self) -> Result<DeviceInfo> {
        if self.faults.fail_query {
            return self.fail(DeviceError::Query("property query not supported".to_string()));
        }
        Ok(DeviceInfo {
            name: self.name.clone(),
            max_work_group_size: MAX_WORK_GROUP_SIZE,
            max_block_dims: MAX_BLOCK_DIMS,
            max_grid_dims: MAX_GRID_DIMS,
            global_mem_bytes: self.capacity_bytes,
        })
    }

    fn allocate(&self, len: usize) -> Result<DevicePtr> {
        let bytes = (len * std::mem::size_of::<f32>()) as u64;
        let mut state = self.state();
        state.trace.push(DeviceOp::Allocate);
        let index = state.allocations;
        state.allocations += 1;

        let err = if self.faults.fail_allocation_at == Some(index) {
            Some(DeviceError::Allocation(format!("injected failure on allocation #{}", index)))
        } else if state.used_bytes + bytes > self.capacity_bytes {
            Some(DeviceError::Allocation(format!(
                "requested {} bytes with {} of {} in use",
                bytes, state.used_bytes, self.capacity_bytes
            )))
        } else {
            None
        };
        if let Some(err) = err {
            state.last_error = Some(err.clone());
            return Err(err);
        }

        let id = state.next_id;
        state.next_id += 1;
        state.used_bytes += bytes;
        state.buffers.insert(id, (len, Arc::new(RwLock::new(vec![0.0f32; len]))));
        Ok(DevicePtr(id))
    }

    fn release(&self, ptr: DevicePtr) {
        let mut state = self.state();
        state.trace.push(DeviceOp::Release);
        match state.buffers.remove(&ptr.0) {
            Some((len, _)) => state.used_bytes -= (len * std::mem::size_of::<f32>()) as u64,
            None => log::warn!("{}: release of unknown buffer {:?}", self.name, ptr),
        }
    }

    fn copy_to_device(&self, dst: DevicePtr, src: &[f32]) -> Result<()> {
        self.wait_pending(None)?;
        self.state().trace.push(DeviceOp::CopyToDevice);
        if self.faults.fail_transfer {
            return self.fail(DeviceError::Transfer("injected host-to-device failure".to_string()));
        }
        let Some(memory) = self.memory(dst) else {
            return self.fail(DeviceError::Transfer(format!("unknown buffer {:?}", dst)));
        };
        let mut memory = memory
            .write()
            .map_err(|_| DeviceError::Transfer(format!("buffer {:?} poisoned", dst)))?;
        if memory.len() != src.len() {
            let len = memory.len();
            drop(memory);
            return self.fail(DeviceError::Transfer(format!(
                "copy of {} floats into buffer of {}",
                src.len(),
                len
            )));
        }
        memory.copy_from_slice(src);
        Ok(())
    }

    fn copy_to_host(&self, src: DevicePtr, dst: &mut [f32]) -> Result<()> {
        self.wait_pending(None)?;
        self.state().trace.push(DeviceOp::CopyToHost);
        if self.faults.fail_transfer {
            return self.fail(DeviceError::Transfer("injected device-to-host failure".to_string()));
        }
        let Some(memory) = self.memory(src) else {
            return self.fail(DeviceError::Transfer(format!("unknown buffer {:?}", src)));
        };
        let memory = memory
            .read()
            .map_err(|_| DeviceError::Transfer(format!("buffer {:?} poisoned", src)))?;
        if memory.len() != dst.len() {
            let len = memory.len();
            drop(memory);
            return self.fail(DeviceError::Transfer(format!(
                "copy of buffer with {} floats into {}",
                len,
                dst.len()
            )));
        }
        dst.copy_from_slice(&memory);
        Ok(())
    }

    fn launch(&self, kernel: &Kernel, config: &LaunchConfig) -> Result<()> {
        self.wait_pending(None)?;
        self.state().trace.push(DeviceOp::Launch);
        if self.faults.reject_launch {
            return self.fail(DeviceError::Launch("injected launch rejection".to_string()));
        }
        let block = config.block;
        if !matches!(block.area(), Some(1..=MAX_WORK_GROUP_SIZE)) {
            return self.fail(DeviceError::Launch(format!(
                "invalid block {} (max {} workers)",
                block, MAX_WORK_GROUP_SIZE
            )));
        }
        if config.grid.x > MAX_GRID_DIMS[0] || config.grid.y > MAX_GRID_DIMS[1] {
            return self.fail(DeviceError::Launch(format!("invalid grid {}", config.grid)));
        }

        let (a, b, c, op) = match *kernel {
            Kernel::MatMul { a, b, c, size } => (a, b, c, Op::MatMul { size }),
            Kernel::MatAdd { a, b, c, rows, cols } => (a, b, c, Op::MatAdd { rows, cols }),
        };
        let (Some(a), Some(b), Some(c)) = (self.memory(a), self.memory(b), self.memory(c)) else {
            return self.fail(DeviceError::Launch(format!("{}: invalid buffer argument", kernel.name())));
        };

        let job = Job {
            a,
            b,
            c,
            op,
            config: *config,
            faulting_worker: self.faults.faulting_worker,
            delay: self.faults.kernel_delay,
        };
        let (tx, rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name(format!("{}-kernel", kernel.name()))
            .spawn(move || {
                // Получатель мог уйти по таймауту
                let _ = tx.send(job.run());
            });
        if let Err(e) = spawned {
            return self.fail(DeviceError::Launch(format!("cannot start kernel: {}", e)));
        }
        self.state().pending = Some(rx);
        Ok(())
    }

    fn synchronize(&self, timeout: Option<Duration>) -> Result<()> {
        self.state().trace.push(DeviceOp::Synchronize);
        self.wait_pending(timeout)
    }

    fn last_error(&self) -> Option<DeviceError> {
        self.state().last_error.take()
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    MatMul { size: usize },
    MatAdd { rows: usize, cols: usize },
}

impl Op {
    fn shape(&self) -> (usize, usize) {
        match *self {
            Op::MatMul { size } => (size, size),
            Op::MatAdd { rows, cols } => (rows, cols),
        }
    }
}

/// Запущенное ядро со ссылками на буферы
struct Job {
    a: Memory,
    b: Memory,
    c: Memory,
    op: Op,
    config: LaunchConfig,
    faulting_worker: Option<(usize, usize)>,
    delay: Option<Duration>,
}

impl Job {
    fn run(self) -> Result<()> {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        let (rows, cols) = self.op.shape();
        let LaunchConfig { block, grid } = self.config;

        let tiles = {
            let poisoned = || DeviceError::Execution("input buffer poisoned".to_string());
            let a = self.a.read().map_err(|_| poisoned())?;
            let b = self.b.read().map_err(|_| poisoned())?;
            (0..grid.x * grid.y)
                .into_par_iter()
                .map(|group| {
                    let (gx, gy) = (group % grid.x, group / grid.x);
                    let mut tile = Vec::with_capacity(block.x * block.y);
                    for ty in 0..block.y {
                        for tx in 0..block.x {
                            let row = gy * block.y + ty;
                            let col = gx * block.x + tx;
                            if row >= rows || col >= cols {
                                continue;
                            }
                            if self.faulting_worker == Some((row, col)) {
                                return Err(DeviceError::Execution(format!(
                                    "worker ({}, {}) of group ({}, {}) raised a fault",
                                    row, col, gx, gy
                                )));
                            }
                            let value = match self.op {
                                Op::MatMul { size } => matmul_worker(&a, &b, size, row, col),
                                Op::MatAdd { cols, .. } => matadd_worker(&a, &b, cols, row, col),
                            };
                            let value = value.ok_or_else(|| {
                                DeviceError::Execution(format!("worker ({}, {}) read out of bounds", row, col))
                            })?;
                            tile.push((row * cols + col, value));
                        }
                    }
                    Ok(tile)
                })
                .collect::<Result<Vec<_>>>()?
        };

        let mut c = self
            .c
            .write()
            .map_err(|_| DeviceError::Execution("output buffer poisoned".to_string()))?;
        for (idx, value) in tiles.into_iter().flatten() {
            let slot = c
                .get_mut(idx)
                .ok_or_else(|| DeviceError::Execution(format!("write to element {} out of bounds", idx)))?;
            *slot = value;
        }
        Ok(())
    }
}
