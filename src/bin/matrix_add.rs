//! Лабораторная по сложению матриц на CPU и на ускорителе

use anyhow::{Context, Result};
use accel_matrix::{
    bench::{addition, AcceleratedOps},
    Accelerator, BenchConfig, DeviceInfo,
};
use std::io;

const MAT_SIZE_X: usize = 4;
const MAT_SIZE_Y: usize = 4;

fn main() -> Result<()> {
    env_logger::init();

    let config = BenchConfig::from_env()?;
    let device = config
        .select_device()
        .context("Не удалось выбрать устройство")?;
    println!("Устройство: {}", device.name());

    let info = device.query_info().unwrap_or_else(|err| {
        log::warn!("{}, using default limits", err);
        DeviceInfo::default()
    });
    let ops = AcceleratedOps::new(device.as_ref(), info, config.sync_timeout());

    let lab = addition::run_addition_lab(&ops, MAT_SIZE_X, MAT_SIZE_Y)?;
    addition::print_addition_lab(&mut io::stdout().lock(), &lab)?;
    Ok(())
}
