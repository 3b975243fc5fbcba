//! Бенчмарк умножения матриц: ускоритель против CPU

use anyhow::{Context, Result};
use accel_matrix::{bench::Benchmark, BenchConfig};
use std::io;

fn main() -> Result<()> {
    env_logger::init();

    let config = BenchConfig::from_env()?;
    println!("Начало выполнения программы умножения матриц");
    println!("Матрица A заполнена {}, матрица B заполнена {}", config.fill_a, config.fill_b);

    let device = config
        .select_device()
        .context("Не удалось выбрать устройство")?;
    let bench = Benchmark::new(device.as_ref(), config);

    let reports = bench.run(io::stdin().lock(), io::stdout().lock())?;
    let failed = reports.iter().filter(|r| !r.passed()).count();
    println!("\nИтераций: {}, с ошибками проверки: {}", reports.len(), failed);
    println!("Программа завершена.");
    Ok(())
}
