//! Вспомогательные функции и утилиты

use std::time::{Duration, Instant};

/// Измеряет время выполнения функции
pub fn measure_time<F, T>(f: F) -> (T, Duration)
where
    F: FnOnce() -> T,
{
    let start = Instant::now();
    let result = f();
    let duration = start.elapsed();
    (result, duration)
}

/// Длительность в миллисекундах с дробной частью
pub fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_secs_f64() * 1000.0
}
