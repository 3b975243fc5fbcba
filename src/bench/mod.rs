//! Бенчмарк: ускоритель против последовательного CPU
//!
//! - [`accelerated`] переносит данные на устройство и запускает ядро
//! - [`sequential`] считает то же самое вложенными циклами на хосте
//! - [`driver`] ведёт диалог с оператором и печатает ускорение
//! - [`addition`] лабораторная по сложению матриц

pub mod accelerated;
pub mod addition;
pub mod driver;
pub mod report;
pub mod sequential;

pub use accelerated::{AcceleratedOps, AcceleratedTiming};
pub use driver::Benchmark;
pub use report::IterationReport;
