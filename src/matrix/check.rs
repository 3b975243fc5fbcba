//! Проверка корректности результатов

use super::types::Matrix;
use serde::Serialize;

/// Политика сравнения элементов
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Comparison {
    /// Точное равенство (по умолчанию)
    #[default]
    Exact,
    /// Допуск по абсолютной разнице
    Tolerance(f32),
}

impl Comparison {
    pub fn from_tolerance(tolerance: Option<f32>) -> Self {
        tolerance.map_or(Comparison::Exact, Comparison::Tolerance)
    }

    pub fn matches(&self, expected: f32, actual: f32) -> bool {
        match *self {
            Comparison::Exact => expected == actual,
            Comparison::Tolerance(eps) => (expected - actual).abs() <= eps,
        }
    }
}

/// Первое расхождение
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Mismatch {
    pub row: usize,
    pub col: usize,
    pub expected: f32,
    pub actual: f32,
}

/// Итог проверки
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CheckReport {
    /// Сколько элементов было просмотрено до остановки
    pub inspected: usize,
    pub mismatch: Option<Mismatch>,
}

impl CheckReport {
    pub fn passed(&self) -> bool {
        self.mismatch.is_none()
    }
}

/// Ожидаемое значение каждого элемента `A * B` при заполнении A константой
/// `val_a`, B константой `val_b` и общей размерности `n`
pub fn expected_product(val_a: f32, val_b: f32, n: usize) -> f32 {
    (val_a as f64 * val_b as f64 * n as f64) as f32
}

fn scan<F>(m: &Matrix, comparison: Comparison, expected_at: F) -> CheckReport
where
    F: Fn(usize) -> f32,
{
    let cols = m.cols().max(1);
    for (idx, &actual) in m.as_slice().iter().enumerate() {
        let expected = expected_at(idx);
        if !comparison.matches(expected, actual) {
            return CheckReport {
                inspected: idx + 1,
                mismatch: Some(Mismatch { row: idx / cols, col: idx % cols, expected, actual }),
            };
        }
    }
    CheckReport { inspected: m.len(), mismatch: None }
}

/// Сверяет каждый элемент с константой, останавливаясь на первом расхождении
pub fn verify_constant(m: &Matrix, expected: f32, comparison: Comparison) -> CheckReport {
    scan(m, comparison, |_| expected)
}

/// Сравнивает две матрицы поэлементно с той же политикой остановки
pub fn compare_matrices(reference: &Matrix, actual: &Matrix, comparison: Comparison) -> CheckReport {
    if reference.rows() != actual.rows() || reference.cols() != actual.cols() {
        return CheckReport {
            inspected: 0,
            mismatch: Some(Mismatch { row: 0, col: 0, expected: f32::NAN, actual: f32::NAN }),
        };
    }
    let expected = reference.as_slice();
    scan(actual, comparison, |idx| expected[idx])
}
