//! Операции над матрицами на CPU

use super::types::Matrix;
use std::io::{self, Write};

/// Заполняет буфер константой
pub fn fill(data: &mut [f32], value: f32) {
    data.iter_mut().for_each(|v| *v = value);
}

/// Значение счётчика последовательности для элемента с индексом `index`
pub fn sequence_value(start: u32, index: usize) -> f32 {
    (start as usize + index) as f32
}

/// Заполняет буфер значениями `start, start + 1, ...`
///
/// Возвращает следующее значение счётчика, чтобы следующая матрица
/// продолжила последовательность.
pub fn fill_sequence(data: &mut [f32], start: u32) -> u32 {
    for (i, v) in data.iter_mut().enumerate() {
        *v = sequence_value(start, i);
    }
    start + data.len() as u32
}

/// CPU реализация поэлементного сложения: `c = a + b`
pub fn cpu_matrix_add(a: &Matrix, b: &Matrix, c: &mut Matrix) {
    let (rows, cols) = (a.rows(), a.cols());
    let (a, b) = (a.as_slice(), b.as_slice());
    let c = c.as_mut_slice();
    for i in 0..rows {
        for j in 0..cols {
            c[i * cols + j] = a[i * cols + j] + b[i * cols + j];
        }
    }
}

/// CPU реализация матричного умножения квадратных матриц размера `size`
///
/// Накопление ведётся в `f64`, как и в ядре ускорителя.
pub fn cpu_matrix_multiply(a: &[f32], b: &[f32], c: &mut [f32], size: usize) {
    for i in 0..size {
        for j in 0..size {
            let mut sum = 0.0f64;
            for k in 0..size {
                sum += a[i * size + k] as f64 * b[k * size + j] as f64;
            }
            c[i * size + j] = sum as f32;
        }
    }
}

/// Печатает матрицу, не более `max_edge` строк и столбцов
pub fn write_matrix<W: Write + ?Sized>(out: &mut W, m: &Matrix, max_edge: usize) -> io::Result<()> {
    writeln!(out, "[-] Элементы матрицы ({}x{}):", m.rows(), m.cols())?;
    for i in 0..m.rows().min(max_edge) {
        for j in 0..m.cols().min(max_edge) {
            write!(out, "{}\t", m.get(i, j))?;
        }
        if m.cols() > max_edge {
            write!(out, "...")?;
        }
        writeln!(out)?;
    }
    if m.rows() > max_edge {
        writeln!(out, "...")?;
    }
    Ok(())
}
