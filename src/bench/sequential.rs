//! Последовательные реализации на хосте

use crate::error::ShapeError;
use crate::matrix::{cpu_matrix_add, cpu_matrix_multiply, Matrix};
use crate::utils::measure_time;
use std::time::Duration;

fn shapes(a: &Matrix, b: &Matrix, c: &Matrix) -> String {
    format!(
        "{}x{}, {}x{} -> {}x{}",
        a.rows(),
        a.cols(),
        b.rows(),
        b.cols(),
        c.rows(),
        c.cols()
    )
}

/// `c = a * b` тройным циклом; время только самих циклов
///
/// Все три матрицы должны быть квадратными одного размера.
pub fn multiply(a: &Matrix, b: &Matrix, c: &mut Matrix) -> Result<Duration, ShapeError> {
    let n = match (a.dim(), b.dim(), c.dim()) {
        (Some(n), Some(nb), Some(nc)) if nb == n && nc == n => n,
        _ => return Err(ShapeError(shapes(a, b, c))),
    };
    let out = c.as_mut_slice();
    let (_, elapsed) = measure_time(|| cpu_matrix_multiply(a.as_slice(), b.as_slice(), out, n));
    Ok(elapsed)
}

/// `c = a + b` вложенными циклами
pub fn add(a: &Matrix, b: &Matrix, c: &mut Matrix) -> Result<Duration, ShapeError> {
    let shape = (a.rows(), a.cols());
    if (b.rows(), b.cols()) != shape || (c.rows(), c.cols()) != shape {
        return Err(ShapeError(shapes(a, b, c)));
    }
    let (_, elapsed) = measure_time(|| cpu_matrix_add(a, b, c));
    Ok(elapsed)
}
