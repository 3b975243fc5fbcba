//! Тип матрицы

use crate::error::{DeviceError, Result};

/// Плотная матрица `f32` в построчном (row-major) порядке
#[derive(Debug, Clone, PartialEq)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f32>,
}

impl Matrix {
    /// Нулевая матрица `rows x cols`
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self { rows, cols, data: vec![0.0f32; rows * cols] }
    }

    /// Квадратная нулевая матрица `n x n`
    pub fn square(n: usize) -> Self {
        Self::zeros(n, n)
    }

    /// Нулевая матрица `rows x cols`; нехватка памяти хоста даёт
    /// `DeviceError::Allocation` вместо аварийного завершения
    pub fn try_zeros(rows: usize, cols: usize) -> Result<Self> {
        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| DeviceError::Allocation(format!("host matrix {}x{} overflows usize", rows, cols)))?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|err| {
            DeviceError::Allocation(format!("host matrix {}x{}: {}", rows, cols, err))
        })?;
        data.resize(len, 0.0f32);
        Ok(Self { rows, cols, data })
    }

    pub fn try_square(n: usize) -> Result<Self> {
        Self::try_zeros(n, n)
    }

    /// Квадратная матрица, заполненная константой
    pub fn filled(n: usize, value: f32) -> Self {
        Self { rows: n, cols: n, data: vec![value; n * n] }
    }

    pub fn from_vec(rows: usize, cols: usize, data: Vec<f32>) -> Option<Self> {
        (data.len() == rows * cols).then_some(Self { rows, cols, data })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Размерность квадратной матрицы, `None` для прямоугольной
    pub fn dim(&self) -> Option<usize> {
        (self.rows == self.cols).then_some(self.rows)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f32) {
        self.data[row * self.cols + col] = value;
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_zeros_reports_exhaustion() {
        let m = Matrix::try_zeros(2, 3).unwrap();
        assert_eq!(m, Matrix::zeros(2, 3));
        assert!(matches!(Matrix::try_zeros(usize::MAX, 2), Err(DeviceError::Allocation(_))));
        // 2^62 элементов f32 занимают больше isize::MAX байт
        assert!(matches!(Matrix::try_square(1 << 31), Err(DeviceError::Allocation(_))));
    }

    #[test]
    fn test_row_major_indexing() {
        let m = Matrix::from_vec(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(m.get(0, 2), 3.0);
        assert_eq!(m.get(1, 0), 4.0);
        assert_eq!(m.dim(), None);
    }

    #[test]
    fn test_from_vec_rejects_wrong_length() {
        assert!(Matrix::from_vec(2, 2, vec![1.0; 3]).is_none());
    }

    #[test]
    fn test_filled_square() {
        let m = Matrix::filled(3, 0.5);
        assert_eq!(m.dim(), Some(3));
        assert!(m.as_slice().iter().all(|&v| v == 0.5));
    }
}
