//! Конфигурация запуска: форма рабочей группы и форма сетки групп

use super::DeviceInfo;
use crate::error::{DeviceError, Result};
use std::fmt;

/// Двумерная форма: `x` по столбцам, `y` по строкам
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dim2 {
    pub x: usize,
    pub y: usize,
}

impl Dim2 {
    pub fn new(x: usize, y: usize) -> Self {
        Self { x, y }
    }

    pub fn square(edge: usize) -> Self {
        Self { x: edge, y: edge }
    }

    /// Число элементов; `None` при переполнении
    pub fn area(&self) -> Option<usize> {
        self.x.checked_mul(self.y)
    }
}

impl fmt::Display for Dim2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.x, self.y)
    }
}

/// Форма рабочей группы (block) и число групп (grid)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaunchConfig {
    pub block: Dim2,
    pub grid: Dim2,
}

impl LaunchConfig {
    pub fn new(block: Dim2, grid: Dim2) -> Self {
        Self { block, grid }
    }

    /// Квадратные формы из ответов оператора
    ///
    /// Отклоняет неположительные значения до какого-либо выделения памяти.
    pub fn square(group_shape: i64, group_count: i64) -> Result<Self> {
        if group_shape <= 0 || group_count <= 0 {
            return Err(DeviceError::Launch(format!(
                "group shape {} and group count {} must both be positive",
                group_shape, group_count
            )));
        }
        let config = Self::new(Dim2::square(group_shape as usize), Dim2::square(group_count as usize));
        config.covered()?;
        Ok(config)
    }

    /// Наименьшая сетка групп `block`, покрывающая матрицу `rows x cols`
    pub fn covering(rows: usize, cols: usize, block: Dim2) -> Self {
        let grid = Dim2::new(cols.div_ceil(block.x.max(1)), rows.div_ceil(block.y.max(1)));
        Self { block, grid }
    }

    /// Число рабочих элементов по осям: `grid * block`
    pub fn covered(&self) -> Result<Dim2> {
        let x = self.grid.x.checked_mul(self.block.x);
        let y = self.grid.y.checked_mul(self.block.y);
        match (x, y) {
            (Some(x), Some(y)) => Ok(Dim2::new(x, y)),
            _ => Err(DeviceError::Launch(format!(
                "grid {} of blocks {} overflows the index space",
                self.grid, self.block
            ))),
        }
    }

    /// Размерность квадратной матрицы, которую покрывает запуск
    pub fn matrix_dim(&self) -> Result<usize> {
        let covered = self.covered()?;
        if covered.x != covered.y {
            return Err(DeviceError::Launch(format!("launch covers non-square {}", covered)));
        }
        Ok(covered.x)
    }

    /// Проверяет, что запуск ровно покрывает `rows x cols` по одному
    /// рабочему элементу на элемент и укладывается в ограничения устройства
    pub fn validate(&self, rows: usize, cols: usize, info: &DeviceInfo) -> Result<()> {
        if rows == 0 || cols == 0 {
            return Err(DeviceError::Launch(format!("empty {}x{} matrix", rows, cols)));
        }
        let covered = self.covered()?;
        if covered.x != cols || covered.y != rows {
            return Err(DeviceError::Launch(format!(
                "grid {} x block {} covers {} workers, matrix is {}x{}",
                self.grid, self.block, covered, rows, cols
            )));
        }
        if self.block.x > info.max_block_dims[0] || self.block.y > info.max_block_dims[1] {
            return Err(DeviceError::Launch(format!(
                "block {} exceeds per-axis limit {}x{}",
                self.block, info.max_block_dims[0], info.max_block_dims[1]
            )));
        }
        match self.block.area() {
            Some(workers) if workers <= info.max_work_group_size => {}
            Some(workers) => {
                return Err(DeviceError::Launch(format!(
                    "block {} has {} workers, device allows {}",
                    self.block, workers, info.max_work_group_size
                )));
            }
            None => {
                return Err(DeviceError::Launch(format!(
                    "block {} overflows the worker count",
                    self.block
                )));
            }
        }
        if self.grid.x > info.max_grid_dims[0] || self.grid.y > info.max_grid_dims[1] {
            return Err(DeviceError::Launch(format!(
                "grid {} exceeds per-axis limit {}x{}",
                self.grid, info.max_grid_dims[0], info.max_grid_dims[1]
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> DeviceInfo {
        DeviceInfo {
            name: "test".into(),
            max_work_group_size: 1024,
            max_block_dims: [1024, 1024],
            max_grid_dims: [65535, 65535],
            global_mem_bytes: 1 << 30,
        }
    }

    #[test]
    fn test_square_derives_dimension() {
        let config = LaunchConfig::square(16, 4).unwrap();
        assert_eq!(config.matrix_dim().unwrap(), 64);
        assert!(config.validate(64, 64, &info()).is_ok());
    }

    #[test]
    fn test_non_positive_shapes_rejected() {
        assert!(matches!(LaunchConfig::square(0, 4), Err(DeviceError::Launch(_))));
        assert!(matches!(LaunchConfig::square(4, 0), Err(DeviceError::Launch(_))));
        assert!(matches!(LaunchConfig::square(-2, 2), Err(DeviceError::Launch(_))));
    }

    #[test]
    fn test_mismatched_dimension_rejected() {
        let config = LaunchConfig::square(2, 2).unwrap();
        assert!(matches!(config.validate(5, 5, &info()), Err(DeviceError::Launch(_))));
        assert!(matches!(config.validate(0, 0, &info()), Err(DeviceError::Launch(_))));
    }

    #[test]
    fn test_block_over_device_limit_rejected() {
        // 64x64 = 4096 рабочих элементов в группе
        let config = LaunchConfig::square(64, 1).unwrap();
        let err = config.validate(64, 64, &info()).unwrap_err();
        assert!(err.to_string().contains("device allows 1024"));
    }

    #[test]
    fn test_grid_over_device_limit_rejected() {
        let mut limits = info();
        limits.max_grid_dims = [2, 2];
        let config = LaunchConfig::square(1, 4).unwrap();
        assert!(config.validate(4, 4, &limits).is_err());
    }

    #[test]
    fn test_covering_rounds_up() {
        let config = LaunchConfig::covering(4, 6, Dim2::new(4, 4));
        assert_eq!(config.grid, Dim2::new(2, 1));
        assert!(config.validate(4, 6, &info()).is_err());
        let exact = LaunchConfig::covering(4, 4, Dim2::square(2));
        assert!(exact.validate(4, 4, &info()).is_ok());
    }

    #[test]
    fn test_huge_block_rejected_without_overflow() {
        // 2^32 x 2^32 рабочих элементов не помещаются в usize
        let config = LaunchConfig::square(1 << 32, 1).unwrap();
        assert_eq!(config.block.area(), None);
        let n = config.matrix_dim().unwrap();
        assert!(matches!(config.validate(n, n, &info()), Err(DeviceError::Launch(_))));

        let mut unlimited = info();
        unlimited.max_block_dims = [usize::MAX, usize::MAX];
        let err = config.validate(n, n, &unlimited).unwrap_err();
        assert!(err.to_string().contains("overflows the worker count"));
    }

    #[test]
    fn test_overflow_is_a_launch_error() {
        let config = LaunchConfig::new(Dim2::square(usize::MAX), Dim2::square(2));
        assert!(config.covered().is_err());
    }
}
