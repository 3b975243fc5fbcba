//! Модуль для работы с матрицами
//! 
//! Предоставляет:
//! - Плотную матрицу в построчном хранении
//! - Заполнение, сложение и умножение на CPU
//! - Исходники ядер и тела рабочих элементов
//! - Проверку корректности результата

mod types;
pub mod operations;
pub mod kernels;
pub mod check;

pub use types::Matrix;
pub use operations::{
    cpu_matrix_add, cpu_matrix_multiply, fill, fill_sequence, sequence_value, write_matrix,
};
pub use kernels::{MATRIX_ADD_KERNEL, MATRIX_MULTIPLY_KERNEL};
pub use check::{compare_matrices, expected_product, verify_constant, CheckReport, Comparison, Mismatch};
