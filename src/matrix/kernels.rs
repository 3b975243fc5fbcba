//! Ядра для матричных операций
//!
//! Исходники OpenCL C для GPU и тела рабочих элементов для эмулятора.
//! Оба варианта используют одну и ту же раскладку: ось `x` сетки идёт
//! по столбцам, ось `y` по строкам.

/// Исходный код ядра для матричного умножения
///
/// Один рабочий элемент считает один элемент результата, без тайлов.
pub static MATRIX_MULTIPLY_KERNEL: &str = r#"
#pragma OPENCL EXTENSION cl_khr_fp64 : enable

__kernel void matrix_multiply(
    __global const float* a,
    __global const float* b,
    __global float* c,
    const int size
) {
    const int col = get_global_id(0);
    const int row = get_global_id(1);

    if (row < size && col < size) {
        double sum = 0.0;
        for (int k = 0; k < size; k++) {
            sum += (double)a[row * size + k] * (double)b[k * size + col];
        }
        c[row * size + col] = (float)sum;
    }
}
"#;

/// Исходный код ядра для поэлементного сложения
pub static MATRIX_ADD_KERNEL: &str = r#"
__kernel void matrix_add(
    __global const float* a,
    __global const float* b,
    __global float* c,
    const int rows,
    const int cols
) {
    const int col = get_global_id(0);
    const int row = get_global_id(1);

    if (row < rows && col < cols) {
        c[row * cols + col] = a[row * cols + col] + b[row * cols + col];
    }
}
"#;

/// Тело рабочего элемента умножения: скалярное произведение строки `row`
/// на столбец `col`
///
/// `None`, если рабочий элемент вышел за пределы буферов.
pub fn matmul_worker(a: &[f32], b: &[f32], size: usize, row: usize, col: usize) -> Option<f32> {
    let mut sum = 0.0f64;
    for k in 0..size {
        sum += *a.get(row * size + k)? as f64 * *b.get(k * size + col)? as f64;
    }
    Some(sum as f32)
}

/// Тело рабочего элемента сложения
pub fn matadd_worker(a: &[f32], b: &[f32], cols: usize, row: usize, col: usize) -> Option<f32> {
    let idx = row * cols + col;
    Some(*a.get(idx)? + *b.get(idx)?)
}
