//! Лабораторная: сложение матриц на CPU и на ускорителе

use super::accelerated::AcceleratedOps;
use super::sequential;
use crate::device::{Dim2, LaunchConfig};
use crate::matrix::{compare_matrices, fill_sequence, write_matrix, Comparison, Matrix};
use anyhow::{Context, Result};
use std::io::Write;

/// Матрицы лабораторной по сложению
#[derive(Debug, Clone)]
pub struct AdditionLab {
    pub a: Matrix,
    pub b: Matrix,
    pub host: Matrix,
    pub device: Matrix,
}

impl AdditionLab {
    pub fn agrees(&self) -> bool {
        compare_matrices(&self.host, &self.device, Comparison::Exact).passed()
    }
}

/// Заполняет A и B одной последовательностью (B продолжает счётчик A),
/// складывает на CPU и на устройстве одной группой `cols x rows`
pub fn run_addition_lab(ops: &AcceleratedOps<'_>, rows: usize, cols: usize) -> Result<AdditionLab> {
    let mut a = Matrix::zeros(rows, cols);
    let mut b = Matrix::zeros(rows, cols);
    let counter = fill_sequence(a.as_mut_slice(), 0);
    fill_sequence(b.as_mut_slice(), counter);

    let mut host = Matrix::zeros(rows, cols);
    sequential::add(&a, &b, &mut host).context("Матрицы разного размера")?;

    let mut device = Matrix::zeros(rows, cols);
    let launch = LaunchConfig::covering(rows, cols, Dim2::new(cols, rows));
    ops.add(&a, &b, &mut device, &launch)
        .context("Сложение на устройстве не удалось")?;

    Ok(AdditionLab { a, b, host, device })
}

/// Печатает A, B и сумму, как в исходной лабораторной
pub fn print_addition_lab<W: Write + ?Sized>(out: &mut W, lab: &AdditionLab) -> Result<()> {
    let edge = lab.a.rows().max(lab.a.cols());
    write_matrix(out, &lab.a, edge)?;
    write_matrix(out, &lab.b, edge)?;
    write_matrix(out, &lab.device, edge)?;
    writeln!(
        out,
        "Результаты CPU и ускорителя {}",
        if lab.agrees() { "совпадают" } else { "различаются" }
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{Accelerator, HostAccelerator};

    #[test]
    fn test_four_by_four_lab() {
        let device = HostAccelerator::select(0).unwrap();
        let ops = AcceleratedOps::new(&device, device.query_info().unwrap(), None);
        let lab = run_addition_lab(&ops, 4, 4).unwrap();
        assert!(lab.agrees());
        // a[i] = i, b[i] = 16 + i, c[i] = 16 + 2i
        assert_eq!(lab.device.get(0, 0), 16.0);
        assert_eq!(lab.device.get(3, 3), 46.0);

        let mut out = Vec::new();
        print_addition_lab(&mut out, &lab).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("[-] Элементы матрицы (4x4):").count(), 3);
        assert!(text.contains("16\t17\t18\t19\t"));
        assert!(text.ends_with("Результаты CPU и ускорителя совпадают\n"));
    }

    #[test]
    fn test_rectangular_lab() {
        let device = HostAccelerator::select(0).unwrap();
        let ops = AcceleratedOps::new(&device, device.query_info().unwrap(), None);
        let lab = run_addition_lab(&ops, 3, 5).unwrap();
        assert!(lab.agrees());
        assert_eq!(lab.host.get(2, 4), 14.0 + 29.0);
    }
}
