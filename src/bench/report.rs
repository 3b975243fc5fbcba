//! Вывод результатов итерации

use crate::matrix::CheckReport;
use anyhow::{Context, Result};
use prettytable::{row, Table};
use serde::Serialize;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Результат одной итерации бенчмарка
#[derive(Debug, Clone, Serialize)]
pub struct IterationReport {
    pub group_shape: usize,
    pub group_count: usize,
    pub n: usize,
    /// Время ядра на ускорителе, мс
    pub accelerated_ms: f64,
    /// Время на ускорителе вместе с копированием, мс
    pub accelerated_total_ms: f64,
    /// Время вложенных циклов на CPU, мс
    pub sequential_ms: f64,
    /// `sequential_ms / accelerated_ms`; `None`, если время ядра нулевое
    pub speedup: Option<f64>,
    pub accelerated_check: CheckReport,
    pub sequential_check: CheckReport,
}

impl IterationReport {
    pub fn passed(&self) -> bool {
        self.accelerated_check.passed() && self.sequential_check.passed()
    }
}

/// Отношение времени CPU ко времени ускорителя
pub fn speedup(sequential_ms: f64, accelerated_ms: f64) -> Option<f64> {
    (accelerated_ms > 0.0).then(|| sequential_ms / accelerated_ms)
}

pub fn render_table(report: &IterationReport) -> Table {
    let speedup = report
        .speedup
        .map_or_else(|| "n/a".to_string(), |s| format!("{:.2}x", s));
    let mut table = Table::new();
    table.add_row(row!["N", "Блок", "Сетка", "Ускоритель, мс", "С копированием, мс", "CPU, мс", "Ускорение"]);
    table.add_row(row![
        report.n,
        format!("{0}x{0}", report.group_shape),
        format!("{0}x{0}", report.group_count),
        format!("{:.3}", report.accelerated_ms),
        format!("{:.3}", report.accelerated_total_ms),
        format!("{:.0}", report.sequential_ms),
        speedup
    ]);
    table
}

fn check_line(label: &str, check: &CheckReport) -> String {
    match check.mismatch {
        None => format!("Проверка ({}): пройдена, все {} элементов совпадают", label, check.inspected),
        Some(m) => format!(
            "Проверка ({}): НЕ пройдена, элемент ({}, {}) = {}, ожидалось {}",
            label, m.row, m.col, m.actual, m.expected
        ),
    }
}

/// Печатает таблицу времени и итог проверки обоих путей
pub fn write_summary<W: Write + ?Sized>(out: &mut W, report: &IterationReport) -> Result<()> {
    render_table(report).print(out)?;
    writeln!(out, "{}", check_line("ускоритель", &report.accelerated_check))?;
    writeln!(out, "{}", check_line("CPU", &report.sequential_check))?;
    Ok(())
}

/// Дописывает отчёт одной строкой JSON
pub fn append_json_line(path: &Path, report: &IterationReport) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Не удалось открыть файл отчёта {}", path.display()))?;
    serde_json::to_writer(&mut file, report)?;
    writeln!(file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::Mismatch;

    fn report() -> IterationReport {
        IterationReport {
            group_shape: 2,
            group_count: 2,
            n: 4,
            accelerated_ms: 0.5,
            accelerated_total_ms: 1.25,
            sequential_ms: 2.0,
            speedup: speedup(2.0, 0.5),
            accelerated_check: CheckReport { inspected: 16, mismatch: None },
            sequential_check: CheckReport {
                inspected: 3,
                mismatch: Some(Mismatch { row: 0, col: 2, expected: 0.04, actual: 1.0 }),
            },
        }
    }

    #[test]
    fn test_speedup() {
        assert_eq!(speedup(10.0, 2.5), Some(4.0));
        assert_eq!(speedup(10.0, 0.0), None);
    }

    #[test]
    fn test_summary_lists_times_and_checks() {
        let mut out = Vec::new();
        write_summary(&mut out, &report()).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("4.00x"));
        assert!(text.contains("0.500"));
        assert!(text.contains("Проверка (ускоритель): пройдена"));
        assert!(text.contains("элемент (0, 2) = 1, ожидалось 0.04"));
        assert!(!report().passed());
    }

    #[test]
    fn test_json_lines_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.jsonl");
        append_json_line(&path, &report()).unwrap();
        append_json_line(&path, &report()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let value: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(value["n"], 4);
        assert_eq!(value["speedup"], 4.0);
        assert_eq!(value["sequential_check"]["mismatch"]["col"], 2);
    }
}
