//! Normalização de recursos e geração dos digests em Markdown

use std::fs;
use std::path::Path;

use sysinfo::System;
use tracing::{info, warn};

use crate::comparer::ComparisonEntry;
use crate::types::RunRecord;

const DEFAULT_MEMORY_PERCENT: f64 = 0.75;
const DIGEST_FILE_NAME: &str = "digest.md";

/// Fração da memória disponível no momento, em bytes
pub fn percent_of_available_memory(percent: f64) -> u64 {
    let mut system = System::new();
    system.refresh_memory();
    (system.available_memory() as f64 * percent) as u64
}

/// Número efetivo de workers: 0 = todos os núcleos detectados
pub fn correct_number_of_workers(workers: usize) -> usize {
    let available = num_cpus::get();
    if workers == 0 {
        available
    } else {
        workers.min(available)
    }
}

/// Limite de memória em bytes: MB informados ou 75% da memória disponível
pub fn correct_mem_limit_bytes(mem_limit_mb: Option<u64>) -> u64 {
    match mem_limit_mb {
        Some(mb) => mb * 1024 * 1024,
        None => percent_of_available_memory(DEFAULT_MEMORY_PERCENT),
    }
}

fn fmt_opt<T: std::fmt::Display>(value: &Option<T>) -> String {
    value.as_ref().map(|v| v.to_string()).unwrap_or_else(|| "N/A".to_string())
}

fn fmt_secs(value: &Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_else(|| "N/A".to_string())
}

/// Escreve o digest de um run de perfilamento em `digest.md`
///
/// Erros de escrita são avisos: o digest é conveniência, não estado.
pub fn write_profiling_digest(runs: &[RunRecord], run_dir: &Path, dataset: &Path) {
    let mut content = String::new();
    content.push_str("# Profiling digest\n\n");
    content.push_str(&format!("- Dataset: `{}`\n", dataset.display()));
    content.push_str(&format!("- Run dir: `{}`\n", run_dir.display()));
    content.push_str(&format!("- Tasks: {}\n\n", runs.len()));

    content.push_str("| Algorithm | Family | Status | Time (s) | Instances | Error |\n");
    content.push_str("|-----------|--------|--------|----------|-----------|-------|\n");
    for run in runs {
        content.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            fmt_opt(&run.algorithm),
            fmt_opt(&run.algorithm_family),
            fmt_opt(&run.result),
            fmt_secs(&run.execution_time),
            fmt_opt(&run.instances),
            fmt_opt(&run.error_type),
        ));
    }

    write_digest(run_dir, content);
}

/// Escreve o digest de uma comparação entre dois datasets
pub fn write_comparison_digest(
    entries: &[ComparisonEntry],
    run_dir: &Path,
    baseline: &Path,
    target: &Path,
    title: &str,
) {
    let mut content = String::new();
    content.push_str(&format!("# {}\n\n", title));
    content.push_str(&format!("- Baseline: `{}`\n", baseline.display()));
    content.push_str(&format!("- Target: `{}`\n\n", target.display()));

    content.push_str("| Algorithm | Family | Baseline instances | Target instances | Comparison |\n");
    content.push_str("|-----------|--------|--------------------|------------------|------------|\n");
    for entry in entries {
        content.push_str(&format!(
            "| {} | {} | {} | {} | {} |\n",
            entry.algorithm,
            entry.family,
            fmt_opt(&entry.baseline_instances),
            fmt_opt(&entry.target_instances),
            entry.comparison.as_deref().unwrap_or("N/A"),
        ));
    }

    write_digest(run_dir, content);
}

fn write_digest(run_dir: &Path, content: String) {
    let digest_file = run_dir.join(DIGEST_FILE_NAME);
    match fs::write(&digest_file, content) {
        Ok(()) => info!("Digest Markdown salvo em {}", digest_file.display()),
        Err(e) => warn!("Erro ao escrever o digest: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AlgorithmFamily, AlgorithmName, TaskStatus};

    #[test]
    fn test_workers_zero_means_all_cores() {
        assert_eq!(correct_number_of_workers(0), num_cpus::get());
    }

    #[test]
    fn test_workers_clamped_to_available() {
        assert_eq!(correct_number_of_workers(1), 1);
        assert!(correct_number_of_workers(100_000) <= num_cpus::get());
    }

    #[test]
    fn test_mem_limit_conversion() {
        assert_eq!(correct_mem_limit_bytes(Some(512)), 512 * 1024 * 1024);
    }

    #[test]
    fn test_mem_limit_default_is_positive() {
        assert!(correct_mem_limit_bytes(None) > 0);
    }

    #[test]
    fn test_profiling_digest_is_written() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunRecord {
            task_id: "t1".to_string(),
            algorithm: Some(AlgorithmName::Hyfd),
            algorithm_family: Some(AlgorithmFamily::Fd),
            result: Some(TaskStatus::Success),
            execution_time: Some(1.5),
            instances: Some(3),
            ..RunRecord::default()
        };

        write_profiling_digest(&[run], dir.path(), Path::new("data.csv"));

        let content = fs::read_to_string(dir.path().join("digest.md")).unwrap();
        assert!(content.contains("| hyfd | fd | Success | 1.50 | 3 | N/A |"));
    }
}
