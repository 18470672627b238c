//! Comparação de primitivas entre dois runs de perfilamento
//!
//! Casa os registros por (algoritmo, params), compara as instâncias pela
//! representação textual e, quando habilitado, verifica diretamente sobre a
//! tabela alvo as primitivas das famílias com checagem exata.

use std::collections::HashSet;
use std::fs;

use tracing::warn;

use crate::algorithms::{fd_error, partition};
use crate::dataset::Table;
use crate::types::{
    AlgoParams, AlgorithmFamily, Primitive, ProfilerError, ProfilerResult, ResultMap, RunRecord,
    TaskStatus,
};

/// Famílias com verificação direta implementada
pub const VERIFICATION_FAMILIES: &[AlgorithmFamily] =
    &[AlgorithmFamily::Fd, AlgorithmFamily::Ucc, AlgorithmFamily::Ind];

/// Linha do digest de comparação
#[derive(Debug, Clone)]
pub struct ComparisonEntry {
    pub algorithm: String,
    pub family: String,
    pub params: Option<AlgoParams>,
    pub baseline_instances: Option<usize>,
    pub target_instances: Option<usize>,
    pub comparison: Option<String>,
}

fn load_blob(record: &RunRecord) -> ProfilerResult<ResultMap> {
    let path = record.result_path.as_deref().ok_or_else(|| {
        ProfilerError::Internal("registro sem caminho de resultado serializado".to_string())
    })?;
    let bytes = fs::read(path)?;
    Ok(bincode::deserialize(&bytes)?)
}

fn column_index(table: &Table, name: &str) -> Option<usize> {
    table.columns.iter().position(|c| c == name)
}

/// Verifica instâncias diretamente sobre a tabela; devolve as quebradas
pub fn verify_primitives(
    family: AlgorithmFamily,
    primitives: &[Primitive],
    table: &Table,
) -> ProfilerResult<Vec<Primitive>> {
    let mut broken = Vec::new();
    for primitive in primitives {
        let holds = match (family, primitive) {
            (AlgorithmFamily::Fd, Primitive::Dependency { lhs, rhs }) => {
                let lhs_idx: Option<Vec<usize>> =
                    lhs.iter().map(|c| column_index(table, c)).collect();
                let rhs_idx = rhs.first().and_then(|c| column_index(table, c));
                match (lhs_idx, rhs_idx) {
                    (Some(lhs_idx), Some(rhs_idx)) => {
                        let groups = partition(table, &lhs_idx)?;
                        fd_error(table, &groups, rhs_idx) == 0.0
                    }
                    _ => false,
                }
            }
            (AlgorithmFamily::Ucc, Primitive::ColumnSet { columns }) => {
                let idx: Option<Vec<usize>> =
                    columns.iter().map(|c| column_index(table, c)).collect();
                match idx {
                    Some(idx) => {
                        let groups = partition(table, &idx)?;
                        groups.values().all(|g| g.len() == 1)
                    }
                    None => false,
                }
            }
            (AlgorithmFamily::Ind, Primitive::Inclusion { dependent, referenced }) => {
                match (column_index(table, dependent), column_index(table, referenced)) {
                    (Some(dep), Some(referenced)) => {
                        let referenced_values: HashSet<&str> =
                            table.column_values(referenced).collect();
                        table.column_values(dep).all(|v| referenced_values.contains(v))
                    }
                    _ => false,
                }
            }
            _ => {
                warn!("Família {} sem verificação direta para {:?}", family, primitive);
                true
            }
        };
        if !holds {
            broken.push(primitive.clone());
        }
    }
    Ok(broken)
}

fn rendered_set(instances: &[Primitive]) -> HashSet<String> {
    instances.iter().map(|p| p.to_string()).collect()
}

/// Compara os registros de baseline e alvo; devolve as linhas do digest e o
/// texto legível da comparação
pub fn compare_runs(
    baseline_tasks: &[RunRecord],
    target_tasks: &[RunRecord],
    table: &Table,
    auto_validation: bool,
) -> (Vec<ComparisonEntry>, String) {
    let mut entries = Vec::new();
    let mut text = String::from("Comparison result:");

    for baseline in baseline_tasks {
        let algorithm =
            baseline.algorithm.map(|a| a.to_string()).unwrap_or_else(|| "?".to_string());
        let family_tag = baseline.algorithm_family;
        let family =
            family_tag.map(|f| f.to_string()).unwrap_or_else(|| "?".to_string());
        let mut entry = ComparisonEntry {
            algorithm: algorithm.clone(),
            family: family.clone(),
            params: baseline.params.clone(),
            baseline_instances: baseline.instances,
            target_instances: None,
            comparison: None,
        };

        if baseline.result != Some(TaskStatus::Success) {
            entry.comparison = Some("Failed on baseline dataset".to_string());
            entries.push(entry);
            continue;
        }

        let baseline_results = match load_blob(baseline) {
            Ok(results) => results,
            Err(e) => {
                warn!("Erro ao carregar resultado serializado: {}. Pulando.", e);
                continue;
            }
        };

        let target = target_tasks
            .iter()
            .find(|t| t.algorithm == baseline.algorithm && t.params == baseline.params);
        let target = match target {
            Some(t) => t,
            None => {
                entry.comparison = Some("No matching target task".to_string());
                entries.push(entry);
                continue;
            }
        };

        if target.result != Some(TaskStatus::Success) {
            let verifiable =
                family_tag.map(|f| VERIFICATION_FAMILIES.contains(&f)).unwrap_or(false);
            if auto_validation && verifiable {
                let family_tag = family_tag.unwrap_or(AlgorithmFamily::Fd);
                let primitives: Vec<Primitive> =
                    baseline_results.values().next().cloned().unwrap_or_default();
                match verify_primitives(family_tag, &primitives, table) {
                    Ok(broken) if broken.is_empty() => {
                        text.push_str(&format!(
                            "\nAll {}s by {} are hold",
                            family.to_uppercase(),
                            algorithm
                        ));
                        entry.comparison = Some("All instances are hold (validation)".to_string());
                    }
                    Ok(broken) => {
                        entry.comparison =
                            Some(format!("Broken instances (validation): {}", broken.len()));
                        text.push_str(&format!(
                            "\n{}s by {} validation:",
                            family.to_uppercase(),
                            algorithm
                        ));
                        for primitive in &broken {
                            text.push_str(&format!("\n\t{}", primitive));
                        }
                    }
                    Err(e) => {
                        warn!("Erro na verificação direta: {}. Pulando.", e);
                        entry.comparison = Some("Validation failed".to_string());
                    }
                }
            } else {
                entry.comparison = Some("Failed on target dataset".to_string());
            }
            entries.push(entry);
            continue;
        }

        entry.target_instances = target.instances;
        let target_results = match load_blob(target) {
            Ok(results) => results,
            Err(e) => {
                warn!("Erro ao carregar resultado serializado: {}. Pulando.", e);
                continue;
            }
        };

        for (kind, payload) in &baseline_results {
            let empty = Vec::new();
            let target_payload = target_results.get(kind).unwrap_or(&empty);
            let baseline_set = rendered_set(payload);
            let target_set = rendered_set(target_payload);

            let broken: Vec<&Primitive> =
                payload.iter().filter(|p| !target_set.contains(&p.to_string())).collect();
            let new: Vec<&Primitive> = target_payload
                .iter()
                .filter(|p| !baseline_set.contains(&p.to_string()))
                .collect();

            if broken.is_empty() && new.is_empty() {
                text.push_str(&format!(
                    "\nAll {}s by {} are hold",
                    kind.to_uppercase(),
                    algorithm
                ));
                entry.comparison = Some("All instances are hold".to_string());
                continue;
            }

            entry.comparison = Some(format!(
                "Broken instances: {}; New instances: {}",
                broken.len(),
                new.len()
            ));
            if !broken.is_empty() {
                text.push_str(&format!("\nBroken instances for {}:", kind.to_uppercase()));
                for primitive in &broken {
                    text.push_str(&format!("\n\t{}", primitive));
                }
            }
            if !new.is_empty() {
                text.push_str(&format!("\nNew instances for {}:", kind.to_uppercase()));
                for primitive in &new {
                    text.push_str(&format!("\n\t{}", primitive));
                }
            }
        }
        text.push('\n');
        entries.push(entry);
    }

    (entries, text)
}
