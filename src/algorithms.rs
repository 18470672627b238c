//! Kernels de mineração de primitivas e a interface comum entre eles
//!
//! Cada kernel implementa [`MiningAlgorithm`] (carregar → executar →
//! coletar), roda inteiro dentro do processo filho e devolve instâncias na
//! representação canônica [`Primitive`]. As alocações grandes passam por
//! `try_reserve` para que o esgotamento do espaço de endereçamento apareça
//! como `MemoryExhausted` em vez de abortar o processo.

use std::collections::{HashMap, HashSet};

use rayon::prelude::*;
use tracing::debug;

use crate::dataset::Table;
use crate::types::{AlgoParams, Primitive, ProfilerError, ProfilerResult, ResultMap};

const KEY_SEPARATOR: char = '\u{1f}';

/// Interface de capacidade dos algoritmos de mineração
pub trait MiningAlgorithm: Send {
    /// Carrega a tabela na instância do algoritmo
    fn load_data(&mut self, table: &Table) -> ProfilerResult<()>;

    /// Executa a mineração propriamente dita
    fn execute(&mut self) -> ProfilerResult<()>;

    /// Coleta os resultados por tipo de primitiva
    fn get_results(&self) -> ResultMap;

    /// Processo completo: carregar, executar e coletar
    fn run(&mut self, table: &Table) -> ProfilerResult<ResultMap> {
        self.load_data(table)?;
        self.execute()?;
        Ok(self.get_results())
    }
}

// ---------------------------------------------------------------------------
// Acesso a parâmetros

pub fn param_f64(params: &AlgoParams, key: &str) -> Option<f64> {
    params.get(key).and_then(|v| v.as_f64())
}

pub fn param_usize(params: &AlgoParams, key: &str) -> Option<usize> {
    params.get(key).and_then(|v| v.as_u64()).map(|v| v as usize)
}

pub fn param_str<'a>(params: &'a AlgoParams, key: &str) -> Option<&'a str> {
    params.get(key).and_then(|v| v.as_str())
}

// ---------------------------------------------------------------------------
// Primitivas de particionamento compartilhadas pelos kernels

fn projection_key(row: &[String], cols: &[usize]) -> String {
    let mut key = String::new();
    for &c in cols {
        key.push_str(&row[c]);
        key.push(KEY_SEPARATOR);
    }
    key
}

/// Agrupa os índices de linha pelo valor projetado nas colunas dadas
pub(crate) fn partition(table: &Table, cols: &[usize]) -> ProfilerResult<HashMap<String, Vec<usize>>> {
    let mut groups: HashMap<String, Vec<usize>> = HashMap::new();
    groups
        .try_reserve(table.n_rows())
        .map_err(|_| ProfilerError::MemoryExhausted("particionamento de linhas".to_string()))?;
    for (i, row) in table.rows.iter().enumerate() {
        groups.entry(projection_key(row, cols)).or_default().push(i);
    }
    Ok(groups)
}

/// Fração de linhas que violam lhs → rhs dentro das partições dadas
pub(crate) fn fd_error(table: &Table, groups: &HashMap<String, Vec<usize>>, rhs: usize) -> f64 {
    let mut violations = 0usize;
    for rows in groups.values() {
        if rows.len() < 2 {
            continue;
        }
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for &r in rows {
            *counts.entry(table.rows[r][rhs].as_str()).or_insert(0) += 1;
        }
        let dominant = counts.values().copied().max().unwrap_or(0);
        violations += rows.len() - dominant;
    }
    violations as f64 / table.n_rows().max(1) as f64
}

fn combinations(items: &[usize], size: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    let mut current = Vec::with_capacity(size);
    fn step(items: &[usize], size: usize, start: usize, current: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if current.len() == size {
            out.push(current.clone());
            return;
        }
        for i in start..items.len() {
            current.push(items[i]);
            step(items, size, i + 1, current, out);
            current.pop();
        }
    }
    step(items, size, 0, &mut current, &mut out);
    out
}

fn column_names(table: &Table, cols: &[usize]) -> Vec<String> {
    cols.iter().map(|&c| table.columns[c].clone()).collect()
}

fn numeric_columns(table: &Table) -> Vec<(usize, Vec<f64>)> {
    (0..table.n_cols())
        .filter_map(|c| table.numeric_column(c).map(|v| (c, v)))
        .collect()
}

// ---------------------------------------------------------------------------
// Busca de dependências funcionais (compartilhada por fd, afd, sfd, md, dc)

fn fds_for_rhs(
    table: &Table,
    rhs: usize,
    max_lhs: usize,
    error: f64,
) -> ProfilerResult<Vec<Vec<usize>>> {
    let others: Vec<usize> = (0..table.n_cols()).filter(|&c| c != rhs).collect();
    let mut holding: Vec<Vec<usize>> = Vec::new();
    for size in 1..=max_lhs.min(others.len()) {
        for combo in combinations(&others, size) {
            // minimalidade: supersets de um lhs já válido são redundantes
            if holding.iter().any(|h| h.iter().all(|c| combo.contains(c))) {
                continue;
            }
            let groups = partition(table, &combo)?;
            if fd_error(table, &groups, rhs) <= error {
                holding.push(combo);
            }
        }
    }
    Ok(holding)
}

fn mine_fds(table: &Table, max_lhs: usize, error: f64) -> ProfilerResult<Vec<Primitive>> {
    if table.n_cols() < 2 {
        return Ok(Vec::new());
    }
    let per_rhs: Vec<ProfilerResult<Vec<Primitive>>> = (0..table.n_cols())
        .into_par_iter()
        .map(|rhs| {
            let found = fds_for_rhs(table, rhs, max_lhs, error)?;
            Ok(found
                .into_iter()
                .map(|lhs| Primitive::Dependency {
                    lhs: column_names(table, &lhs),
                    rhs: vec![table.columns[rhs].clone()],
                })
                .collect())
        })
        .collect();

    let mut fds = Vec::new();
    for chunk in per_rhs {
        fds.extend(chunk?);
    }
    Ok(fds)
}

/// Minerador de dependências funcionais exatas e aproximadas
pub struct FdMiner {
    result_key: &'static str,
    error: f64,
    max_lhs: usize,
    threads: usize,
    table: Option<Table>,
    results: ResultMap,
}

impl FdMiner {
    pub fn new(result_key: &'static str, params: &AlgoParams, default_error: f64) -> Self {
        Self {
            result_key,
            error: param_f64(params, crate::types::ERROR_PARAM).unwrap_or(default_error),
            max_lhs: param_usize(params, "max_lhs").unwrap_or(2),
            threads: param_usize(params, crate::types::THREADS_PARAM).unwrap_or(1).max(1),
            table: None,
            results: ResultMap::new(),
        }
    }
}

impl MiningAlgorithm for FdMiner {
    fn load_data(&mut self, table: &Table) -> ProfilerResult<()> {
        self.table = Some(table.clone());
        Ok(())
    }

    fn execute(&mut self) -> ProfilerResult<()> {
        let table = self.table.as_ref().ok_or_else(not_loaded)?;
        debug!("Mineração de FDs com max_lhs={} error={}", self.max_lhs, self.error);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .map_err(|e| ProfilerError::Internal(format!("pool de threads: {}", e)))?;
        let fds = pool.install(|| mine_fds(table, self.max_lhs, self.error))?;
        self.results.insert(self.result_key.to_string(), fds);
        Ok(())
    }

    fn get_results(&self) -> ResultMap {
        self.results.clone()
    }
}

// ---------------------------------------------------------------------------
// Chaves de unicidade (ucc, aucc)

pub struct UccMiner {
    result_key: &'static str,
    error: f64,
    max_cols: usize,
    table: Option<Table>,
    results: ResultMap,
}

impl UccMiner {
    pub fn new(result_key: &'static str, params: &AlgoParams, default_error: f64) -> Self {
        Self {
            result_key,
            error: param_f64(params, crate::types::ERROR_PARAM).unwrap_or(default_error),
            max_cols: param_usize(params, "max_cols").unwrap_or(3),
            table: None,
            results: ResultMap::new(),
        }
    }
}

impl MiningAlgorithm for UccMiner {
    fn load_data(&mut self, table: &Table) -> ProfilerResult<()> {
        self.table = Some(table.clone());
        Ok(())
    }

    fn execute(&mut self) -> ProfilerResult<()> {
        let table = self.table.as_ref().ok_or_else(not_loaded)?;
        let all: Vec<usize> = (0..table.n_cols()).collect();
        let mut holding: Vec<Vec<usize>> = Vec::new();
        for size in 1..=self.max_cols.min(table.n_cols()) {
            for combo in combinations(&all, size) {
                if holding.iter().any(|h| h.iter().all(|c| combo.contains(c))) {
                    continue;
                }
                let groups = partition(table, &combo)?;
                let duplicated: usize = groups.values().map(|g| g.len() - 1).sum();
                if duplicated as f64 / table.n_rows().max(1) as f64 <= self.error {
                    holding.push(combo);
                }
            }
        }
        let uccs = holding
            .into_iter()
            .map(|cols| Primitive::ColumnSet { columns: column_names(table, &cols) })
            .collect();
        self.results.insert(self.result_key.to_string(), uccs);
        Ok(())
    }

    fn get_results(&self) -> ResultMap {
        self.results.clone()
    }
}

// ---------------------------------------------------------------------------
// Inclusões unárias (ind, aind)

pub struct IndMiner {
    result_key: &'static str,
    error: f64,
    table: Option<Table>,
    results: ResultMap,
}

impl IndMiner {
    pub fn new(result_key: &'static str, params: &AlgoParams, default_error: f64) -> Self {
        Self {
            result_key,
            error: param_f64(params, crate::types::ERROR_PARAM).unwrap_or(default_error),
            table: None,
            results: ResultMap::new(),
        }
    }
}

impl MiningAlgorithm for IndMiner {
    fn load_data(&mut self, table: &Table) -> ProfilerResult<()> {
        self.table = Some(table.clone());
        Ok(())
    }

    fn execute(&mut self) -> ProfilerResult<()> {
        let table = self.table.as_ref().ok_or_else(not_loaded)?;
        let distinct: Vec<HashSet<&str>> = (0..table.n_cols())
            .map(|c| table.column_values(c).collect())
            .collect();

        let mut inds = Vec::new();
        for dep in 0..table.n_cols() {
            for referenced in 0..table.n_cols() {
                if dep == referenced || distinct[dep].is_empty() {
                    continue;
                }
                let missing =
                    distinct[dep].iter().filter(|v| !distinct[referenced].contains(*v)).count();
                if missing as f64 / distinct[dep].len() as f64 <= self.error {
                    inds.push(Primitive::Inclusion {
                        dependent: table.columns[dep].clone(),
                        referenced: table.columns[referenced].clone(),
                    });
                }
            }
        }
        self.results.insert(self.result_key.to_string(), inds);
        Ok(())
    }

    fn get_results(&self) -> ResultMap {
        self.results.clone()
    }
}

// ---------------------------------------------------------------------------
// Dependências de ordem (od: fastod e order)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OdVariant {
    Fastod,
    Order,
}

#[derive(Clone)]
enum OrdValue {
    Num(f64),
    Text(String),
}

fn ordering_column(table: &Table, idx: usize) -> Vec<OrdValue> {
    match table.numeric_column(idx) {
        Some(nums) => nums.into_iter().map(OrdValue::Num).collect(),
        None => table.column_values(idx).map(|v| OrdValue::Text(v.to_string())).collect(),
    }
}

fn cmp_ord(a: &OrdValue, b: &OrdValue) -> std::cmp::Ordering {
    match (a, b) {
        (OrdValue::Num(x), OrdValue::Num(y)) => x.total_cmp(y),
        (OrdValue::Text(x), OrdValue::Text(y)) => x.cmp(y),
        (OrdValue::Num(_), OrdValue::Text(_)) => std::cmp::Ordering::Less,
        (OrdValue::Text(_), OrdValue::Num(_)) => std::cmp::Ordering::Greater,
    }
}

pub struct OdMiner {
    variant: OdVariant,
    table: Option<Table>,
    results: ResultMap,
}

impl OdMiner {
    pub fn new(variant: OdVariant) -> Self {
        Self { variant, table: None, results: ResultMap::new() }
    }

    fn dependency(table: &Table, lhs: usize, rhs: usize) -> Primitive {
        Primitive::Dependency {
            lhs: vec![table.columns[lhs].clone()],
            rhs: vec![table.columns[rhs].clone()],
        }
    }
}

impl MiningAlgorithm for OdMiner {
    fn load_data(&mut self, table: &Table) -> ProfilerResult<()> {
        self.table = Some(table.clone());
        Ok(())
    }

    fn execute(&mut self) -> ProfilerResult<()> {
        let table = self.table.as_ref().ok_or_else(not_loaded)?;
        let ordered: Vec<Vec<OrdValue>> =
            (0..table.n_cols()).map(|c| ordering_column(table, c)).collect();

        let mut asc = Vec::new();
        let mut desc = Vec::new();
        let mut simple = Vec::new();

        for lhs in 0..table.n_cols() {
            let mut order: Vec<usize> = (0..table.n_rows()).collect();
            order.sort_by(|&a, &b| cmp_ord(&ordered[lhs][a], &ordered[lhs][b]));

            for rhs in 0..table.n_cols() {
                if lhs == rhs {
                    continue;
                }
                let mut is_asc = true;
                let mut is_desc = true;
                let mut is_simple = true;
                for w in order.windows(2) {
                    let tie = cmp_ord(&ordered[lhs][w[0]], &ordered[lhs][w[1]])
                        == std::cmp::Ordering::Equal;
                    let cmp = cmp_ord(&ordered[rhs][w[0]], &ordered[rhs][w[1]]);
                    if tie {
                        if cmp != std::cmp::Ordering::Equal {
                            is_simple = false;
                        }
                        continue;
                    }
                    if cmp == std::cmp::Ordering::Greater {
                        is_asc = false;
                    }
                    if cmp == std::cmp::Ordering::Less {
                        is_desc = false;
                    }
                }
                if is_asc {
                    asc.push(Self::dependency(table, lhs, rhs));
                }
                if is_desc {
                    desc.push(Self::dependency(table, lhs, rhs));
                }
                if is_simple {
                    simple.push(Self::dependency(table, lhs, rhs));
                }
            }
        }

        match self.variant {
            OdVariant::Fastod => {
                self.results.insert("ASC_OD".to_string(), asc);
                self.results.insert("DESC_OD".to_string(), desc);
                self.results.insert("SIMPLE_OD".to_string(), simple);
            }
            OdVariant::Order => {
                self.results.insert("OD".to_string(), asc);
            }
        }
        Ok(())
    }

    fn get_results(&self) -> ResultMap {
        self.results.clone()
    }
}

// ---------------------------------------------------------------------------
// Regras de associação (ar: apriori)

pub struct ArMiner {
    minsup: f64,
    minconf: f64,
    table: Option<Table>,
    results: ResultMap,
}

impl ArMiner {
    pub fn new(params: &AlgoParams) -> Self {
        Self {
            minsup: param_f64(params, "minsup").unwrap_or(0.3),
            minconf: param_f64(params, "minconf").unwrap_or(0.5),
            table: None,
            results: ResultMap::new(),
        }
    }
}

impl MiningAlgorithm for ArMiner {
    fn load_data(&mut self, table: &Table) -> ProfilerResult<()> {
        self.table = Some(table.clone());
        Ok(())
    }

    fn execute(&mut self) -> ProfilerResult<()> {
        let table = self.table.as_ref().ok_or_else(not_loaded)?;
        let transactions: Vec<HashSet<String>> = table
            .rows
            .iter()
            .map(|row| row.iter().filter(|c| !c.trim().is_empty()).cloned().collect())
            .collect();
        let n = transactions.len().max(1) as f64;
        let support = |items: &[String]| -> f64 {
            transactions.iter().filter(|t| items.iter().all(|i| t.contains(i))).count() as f64 / n
        };

        // itemsets frequentes de tamanho 1..3, estilo apriori
        let mut singles: Vec<String> = transactions
            .iter()
            .flat_map(|t| t.iter().cloned())
            .collect::<HashSet<_>>()
            .into_iter()
            .filter(|i| support(std::slice::from_ref(i)) >= self.minsup)
            .collect();
        singles.sort();

        let mut frequent: Vec<Vec<String>> = singles.iter().map(|i| vec![i.clone()]).collect();
        let mut level = frequent.clone();
        for _ in 0..2 {
            let mut next = Vec::new();
            for set in &level {
                for item in &singles {
                    if set.last().map(|l| l < item).unwrap_or(true) {
                        let mut candidate = set.clone();
                        candidate.push(item.clone());
                        if support(&candidate) >= self.minsup {
                            next.push(candidate);
                        }
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frequent.extend(next.iter().cloned());
            level = next;
        }

        let mut rules = Vec::new();
        for itemset in frequent.iter().filter(|s| s.len() >= 2) {
            let set_support = support(itemset);
            for consequent in itemset {
                let antecedent: Vec<String> =
                    itemset.iter().filter(|i| *i != consequent).cloned().collect();
                let confidence = set_support / support(&antecedent);
                if confidence >= self.minconf {
                    rules.push(Primitive::Rule {
                        antecedent,
                        consequent: vec![consequent.clone()],
                        support: set_support,
                        confidence,
                    });
                }
            }
        }
        self.results.insert("AR".to_string(), rules);
        Ok(())
    }

    fn get_results(&self) -> ResultMap {
        self.results.clone()
    }
}

// ---------------------------------------------------------------------------
// Dependências diferenciais (dd: split)

pub struct DdMiner {
    distance: f64,
    table: Option<Table>,
    results: ResultMap,
}

impl DdMiner {
    pub fn new(params: &AlgoParams) -> Self {
        Self {
            distance: param_f64(params, "distance").unwrap_or(0.0),
            table: None,
            results: ResultMap::new(),
        }
    }
}

impl MiningAlgorithm for DdMiner {
    fn load_data(&mut self, table: &Table) -> ProfilerResult<()> {
        self.table = Some(table.clone());
        Ok(())
    }

    fn execute(&mut self) -> ProfilerResult<()> {
        let table = self.table.as_ref().ok_or_else(not_loaded)?;
        let numeric = numeric_columns(table);
        let mut dds = Vec::new();
        for (a_idx, a_vals) in &numeric {
            for (b_idx, b_vals) in &numeric {
                if a_idx == b_idx {
                    continue;
                }
                let mut bound: f64 = 0.0;
                for i in 0..a_vals.len() {
                    for j in (i + 1)..a_vals.len() {
                        if (a_vals[i] - a_vals[j]).abs() <= self.distance {
                            bound = bound.max((b_vals[i] - b_vals[j]).abs());
                        }
                    }
                }
                dds.push(Primitive::Dependency {
                    lhs: vec![format!("{}[0, {}]", table.columns[*a_idx], self.distance)],
                    rhs: vec![format!("{}[0, {}]", table.columns[*b_idx], bound)],
                });
            }
        }
        self.results.insert("DD".to_string(), dds);
        Ok(())
    }

    fn get_results(&self) -> ResultMap {
        self.results.clone()
    }
}

// ---------------------------------------------------------------------------
// Dependências funcionais condicionais (cfd: fd_first)

pub struct CfdMiner {
    minsup: f64,
    table: Option<Table>,
    results: ResultMap,
}

impl CfdMiner {
    pub fn new(params: &AlgoParams) -> Self {
        Self {
            minsup: param_f64(params, "minsup").unwrap_or(0.1),
            table: None,
            results: ResultMap::new(),
        }
    }
}

impl MiningAlgorithm for CfdMiner {
    fn load_data(&mut self, table: &Table) -> ProfilerResult<()> {
        self.table = Some(table.clone());
        Ok(())
    }

    fn execute(&mut self) -> ProfilerResult<()> {
        let table = self.table.as_ref().ok_or_else(not_loaded)?;
        let min_rows = (self.minsup * table.n_rows() as f64).ceil() as usize;
        let mut cfds = Vec::new();
        for lhs in 0..table.n_cols() {
            let groups = partition(table, &[lhs])?;
            for rows in groups.values() {
                if rows.len() < min_rows.max(1) {
                    continue;
                }
                for rhs in 0..table.n_cols() {
                    if lhs == rhs {
                        continue;
                    }
                    let first = table.rows[rows[0]][rhs].as_str();
                    if rows.iter().all(|&r| table.rows[r][rhs] == first) {
                        cfds.push(Primitive::ConditionalDependency {
                            lhs: vec![table.columns[lhs].clone()],
                            rhs: table.columns[rhs].clone(),
                            pattern: vec![(
                                table.columns[lhs].clone(),
                                table.rows[rows[0]][lhs].clone(),
                            )],
                        });
                    }
                }
            }
        }
        self.results.insert("CFD".to_string(), cfds);
        Ok(())
    }

    fn get_results(&self) -> ResultMap {
        self.results.clone()
    }
}

// ---------------------------------------------------------------------------
// Regras de associação numéricas (nar: des)

fn quartiles(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let q1 = sorted[sorted.len() / 4];
    let q3 = sorted[((sorted.len() * 3) / 4).min(sorted.len() - 1)];
    (q1, q3)
}

pub struct NarMiner {
    minconf: f64,
    table: Option<Table>,
    results: ResultMap,
}

impl NarMiner {
    pub fn new(params: &AlgoParams) -> Self {
        Self {
            minconf: param_f64(params, "minconf").unwrap_or(0.6),
            table: None,
            results: ResultMap::new(),
        }
    }
}

impl MiningAlgorithm for NarMiner {
    fn load_data(&mut self, table: &Table) -> ProfilerResult<()> {
        self.table = Some(table.clone());
        Ok(())
    }

    fn execute(&mut self) -> ProfilerResult<()> {
        let table = self.table.as_ref().ok_or_else(not_loaded)?;
        let numeric = numeric_columns(table);
        let mut rules = Vec::new();
        for (a_idx, a_vals) in &numeric {
            if a_vals.is_empty() {
                continue;
            }
            let (a_lo, a_hi) = quartiles(a_vals);
            let selected: Vec<usize> = (0..a_vals.len())
                .filter(|&i| a_vals[i] >= a_lo && a_vals[i] <= a_hi)
                .collect();
            if selected.is_empty() {
                continue;
            }
            for (b_idx, b_vals) in &numeric {
                if a_idx == b_idx {
                    continue;
                }
                let (b_lo, b_hi) = quartiles(b_vals);
                let matching = selected
                    .iter()
                    .filter(|&&i| b_vals[i] >= b_lo && b_vals[i] <= b_hi)
                    .count();
                let confidence = matching as f64 / selected.len() as f64;
                if confidence >= self.minconf {
                    rules.push(Primitive::Rule {
                        antecedent: vec![format!(
                            "{} in [{}, {}]",
                            table.columns[*a_idx], a_lo, a_hi
                        )],
                        consequent: vec![format!(
                            "{} in [{}, {}]",
                            table.columns[*b_idx], b_lo, b_hi
                        )],
                        support: matching as f64 / table.n_rows().max(1) as f64,
                        confidence,
                    });
                }
            }
        }
        self.results.insert("NAR".to_string(), rules);
        Ok(())
    }

    fn get_results(&self) -> ResultMap {
        self.results.clone()
    }
}

// ---------------------------------------------------------------------------
// Restrições de negação (dc: fastadc)

pub struct DcMiner {
    table: Option<Table>,
    results: ResultMap,
}

impl DcMiner {
    pub fn new(_params: &AlgoParams) -> Self {
        Self { table: None, results: ResultMap::new() }
    }
}

impl MiningAlgorithm for DcMiner {
    fn load_data(&mut self, table: &Table) -> ProfilerResult<()> {
        self.table = Some(table.clone());
        Ok(())
    }

    fn execute(&mut self) -> ProfilerResult<()> {
        let table = self.table.as_ref().ok_or_else(not_loaded)?;
        // DCs derivadas das FDs unárias exatas: ¬(t.A = s.A ∧ t.B ≠ s.B)
        let mut dcs = Vec::new();
        for rhs in 0..table.n_cols() {
            for lhs in fds_for_rhs(table, rhs, 1, 0.0)? {
                dcs.push(Primitive::DenialConstraint {
                    predicates: vec![
                        format!("t.{} == s.{}", table.columns[lhs[0]], table.columns[lhs[0]]),
                        format!("t.{} != s.{}", table.columns[rhs], table.columns[rhs]),
                    ],
                });
            }
        }
        self.results.insert("DC".to_string(), dcs);
        Ok(())
    }

    fn get_results(&self) -> ResultMap {
        self.results.clone()
    }
}

// ---------------------------------------------------------------------------
// Restrições algébricas (ac)

pub struct AcMiner {
    operation: String,
    table: Option<Table>,
    results: ResultMap,
}

impl AcMiner {
    pub fn new(params: &AlgoParams) -> Self {
        Self {
            operation: param_str(params, "operation").unwrap_or("-").to_string(),
            table: None,
            results: ResultMap::new(),
        }
    }
}

impl MiningAlgorithm for AcMiner {
    fn load_data(&mut self, table: &Table) -> ProfilerResult<()> {
        self.table = Some(table.clone());
        Ok(())
    }

    fn execute(&mut self) -> ProfilerResult<()> {
        let table = self.table.as_ref().ok_or_else(not_loaded)?;
        let numeric = numeric_columns(table);
        let mut all_ranges = Vec::new();
        let mut all_exceptions = Vec::new();

        for (a_pos, (a_idx, a_vals)) in numeric.iter().enumerate() {
            for (b_idx, b_vals) in numeric.iter().skip(a_pos + 1) {
                let mut derived: Vec<(usize, f64)> = a_vals
                    .iter()
                    .zip(b_vals.iter())
                    .enumerate()
                    .map(|(row, (a, b))| {
                        let v = if self.operation == "+" { a + b } else { a - b };
                        (row, v)
                    })
                    .collect();
                derived.sort_by(|x, y| x.1.total_cmp(&y.1));

                // clusters separados por saltos anormais na sequência ordenada
                let span = derived.last().map(|l| l.1).unwrap_or(0.0)
                    - derived.first().map(|f| f.1).unwrap_or(0.0);
                let gap_limit = if derived.len() > 1 { span / derived.len() as f64 * 5.0 } else { 0.0 };

                let mut clusters: Vec<Vec<(usize, f64)>> = Vec::new();
                for entry in derived {
                    let split = match clusters.last().and_then(|c| c.last()) {
                        Some(&(_, prev)) => gap_limit > 0.0 && entry.1 - prev > gap_limit,
                        None => true,
                    };
                    if split {
                        clusters.push(vec![entry]);
                    } else if let Some(cluster) = clusters.last_mut() {
                        cluster.push(entry);
                    }
                }

                let multi = clusters.len() > 1;
                let mut ranges = Vec::new();
                let mut exception_rows = Vec::new();
                for cluster in &clusters {
                    if multi && cluster.len() == 1 {
                        exception_rows.push(cluster[0].0);
                    } else if let (Some(first), Some(last)) = (cluster.first(), cluster.last()) {
                        ranges.push((first.1, last.1));
                    }
                }
                all_ranges.push(Primitive::Ranges {
                    column_indices: vec![*a_idx, *b_idx],
                    ranges,
                });
                if !exception_rows.is_empty() {
                    all_exceptions.push(Primitive::Exceptions {
                        column_pairs: vec![(*a_idx, *b_idx)],
                        row_indices: exception_rows,
                    });
                }
            }
        }
        self.results.insert("AC_Ranges".to_string(), all_ranges);
        self.results.insert("AC_Exceptions".to_string(), all_exceptions);
        Ok(())
    }

    fn get_results(&self) -> ResultMap {
        self.results.clone()
    }
}

// ---------------------------------------------------------------------------
// Dependências suaves (sfd): FDs exatas + correlações numéricas

fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (a, b) in x.iter().zip(y.iter()) {
        cov += (a - mean_x) * (b - mean_y);
        var_x += (a - mean_x).powi(2);
        var_y += (b - mean_y).powi(2);
    }
    if var_x == 0.0 || var_y == 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

pub struct SfdMiner {
    min_cor: f64,
    table: Option<Table>,
    results: ResultMap,
}

impl SfdMiner {
    pub fn new(params: &AlgoParams) -> Self {
        Self {
            min_cor: param_f64(params, "min_cor").unwrap_or(0.8),
            table: None,
            results: ResultMap::new(),
        }
    }
}

impl MiningAlgorithm for SfdMiner {
    fn load_data(&mut self, table: &Table) -> ProfilerResult<()> {
        self.table = Some(table.clone());
        Ok(())
    }

    fn execute(&mut self) -> ProfilerResult<()> {
        let table = self.table.as_ref().ok_or_else(not_loaded)?;
        self.results.insert("FD".to_string(), mine_fds(table, 1, 0.0)?);

        let numeric = numeric_columns(table);
        let mut correlations = Vec::new();
        for (a_pos, (a_idx, a_vals)) in numeric.iter().enumerate() {
            for (b_idx, b_vals) in numeric.iter().skip(a_pos + 1) {
                let coefficient = pearson(a_vals, b_vals);
                if coefficient.abs() >= self.min_cor {
                    correlations.push(Primitive::Correlation {
                        left: table.columns[*a_idx].clone(),
                        right: table.columns[*b_idx].clone(),
                        coefficient,
                    });
                }
            }
        }
        self.results.insert("Correlations".to_string(), correlations);
        Ok(())
    }

    fn get_results(&self) -> ResultMap {
        self.results.clone()
    }
}

// ---------------------------------------------------------------------------
// Dependências de casamento (md: hymd) — igualdade como similaridade

pub struct MdMiner {
    table: Option<Table>,
    results: ResultMap,
}

impl MdMiner {
    pub fn new(_params: &AlgoParams) -> Self {
        Self { table: None, results: ResultMap::new() }
    }
}

impl MiningAlgorithm for MdMiner {
    fn load_data(&mut self, table: &Table) -> ProfilerResult<()> {
        self.table = Some(table.clone());
        Ok(())
    }

    fn execute(&mut self) -> ProfilerResult<()> {
        let table = self.table.as_ref().ok_or_else(not_loaded)?;
        let mds = mine_fds(table, 1, 0.0)?
            .into_iter()
            .map(|p| match p {
                Primitive::Dependency { lhs, rhs } => Primitive::Dependency {
                    lhs: lhs.into_iter().map(|c| format!("EQ({})", c)).collect(),
                    rhs: rhs.into_iter().map(|c| format!("EQ({})", c)).collect(),
                },
                other => other,
            })
            .collect();
        self.results.insert("MD".to_string(), mds);
        Ok(())
    }

    fn get_results(&self) -> ResultMap {
        self.results.clone()
    }
}

fn not_loaded() -> ProfilerError {
    ProfilerError::Internal("dados não carregados no algoritmo".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AlgoParams;
    use serde_json::json;

    fn table(columns: &[&str], rows: &[&[&str]]) -> Table {
        Table::new(
            "t".to_string(),
            columns.iter().map(|c| c.to_string()).collect(),
            rows.iter().map(|r| r.iter().map(|c| c.to_string()).collect()).collect(),
        )
    }

    fn fd_table() -> Table {
        // id determina city e zip; zip determina city
        table(
            &["id", "zip", "city"],
            &[
                &["1", "111", "porto"],
                &["2", "111", "porto"],
                &["3", "222", "braga"],
                &["4", "333", "braga"],
            ],
        )
    }

    #[test]
    fn test_fd_miner_finds_exact_dependencies() {
        let mut miner = FdMiner::new("FD", &AlgoParams::new(), 0.0);
        let results = miner.run(&fd_table()).unwrap();
        let fds = &results["FD"];

        let rendered: Vec<String> = fds.iter().map(|p| p.to_string()).collect();
        assert!(rendered.contains(&"[zip] -> city".to_string()));
        assert!(rendered.contains(&"[id] -> zip".to_string()));
        // city não determina zip (braga tem dois zips)
        assert!(!rendered.contains(&"[city] -> zip".to_string()));
    }

    #[test]
    fn test_fd_miner_minimality() {
        let mut miner = FdMiner::new("FD", &AlgoParams::new(), 0.0);
        let results = miner.run(&fd_table()).unwrap();
        let rendered: Vec<String> = results["FD"].iter().map(|p| p.to_string()).collect();
        // [id, zip] -> city é redundante dado [id] -> city
        assert!(!rendered.iter().any(|r| r.starts_with("[id, zip]")));
    }

    #[test]
    fn test_afd_tolerates_violations() {
        let t = table(
            &["a", "b"],
            &[&["1", "x"], &["1", "x"], &["1", "x"], &["1", "y"], &["2", "z"]],
        );
        let mut exact = FdMiner::new("FD", &AlgoParams::new(), 0.0);
        assert!(exact.run(&t).unwrap()["FD"].is_empty());

        let mut params = AlgoParams::new();
        params.insert("error".to_string(), json!(0.25));
        let mut approx = FdMiner::new("AFD", &params, 0.0);
        let rendered: Vec<String> =
            approx.run(&t).unwrap()["AFD"].iter().map(|p| p.to_string()).collect();
        assert!(rendered.contains(&"[a] -> b".to_string()));
    }

    #[test]
    fn test_ucc_miner() {
        let t = table(&["id", "name"], &[&["1", "ana"], &["2", "ana"], &["3", "rui"]]);
        let mut miner = UccMiner::new("UCC", &AlgoParams::new(), 0.0);
        let rendered: Vec<String> =
            miner.run(&t).unwrap()["UCC"].iter().map(|p| p.to_string()).collect();
        assert!(rendered.contains(&"[id]".to_string()));
        assert!(!rendered.contains(&"[name]".to_string()));
        // superset de uma chave não é reportado
        assert!(!rendered.contains(&"[id, name]".to_string()));
    }

    #[test]
    fn test_ind_miner() {
        let t = table(&["sub", "sup"], &[&["a", "a"], &["b", "b"], &["a", "c"]]);
        let mut miner = IndMiner::new("IND", &AlgoParams::new(), 0.0);
        let rendered: Vec<String> =
            miner.run(&t).unwrap()["IND"].iter().map(|p| p.to_string()).collect();
        assert!(rendered.contains(&"sub ⊆ sup".to_string()));
        assert!(!rendered.contains(&"sup ⊆ sub".to_string()));
    }

    #[test]
    fn test_od_miner_asc() {
        let t = table(&["x", "y"], &[&["1", "10"], &["2", "20"], &["3", "30"]]);
        let mut miner = OdMiner::new(OdVariant::Fastod);
        let results = miner.run(&t).unwrap();
        let asc: Vec<String> = results["ASC_OD"].iter().map(|p| p.to_string()).collect();
        assert!(asc.contains(&"[x] -> y".to_string()));
        assert!(results.contains_key("DESC_OD"));
        assert!(results.contains_key("SIMPLE_OD"));
    }

    #[test]
    fn test_ar_miner_finds_frequent_rule() {
        let t = table(
            &["a", "b"],
            &[&["pão", "leite"], &["pão", "leite"], &["pão", "leite"], &["pão", "café"]],
        );
        let mut params = AlgoParams::new();
        params.insert("minsup".to_string(), json!(0.5));
        params.insert("minconf".to_string(), json!(0.7));
        let mut miner = ArMiner::new(&params);
        let rules = &miner.run(&t).unwrap()["AR"];
        assert!(rules.iter().any(|r| matches!(
            r,
            Primitive::Rule { antecedent, consequent, .. }
                if antecedent == &vec!["leite".to_string()] && consequent == &vec!["pão".to_string()]
        )));
    }

    #[test]
    fn test_cfd_miner_constant_pattern() {
        let t = table(
            &["country", "capital"],
            &[
                &["pt", "lisboa"],
                &["pt", "lisboa"],
                &["br", "brasilia"],
                &["br", "rio"],
            ],
        );
        let mut miner = CfdMiner::new(&AlgoParams::new());
        let cfds = &miner.run(&t).unwrap()["CFD"];
        assert!(cfds.iter().any(|c| matches!(
            c,
            Primitive::ConditionalDependency { pattern, .. }
                if pattern == &vec![("country".to_string(), "pt".to_string())]
        )));
    }

    #[test]
    fn test_dc_miner_from_unary_fds() {
        let dcs_map = {
            let mut miner = DcMiner::new(&AlgoParams::new());
            miner.run(&fd_table()).unwrap()
        };
        let rendered: Vec<String> = dcs_map["DC"].iter().map(|p| p.to_string()).collect();
        assert!(rendered.contains(&"!(t.zip == s.zip and t.city != s.city)".to_string()));
    }

    #[test]
    fn test_sfd_miner_correlation() {
        let t = table(
            &["x", "y"],
            &[&["1", "2"], &["2", "4"], &["3", "6"], &["4", "8"]],
        );
        let mut miner = SfdMiner::new(&AlgoParams::new());
        let results = miner.run(&t).unwrap();
        assert!(results["Correlations"].iter().any(|c| matches!(
            c,
            Primitive::Correlation { coefficient, .. } if (coefficient - 1.0).abs() < 1e-9
        )));
    }

    #[test]
    fn test_pearson_constant_column_is_zero() {
        assert_eq!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]), 0.0);
    }
}
