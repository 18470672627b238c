//! Definições de tipos fundamentais do ProfileMesh

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dataset::Table;

/// Identificador único de tarefa
pub type TaskId = Uuid;

/// Parâmetros de algoritmo (mapa string → valor JSON)
pub type AlgoParams = BTreeMap<String, serde_json::Value>;

/// Resultados de mineração: tipo de primitiva → instâncias encontradas
pub type ResultMap = BTreeMap<String, Vec<Primitive>>;

/// Sentinela usada no lugar de "sem timeout" (segundos)
pub const INFINITY_TIMEOUT: u64 = 1_000_000_000;

/// Nome do parâmetro de paralelismo vertical injetado pelo scheduler
pub const THREADS_PARAM: &str = "threads";

/// Nome do parâmetro de erro que distingue variantes aproximadas
pub const ERROR_PARAM: &str = "error";

/// Famílias de primitivas suportadas
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlgorithmFamily {
    Fd,
    Afd,
    Cfd,
    Ind,
    Aind,
    Ucc,
    Aucc,
    Dd,
    Ar,
    Od,
    Nar,
    Dc,
    Ac,
    Sfd,
    Md,
}

impl AlgorithmFamily {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmFamily::Fd => "fd",
            AlgorithmFamily::Afd => "afd",
            AlgorithmFamily::Cfd => "cfd",
            AlgorithmFamily::Ind => "ind",
            AlgorithmFamily::Aind => "aind",
            AlgorithmFamily::Ucc => "ucc",
            AlgorithmFamily::Aucc => "aucc",
            AlgorithmFamily::Dd => "dd",
            AlgorithmFamily::Ar => "ar",
            AlgorithmFamily::Od => "od",
            AlgorithmFamily::Nar => "nar",
            AlgorithmFamily::Dc => "dc",
            AlgorithmFamily::Ac => "ac",
            AlgorithmFamily::Sfd => "sfd",
            AlgorithmFamily::Md => "md",
        }
    }
}

impl fmt::Display for AlgorithmFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Algoritmos de mineração conhecidos
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmName {
    Default,
    Split,
    Apriori,
    Fastod,
    Order,
    FdFirst,
    Pyroucc,
    Hpivalid,
    Hyucc,
    Spider,
    Faida,
    Pyro,
    Tane,
    Hyfd,
    Dfd,
    Aid,
    Depminer,
    Eulerfd,
    Fastfds,
    Fdep,
    Fun,
    Pfdtane,
    Des,
    Fastadc,
    Acalgorithm,
    Sfdalgorithm,
    Hymd,
}

impl AlgorithmName {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgorithmName::Default => "default",
            AlgorithmName::Split => "split",
            AlgorithmName::Apriori => "apriori",
            AlgorithmName::Fastod => "fastod",
            AlgorithmName::Order => "order",
            AlgorithmName::FdFirst => "fd_first",
            AlgorithmName::Pyroucc => "pyroucc",
            AlgorithmName::Hpivalid => "hpivalid",
            AlgorithmName::Hyucc => "hyucc",
            AlgorithmName::Spider => "spider",
            AlgorithmName::Faida => "faida",
            AlgorithmName::Pyro => "pyro",
            AlgorithmName::Tane => "tane",
            AlgorithmName::Hyfd => "hyfd",
            AlgorithmName::Dfd => "dfd",
            AlgorithmName::Aid => "aid",
            AlgorithmName::Depminer => "depminer",
            AlgorithmName::Eulerfd => "eulerfd",
            AlgorithmName::Fastfds => "fastfds",
            AlgorithmName::Fdep => "fdep",
            AlgorithmName::Fun => "fun",
            AlgorithmName::Pfdtane => "pfdtane",
            AlgorithmName::Des => "des",
            AlgorithmName::Fastadc => "fastadc",
            AlgorithmName::Acalgorithm => "acalgorithm",
            AlgorithmName::Sfdalgorithm => "sfdalgorithm",
            AlgorithmName::Hymd => "hymd",
        }
    }
}

impl fmt::Display for AlgorithmName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Estratégia de recuperação aplicada quando uma tarefa falha
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    AutoDecision,
    Ask,
    TimeoutGrow,
    ShrinkSearch,
    SingleRun,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Strategy::AutoDecision => "auto_decision",
            Strategy::Ask => "ask",
            Strategy::TimeoutGrow => "timeout_grow",
            Strategy::ShrinkSearch => "shrink_search",
            Strategy::SingleRun => "single_run",
        };
        f.write_str(name)
    }
}

/// Status de uma tarefa ao longo do ciclo de vida
///
/// Os nomes são gravados literalmente no histórico e comparados pelo motor
/// de regras, portanto a grafia é sensível a maiúsculas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Success,
    Failure,
    MemoryError,
    Error,
    NotStarted,
    StartingFailure,
    Running,
    Timeout,
    GlobalTimeout,
    Killed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Success => "Success",
            TaskStatus::Failure => "Failure",
            TaskStatus::MemoryError => "MemoryError",
            TaskStatus::Error => "Error",
            TaskStatus::NotStarted => "NotStarted",
            TaskStatus::StartingFailure => "StartingFailure",
            TaskStatus::Running => "Running",
            TaskStatus::Timeout => "Timeout",
            TaskStatus::GlobalTimeout => "GlobalTimeout",
            TaskStatus::Killed => "Killed",
            TaskStatus::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instância de primitiva minerada, em representação canônica serializável
///
/// As variantes cobrem as formas produzidas pelos kernels de mineração; a
/// renderização `Display` é a usada no `result.txt` e nas comparações.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    /// Dependência lhs → rhs (FD, AFD, OD em lista, MD, DD)
    Dependency { lhs: Vec<String>, rhs: Vec<String> },
    /// Conjunto de colunas (UCC, AUCC)
    ColumnSet { columns: Vec<String> },
    /// Inclusão unária entre colunas (IND, AIND)
    Inclusion { dependent: String, referenced: String },
    /// Regra de associação com suporte e confiança (AR, NAR)
    Rule {
        antecedent: Vec<String>,
        consequent: Vec<String>,
        support: f64,
        confidence: f64,
    },
    /// Dependência condicional com tableau de constantes (CFD)
    ConditionalDependency {
        lhs: Vec<String>,
        rhs: String,
        pattern: Vec<(String, String)>,
    },
    /// Faixas algébricas sobre pares de colunas (AC)
    Ranges {
        column_indices: Vec<usize>,
        ranges: Vec<(f64, f64)>,
    },
    /// Exceções às faixas algébricas (AC)
    Exceptions {
        column_pairs: Vec<(usize, usize)>,
        row_indices: Vec<usize>,
    },
    /// Correlação numérica entre colunas (SFD)
    Correlation {
        left: String,
        right: String,
        coefficient: f64,
    },
    /// Restrição de negação (DC)
    DenialConstraint { predicates: Vec<String> },
}

impl fmt::Display for Primitive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Primitive::Dependency { lhs, rhs } => {
                write!(f, "[{}] -> {}", lhs.join(", "), rhs.join(", "))
            }
            Primitive::ColumnSet { columns } => write!(f, "[{}]", columns.join(", ")),
            Primitive::Inclusion { dependent, referenced } => {
                write!(f, "{} ⊆ {}", dependent, referenced)
            }
            Primitive::Rule { antecedent, consequent, support, confidence } => write!(
                f,
                "{{{}}} => {{{}}} (sup: {:.3}, conf: {:.3})",
                antecedent.join(", "),
                consequent.join(", "),
                support,
                confidence
            ),
            Primitive::ConditionalDependency { lhs, rhs, pattern } => {
                let tableau: Vec<String> =
                    pattern.iter().map(|(c, v)| format!("{}={}", c, v)).collect();
                write!(f, "[{}] -> {} | ({})", lhs.join(", "), rhs, tableau.join(", "))
            }
            Primitive::Ranges { column_indices, ranges } => {
                let spans: Vec<String> =
                    ranges.iter().map(|(a, b)| format!("[{:.4}, {:.4}]", a, b)).collect();
                write!(f, "column indices: {:?}; ranges: {}", column_indices, spans.join(" "))
            }
            Primitive::Exceptions { column_pairs, row_indices } => {
                write!(f, "column pairs: {:?}; rows: {:?}", column_pairs, row_indices)
            }
            Primitive::Correlation { left, right, coefficient } => {
                write!(f, "{} ~ {} ({:.3})", left, right, coefficient)
            }
            Primitive::DenialConstraint { predicates } => {
                write!(f, "!({})", predicates.join(" and "))
            }
        }
    }
}

/// Uma tarefa de mineração pronta para execução
///
/// Imutável após a criação: um retry gera uma nova tarefa com novo id e
/// `stage + 1` via [`Task::retry`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Identificador único da tentativa
    pub task_id: TaskId,
    /// Família da primitiva minerada
    pub family: AlgorithmFamily,
    /// Algoritmo concreto dentro da família
    pub algorithm: AlgorithmName,
    /// Parâmetros repassados ao algoritmo
    pub params: AlgoParams,
    /// Tabela de entrada (compartilhada entre retries da mesma linhagem)
    pub data: Arc<Table>,
    /// Número de linhas da tabela
    pub rows: usize,
    /// Número de colunas da tabela
    pub cols: usize,
    /// Impressão digital SHA-256 do arquivo de origem
    pub data_hash: Option<String>,
    /// Timeout individual em segundos (`INFINITY_TIMEOUT` = sem limite)
    pub timeout: u64,
    /// Estratégia de recuperação
    pub strategy: Strategy,
    /// Geração de retry; a primeira tentativa é 1
    pub stage: u32,
}

impl Task {
    pub fn new(
        family: AlgorithmFamily,
        algorithm: AlgorithmName,
        params: AlgoParams,
        data: Arc<Table>,
        data_hash: Option<String>,
        timeout: Option<u64>,
        strategy: Strategy,
    ) -> Self {
        let rows = data.n_rows();
        let cols = data.n_cols();
        Self {
            task_id: Uuid::new_v4(),
            family,
            algorithm,
            params,
            data,
            rows,
            cols,
            data_hash,
            timeout: timeout.unwrap_or(INFINITY_TIMEOUT),
            strategy,
            stage: 1,
        }
    }

    /// Deriva a tarefa de retry, preservando algoritmo, família, parâmetros,
    /// impressão digital e estratégia
    pub fn retry(&self, new_table: Option<Arc<Table>>, new_timeout: Option<u64>) -> Self {
        let data = new_table.unwrap_or_else(|| Arc::clone(&self.data));
        let rows = data.n_rows();
        let cols = data.n_cols();
        Self {
            task_id: Uuid::new_v4(),
            family: self.family,
            algorithm: self.algorithm,
            params: self.params.clone(),
            data,
            rows,
            cols,
            data_hash: self.data_hash.clone(),
            timeout: new_timeout.unwrap_or(self.timeout),
            strategy: self.strategy,
            stage: self.stage + 1,
        }
    }

    /// Indica se a tarefa carrega um deadline individual real
    pub fn has_deadline(&self) -> bool {
        self.timeout != INFINITY_TIMEOUT
    }

    pub fn timeout_duration(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

/// Carga útil de um desfecho de tarefa
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OutcomePayload {
    /// Nenhum resultado entregue (estados intermediários)
    None,
    /// Mapa de primitivas mineradas
    Results(ResultMap),
    /// Nome curto do tipo de erro
    ErrorKind(String),
}

/// Desfecho de uma tarefa: status, carga útil e duração observada
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub payload: OutcomePayload,
    /// Segundos de parede em torno de execute+collect; ausente em falhas
    pub execution_secs: Option<f64>,
}

impl TaskOutcome {
    /// Desfecho sintetizado pelo processo pai (Timeout, GlobalTimeout, ...)
    pub fn synthesized(status: TaskStatus) -> Self {
        Self {
            status,
            payload: OutcomePayload::ErrorKind(status.as_str().to_string()),
            execution_secs: None,
        }
    }

    /// Marcador de estado intermediário (NotStarted, Running)
    pub fn placeholder(status: TaskStatus) -> Self {
        Self { status, payload: OutcomePayload::None, execution_secs: None }
    }

    pub fn success(results: ResultMap, execution_secs: f64) -> Self {
        Self {
            status: TaskStatus::Success,
            payload: OutcomePayload::Results(results),
            execution_secs: Some(execution_secs),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }

    /// Nome do tipo de erro visto pelo motor de regras
    pub fn error_kind(&self) -> &str {
        match &self.payload {
            OutcomePayload::ErrorKind(kind) => kind,
            _ => self.status.as_str(),
        }
    }
}

/// Registro persistido no histórico de execuções
///
/// Todos os campos são opcionais para permitir atualizações parciais: o
/// registro nasce em `NotStarted` e recebe o desfecho final depois.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub task_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<AlgorithmName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub algorithm_family: Option<AlgorithmFamily>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<AlgoParams>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cols: Option<usize>,
    /// Início em segundos desde a época Unix
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_start: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_end: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instances: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rules_decision: Option<RulesAction>,
}

/// Ação decidida pelo motor de regras
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RulesAction {
    Retry,
    Skip,
    Prune,
}

impl fmt::Display for RulesAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RulesAction::Retry => "retry",
            RulesAction::Skip => "skip",
            RulesAction::Prune => "prune",
        };
        f.write_str(name)
    }
}

/// Erros do ProfileMesh
#[derive(Debug, thiserror::Error)]
pub enum ProfilerError {
    #[error("erro de configuração: {0}")]
    Configuration(String),

    #[error("erro de I/O: {0}")]
    Io(#[from] std::io::Error),

    #[error("erro de CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("erro de serialização: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("erro de codificação binária: {0}")]
    Encoding(#[from] bincode::Error),

    #[error("perfil inválido: {0}")]
    Profile(String),

    #[error("dataset inválido: {0}")]
    Dataset(String),

    #[error("algoritmo desconhecido: {0}")]
    UnknownAlgorithm(String),

    #[error("parâmetro inválido: {0}")]
    InvalidParameter(String),

    #[error("memória esgotada durante {0}")]
    MemoryExhausted(String),

    #[error("protocolo do worker: {0}")]
    WorkerProtocol(String),

    #[error("erro interno: {0}")]
    Internal(String),
}

impl ProfilerError {
    /// Nome curto do tipo de erro, no formato gravado no histórico
    pub fn kind(&self) -> &'static str {
        match self {
            ProfilerError::Configuration(_) => "ConfigurationError",
            ProfilerError::Io(_) => "IoError",
            ProfilerError::Csv(_) => "CsvError",
            ProfilerError::Serialization(_) => "SerializationError",
            ProfilerError::Encoding(_) => "EncodingError",
            ProfilerError::Profile(_) => "ProfileError",
            ProfilerError::Dataset(_) => "DatasetError",
            ProfilerError::UnknownAlgorithm(_) => "UnknownAlgorithmError",
            ProfilerError::InvalidParameter(_) => "InvalidParameterError",
            ProfilerError::MemoryExhausted(_) => "MemoryError",
            ProfilerError::WorkerProtocol(_) => "WorkerProtocolError",
            ProfilerError::Internal(_) => "InternalError",
        }
    }
}

/// Resultado padrão do ProfileMesh
pub type ProfilerResult<T> = Result<T, ProfilerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Table;

    fn small_table() -> Arc<Table> {
        Arc::new(Table::new(
            "t".to_string(),
            vec!["a".to_string(), "b".to_string()],
            vec![
                vec!["1".to_string(), "x".to_string()],
                vec!["2".to_string(), "y".to_string()],
            ],
        ))
    }

    #[test]
    fn test_retry_increments_stage_and_changes_id() {
        let task = Task::new(
            AlgorithmFamily::Fd,
            AlgorithmName::Hyfd,
            AlgoParams::new(),
            small_table(),
            Some("hash".to_string()),
            Some(600),
            Strategy::AutoDecision,
        );
        let retry = task.retry(None, Some(900));

        assert_ne!(task.task_id, retry.task_id);
        assert_eq!(retry.stage, 2);
        assert_eq!(retry.timeout, 900);
        assert_eq!(retry.algorithm, task.algorithm);
        assert_eq!(retry.data_hash, task.data_hash);
    }

    #[test]
    fn test_missing_timeout_uses_sentinel() {
        let task = Task::new(
            AlgorithmFamily::Ucc,
            AlgorithmName::Hpivalid,
            AlgoParams::new(),
            small_table(),
            None,
            None,
            Strategy::SingleRun,
        );
        assert_eq!(task.timeout, INFINITY_TIMEOUT);
        assert!(!task.has_deadline());
    }

    #[test]
    fn test_synthesized_outcome_carries_status_name() {
        let outcome = TaskOutcome::synthesized(TaskStatus::Timeout);
        assert_eq!(outcome.error_kind(), "Timeout");
        assert!(outcome.execution_secs.is_none());
    }

    #[test]
    fn test_status_serializes_case_sensitive() {
        let json = serde_json::to_string(&TaskStatus::GlobalTimeout).unwrap();
        assert_eq!(json, "\"GlobalTimeout\"");
    }

    #[test]
    fn test_primitive_display() {
        let fd = Primitive::Dependency {
            lhs: vec!["a".to_string(), "b".to_string()],
            rhs: vec!["c".to_string()],
        };
        assert_eq!(fd.to_string(), "[a, b] -> c");

        let ucc = Primitive::ColumnSet { columns: vec!["id".to_string()] };
        assert_eq!(ucc.to_string(), "[id]");
    }
}
