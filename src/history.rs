//! Histórico durável de execuções: um único documento JSON com escrita
//! atômica e um único escritor por processo
//!
//! O arquivo é o único estado durável do sistema; cada mutação faz o ciclo
//! carregar → modificar → salvar sob o lock interno.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{
    AlgoParams, AlgorithmName, ProfilerError, ProfilerResult, RulesAction, RunRecord, TaskStatus,
};

const APP_DIR_NAME: &str = "profile_mesh";
const HISTORY_FILE_NAME: &str = "history.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct HistoryDb {
    runs: Vec<RunRecord>,
}

/// Campos necessários para marcar um sucesso
#[derive(Debug, Clone)]
pub struct SuccessInfo {
    pub task_id: String,
    pub timestamp_start: f64,
    pub execution_time: f64,
    pub result_path: Option<String>,
    pub instances: usize,
}

/// Campos necessários para marcar uma falha
#[derive(Debug, Clone)]
pub struct FailureInfo {
    pub task_id: String,
    pub error_type: String,
    pub rules_decision: RulesAction,
}

/// Armazenamento do histórico de execuções
pub struct HistoryStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl HistoryStorage {
    /// Abre (ou cria) o histórico no caminho dado; sem caminho, usa o
    /// diretório de configuração do usuário
    pub fn new(path: Option<PathBuf>) -> ProfilerResult<Self> {
        let path = match path {
            Some(p) => p,
            None => default_history_path()?,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        if !path.exists() {
            let storage = Self { path, write_lock: Mutex::new(()) };
            storage.save(&HistoryDb::default())?;
            return Ok(storage);
        }
        Ok(Self { path, write_lock: Mutex::new(()) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> ProfilerResult<HistoryDb> {
        let content = fs::read_to_string(&self.path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Substituição atômica: escreve em arquivo temporário no mesmo
    /// diretório e renomeia por cima
    fn save(&self, db: &HistoryDb) -> ProfilerResult<()> {
        let parent = self
            .path
            .parent()
            .ok_or_else(|| ProfilerError::Internal("histórico sem diretório pai".to_string()))?;
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        serde_json::to_writer_pretty(&mut temp, db)?;
        temp.flush()?;
        temp.persist(&self.path)
            .map_err(|e| ProfilerError::Internal(format!("persistência do histórico: {}", e)))?;
        Ok(())
    }

    fn mutate<F: FnOnce(&mut HistoryDb)>(&self, f: F) -> ProfilerResult<()> {
        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| ProfilerError::Internal("lock do histórico envenenado".to_string()))?;
        let mut db = self.load()?;
        f(&mut db);
        self.save(&db)
    }

    /// Anexa um novo registro
    pub fn add_run(&self, record: RunRecord) -> ProfilerResult<()> {
        self.mutate(|db| db.runs.push(record))
    }

    /// Aplica uma atualização ao registro único com o task id dado; sem
    /// correspondência, nada acontece
    pub fn update_run<F: FnOnce(&mut RunRecord)>(
        &self,
        task_id: &str,
        update: F,
    ) -> ProfilerResult<()> {
        self.mutate(|db| {
            if let Some(record) = db.runs.iter_mut().find(|r| r.task_id == task_id) {
                update(record);
            } else {
                warn!("Registro de tarefa {} não encontrado para atualização", task_id);
            }
        })
    }

    /// Marca um registro como sucesso, derivando `timestamp_end`
    pub fn mark_success(&self, info: SuccessInfo) -> ProfilerResult<()> {
        debug!("Marcando sucesso de task_id={}", info.task_id);
        let timestamp_end = info.timestamp_start + info.execution_time;
        let task_id = info.task_id.clone();
        self.update_run(&task_id, move |record| {
            record.timestamp_end = Some(timestamp_end);
            record.execution_time = Some(info.execution_time);
            record.result = Some(TaskStatus::Success);
            record.result_path = info.result_path.clone();
            record.instances = Some(info.instances);
        })
    }

    /// Marca um registro como falha com o tipo de erro e a decisão tomada
    pub fn mark_failure(&self, info: FailureInfo) -> ProfilerResult<()> {
        debug!("Marcando falha de task_id={} ({})", info.task_id, info.error_type);
        let task_id = info.task_id.clone();
        self.update_run(&task_id, move |record| {
            record.result = Some(TaskStatus::Failure);
            record.error_type = Some(info.error_type.clone());
            record.rules_decision = Some(info.rules_decision);
        })
    }

    /// Todos os registros de um run, na ordem de inserção
    pub fn get_tasks_by_run_id(&self, run_id: &str) -> ProfilerResult<Vec<RunRecord>> {
        let db = self.load()?;
        Ok(db
            .runs
            .into_iter()
            .filter(|r| r.run_id.as_deref() == Some(run_id))
            .collect())
    }

    /// Último sucesso com igualdade exata em (algoritmo, params, impressão
    /// digital, linhas, colunas); impressão digital ausente desabilita a
    /// deduplicação
    ///
    /// O parâmetro `threads` injetado na execução é um artefato do
    /// scheduler, não parte da identidade da tarefa, e fica fora da
    /// comparação.
    pub fn get_last_run_for_algo_and_data(
        &self,
        algorithm: AlgorithmName,
        params: &AlgoParams,
        data_hash: Option<&str>,
        rows: usize,
        cols: usize,
    ) -> ProfilerResult<Option<RunRecord>> {
        let hash = match data_hash {
            Some(h) => h,
            None => return Ok(None),
        };

        let wanted = identity_params(params);
        let db = self.load()?;
        Ok(db.runs.into_iter().rev().find(|r| {
            r.data_hash.as_deref() == Some(hash)
                && r.algorithm == Some(algorithm)
                && r.params.as_ref().map(|p| identity_params(p)) == Some(wanted.clone())
                && r.result == Some(TaskStatus::Success)
                && r.rows == Some(rows)
                && r.cols == Some(cols)
        }))
    }
}

fn identity_params(params: &AlgoParams) -> AlgoParams {
    let mut cleaned = params.clone();
    cleaned.remove(crate::types::THREADS_PARAM);
    cleaned
}

fn default_history_path() -> ProfilerResult<PathBuf> {
    let base = dirs::config_dir().ok_or_else(|| {
        ProfilerError::Configuration("diretório de configuração do usuário indisponível".to_string())
    })?;
    Ok(base.join(APP_DIR_NAME).join(HISTORY_FILE_NAME))
}
