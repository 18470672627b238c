//! Gerente do núcleo: o laço externo de execução
//!
//! dedup → despacho no scheduler → persistência dos desfechos → consulta ao
//! motor de regras → novas tarefas na próxima iteração, até a fila drenar.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::history::{FailureInfo, HistoryStorage, SuccessInfo};
use crate::rules::{handle_failure, FailurePrompt, RulesKnobs};
use crate::scheduler::{Scheduler, SchedulerConfig};
use crate::types::{
    OutcomePayload, ProfilerError, ProfilerResult, ResultMap, RulesAction, RunRecord, Task, TaskId,
    TaskOutcome, TaskStatus, THREADS_PARAM,
};

const RESULT_FILE_NAME: &str = "result.txt";
const SERIALIZED_DATA_DIR: &str = "serialized_data";

/// Gerente de execução de um run de perfilamento
pub struct CoreManager {
    history: Arc<HistoryStorage>,
    run_dir: PathBuf,
    run_id: String,
    knobs: RulesKnobs,
    check_results: bool,
    try_parallel: bool,
    workers: usize,
    scheduler: Scheduler,
    prompt: Box<dyn FailurePrompt>,
}

impl CoreManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        history: Arc<HistoryStorage>,
        run_dir: PathBuf,
        run_id: String,
        check_results: bool,
        try_parallel: bool,
        scheduler_config: SchedulerConfig,
        knobs: RulesKnobs,
        prompt: Box<dyn FailurePrompt>,
    ) -> Self {
        let workers = scheduler_config.workers;
        Self {
            history,
            run_dir,
            run_id,
            knobs,
            check_results,
            try_parallel,
            workers,
            scheduler: Scheduler::new(scheduler_config),
            prompt,
        }
    }

    /// Executa as tarefas iniciais até que nenhuma iteração produza retries
    pub async fn execute_tasks(&mut self, initial_tasks: Vec<Task>) -> ProfilerResult<()> {
        let mut iteration = 1u32;
        let mut tasks = initial_tasks;

        if self.check_results {
            self.check_existing_results(&mut tasks);
        }

        while !tasks.is_empty() {
            info!("=== Iteração {}: executando {} tarefas ===", iteration, tasks.len());
            let start_times = self.record_task_start(&tasks);
            let outcomes = self.scheduler.run_tasks(&tasks, self.try_parallel).await;
            self.update_tasks_params(&tasks);
            tasks = self.process_results(tasks, outcomes, &start_times);
            iteration += 1;
            // retries tendem a ser pesados em memória: a partir da segunda
            // iteração tudo roda serial
            self.try_parallel = false;
        }

        info!("Sem tarefas restantes, finalizando.");
        Ok(())
    }

    /// Passo de deduplicação: remove da fila as tarefas com sucesso prévio
    /// equivalente e reemite o artefato sob o run corrente
    fn check_existing_results(&self, tasks: &mut Vec<Task>) {
        tasks.retain(|task| {
            let previous = match self.history.get_last_run_for_algo_and_data(
                task.algorithm,
                &task.params,
                task.data_hash.as_deref(),
                task.rows,
                task.cols,
            ) {
                Ok(Some(record)) => record,
                Ok(None) => return true,
                Err(e) => {
                    warn!("Erro ao consultar o histórico para dedup: {}", e);
                    return true;
                }
            };

            match self.reuse_previous_result(&previous, task) {
                Ok(()) => false,
                Err(e) => {
                    warn!("Falha ao carregar resultado armazenado: {}", e);
                    true
                }
            }
        });
    }

    fn reuse_previous_result(&self, previous: &RunRecord, task: &Task) -> ProfilerResult<()> {
        let path = previous.result_path.as_deref().ok_or_else(|| {
            ProfilerError::Internal("registro de sucesso sem caminho de resultado".to_string())
        })?;
        let bytes = fs::read(path)?;
        let results: ResultMap = bincode::deserialize(&bytes)?;

        info!(
            "Resultado armazenado encontrado para {} com params: {:?}",
            task.algorithm, task.params
        );
        self.store_result(&results, task);

        let mut copy = previous.clone();
        copy.run_id = Some(self.run_id.clone());
        self.history.add_run(copy)?;
        Ok(())
    }

    /// Registra o início de cada tarefa no histórico antes do lançamento
    fn record_task_start(&self, tasks: &[Task]) -> HashMap<TaskId, f64> {
        let mut start_times = HashMap::new();
        for task in tasks {
            let timestamp_start = epoch_secs();
            start_times.insert(task.task_id, timestamp_start);
            let record = RunRecord {
                run_id: Some(self.run_id.clone()),
                task_id: task.task_id.to_string(),
                algorithm: Some(task.algorithm),
                algorithm_family: Some(task.family),
                params: Some(task.params.clone()),
                data_hash: task.data_hash.clone(),
                rows: Some(task.rows),
                cols: Some(task.cols),
                timestamp_start: Some(timestamp_start),
                result: Some(TaskStatus::NotStarted),
                ..RunRecord::default()
            };
            if let Err(e) = self.history.add_run(record) {
                warn!("Falha ao registrar início da tarefa {}: {}", task.task_id, e);
            }
        }
        start_times
    }

    /// Reflete no histórico o parâmetro `threads` injetado pelo scheduler
    fn update_tasks_params(&self, tasks: &[Task]) {
        let threads = if self.try_parallel { 1 } else { self.workers.max(1) };
        for task in tasks {
            let result = self.history.update_run(&task.task_id.to_string(), |record| {
                record
                    .params
                    .get_or_insert_with(Default::default)
                    .insert(THREADS_PARAM.to_string(), serde_json::Value::from(threads as u64));
            });
            if let Err(e) = result {
                warn!("Falha ao atualizar params da tarefa {}: {}", task.task_id, e);
            }
        }
    }

    /// Persiste sucessos e converte falhas em retries conforme as regras
    fn process_results(
        &mut self,
        tasks: Vec<Task>,
        outcomes: Vec<TaskOutcome>,
        start_times: &HashMap<TaskId, f64>,
    ) -> Vec<Task> {
        let mut new_tasks = Vec::new();
        for (task, outcome) in tasks.into_iter().zip(outcomes) {
            if outcome.is_success() {
                if let OutcomePayload::Results(results) = outcome.payload {
                    let blob_path = self.store_result(&results, &task);
                    let success = SuccessInfo {
                        task_id: task.task_id.to_string(),
                        timestamp_start: start_times.get(&task.task_id).copied().unwrap_or(0.0),
                        execution_time: outcome.execution_secs.unwrap_or(0.0),
                        result_path: blob_path.map(|p| p.to_string_lossy().into_owned()),
                        instances: results.values().map(|v| v.len()).sum(),
                    };
                    if let Err(e) = self.history.mark_success(success) {
                        warn!("Falha ao marcar sucesso da tarefa {}: {}", task.task_id, e);
                    }
                }
            } else {
                let error_kind = outcome.error_kind().to_string();
                self.handle_task_failure(task, &error_kind, &mut new_tasks);
            }
        }
        new_tasks
    }

    fn handle_task_failure(&mut self, task: Task, error_kind: &str, new_tasks: &mut Vec<Task>) {
        info!("Tarefa {} falhou com erro: {}", task.algorithm, error_kind);
        let decision = handle_failure(&task, error_kind, &self.knobs, self.prompt.as_mut());

        let failure = FailureInfo {
            task_id: task.task_id.to_string(),
            error_type: error_kind.to_string(),
            rules_decision: decision.action,
        };
        if let Err(e) = self.history.mark_failure(failure) {
            warn!("Falha ao marcar falha da tarefa {}: {}", task.task_id, e);
        }

        if decision.action == RulesAction::Retry {
            new_tasks
                .push(task.retry(decision.retry_params.new_table, decision.retry_params.new_timeout));
        }
    }

    /// Grava o artefato por tarefa e a linha humana no relatório cumulativo
    ///
    /// Falhas de serialização são avisos: a carga útil existe e o run segue
    /// registrado como sucesso.
    fn store_result(&self, results: &ResultMap, task: &Task) -> Option<PathBuf> {
        if let Err(e) = self.append_text_report(results, task) {
            warn!("Falha ao escrever {}: {}", RESULT_FILE_NAME, e);
        }
        match self.write_blob(results, task) {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Falha ao serializar resultado: {}", e);
                None
            }
        }
    }

    fn append_text_report(&self, results: &ResultMap, task: &Task) -> ProfilerResult<()> {
        let path = self.run_dir.join(RESULT_FILE_NAME);
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;

        writeln!(
            file,
            "{} by {} with params: {}",
            task.family.as_str().to_uppercase(),
            task.algorithm,
            serde_json::to_string(&task.params)?
        )?;
        for (kind, instances) in results {
            writeln!(file, "{}:", kind)?;
            for instance in instances {
                writeln!(file, "\t{}", instance)?;
            }
        }
        writeln!(file)?;
        Ok(())
    }

    fn write_blob(&self, results: &ResultMap, task: &Task) -> ProfilerResult<PathBuf> {
        let dir = self.run_dir.join(SERIALIZED_DATA_DIR);
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{}_{}.bin", task.algorithm, task.task_id));
        fs::write(&path, bincode::serialize(results)?)?;
        Ok(path)
    }
}

/// Segundos desde a época Unix, com fração
pub fn epoch_secs() -> f64 {
    chrono::Utc::now().timestamp_millis() as f64 / 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Table;
    use crate::rules::FailurePrompt;
    use crate::types::{AlgoParams, AlgorithmFamily, AlgorithmName, Strategy};

    struct NoPrompt;

    impl FailurePrompt for NoPrompt {
        fn choose_action(&mut self, _algorithm: &str) -> RulesAction {
            RulesAction::Skip
        }

        fn choose_prune_factor(&mut self) -> f64 {
            0.7
        }
    }

    fn task_with(strategy: Strategy, rows: usize, timeout: Option<u64>) -> Task {
        let table = Arc::new(Table::new(
            "t".to_string(),
            vec!["a".to_string()],
            (0..rows).map(|i| vec![i.to_string()]).collect(),
        ));
        Task::new(
            AlgorithmFamily::Fd,
            AlgorithmName::Hyfd,
            AlgoParams::new(),
            table,
            Some("hash".to_string()),
            timeout,
            strategy,
        )
    }

    #[cfg(unix)]
    fn sh_manager(
        history: Arc<HistoryStorage>,
        run_dir: PathBuf,
        knobs: RulesKnobs,
    ) -> CoreManager {
        let scheduler_config = SchedulerConfig {
            workers: 1,
            worker_exe: Some(PathBuf::from("/bin/sh")),
            worker_args: vec!["-c".to_string(), "exec sleep 30".to_string()],
            ..SchedulerConfig::default()
        };
        CoreManager::new(
            history,
            run_dir,
            "run-test".to_string(),
            false,
            false,
            scheduler_config,
            knobs,
            Box::new(NoPrompt),
        )
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_grow_ladder_stops_at_max() {
        let dir = tempfile::tempdir().unwrap();
        let history =
            Arc::new(HistoryStorage::new(Some(dir.path().join("history.json"))).unwrap());
        let knobs =
            RulesKnobs { timeout_step: 1, timeout_max: 2, prune_factor: 0.7, min_rows: 2 };
        let mut manager = sh_manager(Arc::clone(&history), dir.path().to_path_buf(), knobs);

        manager
            .execute_tasks(vec![task_with(Strategy::TimeoutGrow, 4, Some(1))])
            .await
            .unwrap();

        let records = history.get_tasks_by_run_id("run-test").unwrap();
        // tentativa original + um retry com timeout 2; o próximo passo
        // ultrapassaria o teto e vira skip
        assert_eq!(records.len(), 2);
        for record in &records {
            assert_eq!(record.result, Some(TaskStatus::Failure));
            assert_eq!(record.error_type.as_deref(), Some("Timeout"));
        }
        assert_eq!(records[0].rules_decision, Some(RulesAction::Retry));
        assert_eq!(records[1].rules_decision, Some(RulesAction::Skip));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_auto_decision_shrinks_until_stage_bound() {
        let dir = tempfile::tempdir().unwrap();
        let history =
            Arc::new(HistoryStorage::new(Some(dir.path().join("history.json"))).unwrap());
        let knobs =
            RulesKnobs { timeout_step: 1, timeout_max: 10, prune_factor: 0.7, min_rows: 2 };
        let mut manager = sh_manager(Arc::clone(&history), dir.path().to_path_buf(), knobs);

        manager
            .execute_tasks(vec![task_with(Strategy::AutoDecision, 10, Some(1))])
            .await
            .unwrap();

        let records = history.get_tasks_by_run_id("run-test").unwrap();
        // estágios 1, 2 e 3; o terceiro atinge MAX_STAGES e vira skip
        assert_eq!(records.len(), 3);
        let rows: Vec<usize> = records.iter().map(|r| r.rows.unwrap()).collect();
        assert_eq!(rows, vec![10, 7, 5]);
        assert_eq!(records[2].rules_decision, Some(RulesAction::Skip));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_single_run_never_retries() {
        let dir = tempfile::tempdir().unwrap();
        let history =
            Arc::new(HistoryStorage::new(Some(dir.path().join("history.json"))).unwrap());
        let mut manager =
            sh_manager(Arc::clone(&history), dir.path().to_path_buf(), RulesKnobs::default());

        manager
            .execute_tasks(vec![task_with(Strategy::SingleRun, 4, Some(1))])
            .await
            .unwrap();

        let records = history.get_tasks_by_run_id("run-test").unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].result, Some(TaskStatus::Failure));
        assert_eq!(records[0].rules_decision, Some(RulesAction::Skip));
    }
}
