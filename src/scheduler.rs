//! Scheduler: despacha um lote de tarefas sobre um pool limitado de
//! processos filhos, com deadlines individuais e um deadline global
//!
//! O plano de controle é uma única corrotina: ela é a única autora do mapa
//! de processos ativos e do vetor de desfechos, e só bloqueia na espera
//! limitada pelo canal de resultados.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant};
use tracing::{debug, error, info, warn};

use crate::types::{
    ProfilerError, ProfilerResult, Task, TaskId, TaskOutcome, TaskStatus, THREADS_PARAM,
};
use crate::worker::{WorkerRequest, WorkerResponse, MAX_FRAME_BYTES};

/// Configuração do scheduler
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Número de workers do pool (paralelismo horizontal)
    pub workers: usize,
    /// Orçamento total de memória em bytes, dividido entre os workers
    pub memory_limit: u64,
    /// Deadline global do lote em segundos, contado do primeiro despacho
    pub global_timeout: Option<u64>,
    /// Executável dos processos de mineração; ausente = o binário corrente
    pub worker_exe: Option<PathBuf>,
    /// Argumentos que selecionam o modo worker no executável
    pub worker_args: Vec<String>,
    /// Teto da espera de polling no canal de resultados
    pub poll_interval: Duration,
    /// Período de cortesia entre SIGTERM e SIGKILL
    pub grace_period: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            memory_limit: 1024 * 1024 * 1024,
            global_timeout: None,
            worker_exe: None,
            worker_args: vec!["worker".to_string()],
            poll_interval: Duration::from_millis(100),
            grace_period: Duration::from_millis(500),
        }
    }
}

/// Eventos produzidos pelas corrotinas leitoras dos filhos
#[derive(Debug)]
enum WorkerEvent {
    /// O filho entregou sua resposta única
    Delivered(WorkerResponse),
    /// O pipe fechou sem resposta (filho morto ou protocolo quebrado)
    Died { task_id: TaskId },
}

struct ActiveWorker {
    child: Child,
    index: usize,
    deadline: Instant,
}

/// Scheduler de lotes de tarefas
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    /// Executa o lote e devolve os desfechos na ordem de entrada
    ///
    /// `try_parallel=false` serializa o lote (W = 1) e entrega o paralelismo
    /// aos algoritmos via `threads = workers`; `true` faz o oposto.
    pub async fn run_tasks(&self, tasks: &[Task], try_parallel: bool) -> Vec<TaskOutcome> {
        let num_tasks = tasks.len();
        if num_tasks == 0 {
            return Vec::new();
        }

        let overall_start = Instant::now();
        let global_deadline = self
            .config
            .global_timeout
            .map(|secs| overall_start + Duration::from_secs(secs));

        let max_workers = if try_parallel { self.config.workers.max(1) } else { 1 };
        let threads_to_set = if try_parallel { 1 } else { self.config.workers.max(1) };
        debug!("Parâmetro 'threads' dos algoritmos: {}", threads_to_set);
        let memory_per_proc = self.config.memory_limit / max_workers as u64;

        let (tx, mut rx) = mpsc::unbounded_channel::<WorkerEvent>();
        let mut active: HashMap<TaskId, ActiveWorker> = HashMap::new();
        let mut outcomes: Vec<TaskOutcome> =
            tasks.iter().map(|_| TaskOutcome::placeholder(TaskStatus::NotStarted)).collect();
        let mut processed = 0usize;
        let mut next_to_launch = 0usize;
        let mut global_timeout_reached = false;

        while processed < num_tasks {
            let now = Instant::now();
            if let Some(deadline) = global_deadline {
                if now >= deadline {
                    warn!(
                        "Timeout global de {}s atingido. Interrompendo submissão e encerrando processos ativos.",
                        self.config.global_timeout.unwrap_or_default()
                    );
                    global_timeout_reached = true;
                    break;
                }
            }

            // preenche o pool com as próximas tarefas não lançadas
            while active.len() < max_workers && next_to_launch < num_tasks {
                let index = next_to_launch;
                let task = &tasks[index];
                next_to_launch += 1;

                match self.spawn_worker(task, threads_to_set, memory_per_proc, tx.clone()) {
                    Ok(child) => {
                        debug!(
                            "Processo {:?} lançado para a tarefa {}",
                            child.id(),
                            task.task_id
                        );
                        let deadline = Instant::now() + task.timeout_duration();
                        active.insert(task.task_id, ActiveWorker { child, index, deadline });
                        outcomes[index] = TaskOutcome::placeholder(TaskStatus::Running);
                    }
                    Err(e) => {
                        error!("Falha ao iniciar processo para a tarefa {}: {}", task.task_id, e);
                        outcomes[index] = TaskOutcome::synthesized(TaskStatus::StartingFailure);
                        processed += 1;
                    }
                }
            }

            if active.is_empty() && next_to_launch >= num_tasks {
                break;
            }

            // espera limitada: teto de polling, deadline individual mais
            // próximo e tempo global restante
            let now = Instant::now();
            let mut wait = self.config.poll_interval;
            if let Some(nearest) = active.values().map(|w| w.deadline).min() {
                wait = wait.min(nearest.saturating_duration_since(now));
            }
            if let Some(deadline) = global_deadline {
                wait = wait.min(deadline.saturating_duration_since(now));
            }

            match timeout(wait, rx.recv()).await {
                Ok(Some(WorkerEvent::Delivered(response))) => {
                    if let Some(mut worker) = active.remove(&response.task_id) {
                        debug!(
                            "Resultado recebido para a tarefa {} (status: {})",
                            response.task_id, response.status
                        );
                        outcomes[worker.index] = TaskOutcome {
                            status: response.status,
                            payload: response.payload,
                            execution_secs: response.execution_secs,
                        };
                        self.reap(&mut worker.child, response.task_id).await;
                        processed += 1;
                    } else {
                        warn!(
                            "Resultado para tarefa desconhecida ou já processada {}. Ignorando.",
                            response.task_id
                        );
                    }
                }
                Ok(Some(WorkerEvent::Died { task_id })) => {
                    if let Some(mut worker) = active.remove(&task_id) {
                        warn!("Processo da tarefa {} terminou sem entregar resultado", task_id);
                        self.reap(&mut worker.child, task_id).await;
                        if matches!(
                            outcomes[worker.index].status,
                            TaskStatus::Running | TaskStatus::NotStarted
                        ) {
                            outcomes[worker.index] = TaskOutcome::synthesized(TaskStatus::Killed);
                        }
                        processed += 1;
                    }
                }
                Ok(None) | Err(_) => {}
            }

            // varredura de deadlines individuais
            let now = Instant::now();
            let expired: Vec<TaskId> = active
                .iter()
                .filter(|(_, w)| now >= w.deadline)
                .map(|(id, _)| *id)
                .collect();
            for task_id in expired {
                if let Some(mut worker) = active.remove(&task_id) {
                    warn!(
                        "Tarefa {} atingiu o timeout individual de {}s",
                        task_id,
                        tasks[worker.index].timeout
                    );
                    self.terminate(&mut worker.child, task_id).await;
                    if matches!(
                        outcomes[worker.index].status,
                        TaskStatus::Running | TaskStatus::NotStarted
                    ) {
                        outcomes[worker.index] = TaskOutcome::synthesized(TaskStatus::Timeout);
                    }
                    processed += 1;
                }
            }
        }

        // fase de encerramento do deadline global
        if global_timeout_reached {
            warn!("Encerrando {} processos ativos por timeout global", active.len());
            for (task_id, mut worker) in active.drain() {
                self.terminate(&mut worker.child, task_id).await;
                if matches!(
                    outcomes[worker.index].status,
                    TaskStatus::Running | TaskStatus::NotStarted
                ) {
                    outcomes[worker.index] = TaskOutcome::synthesized(TaskStatus::GlobalTimeout);
                }
            }
            for outcome in outcomes.iter_mut() {
                if outcome.status == TaskStatus::NotStarted {
                    *outcome = TaskOutcome::synthesized(TaskStatus::GlobalTimeout);
                }
            }
        }

        // limpeza defensiva de processos remanescentes
        if !active.is_empty() {
            warn!("Limpeza final de {} processos remanescentes", active.len());
            for (task_id, mut worker) in active.drain() {
                self.terminate(&mut worker.child, task_id).await;
                if outcomes[worker.index].status == TaskStatus::Running {
                    outcomes[worker.index] = TaskOutcome::synthesized(TaskStatus::Killed);
                }
            }
        }

        // enfileiradas que nunca chegaram a rodar em um término normal
        if !global_timeout_reached {
            for outcome in outcomes.iter_mut() {
                if outcome.status == TaskStatus::NotStarted {
                    *outcome = TaskOutcome::synthesized(TaskStatus::Cancelled);
                }
            }
        }

        info!("=== Iteração concluída ===");
        outcomes
    }

    /// Lança o processo filho e as corrotinas de envio do pedido e leitura
    /// da resposta
    fn spawn_worker(
        &self,
        task: &Task,
        threads: usize,
        memory_limit: u64,
        tx: mpsc::UnboundedSender<WorkerEvent>,
    ) -> ProfilerResult<Child> {
        let exe = match &self.config.worker_exe {
            Some(path) => path.clone(),
            None => std::env::current_exe()?,
        };

        let mut command = Command::new(exe);
        command
            .args(&self.config.worker_args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        // o filho vira líder do próprio grupo, de modo que o encerramento
        // alcance quaisquer processos auxiliares que ele crie
        #[cfg(unix)]
        unsafe {
            command.pre_exec(|| {
                let _ = nix::unistd::setpgid(
                    nix::unistd::Pid::from_raw(0),
                    nix::unistd::Pid::from_raw(0),
                );
                Ok(())
            });
        }

        let mut child = command.spawn()?;

        // injeção pré-lançamento do parâmetro de paralelismo vertical, a
        // única mutação permitida sobre uma tarefa submetida
        let mut task_copy = task.clone();
        task_copy
            .params
            .insert(THREADS_PARAM.to_string(), serde_json::Value::from(threads as u64));
        let request = WorkerRequest { task: task_copy, memory_limit: Some(memory_limit) };
        let frame = encode_frame(&request)?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProfilerError::Internal("stdin do filho indisponível".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProfilerError::Internal("stdout do filho indisponível".to_string()))?;
        let task_id = task.task_id;

        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&frame).await {
                debug!("Falha ao enviar pedido à tarefa {}: {}", task_id, e);
            }
        });

        tokio::spawn(async move {
            match read_response(stdout).await {
                Ok(response) => {
                    let _ = tx.send(WorkerEvent::Delivered(response));
                }
                Err(_) => {
                    let _ = tx.send(WorkerEvent::Died { task_id });
                }
            }
        });

        Ok(child)
    }

    /// Encerramento forçado: SIGTERM no grupo de processos, cortesia curta,
    /// SIGKILL nos sobreviventes e colheita do filho
    async fn terminate(&self, child: &mut Child, task_id: TaskId) {
        #[cfg(unix)]
        {
            use nix::sys::signal::{killpg, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                debug!("Encerrando grupo de processos {} da tarefa {}", pid, task_id);
                let pgid = Pid::from_raw(pid as i32);
                let _ = killpg(pgid, Signal::SIGTERM);
                if timeout(self.config.grace_period, child.wait()).await.is_ok() {
                    info!("Processo {} encerrou graciosamente", pid);
                    return;
                }
                warn!("Processo {} não encerrou graciosamente. Matando...", pid);
                let _ = killpg(pgid, Signal::SIGKILL);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        if timeout(self.config.grace_period, child.wait()).await.is_err() {
            error!("Falha ao encerrar o processo da tarefa {}", task_id);
        }
    }

    /// Colhe um filho que entregou resultado; força o encerramento se ele
    /// continuar vivo
    async fn reap(&self, child: &mut Child, task_id: TaskId) {
        if timeout(self.config.grace_period, child.wait()).await.is_err() {
            warn!(
                "Processo da tarefa {} continua vivo após entregar resultado. Forçando encerramento.",
                task_id
            );
            self.terminate(child, task_id).await;
        }
    }
}

fn encode_frame(request: &WorkerRequest) -> ProfilerResult<Vec<u8>> {
    let bytes = bincode::serialize(request)?;
    let mut frame = Vec::with_capacity(bytes.len() + 4);
    frame.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    frame.extend_from_slice(&bytes);
    Ok(frame)
}

async fn read_response(mut stdout: ChildStdout) -> ProfilerResult<WorkerResponse> {
    let mut len_buf = [0u8; 4];
    stdout.read_exact(&mut len_buf).await?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(ProfilerError::WorkerProtocol(format!(
            "quadro de {} bytes excede o limite",
            len
        )));
    }
    let mut buf = vec![0u8; len as usize];
    stdout.read_exact(&mut buf).await?;
    Ok(bincode::deserialize(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Table;
    use crate::types::{AlgoParams, AlgorithmFamily, AlgorithmName, Strategy};
    use std::sync::Arc;

    fn sample_task(timeout_secs: Option<u64>) -> Task {
        let table = Arc::new(Table::new(
            "t".to_string(),
            vec!["a".to_string()],
            vec![vec!["1".to_string()]],
        ));
        Task::new(
            AlgorithmFamily::Fd,
            AlgorithmName::Hyfd,
            AlgoParams::new(),
            table,
            None,
            timeout_secs,
            Strategy::SingleRun,
        )
    }

    #[cfg(unix)]
    fn sh_scheduler(script: &str, workers: usize, global_timeout: Option<u64>) -> Scheduler {
        Scheduler::new(SchedulerConfig {
            workers,
            global_timeout,
            worker_exe: Some(PathBuf::from("/bin/sh")),
            worker_args: vec!["-c".to_string(), script.to_string()],
            ..SchedulerConfig::default()
        })
    }

    #[tokio::test]
    async fn test_empty_batch_returns_empty() {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let outcomes = scheduler.run_tasks(&[], true).await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_starting_failure_is_recorded() {
        let scheduler = Scheduler::new(SchedulerConfig {
            worker_exe: Some(PathBuf::from("/nonexistent/profile_mesh_worker")),
            ..SchedulerConfig::default()
        });
        let tasks = vec![sample_task(None)];
        let outcomes = scheduler.run_tasks(&tasks, true).await;

        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].status, TaskStatus::StartingFailure);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_per_task_timeout_synthesized() {
        let scheduler = sh_scheduler("exec sleep 30", 1, None);
        let tasks = vec![sample_task(Some(1))];
        let started = std::time::Instant::now();
        let outcomes = scheduler.run_tasks(&tasks, false).await;

        assert_eq!(outcomes[0].status, TaskStatus::Timeout);
        assert_eq!(outcomes[0].error_kind(), "Timeout");
        assert!(outcomes[0].execution_secs.is_none());
        // deadline + período de cortesia, com folga generosa
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_global_timeout_preempts_queued_and_running() {
        let scheduler = sh_scheduler("exec sleep 30", 1, Some(1));
        let tasks = vec![sample_task(None), sample_task(None), sample_task(None)];
        let outcomes = scheduler.run_tasks(&tasks, false).await;

        assert_eq!(outcomes.len(), 3);
        for outcome in &outcomes {
            assert_eq!(outcome.status, TaskStatus::GlobalTimeout);
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_silent_child_recorded_as_killed() {
        let scheduler = sh_scheduler("exit 0", 2, None);
        let tasks = vec![sample_task(None), sample_task(None)];
        let outcomes = scheduler.run_tasks(&tasks, true).await;

        assert_eq!(outcomes.len(), 2);
        for outcome in &outcomes {
            assert_eq!(outcome.status, TaskStatus::Killed);
        }
    }
}
