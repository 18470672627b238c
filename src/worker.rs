//! Lado filho do executor isolado: protocolo de quadros sobre stdin/stdout,
//! limite de memória do processo e classificação de falhas
//!
//! O filho lê exatamente um [`WorkerRequest`], executa o algoritmo e escreve
//! exatamente um [`WorkerResponse`]. Nenhum erro atravessa a fronteira de
//! processo sem ser convertido em resposta.

use std::io::{Read, Write};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::registry::create_mining_algorithm;
use crate::types::{
    OutcomePayload, ProfilerError, ProfilerResult, ResultMap, Task, TaskId, TaskStatus,
};

/// Limite de sanidade para um quadro do protocolo
pub const MAX_FRAME_BYTES: u32 = 1 << 30;

/// Pedido enviado pelo pai: a tarefa (com a tabela) e o teto de memória
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub task: Task,
    pub memory_limit: Option<u64>,
}

/// Resposta única do filho
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerResponse {
    pub task_id: TaskId,
    pub status: TaskStatus,
    pub payload: OutcomePayload,
    pub execution_secs: Option<f64>,
}

/// Escreve um valor como quadro binário com prefixo de tamanho (u32 LE)
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> ProfilerResult<()> {
    let bytes = bincode::serialize(value)?;
    let len = u32::try_from(bytes.len())
        .map_err(|_| ProfilerError::WorkerProtocol("quadro excede 4 GiB".to_string()))?;
    if len > MAX_FRAME_BYTES {
        return Err(ProfilerError::WorkerProtocol(format!("quadro de {} bytes excede o limite", len)));
    }
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Lê um quadro com prefixo de tamanho e decodifica o valor
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> ProfilerResult<T> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf);
    if len > MAX_FRAME_BYTES {
        return Err(ProfilerError::WorkerProtocol(format!("quadro de {} bytes excede o limite", len)));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(bincode::deserialize(&buf)?)
}

/// Impõe o teto de espaço de endereçamento do processo corrente
///
/// Em plataformas sem RLIMIT_AS o limite é ignorado com um aviso, conforme o
/// contrato de degradação.
#[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
pub fn set_memory_limit(bytes: u64) {
    use nix::sys::resource::{getrlimit, setrlimit, Resource, RLIM_INFINITY};

    match getrlimit(Resource::RLIMIT_AS) {
        Ok((_, hard)) => {
            let new_soft = if hard == RLIM_INFINITY { bytes } else { bytes.min(hard) };
            match setrlimit(Resource::RLIMIT_AS, new_soft, hard) {
                Ok(()) => debug!(
                    "RLIMIT_AS ajustado para {} MB (hard: {})",
                    new_soft / (1024 * 1024),
                    if hard == RLIM_INFINITY { "infinito".to_string() } else { format!("{} MB", hard / (1024 * 1024)) }
                ),
                Err(e) => warn!("Falha ao ajustar limite de memória: {}", e),
            }
        }
        Err(e) => warn!("Falha ao consultar limite de memória: {}", e),
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
pub fn set_memory_limit(_bytes: u64) {
    warn!("Limite de memória por processo não é suportado nesta plataforma");
}

fn run_algorithm(task: &Task) -> ProfilerResult<ResultMap> {
    let mut algorithm = create_mining_algorithm(task.family, task.algorithm, &task.params)?;
    algorithm.run(&task.data)
}

/// Executa o pedido e converte qualquer desfecho em resposta
pub fn execute_request(request: WorkerRequest) -> WorkerResponse {
    if let Some(limit) = request.memory_limit {
        set_memory_limit(limit);
    }

    let task = request.task;
    let task_id = task.task_id;
    info!("Iniciando {} com params: {:?}", task.algorithm, task.params);

    let started = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| run_algorithm(&task)));
    match outcome {
        Ok(Ok(results)) => {
            let execution_secs = started.elapsed().as_secs_f64();
            let instances: usize = results.values().map(|v| v.len()).sum();
            info!("Algoritmo {} encontrou {} instâncias", task.algorithm, instances);
            WorkerResponse {
                task_id,
                status: TaskStatus::Success,
                payload: OutcomePayload::Results(results),
                execution_secs: Some(execution_secs),
            }
        }
        Ok(Err(error)) => {
            warn!("Tarefa {} ({}) falhou: {}", task_id, task.algorithm, error);
            let status = match error {
                ProfilerError::MemoryExhausted(_) => TaskStatus::MemoryError,
                _ => TaskStatus::Error,
            };
            WorkerResponse {
                task_id,
                status,
                payload: OutcomePayload::ErrorKind(error.kind().to_string()),
                execution_secs: None,
            }
        }
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "panic desconhecido".to_string());
            warn!("Tarefa {} ({}) abortou: {}", task_id, task.algorithm, message);
            let memory_related =
                message.contains("capacity overflow") || message.contains("allocation");
            WorkerResponse {
                task_id,
                status: if memory_related { TaskStatus::MemoryError } else { TaskStatus::Error },
                payload: OutcomePayload::ErrorKind(
                    if memory_related { "MemoryError" } else { "Panic" }.to_string(),
                ),
                execution_secs: None,
            }
        }
    }
}

/// Ponto de entrada do subcomando oculto `worker`
pub fn worker_main() -> ProfilerResult<()> {
    let stdin = std::io::stdin();
    let request: WorkerRequest = read_frame(&mut stdin.lock())?;
    let response = execute_request(request);
    let stdout = std::io::stdout();
    write_frame(&mut stdout.lock(), &response)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Table;
    use crate::types::{AlgoParams, AlgorithmFamily, AlgorithmName, Strategy};
    use std::io::Cursor;
    use std::sync::Arc;

    fn sample_task(family: AlgorithmFamily, algorithm: AlgorithmName) -> Task {
        let table = Arc::new(Table::new(
            "t".to_string(),
            vec!["a".to_string(), "b".to_string()],
            vec![
                vec!["1".to_string(), "x".to_string()],
                vec!["2".to_string(), "y".to_string()],
            ],
        ));
        Task::new(family, algorithm, AlgoParams::new(), table, None, None, Strategy::SingleRun)
    }

    #[test]
    fn test_frame_round_trip() {
        let request =
            WorkerRequest { task: sample_task(AlgorithmFamily::Fd, AlgorithmName::Hyfd), memory_limit: Some(64 * 1024 * 1024) };

        let mut buffer = Vec::new();
        write_frame(&mut buffer, &request).unwrap();
        let decoded: WorkerRequest = read_frame(&mut Cursor::new(buffer)).unwrap();

        assert_eq!(decoded.task.task_id, request.task.task_id);
        assert_eq!(decoded.memory_limit, request.memory_limit);
        assert_eq!(decoded.task.data.n_rows(), 2);
    }

    #[test]
    fn test_truncated_frame_is_rejected() {
        let buffer = vec![9u8, 0, 0, 0, 1, 2];
        let result: ProfilerResult<WorkerResponse> = read_frame(&mut Cursor::new(buffer));
        assert!(result.is_err());
    }

    #[test]
    fn test_execute_request_success() {
        let request =
            WorkerRequest { task: sample_task(AlgorithmFamily::Ucc, AlgorithmName::Hpivalid), memory_limit: None };
        let task_id = request.task.task_id;
        let response = execute_request(request);

        assert_eq!(response.task_id, task_id);
        assert_eq!(response.status, TaskStatus::Success);
        assert!(response.execution_secs.is_some());
        assert!(matches!(response.payload, OutcomePayload::Results(_)));
    }

    #[test]
    fn test_execute_request_classifies_setup_error() {
        // apriori não pertence à família fd: o filho responde Error, nunca propaga
        let request =
            WorkerRequest { task: sample_task(AlgorithmFamily::Fd, AlgorithmName::Apriori), memory_limit: None };
        let response = execute_request(request);

        assert_eq!(response.status, TaskStatus::Error);
        assert!(matches!(
            response.payload,
            OutcomePayload::ErrorKind(ref kind) if kind == "UnknownAlgorithmError"
        ));
    }
}
