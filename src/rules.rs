//! Motor de regras: decide o que fazer com uma tarefa que falhou
//!
//! Função pura sobre (tarefa, tipo de erro, knobs globais); a única exceção
//! é a estratégia `ask`, cujo prompt fica atrás de [`FailurePrompt`] para
//! que execuções automatizadas e testes injetem as decisões.

use std::io::{BufRead, Write};
use std::sync::Arc;

use tracing::info;

use crate::dataset::Table;
use crate::types::{RulesAction, Strategy, Task, TaskStatus};

/// Número máximo de gerações sob `auto_decision`
pub const MAX_STAGES: u32 = 3;

/// Knobs globais de recuperação vindos da CLI
#[derive(Debug, Clone)]
pub struct RulesKnobs {
    /// Incremento de timeout por retry em `timeout_grow` (segundos)
    pub timeout_step: u64,
    /// Teto de timeout em `timeout_grow` (segundos)
    pub timeout_max: u64,
    /// Fator de poda de linhas, no intervalo aberto (0, 1)
    pub prune_factor: f64,
    /// Piso de linhas ao podar
    pub min_rows: usize,
}

impl Default for RulesKnobs {
    fn default() -> Self {
        Self { timeout_step: 300, timeout_max: 1800, prune_factor: 0.7, min_rows: 1000 }
    }
}

/// Parâmetros de um retry decidido pelas regras
#[derive(Debug, Clone, Default)]
pub struct RetryParams {
    pub new_timeout: Option<u64>,
    pub new_table: Option<Arc<Table>>,
}

/// Decisão do motor de regras
#[derive(Debug, Clone)]
pub struct RulesDecision {
    pub action: RulesAction,
    pub retry_params: RetryParams,
}

impl RulesDecision {
    fn skip() -> Self {
        Self { action: RulesAction::Skip, retry_params: RetryParams::default() }
    }

    fn retry(retry_params: RetryParams) -> Self {
        Self { action: RulesAction::Retry, retry_params }
    }
}

/// Interface do prompt interativo da estratégia `ask`
pub trait FailurePrompt {
    /// Pergunta ao usuário o que fazer com o algoritmo que falhou
    fn choose_action(&mut self, algorithm: &str) -> RulesAction;

    /// Pergunta o fator de poda em (0, 1)
    fn choose_prune_factor(&mut self) -> f64;
}

/// Prompt de console usado pela CLI
#[derive(Debug, Default)]
pub struct ConsolePrompt;

impl FailurePrompt for ConsolePrompt {
    fn choose_action(&mut self, algorithm: &str) -> RulesAction {
        let stdin = std::io::stdin();
        loop {
            print!("Algoritmo {} falhou. O que deseja fazer [skip/retry/prune] (skip): ", algorithm);
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                return RulesAction::Skip;
            }
            match line.trim().to_lowercase().as_str() {
                "" | "skip" => return RulesAction::Skip,
                "retry" => return RulesAction::Retry,
                "prune" => return RulesAction::Prune,
                other => println!("Opção inválida: {}", other),
            }
        }
    }

    fn choose_prune_factor(&mut self) -> f64 {
        let stdin = std::io::stdin();
        loop {
            print!("Informe o fator de poda em (0,1) (0.7): ");
            let _ = std::io::stdout().flush();
            let mut line = String::new();
            if stdin.lock().read_line(&mut line).is_err() {
                return 0.7;
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                return 0.7;
            }
            match trimmed.parse::<f64>() {
                Ok(f) if f > 0.0 && f < 1.0 => return f,
                _ => println!("Valor inválido: {}", trimmed),
            }
        }
    }
}

fn pruned_table(task: &Task, factor: f64) -> (usize, Arc<Table>) {
    let new_rows = (task.data.n_rows() as f64 * factor).ceil() as usize;
    (new_rows, Arc::new(task.data.head(new_rows)))
}

/// Decide a ação para uma falha, conforme a tabela de políticas
pub fn handle_failure(
    task: &Task,
    error_kind: &str,
    knobs: &RulesKnobs,
    prompt: &mut dyn FailurePrompt,
) -> RulesDecision {
    let is_timeout = error_kind == TaskStatus::Timeout.as_str();
    let is_memory = error_kind == TaskStatus::MemoryError.as_str();

    match task.strategy {
        Strategy::SingleRun => RulesDecision::skip(),

        Strategy::TimeoutGrow if is_timeout => {
            let current = if task.has_deadline() { task.timeout } else { knobs.timeout_step };
            let new_timeout = current + knobs.timeout_step;
            if new_timeout <= knobs.timeout_max {
                info!("Retry de {} com timeout de {}s", task.algorithm, new_timeout);
                RulesDecision::retry(RetryParams {
                    new_timeout: Some(new_timeout),
                    new_table: None,
                })
            } else {
                info!("Limite de timeout de {} atingido. Pulando.", task.algorithm);
                RulesDecision::skip()
            }
        }

        Strategy::ShrinkSearch if is_timeout || is_memory => {
            let (new_rows, table) = pruned_table(task, knobs.prune_factor);
            if new_rows >= knobs.min_rows {
                info!("Retry de {} com {} linhas", task.algorithm, new_rows);
                RulesDecision::retry(RetryParams { new_timeout: None, new_table: Some(table) })
            } else {
                info!("Limite de linhas de {} atingido. Pulando.", task.algorithm);
                RulesDecision::skip()
            }
        }

        Strategy::AutoDecision if is_timeout || is_memory => {
            if task.stage >= MAX_STAGES {
                RulesDecision::skip()
            } else {
                let (_, table) = pruned_table(task, knobs.prune_factor);
                RulesDecision::retry(RetryParams { new_timeout: None, new_table: Some(table) })
            }
        }

        Strategy::Ask if is_timeout || is_memory => {
            match prompt.choose_action(task.algorithm.as_str()) {
                RulesAction::Skip => RulesDecision::skip(),
                RulesAction::Retry => RulesDecision::retry(RetryParams::default()),
                RulesAction::Prune => {
                    let factor = prompt.choose_prune_factor();
                    let (_, table) = pruned_table(task, factor);
                    RulesDecision::retry(RetryParams { new_timeout: None, new_table: Some(table) })
                }
            }
        }

        _ => RulesDecision::skip(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Table;
    use crate::types::{AlgoParams, AlgorithmFamily, AlgorithmName};
    use proptest::prelude::{prop_assert, proptest};

    const TIMEOUT_STEP: u64 = 300;
    const TIMEOUT_MAX: u64 = 1800;

    fn knobs(min_rows: usize) -> RulesKnobs {
        RulesKnobs {
            timeout_step: TIMEOUT_STEP,
            timeout_max: TIMEOUT_MAX,
            prune_factor: 0.7,
            min_rows,
        }
    }

    /// Prompt roteirizado para os testes da estratégia ask
    struct ScriptedPrompt {
        action: RulesAction,
        factor: f64,
        action_calls: usize,
        factor_calls: usize,
    }

    impl ScriptedPrompt {
        fn new(action: RulesAction, factor: f64) -> Self {
            Self { action, factor, action_calls: 0, factor_calls: 0 }
        }
    }

    impl FailurePrompt for ScriptedPrompt {
        fn choose_action(&mut self, _algorithm: &str) -> RulesAction {
            self.action_calls += 1;
            self.action
        }

        fn choose_prune_factor(&mut self) -> f64 {
            self.factor_calls += 1;
            self.factor
        }
    }

    fn task_with(strategy: Strategy, rows: usize, timeout: Option<u64>, stage: u32) -> Task {
        let table = Arc::new(Table::new(
            "t".to_string(),
            vec!["a".to_string()],
            (0..rows).map(|i| vec![i.to_string()]).collect(),
        ));
        let mut task = Task::new(
            AlgorithmFamily::Fd,
            AlgorithmName::Hyfd,
            AlgoParams::new(),
            table,
            Some("hash".to_string()),
            timeout,
            strategy,
        );
        task.stage = stage;
        task
    }

    #[test]
    fn test_single_run_always_skips() {
        let task = task_with(Strategy::SingleRun, 10, Some(600), 1);
        let mut prompt = ScriptedPrompt::new(RulesAction::Retry, 0.5);
        let decision = handle_failure(&task, "Timeout", &knobs(2), &mut prompt);
        assert_eq!(decision.action, RulesAction::Skip);
        assert_eq!(prompt.action_calls, 0);
    }

    #[test]
    fn test_timeout_grow_retries_with_larger_timeout() {
        let task = task_with(Strategy::TimeoutGrow, 10, Some(TIMEOUT_STEP), 1);
        let mut prompt = ScriptedPrompt::new(RulesAction::Skip, 0.5);
        let decision = handle_failure(&task, "Timeout", &knobs(2), &mut prompt);

        assert_eq!(decision.action, RulesAction::Retry);
        assert_eq!(decision.retry_params.new_timeout, Some(TIMEOUT_STEP * 2));
    }

    #[test]
    fn test_timeout_grow_without_deadline_starts_from_step() {
        let task = task_with(Strategy::TimeoutGrow, 10, None, 1);
        let mut prompt = ScriptedPrompt::new(RulesAction::Skip, 0.5);
        let decision = handle_failure(&task, "Timeout", &knobs(2), &mut prompt);
        assert_eq!(decision.retry_params.new_timeout, Some(TIMEOUT_STEP * 2));
    }

    #[test]
    fn test_timeout_grow_skips_at_max() {
        let task = task_with(Strategy::TimeoutGrow, 10, Some(TIMEOUT_MAX), 1);
        let mut prompt = ScriptedPrompt::new(RulesAction::Skip, 0.5);
        let decision = handle_failure(&task, "Timeout", &knobs(2), &mut prompt);
        assert_eq!(decision.action, RulesAction::Skip);
    }

    #[test]
    fn test_shrink_search_prunes_rows() {
        let task = task_with(Strategy::ShrinkSearch, 100, Some(600), 1);
        let mut prompt = ScriptedPrompt::new(RulesAction::Skip, 0.5);
        let decision = handle_failure(&task, "MemoryError", &knobs(2), &mut prompt);

        assert_eq!(decision.action, RulesAction::Retry);
        let table = decision.retry_params.new_table.unwrap();
        assert_eq!(table.n_rows(), 70);
        assert_eq!(table.n_cols(), 1);
    }

    #[test]
    fn test_shrink_search_skips_below_min_rows() {
        let task = task_with(Strategy::ShrinkSearch, 1, Some(600), 1);
        let mut prompt = ScriptedPrompt::new(RulesAction::Skip, 0.5);
        let decision = handle_failure(&task, "MemoryError", &knobs(2), &mut prompt);
        assert_eq!(decision.action, RulesAction::Skip);
    }

    #[test]
    fn test_auto_decision_prunes_before_max_stages() {
        let task = task_with(Strategy::AutoDecision, 100, Some(600), 1);
        let mut prompt = ScriptedPrompt::new(RulesAction::Skip, 0.5);
        let decision = handle_failure(&task, "MemoryError", &knobs(2), &mut prompt);

        assert_eq!(decision.action, RulesAction::Retry);
        assert!(decision.retry_params.new_table.is_some());
    }

    #[test]
    fn test_auto_decision_skips_at_max_stages() {
        let task = task_with(Strategy::AutoDecision, 100, Some(600), MAX_STAGES);
        let mut prompt = ScriptedPrompt::new(RulesAction::Skip, 0.5);
        let decision = handle_failure(&task, "Timeout", &knobs(2), &mut prompt);
        assert_eq!(decision.action, RulesAction::Skip);
    }

    #[test]
    fn test_ask_skip() {
        let task = task_with(Strategy::Ask, 100, Some(600), 1);
        let mut prompt = ScriptedPrompt::new(RulesAction::Skip, 0.5);
        let decision = handle_failure(&task, "Timeout", &knobs(2), &mut prompt);

        assert_eq!(decision.action, RulesAction::Skip);
        assert_eq!(prompt.action_calls, 1);
        assert_eq!(prompt.factor_calls, 0);
    }

    #[test]
    fn test_ask_retry_keeps_task_shape() {
        let task = task_with(Strategy::Ask, 100, Some(600), 1);
        let mut prompt = ScriptedPrompt::new(RulesAction::Retry, 0.5);
        let decision = handle_failure(&task, "MemoryError", &knobs(2), &mut prompt);

        assert_eq!(decision.action, RulesAction::Retry);
        assert!(decision.retry_params.new_table.is_none());
        assert!(decision.retry_params.new_timeout.is_none());
    }

    #[test]
    fn test_ask_prune_uses_user_factor() {
        let task = task_with(Strategy::Ask, 100, Some(600), 1);
        let mut prompt = ScriptedPrompt::new(RulesAction::Prune, 0.5);
        let decision = handle_failure(&task, "Timeout", &knobs(2), &mut prompt);

        assert_eq!(decision.action, RulesAction::Retry);
        let table = decision.retry_params.new_table.unwrap();
        assert_eq!(table.n_rows(), 50);
        assert_eq!(prompt.action_calls, 1);
        assert_eq!(prompt.factor_calls, 1);
    }

    #[test]
    fn test_unknown_error_kind_skips() {
        let task = task_with(Strategy::AutoDecision, 100, Some(600), 1);
        let mut prompt = ScriptedPrompt::new(RulesAction::Retry, 0.5);
        let decision = handle_failure(&task, "SomeOtherError", &knobs(2), &mut prompt);
        assert_eq!(decision.action, RulesAction::Skip);
    }

    proptest! {
        /// Toda poda produz estritamente menos linhas que a tarefa-mãe
        #[test]
        fn prop_shrink_is_strictly_monotonic(rows in 10usize..5000, factor in 0.1f64..0.9) {
            let task = task_with(Strategy::ShrinkSearch, rows, Some(600), 1);
            let custom = RulesKnobs { prune_factor: factor, min_rows: 2, ..RulesKnobs::default() };
            let mut prompt = ScriptedPrompt::new(RulesAction::Skip, 0.5);
            let decision = handle_failure(&task, "Timeout", &custom, &mut prompt);
            if let Some(table) = decision.retry_params.new_table {
                prop_assert!(table.n_rows() < rows);
            }
        }
    }
}
