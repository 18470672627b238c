//! # ProfileMesh
//!
//! Núcleo de execução de um orquestrador de perfilamento de dados: dirige
//! tarefas de mineração pesadas sobre um dataset tabular, com isolamento em
//! processos, limites de recursos e um laço de recuperação dirigido por
//! regras.
//!
//! ## Componentes principais
//!
//! - **Registry** ([`registry`]): mapeia (família, algoritmo) para a fábrica
//!   do kernel de mineração
//! - **Worker** ([`worker`]): executa uma tarefa em um processo filho com
//!   teto de memória e entrega cooperativa do resultado
//! - **Scheduler** ([`scheduler`]): despacha o lote sobre um pool limitado,
//!   com deadlines individuais e deadline global
//! - **Rules** ([`rules`]): decide skip/retry para cada falha
//! - **CoreManager** ([`manager`]): laço externo com deduplicação e retries
//! - **HistoryStorage** ([`history`]): registro durável de cada tentativa

pub mod algorithms;
pub mod comparer;
pub mod dataset;
pub mod history;
pub mod logging;
pub mod manager;
pub mod profile;
pub mod registry;
pub mod rules;
pub mod runner;
pub mod scheduler;
pub mod types;
pub mod util;
pub mod worker;

pub use dataset::{load_table, Table};
pub use history::HistoryStorage;
pub use manager::CoreManager;
pub use profile::{load_profile, Profile};
pub use rules::{ConsolePrompt, FailurePrompt, RulesKnobs};
pub use runner::{
    compare_with_new_version, compare_with_subset, run_profile_on_dataset, RunOptions,
};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use types::*;
