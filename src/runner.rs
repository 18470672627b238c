//! Amarração de ponta a ponta: perfil + dataset → árvore de diretórios do
//! run → gerente do núcleo → digests

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::comparer::compare_runs;
use crate::dataset::{load_table, Table};
use crate::history::HistoryStorage;
use crate::logging::RunLogWriter;
use crate::manager::CoreManager;
use crate::profile::{load_profile, Profile, TaskProfile};
use crate::rules::{ConsolePrompt, RulesKnobs};
use crate::scheduler::SchedulerConfig;
use crate::types::{ProfilerResult, Strategy, Task};
use crate::util::{write_comparison_digest, write_profiling_digest};

pub const DEFAULT_LOG_FILE: &str = "profiling.log";
const RESULTS_DIR: &str = "results";
const COMPARISON_FILE: &str = "comparison.txt";

/// Opções de execução vindas da CLI (já normalizadas)
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub delimiter: u8,
    pub has_header: bool,
    pub mem_limit_bytes: u64,
    pub workers: usize,
    pub check_results: bool,
    pub try_parallel: bool,
    pub strategy: Strategy,
    pub knobs: RulesKnobs,
    /// Executável dos processos de mineração; ausente = o binário corrente
    pub worker_exe: Option<PathBuf>,
    /// Diretório base de `results/`; ausente = o diretório corrente
    pub output_dir: Option<PathBuf>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            delimiter: b',',
            has_header: true,
            mem_limit_bytes: 1024 * 1024 * 1024,
            workers: 1,
            check_results: true,
            try_parallel: true,
            strategy: Strategy::Ask,
            knobs: RulesKnobs::default(),
            worker_exe: None,
            output_dir: None,
        }
    }
}

impl RunOptions {
    fn scheduler_config(&self, global_timeout: Option<u64>) -> SchedulerConfig {
        SchedulerConfig {
            workers: self.workers,
            memory_limit: self.mem_limit_bytes,
            global_timeout,
            worker_exe: self.worker_exe.clone(),
            ..SchedulerConfig::default()
        }
    }
}

/// Executa o processo completo de perfilamento de um dataset
pub async fn run_profile_on_dataset(
    run_id: &str,
    profile_path: &Path,
    dataset_path: &Path,
    options: &RunOptions,
    history: Arc<HistoryStorage>,
    log_writer: Option<&RunLogWriter>,
) -> ProfilerResult<()> {
    let profile = load_profile(profile_path)?;
    let run_dir = create_profiling_dir_tree(&profile.name, dataset_path, options.output_dir.as_deref())?;
    if let Some(writer) = log_writer {
        writer.attach_file(&run_dir.join(DEFAULT_LOG_FILE))?;
    }

    let (table, table_hash) = load_table(
        dataset_path,
        options.delimiter,
        options.has_header,
        profile.global_settings.rows,
        profile.global_settings.columns,
    )?;
    let tasks = create_tasks_to_run(Arc::new(table), table_hash, options.strategy, &profile.tasks);

    let mut manager = CoreManager::new(
        Arc::clone(&history),
        run_dir.clone(),
        run_id.to_string(),
        options.check_results,
        options.try_parallel,
        options.scheduler_config(profile.global_settings.global_timeout),
        options.knobs.clone(),
        Box::new(ConsolePrompt),
    );
    manager.execute_tasks(tasks).await?;

    let runs = history.get_tasks_by_run_id(run_id)?;
    write_profiling_digest(&runs, &run_dir, dataset_path);
    Ok(())
}

async fn profile_one_side(
    run_id: &str,
    run_dir: PathBuf,
    table: Table,
    table_hash: Option<String>,
    profile: &Profile,
    options: &RunOptions,
    history: &Arc<HistoryStorage>,
) -> ProfilerResult<()> {
    let tasks =
        create_tasks_to_run(Arc::new(table), table_hash, Strategy::SingleRun, &profile.tasks);
    let mut manager = CoreManager::new(
        Arc::clone(history),
        run_dir,
        run_id.to_string(),
        options.check_results,
        false,
        options.scheduler_config(profile.global_settings.global_timeout),
        options.knobs.clone(),
        Box::new(ConsolePrompt),
    );
    manager.execute_tasks(tasks).await
}

async fn compare_datasets(
    profile_path: &Path,
    baseline_path: &Path,
    target_path: &Path,
    options: &RunOptions,
    history: Arc<HistoryStorage>,
    log_writer: Option<&RunLogWriter>,
    validate: bool,
    digest_title: &str,
) -> ProfilerResult<()> {
    let baseline_run_id = Uuid::new_v4().to_string();
    let target_run_id = Uuid::new_v4().to_string();

    let profile = load_profile(profile_path)?;
    let (comparison_dir, baseline_dir, target_dir) = create_comparison_and_profiling_dir_tree(
        &profile.name,
        baseline_path,
        target_path,
        options.output_dir.as_deref(),
    )?;
    if let Some(writer) = log_writer {
        writer.attach_file(&comparison_dir.join(DEFAULT_LOG_FILE))?;
    }

    let (baseline_table, baseline_hash) = load_table(
        baseline_path,
        options.delimiter,
        options.has_header,
        profile.global_settings.rows,
        profile.global_settings.columns,
    )?;
    let (target_table, target_hash) = load_table(
        target_path,
        options.delimiter,
        options.has_header,
        profile.global_settings.rows,
        profile.global_settings.columns,
    )?;

    info!("Iniciando perfilamento do baseline.");
    profile_one_side(
        &baseline_run_id,
        baseline_dir,
        baseline_table,
        baseline_hash,
        &profile,
        options,
        &history,
    )
    .await?;

    info!("Iniciando perfilamento do alvo.");
    let target_for_validation = target_table.clone();
    profile_one_side(
        &target_run_id,
        target_dir,
        target_table,
        target_hash,
        &profile,
        options,
        &history,
    )
    .await?;

    info!("Iniciando comparação.");
    let baseline_runs = history.get_tasks_by_run_id(&baseline_run_id)?;
    let target_runs = history.get_tasks_by_run_id(&target_run_id)?;
    let (entries, text) =
        compare_runs(&baseline_runs, &target_runs, &target_for_validation, validate);

    let comparison_path = comparison_dir.join(COMPARISON_FILE);
    std::fs::write(&comparison_path, text)?;
    info!("Resultado da comparação salvo em {}.", comparison_path.display());

    write_comparison_digest(&entries, &comparison_dir, baseline_path, target_path, digest_title);
    Ok(())
}

/// Compara as primitivas entre um subconjunto e o dataset completo
pub async fn compare_with_subset(
    profile_path: &Path,
    target_path: &Path,
    subset_path: &Path,
    options: &RunOptions,
    history: Arc<HistoryStorage>,
    log_writer: Option<&RunLogWriter>,
    validate: bool,
) -> ProfilerResult<()> {
    compare_datasets(
        profile_path,
        subset_path,
        target_path,
        options,
        history,
        log_writer,
        validate,
        "Subset comparison digest",
    )
    .await
}

/// Compara as primitivas entre duas versões do mesmo dataset
pub async fn compare_with_new_version(
    profile_path: &Path,
    initial_path: &Path,
    target_path: &Path,
    options: &RunOptions,
    history: Arc<HistoryStorage>,
    log_writer: Option<&RunLogWriter>,
    validate: bool,
) -> ProfilerResult<()> {
    compare_datasets(
        profile_path,
        initial_path,
        target_path,
        options,
        history,
        log_writer,
        validate,
        "Version comparison digest",
    )
    .await
}

fn dataset_stem(path: &Path) -> String {
    path.file_stem().map(|s| s.to_string_lossy().into_owned()).unwrap_or_else(|| "dataset".to_string())
}

fn timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// Cria um diretório ainda não existente com o prefixo dado, acrescentando
/// um contador em colisões no mesmo segundo
fn create_unique_dir(base: &Path, name: &str) -> ProfilerResult<PathBuf> {
    let mut candidate = base.join(name);
    let mut counter = 1;
    while candidate.exists() {
        candidate = base.join(format!("{}_{}", name, counter));
        counter += 1;
    }
    std::fs::create_dir(&candidate)?;
    Ok(candidate)
}

/// Cria `results/<dataset>_<perfil>_<timestamp>/`
pub fn create_profiling_dir_tree(
    profile_name: &str,
    dataset_path: &Path,
    base_output_dir: Option<&Path>,
) -> ProfilerResult<PathBuf> {
    let base = match base_output_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let results_dir = base.join(RESULTS_DIR);
    std::fs::create_dir_all(&results_dir)?;

    let name = format!("{}_{}_{}", dataset_stem(dataset_path), profile_name, timestamp());
    create_unique_dir(&results_dir, &name)
}

/// Cria a árvore de uma comparação, com os subdiretórios dos dois runs
pub fn create_comparison_and_profiling_dir_tree(
    profile_name: &str,
    baseline_path: &Path,
    target_path: &Path,
    base_output_dir: Option<&Path>,
) -> ProfilerResult<(PathBuf, PathBuf, PathBuf)> {
    let base = match base_output_dir {
        Some(dir) => dir.to_path_buf(),
        None => std::env::current_dir()?,
    };
    let results_dir = base.join(RESULTS_DIR);
    std::fs::create_dir_all(&results_dir)?;

    let mut baseline_name = dataset_stem(baseline_path);
    let mut target_name = dataset_stem(target_path);
    if baseline_name == target_name {
        baseline_name = format!("{}(baseline)", baseline_name);
        target_name = format!("{}(target)", target_name);
    }
    let stamp = timestamp();

    let comparison_dir = create_unique_dir(
        &results_dir,
        &format!("comparison_{}_{}_{}_{}", baseline_name, target_name, profile_name, stamp),
    )?;
    let baseline_dir = create_unique_dir(
        &comparison_dir,
        &format!("profiling_{}_{}_{}", baseline_name, profile_name, stamp),
    )?;
    let target_dir = create_unique_dir(
        &comparison_dir,
        &format!("profiling_{}_{}_{}", target_name, profile_name, stamp),
    )?;
    Ok((comparison_dir, baseline_dir, target_dir))
}

/// Materializa as tarefas de estágio 1 a partir dos modelos do perfil
pub fn create_tasks_to_run(
    table: Arc<Table>,
    table_hash: Option<String>,
    strategy: Strategy,
    profile_tasks: &[TaskProfile],
) -> Vec<Task> {
    profile_tasks
        .iter()
        .map(|template| {
            Task::new(
                template.family,
                template.algorithm,
                template.parameters.clone(),
                Arc::clone(&table),
                table_hash.clone(),
                template.timeout,
                strategy,
            )
        })
        .collect()
}
