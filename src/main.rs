//! CLI do ProfileMesh: mineração de primitivas e comparação de datasets

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use profile_mesh::logging::{init_logging, init_worker_logging};
use profile_mesh::util::{correct_mem_limit_bytes, correct_number_of_workers};
use profile_mesh::worker::worker_main;
use profile_mesh::{
    compare_with_new_version, compare_with_subset, run_profile_on_dataset, HistoryStorage,
    RulesKnobs, RunOptions, Strategy,
};

#[derive(Debug, Parser)]
#[command(name = "profile_mesh", version, about = "Kit de perfilamento de dados ProfileMesh")]
struct Cli {
    #[command(subcommand)]
    command: CommandKind,
}

#[derive(Debug, Subcommand)]
enum CommandKind {
    /// Minera primitivas em um dataset usando um perfil YAML
    Run(RunArgs),
    /// Executa o perfil em dois datasets e compara as primitivas
    #[command(subcommand)]
    Compare(CompareKind),
    /// Entrada interna dos processos de mineração
    #[command(hide = true)]
    Worker,
}

#[derive(Debug, Subcommand)]
enum CompareKind {
    /// Compara um subconjunto com o dataset completo
    Subset(CompareSubsetArgs),
    /// Compara duas versões do mesmo dataset
    Version(CompareVersionArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyArg {
    #[value(name = "auto_decision")]
    AutoDecision,
    #[value(name = "ask")]
    Ask,
    #[value(name = "timeout_grow")]
    TimeoutGrow,
    /// Grafia da CLI para a estratégia shrink_search
    #[value(name = "prune_search")]
    PruneSearch,
    #[value(name = "single_run")]
    SingleRun,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::AutoDecision => Strategy::AutoDecision,
            StrategyArg::Ask => Strategy::Ask,
            StrategyArg::TimeoutGrow => Strategy::TimeoutGrow,
            StrategyArg::PruneSearch => Strategy::ShrinkSearch,
            StrategyArg::SingleRun => Strategy::SingleRun,
        }
    }
}

#[derive(Debug, Args)]
struct CommonArgs {
    /// Caminho do perfil YAML
    #[arg(long = "profile", value_name = "PATH")]
    profile_path: PathBuf,

    /// Delimitador do CSV
    #[arg(long, default_value = ",")]
    delimiter: String,

    /// O CSV tem linha de cabeçalho
    #[arg(long = "has_header", default_value_t = true, action = ArgAction::Set, value_name = "BOOL")]
    has_header: bool,

    /// Pula a busca por resultados já armazenados
    #[arg(long = "skip_results_check")]
    skip_results_check: bool,

    /// Memória máxima permitida em MB
    #[arg(long = "mem_limit", value_parser = clap::value_parser!(u64).range(1..))]
    mem_limit: Option<u64>,

    /// Núcleos de CPU a usar; 0 = todos os disponíveis
    #[arg(long, default_value_t = 0)]
    workers: usize,

    /// Nível de log do console
    #[arg(long = "log_level", default_value = "INFO")]
    log_level: String,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Caminho do dataset (CSV)
    #[arg(long = "data", value_name = "PATH")]
    data_path: PathBuf,

    /// Estratégia de tratamento de falhas durante a mineração
    #[arg(long, value_enum, default_value = "ask")]
    strategy: StrategyArg,

    /// Segundos somados por retry no modo timeout_grow
    #[arg(long = "timeout_step", default_value_t = 300, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_step: u64,

    /// Teto do timeout no modo timeout_grow
    #[arg(long = "timeout_max", default_value_t = 1800, value_parser = clap::value_parser!(u64).range(1..))]
    timeout_max: u64,

    /// Fator de poda do dataset no modo prune_search
    #[arg(long = "prune_factor", default_value_t = 0.7, value_parser = parse_prune_factor)]
    prune_factor: f64,

    /// Piso de linhas ao podar o dataset
    #[arg(long = "min_rows", default_value_t = 1000, value_parser = clap::value_parser!(u64).range(1..))]
    min_rows: u64,

    /// Não tenta rodar tarefas em paralelo
    #[arg(long = "no_parallel")]
    no_parallel: bool,
}

#[derive(Debug, Args)]
struct CompareSubsetArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Dataset completo (alvo)
    #[arg(long = "target", value_name = "PATH")]
    target_path: PathBuf,

    /// Subconjunto do dataset
    #[arg(long = "subset", value_name = "PATH")]
    subset_path: PathBuf,

    /// Verifica diretamente as primitivas quando o alvo falha
    #[arg(long)]
    validate: bool,
}

#[derive(Debug, Args)]
struct CompareVersionArgs {
    #[command(flatten)]
    common: CommonArgs,

    /// Versão inicial do dataset
    #[arg(long = "initial", value_name = "PATH")]
    initial_path: PathBuf,

    /// Versão alvo do dataset
    #[arg(long = "target", value_name = "PATH")]
    target_path: PathBuf,

    /// Verifica diretamente as primitivas quando o alvo falha
    #[arg(long)]
    validate: bool,
}

fn parse_prune_factor(value: &str) -> Result<f64, String> {
    let parsed: f64 = value.parse().map_err(|e| format!("{}", e))?;
    if parsed > 0.0 && parsed < 1.0 {
        Ok(parsed)
    } else {
        Err("o fator de poda deve estar no intervalo aberto (0, 1)".to_string())
    }
}

fn parse_delimiter(raw: &str) -> anyhow::Result<u8> {
    let bytes = raw.as_bytes();
    anyhow::ensure!(bytes.len() == 1, "o delimitador deve ser um único caractere: {:?}", raw);
    Ok(bytes[0])
}

fn build_options(
    common: &CommonArgs,
    strategy: Strategy,
    knobs: RulesKnobs,
    try_parallel: bool,
) -> anyhow::Result<RunOptions> {
    Ok(RunOptions {
        delimiter: parse_delimiter(&common.delimiter)?,
        has_header: common.has_header,
        mem_limit_bytes: correct_mem_limit_bytes(common.mem_limit),
        workers: correct_number_of_workers(common.workers),
        check_results: !common.skip_results_check,
        try_parallel,
        strategy,
        knobs,
        worker_exe: None,
        output_dir: None,
    })
}

async fn run_command(args: RunArgs) -> anyhow::Result<()> {
    let log_writer = init_logging(&args.common.log_level);
    let run_id = Uuid::new_v4().to_string();
    let history = Arc::new(HistoryStorage::new(None).context("falha ao abrir o histórico")?);

    let knobs = RulesKnobs {
        timeout_step: args.timeout_step,
        timeout_max: args.timeout_max,
        prune_factor: args.prune_factor,
        min_rows: args.min_rows as usize,
    };
    let options = build_options(&args.common, args.strategy.into(), knobs, !args.no_parallel)?;

    run_profile_on_dataset(
        &run_id,
        &args.common.profile_path,
        &args.data_path,
        &options,
        history,
        Some(&log_writer),
    )
    .await
    .context("falha na preparação do perfilamento")
}

async fn compare_subset_command(args: CompareSubsetArgs) -> anyhow::Result<()> {
    let log_writer = init_logging(&args.common.log_level);
    let history = Arc::new(HistoryStorage::new(None).context("falha ao abrir o histórico")?);
    let options =
        build_options(&args.common, Strategy::SingleRun, RulesKnobs::default(), false)?;

    compare_with_subset(
        &args.common.profile_path,
        &args.target_path,
        &args.subset_path,
        &options,
        history,
        Some(&log_writer),
        args.validate,
    )
    .await
    .context("falha na preparação da comparação")
}

async fn compare_version_command(args: CompareVersionArgs) -> anyhow::Result<()> {
    let log_writer = init_logging(&args.common.log_level);
    let history = Arc::new(HistoryStorage::new(None).context("falha ao abrir o histórico")?);
    let options =
        build_options(&args.common, Strategy::SingleRun, RulesKnobs::default(), false)?;

    compare_with_new_version(
        &args.common.profile_path,
        &args.initial_path,
        &args.target_path,
        &options,
        history,
        Some(&log_writer),
        args.validate,
    )
    .await
    .context("falha na preparação da comparação")
}

fn execute(command: CommandKind) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("falha ao criar o runtime")?;

    runtime.block_on(async move {
        match command {
            CommandKind::Run(args) => run_command(args).await,
            CommandKind::Compare(CompareKind::Subset(args)) => compare_subset_command(args).await,
            CommandKind::Compare(CompareKind::Version(args)) => {
                compare_version_command(args).await
            }
            // tratado antes da criação do runtime
            CommandKind::Worker => Ok(()),
        }
    })
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if matches!(cli.command, CommandKind::Worker) {
        init_worker_logging();
        return match worker_main() {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("erro do worker: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    // falhas individuais de tarefas não mudam o código de saída; apenas
    // erros de preparação chegam aqui
    match execute(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("erro: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
