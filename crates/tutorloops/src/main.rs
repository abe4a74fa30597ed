use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use tutorloops_core::Orchestrator;
use tutorloops_logging::{init_tracing, LogFormat, Logger, RunWriter};
use tutorloops_stats::{StatisticsEngine, StatisticsReport, DEFAULT_INTERACTION_ORDER};

mod config;
mod report;
mod results;

use config::{ExperimentConfig, CONFIG_FILE_NAME};
use results::RunFile;

#[derive(Parser, Debug)]
#[command(
    name = "tutorloops",
    about = "Factorial evaluation harness for proposer/critic tutoring dialogues",
    version,
    author
)]
struct Cli {
    /// Log output format
    #[arg(long, value_enum, default_value = "pretty", global = true)]
    log_format: LogFormatChoice,

    /// Tracing filter (overridden by RUST_LOG)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Also append diagnostics as JSON to a trace file in this directory
    #[arg(long, global = true)]
    trace_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run every cell of the configured design
    Run {
        /// Experiment config (default: ./tutorloops.toml)
        #[arg(short, long, default_value = CONFIG_FILE_NAME)]
        config: PathBuf,

        /// Override engine.max_rounds
        #[arg(short = 'n', long)]
        max_rounds: Option<usize>,

        /// Override run.parallelism
        #[arg(short = 'j', long)]
        parallelism: Option<usize>,

        /// Override run.retry_limit
        #[arg(long)]
        retry_limit: Option<u32>,

        /// Results file (default: a new file under run.output_dir or the data directory)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Print the statistics report as JSON
        #[arg(long)]
        json_output: bool,

        /// Show the design without calling any agent
        #[arg(long)]
        dry_run: bool,
    },

    /// Recompute statistics from a results file
    Stats {
        /// A results file written by `tutorloops run`
        file: PathBuf,

        /// Score with this config's rubric and factors instead of the file's
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Highest interaction order in the ANOVA
        #[arg(long, default_value_t = DEFAULT_INTERACTION_ORDER)]
        max_order: usize,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check a config file without running anything
    Validate {
        #[arg(default_value = CONFIG_FILE_NAME)]
        config: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormatChoice {
    Pretty,
    Json,
    Compact,
}

impl From<LogFormatChoice> for LogFormat {
    fn from(choice: LogFormatChoice) -> Self {
        match choice {
            LogFormatChoice::Pretty => LogFormat::Pretty,
            LogFormatChoice::Json => LogFormat::Json,
            LogFormatChoice::Compact => LogFormat::Compact,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_format: LogFormat = cli.log_format.into();
    let trace_guard = init_tracing(&cli.log_level, log_format, cli.trace_dir.as_deref());

    match cli.command {
        Commands::Run {
            config,
            max_rounds,
            parallelism,
            retry_limit,
            output,
            json_output,
            dry_run,
        } => {
            let mut config = ExperimentConfig::load(&config)?;
            if let Some(n) = max_rounds {
                config.engine.max_rounds = n;
            }
            if let Some(j) = parallelism {
                config.run.parallelism = j;
            }
            if let Some(r) = retry_limit {
                config.run.retry_limit = r;
            }
            config.validate()?;

            let exit_code = run(config, output, log_format, json_output, dry_run).await?;
            // process::exit skips destructors; flush the trace file first
            drop(trace_guard);
            std::process::exit(exit_code);
        }
        Commands::Stats {
            file,
            config,
            max_order,
            json,
        } => stats(&file, config.as_deref(), max_order, json),
        Commands::Validate { config } => {
            let loaded = ExperimentConfig::load(&config)?;
            let design = loaded.design()?;
            println!(
                "{} is valid: {} profiles x {} scenarios x {} replications = {} cells",
                config.display(),
                design.profiles(loaded.agents.critic.is_some()).len(),
                design.scenarios().len(),
                design.replications(),
                design.cell_count()
            );
            Ok(())
        }
    }
}

async fn run(
    config: ExperimentConfig,
    output: Option<PathBuf>,
    log_format: LogFormat,
    json_output: bool,
    dry_run: bool,
) -> Result<i32> {
    let design = config.design()?;
    let critic_available = config.agents.critic.is_some();

    if dry_run {
        println!("=== Dry Run ===");
        for profile in design.profiles(critic_available) {
            println!("Profile: {} ({})", profile.name, profile.architecture);
        }
        println!("Scenarios: {}", design.scenarios().len());
        println!("Replications: {}", design.replications());
        println!("Cells: {}", design.cell_count());
        println!("Max rounds: {}", config.engine.max_rounds);
        println!("Parallelism: {}", config.run.parallelism);
        for spec in config.agent_specs() {
            println!("Agent: {} ({})", spec.display_name(), spec.command);
        }
        return Ok(0);
    }

    let working_dir = std::env::current_dir().context("Failed to get current directory")?;
    let capabilities = config.capabilities(&working_dir);
    verify_agents(&config).await?;

    let writer = match (&output, &config.run.output_dir) {
        (Some(path), _) => RunWriter::create(path),
        (None, Some(dir)) => RunWriter::in_dir(dir, &config.source),
        (None, None) => RunWriter::in_data_dir(&config.source),
    }
    .context("Failed to create results file")?;
    let writer = Arc::new(writer);
    info!(path = %writer.path().display(), "writing results");

    let logger = Arc::new(Logger::new(log_format));
    let orchestrator = Orchestrator::new(
        config.run_config(),
        config.rubric.clone(),
        capabilities,
        logger,
    )?
    .with_writer(writer.clone());

    // Handle Ctrl+C gracefully
    let interrupt_handle = orchestrator.interrupt_handle();
    ctrlc::set_handler(move || {
        eprintln!("\nInterrupted. Finishing cells already in flight...");
        interrupt_handle.store(true, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let summary = orchestrator.run(&design).await?;
    report::print_summary(&summary);
    eprintln!("Results: {}", writer.path().display());

    let engine = StatisticsEngine::new(config.rubric.clone()).with_factors(&config.factors);
    let statistics = engine.report(&orchestrator.store().records(false));
    emit(&statistics, json_output)?;

    Ok(summary.exit_code())
}

async fn verify_agents(config: &ExperimentConfig) -> Result<()> {
    use tutorloops_agent::{Agent, CommandAgent};

    for spec in config.agent_specs() {
        let agent = CommandAgent::new(spec.display_name(), &spec.command);
        if !agent.is_available().await {
            anyhow::bail!(
                "Agent '{}' is not available. Make sure '{}' exists or is in PATH.",
                agent.name(),
                spec.command
            );
        }
    }
    Ok(())
}

fn stats(file: &Path, config: Option<&Path>, max_order: usize, json: bool) -> Result<()> {
    let run = RunFile::load(file)?;
    if !run.finished {
        eprintln!("Note: {} has no run_end line; the run may be partial", file.display());
    }

    let (rubric, factors) = match config {
        Some(path) => {
            let config = ExperimentConfig::load(path)?;
            (config.rubric, config.factors)
        }
        None => {
            let rubric = run
                .rubric
                .clone()
                .context("Results file has no rubric; pass --config")?;
            (rubric, run.factors.clone())
        }
    };

    let mut engine = StatisticsEngine::new(rubric).with_max_interaction_order(max_order)?;
    if !factors.is_empty() {
        engine = engine.with_factors(&factors);
    }
    emit(&engine.report(&run.records), json)
}

fn emit(statistics: &StatisticsReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(statistics)?);
    } else {
        report::print_report(statistics);
    }
    Ok(())
}
