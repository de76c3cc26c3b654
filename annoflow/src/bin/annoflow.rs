//! Command-line front end.
//!
//! Exit codes: 0 on success, 1 on any failure, 2 when `run` finds the run
//! directory already carrying a terminal marker.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use annoflow::config::PipelineConfig;
use annoflow::errors::{AnnoflowError, ConfigError};
use annoflow::events::LoggingEventSink;
use annoflow::executor::{create_output_dirs, run_builtin, MarkerStore, ProcessRunner, RunStatus};
use annoflow::pipeline::AnnotationPipeline;
use annoflow::step::StepAction;

#[derive(Parser)]
#[command(name = "annoflow")]
#[command(about = "Plan and run sequential sequence-annotation pipelines", long_about = None)]
#[command(version)]
struct Cli {
    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the configuration and database selection
    Validate {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// Print the stage plan as JSON
    Plan {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// Print the step list as a resumable bash script
    Script {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        /// Command used to run builtin steps (default: this binary's `step`)
        #[arg(long, value_name = "CMD")]
        invoker: Option<String>,
    },
    /// Execute the pipeline, resuming from completed steps
    Run {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        /// Clear a WRONG marker before running
        #[arg(long)]
        retry: bool,
    },
    /// Print the run status and the state of every step
    Status {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
    },
    /// Remove the run directory
    Clean {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        /// Confirm removal
        #[arg(long)]
        yes: bool,
    },
    /// Run a single builtin step (used by rendered scripts)
    Step {
        #[arg(short, long, value_name = "FILE")]
        config: PathBuf,
        #[arg(value_name = "NAME")]
        name: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match run(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load(config: &Path) -> Result<AnnotationPipeline> {
    let config = PipelineConfig::from_json_file(config)
        .with_context(|| format!("Failed to load configuration {}", config.display()))?;
    Ok(AnnotationPipeline::from_config(config)?)
}

async fn run(command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Validate { config } => validate(&config),
        Commands::Plan { config } => {
            let pipeline = load(&config)?;
            println!("{}", serde_json::to_string_pretty(pipeline.plan())?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Script { config, invoker } => {
            let pipeline = load(&config)?;
            let invoker = invoker.unwrap_or_else(|| default_invoker(&config));
            print!("{}", pipeline.render_script(&invoker));
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run { config, retry } => {
            let pipeline = load(&config)?;
            if retry && MarkerStore::new(pipeline.layout().clone()).clear_wrong()? {
                eprintln!("Cleared WRONG marker; resuming");
            }

            let report = pipeline
                .run(ProcessRunner::new(), Arc::new(LoggingEventSink::default()))
                .await?;
            if report.is_noop() {
                eprintln!(
                    "Run directory {} is already {}; use `clean` or `run --retry`",
                    pipeline.layout().root().display(),
                    report.status
                );
                return Ok(ExitCode::from(2));
            }
            println!(
                "Run {}: {} steps executed, {} skipped",
                report.status,
                report.executed.len(),
                report.skipped.len()
            );
            Ok(ExitCode::SUCCESS)
        }
        Commands::Status { config } => {
            let pipeline = load(&config)?;
            let status = pipeline.status()?;
            println!("run: {}", status.run);
            for (name, state) in &status.steps {
                println!("{:>8}  {name}", state.to_string());
            }
            if let Some(failure) = status.failure {
                println!("failed step: {} ({})", failure.step, failure.message);
            }
            Ok(if status.run == RunStatus::Wrong {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
        Commands::Clean { config, yes } => {
            let pipeline = load(&config)?;
            if !yes {
                bail!(
                    "Refusing to remove {} without --yes",
                    pipeline.layout().root().display()
                );
            }
            pipeline.clean()?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Step { config, name } => {
            let pipeline = load(&config)?;
            let Some(step) = pipeline.step(&name) else {
                bail!("No step named '{name}'");
            };
            let StepAction::Builtin(builtin) = &step.action else {
                bail!("Step '{name}' is not a builtin step");
            };
            create_output_dirs(step)?;
            run_builtin(builtin)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn validate(config: &Path) -> Result<ExitCode> {
    let config = PipelineConfig::from_json_file(config)
        .with_context(|| format!("Failed to load configuration {}", config.display()))?;

    match AnnotationPipeline::from_config(config) {
        Ok(pipeline) => {
            println!(
                "OK: {} stages ({})",
                pipeline.plan().len(),
                pipeline.plan().database_ids().join(" -> ")
            );
            Ok(ExitCode::SUCCESS)
        }
        Err(AnnoflowError::Config(ConfigError::Selection(errors))) => {
            for error in &errors {
                let info = error.error_info();
                println!("{}: {}", info.code, info.summary);
                for (key, value) in &info.context {
                    println!("    {key}: {value}");
                }
                if let Some(hint) = info.fix_hint {
                    println!("    hint: {hint}");
                }
            }
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err.into()),
    }
}

fn default_invoker(config: &Path) -> String {
    let program = std::env::current_exe()
        .map_or_else(|_| "annoflow".to_string(), |p| p.display().to_string());
    format!("{program} step --config {}", config.display())
}
