//! CLI for perceval - answer grading, pass@k and perception scoring of
//! sampled model generations.

mod formatting;
mod progress;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use perceval_core::config::{load_config, load_config_with_overrides, ConfigOverrides};
use perceval_core::metrics::aggregate_scores;
use perceval_core::persistence::load_results;
use perceval_core::types::Variant;
use perceval_core::{EvalPipeline, RunOutcome};
use progress::ProgressDisplay;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "perceval",
    about = "Grade sampled generations: pass@k, perception ratio and p-pass@1"
)]
struct Cli {
    /// Path to the evaluation configuration file.
    #[arg(short, long, default_value = "perceval.yaml")]
    config: String,

    /// Increase log verbosity (-v info, -vv debug). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load and print the resolved configuration.
    ShowConfig,

    /// Evaluate one (dataset, model, variant) run.
    Eval {
        #[arg(long)]
        dataset: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// Problem variant: original or modified.
        #[arg(long)]
        variant: Option<Variant>,
        /// Override the number of parallel workers.
        #[arg(long)]
        concurrency: Option<usize>,
        #[arg(long)]
        output_dir: Option<String>,
        /// Disable progress bars.
        #[arg(long)]
        no_progress: bool,
    },

    /// Aggregate scores from an existing result artifact.
    Score {
        /// Path to a `<model>_<variant>.json` artifact.
        #[arg()]
        artifact: PathBuf,
        /// Print the scores as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::ShowConfig => {
            let config = load_config(&cli.config)?;
            println!(
                "Loaded evaluation '{}': {} on {} ({}).",
                config.name,
                config.model,
                config.dataset.name,
                config.variant
            );
            let yaml = serde_yaml::to_string(&config)?;
            println!("{yaml}");
        }
        Command::Eval {
            dataset,
            model,
            variant,
            concurrency,
            output_dir,
            no_progress,
        } => {
            let overrides = ConfigOverrides {
                dataset,
                model,
                variant,
                concurrency,
                output_dir,
            };
            let config = load_config_with_overrides(&cli.config, overrides)?;
            debug!(run = %config.run_key(), "Configuration loaded");

            let rt = tokio::runtime::Runtime::new()?;
            let outcome = rt.block_on(async {
                let pipeline = EvalPipeline::from_config(config)?;
                let display_handle = if no_progress {
                    None
                } else {
                    let events = pipeline.subscribe();
                    Some(tokio::spawn(ProgressDisplay::new().run(events)))
                };

                let result = pipeline.run().await;

                if let Some(handle) = display_handle {
                    let _ = handle.await;
                }
                result
            })?;

            match outcome {
                RunOutcome::Skipped { artifact, .. } => {
                    formatting::print_skipped(&artifact);
                }
                RunOutcome::Completed(report) => formatting::print_report(&report),
            }
        }
        Command::Score { artifact, json } => {
            let results = load_results(&artifact)
                .with_context(|| format!("failed to read artifact {}", artifact.display()))?;
            let scores = aggregate_scores(&results)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&scores)?);
            } else {
                formatting::print_scores(&formatting::artifact_label(&artifact), &scores);
            }
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
