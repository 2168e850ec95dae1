//! Spillscope command line
//!
//! Runs the staged pipeline against a state directory and exposes the
//! stored audit queue, rankings and traversals.

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use metrics_exporter_prometheus::PrometheusBuilder;
use spillscope_common::config::AppConfig;
use spillscope_common::models::{Adjudication, Decision, IntentCategory};
use spillscope_common::{metrics, JsonStore, VERSION};
use spillscope_labeling::create_classifier;
use spillscope_pipeline::{read_records, Pipeline, PipelineError, RunStatus};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "spillscope")]
#[command(about = "Citation-graph spillover metrics with staged labeling and audit", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to config/default + APP_ENV layering)
    #[arg(short, long, global = true, env = "SPILLSCOPE_CONFIG")]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run or resume the pipeline over an input file
    Run {
        /// JSON array or JSON-lines file of paper records
        input: PathBuf,
    },

    /// List open audit queue entries in presentation order
    Queue {
        #[arg(short, long, default_value_t = 50)]
        limit: usize,
    },

    /// Apply a reviewer decision to one queue entry
    Adjudicate {
        /// Queue entry id
        entry: Uuid,

        #[arg(short, long, value_enum)]
        decision: DecisionArg,

        /// Corrected category, required for reject
        #[arg(long)]
        category: Option<String>,

        #[arg(short, long, env = "SPILLSCOPE_REVIEWER")]
        reviewer: String,

        #[arg(short, long)]
        note: Option<String>,
    },

    /// Top papers by authority score
    Rank {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },

    /// References and citations of one paper
    Trace {
        /// Canonical key, identifier or resolver URL, e.g. doi:10.1000/xyz
        key: String,

        #[arg(short, long, default_value_t = 2)]
        depth: usize,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum DecisionArg {
    Approve,
    Reject,
    Dispute,
}

impl From<DecisionArg> for Decision {
    fn from(arg: DecisionArg) -> Self {
        match arg {
            DecisionArg::Approve => Decision::Approve,
            DecisionArg::Reject => Decision::Reject,
            DecisionArg::Dispute => Decision::Dispute,
        }
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.observability.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if config.observability.json_logging {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => AppConfig::from_file(path),
        None => AppConfig::load(),
    }
    .map_err(PipelineError::from)
    .context("Failed to load configuration")?;

    init_tracing(&config);
    info!("Starting Spillscope v{}", VERSION);

    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install metrics exporter")?;
        info!(%addr, "Metrics exporter listening");
    }
    metrics::register_metrics();

    let config = Arc::new(config);
    let store = JsonStore::open(&config.pipeline.state_dir)?;
    let classifier = create_classifier(&config.labeler)?;
    let mut pipeline = Pipeline::new(config.clone(), store, classifier);

    let result = match cli.command {
        Commands::Run { input } => {
            let records = read_records(&input)?;
            let mut context = pipeline.context();

            let cancel = context.cancel_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, stopping after the current unit of work");
                    cancel.cancel();
                }
            });

            let output = pipeline.run(&records, &mut context).await;
            match output {
                Ok(output) => {
                    print_json(&output.summary)?;
                    if let RunStatus::Cancelled { stage } = output.summary.status {
                        warn!(%stage, "Run stopped early; rerun to resume");
                        std::process::exit(130);
                    }
                    Ok(())
                }
                Err(e) => Err(e),
            }
        }
        Commands::Queue { limit } => {
            print_json(&pipeline.open_entries(limit))?;
            Ok(())
        }
        Commands::Adjudicate {
            entry,
            decision,
            category,
            reviewer,
            note,
        } => {
            let corrected_category = category
                .as_deref()
                .map(str::parse::<IntentCategory>)
                .transpose()?;
            let adjudication = Adjudication {
                decision: decision.into(),
                corrected_category,
                reviewer,
                note,
            };
            pipeline.adjudicate(entry, adjudication).map(|outcome| {
                match &outcome {
                    Some(outcome) => info!(resolved_label = %outcome.resolved_label, "Entry closed"),
                    None => info!(entry = %entry, "Entry stays open"),
                }
            })
        }
        Commands::Rank { limit } => {
            print_json(&pipeline.top_papers(limit))?;
            Ok(())
        }
        Commands::Trace { key, depth } => pipeline
            .trace(&pipeline.resolve_key(&key), depth)
            .map(|trace| {
                if let Err(e) = print_json(&trace) {
                    error!(error = %e, "Failed to print traversal");
                }
            }),
    };

    if let Err(e) = result {
        error!(error = %e, "Command failed");
        std::process::exit(e.exit_code());
    }

    info!("Spillscope finished");
    Ok(())
}
