use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter};

use masterline::{load_config, Pipeline, WorkerPool};

#[derive(Parser, Debug)]
#[command(name = "masterline")]
#[command(about = "Two-stage audio mastering job runner")]
#[command(version)]
struct Args {
    /// Path to the JSON config file
    #[arg(short, long, env = "MASTERLINE_CONFIG")]
    config: PathBuf,

    /// SQLite database path (overrides the config file)
    #[arg(long, env = "MASTERLINE_DB")]
    db: Option<PathBuf>,

    /// Number of concurrent jobs (overrides the config file)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Emit logs as JSON lines
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one mastering attempt for each audio file id
    Process {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

/// Installs the subscriber, then routes `log` records from the database
/// layer into it.
fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "masterline=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        tracing::subscriber::set_global_default(registry.with(fmt::layer().json()))
    } else {
        tracing::subscriber::set_global_default(registry.with(fmt::layer()))
    }
    .context("Failed to install tracing subscriber")?;

    tracing_log::LogTracer::init().context("Failed to bridge log records")?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.json)?;

    let config = load_config(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;

    let pipeline = Arc::new(
        Pipeline::open(&config, args.db).context("Failed to set up the pipeline")?,
    );

    let Command::Process { ids } = args.command;
    let worker_count = args.workers.unwrap_or(config.worker_count).min(ids.len());
    info!(jobs = ids.len(), workers = worker_count, "Starting mastering run");

    let mut pool = WorkerPool::new(pipeline, worker_count);
    let total = ids.len();
    // Results are buffered without bound, so workers keep draining the
    // queue while we submit.
    for id in ids {
        pool.submit(id)
            .await
            .context("Worker pool stopped accepting jobs")?;
    }

    let mut failed = 0usize;
    let mut received = 0usize;
    while received < total {
        tokio::select! {
            report = pool.recv_result() => {
                let Some(report) = report else { break };
                received += 1;
                match report.outcome {
                    Ok(result) if result.skipped => {
                        println!("{}\tskipped\talready completed", report.audio_file_id);
                    }
                    Ok(result) => {
                        println!(
                            "{}\tcompleted\t{}",
                            report.audio_file_id,
                            result.mastered_path.unwrap_or_default()
                        );
                    }
                    Err(error) => {
                        failed += 1;
                        println!("{}\tfailed\t{}", report.audio_file_id, error);
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, waiting for running jobs to finish");
                pool.shutdown();
                break;
            }
        }
    }

    let unfinished = total - received;
    let late = pool.wait().await;
    failed += late.iter().filter(|r| !r.is_success()).count();
    if late.len() < unfinished {
        failed += unfinished - late.len();
    }

    if failed > 0 {
        bail!("{} of {} jobs failed", failed, total);
    }
    Ok(())
}
