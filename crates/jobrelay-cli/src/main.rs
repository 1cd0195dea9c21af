//! jobrelay CLI and worker process.

use anyhow::Context;
use clap::{Parser, Subcommand};
use jobrelay_config::{LogFormat, SystemConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod client;
mod commands;

use client::ApiClient;

#[derive(Parser)]
#[command(name = "jobrelay")]
#[command(about = "jobrelay job orchestrator CLI", long_about = None)]
struct Cli {
    /// Orchestrator API URL (defaults to the configured worker api-url)
    #[arg(long, env = "JOBRELAY_API_URL")]
    api_url: Option<String>,

    /// Path to the KDL configuration file
    #[arg(short, long, env = "JOBRELAY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a worker that claims and executes jobs until interrupted
    Worker {
        /// Hostname to register with
        #[arg(long, env = "HOSTNAME")]
        hostname: Option<String>,
        /// Length of one simulated time unit for built-in jobs, in milliseconds
        #[arg(long, default_value = "1000")]
        time_unit_ms: u64,
    },
    /// Submit and inspect jobs
    Jobs {
        #[command(subcommand)]
        command: JobCommands,
    },
    /// Inspect workers
    Workers {
        #[command(subcommand)]
        command: WorkerCommands,
    },
}

#[derive(Subcommand)]
enum JobCommands {
    /// Submit a new job
    Submit {
        /// Job type, e.g. email, sleep, fail
        job_type: String,
        /// JSON payload
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Failed attempts allowed before the job is marked dead
        #[arg(long)]
        max_retries: Option<i32>,
        /// Per-attempt timeout in seconds
        #[arg(long)]
        timeout: Option<i32>,
    },
    /// List recent jobs, newest first
    List {
        #[arg(long, default_value = "20")]
        limit: u32,
        #[arg(long, default_value = "0")]
        offset: u32,
    },
    /// Show job details
    Show {
        /// Job ID
        id: String,
    },
    /// Show job counts by status
    Stats,
}

#[derive(Subcommand)]
enum WorkerCommands {
    /// List registered workers
    List,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config =
        SystemConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(config.log_format);

    if let Some(api_url) = cli.api_url {
        config.worker.api_url = api_url;
    }
    let client = ApiClient::new(&config.worker.api_url, config.worker.request_timeout)?;

    match cli.command {
        Commands::Worker {
            hostname,
            time_unit_ms,
        } => {
            commands::worker::run(client, &config.worker, hostname, time_unit_ms).await?;
        }
        Commands::Jobs { command } => match command {
            JobCommands::Submit {
                job_type,
                payload,
                max_retries,
                timeout,
            } => {
                commands::jobs::submit(&client, &job_type, &payload, max_retries, timeout).await?;
            }
            JobCommands::List { limit, offset } => {
                commands::jobs::list(&client, limit, offset).await?;
            }
            JobCommands::Show { id } => {
                commands::jobs::show(&client, &id).await?;
            }
            JobCommands::Stats => {
                commands::jobs::stats(&client).await?;
            }
        },
        Commands::Workers { command } => match command {
            WorkerCommands::List => {
                commands::workers::list(&client).await?;
            }
        },
    }

    Ok(())
}
