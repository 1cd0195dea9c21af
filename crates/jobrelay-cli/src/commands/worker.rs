//! The `worker` command: a long-running worker process.

use anyhow::{Context, Result};
use jobrelay_config::WorkerConfig;
use jobrelay_core::Backoff;
use jobrelay_executor::BuiltinExecutor;
use jobrelay_scheduler::{RedisWakeQueue, WorkerLoop, WorkerSettings, install_shutdown_handler};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::client::ApiClient;

const HOSTNAME_FILE: &str = "/etc/hostname";

pub async fn run(
    client: ApiClient,
    config: &WorkerConfig,
    hostname: Option<String>,
    time_unit_ms: u64,
) -> Result<()> {
    let hostname = resolve_hostname(hostname, std::fs::read_to_string(HOSTNAME_FILE).ok());
    info!(queue = %config.queue_key, "Connecting to Redis...");
    let queue = RedisWakeQueue::connect(&config.redis_url, config.queue_key.clone())
        .await
        .context("Failed to connect to the wake queue")?;

    let settings = WorkerSettings {
        hostname,
        heartbeat_interval: config.heartbeat_interval,
        poll_interval: config.poll_interval,
        backoff: Backoff::new(config.backoff_base, config.backoff_max),
        ..WorkerSettings::new(String::new())
    };
    let executor = BuiltinExecutor::with_unit(Duration::from_millis(time_unit_ms));

    let worker = WorkerLoop::new(
        Arc::new(client),
        Arc::new(executor),
        Arc::new(queue),
        settings,
    );
    worker
        .run(install_shutdown_handler())
        .await
        .context("Worker failed to start")?;
    Ok(())
}

/// Explicit hostname, then the contents of /etc/hostname, then "localhost".
fn resolve_hostname(explicit: Option<String>, from_file: Option<String>) -> String {
    [explicit, from_file]
        .into_iter()
        .flatten()
        .map(|h| h.trim().to_string())
        .find(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string())
}
