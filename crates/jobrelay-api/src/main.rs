//! jobrelay orchestrator server

use clap::Parser;
use jobrelay_api::{AppState, routes};
use jobrelay_config::{LogFormat, SystemConfig};
use jobrelay_db::{PgJobRepo, PgWorkerRepo, create_pool, run_migrations};
use jobrelay_scheduler::{
    Dispatcher, LivenessMonitor, OrphanReaper, RedisWakeQueue, install_shutdown_handler,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "jobrelay-server")]
#[command(about = "jobrelay orchestrator: job API, worker protocol and liveness monitor")]
#[command(version)]
struct Args {
    /// Path to the KDL configuration file
    #[arg(short, long, env = "JOBRELAY_CONFIG")]
    config: Option<PathBuf>,
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = SystemConfig::load(args.config.as_deref())?;
    init_tracing(config.log_format);
    let settings = config.orchestrator;

    info!("Connecting to database...");
    let pool = create_pool(&settings.database_url, settings.max_connections).await?;
    run_migrations(&pool).await?;
    info!("Database connected");

    info!(queue = %settings.queue_key, "Connecting to Redis...");
    let queue = RedisWakeQueue::connect(&settings.redis_url, settings.queue_key.clone()).await?;

    let jobs = Arc::new(PgJobRepo::new(pool.clone()));
    let workers = Arc::new(PgWorkerRepo::new(pool));
    let dispatcher = Dispatcher::new(jobs.clone(), workers.clone(), Arc::new(queue))
        .with_store_timeout(settings.store_timeout);

    let shutdown = install_shutdown_handler();

    let mut monitor = LivenessMonitor::new(
        workers,
        settings.monitor_interval,
        settings.liveness_threshold,
    )
    .with_store_timeout(settings.store_timeout);
    if settings.reap_orphans {
        monitor = monitor.with_reaper(OrphanReaper::new(jobs));
    }
    let monitor = tokio::spawn(monitor.run(shutdown.clone()));

    let app = routes::router(AppState::new(dispatcher))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", settings.listen);
    let listener = TcpListener::bind(settings.listen.as_str()).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await?;

    shutdown.cancel();
    monitor.await?;
    info!("Server stopped");

    Ok(())
}
