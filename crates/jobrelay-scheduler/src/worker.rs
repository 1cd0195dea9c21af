//! Worker-side claim/execute/report loop.

use async_trait::async_trait;
use jobrelay_core::executor::JobExecutor;
use jobrelay_core::{Backoff, ClaimedJob, JobOutcome, OutcomeReport, ResourceId, Result, Worker};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::notify::WakeQueue;

/// The assignment protocol as seen from a worker.
///
/// Implemented in-process by the dispatcher and over HTTP by the CLI.
#[async_trait]
pub trait Coordinator: Send + Sync {
    async fn register_worker(&self, hostname: &str) -> Result<Worker>;

    async fn heartbeat(&self, worker_id: ResourceId) -> Result<()>;

    async fn claim_next(&self, worker_id: ResourceId) -> Result<Option<ClaimedJob>>;

    async fn report_outcome(
        &self,
        job_id: ResourceId,
        worker_id: ResourceId,
        outcome: &JobOutcome,
    ) -> Result<OutcomeReport>;
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub hostname: String,
    pub heartbeat_interval: Duration,
    /// Longest time to block on the wake queue before polling the store.
    pub poll_interval: Duration,
    pub backoff: Backoff,
    /// Pause after a queue or store error.
    pub error_pause: Duration,
}

impl WorkerSettings {
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            heartbeat_interval: Duration::from_secs(5),
            poll_interval: Duration::from_secs(5),
            backoff: Backoff::default(),
            error_pause: Duration::from_secs(1),
        }
    }
}

/// A worker process: registers once, heartbeats on its own task and
/// executes one job at a time.
pub struct WorkerLoop {
    coordinator: Arc<dyn Coordinator>,
    executor: Arc<dyn JobExecutor>,
    queue: Arc<dyn WakeQueue>,
    settings: WorkerSettings,
}

impl WorkerLoop {
    pub fn new(
        coordinator: Arc<dyn Coordinator>,
        executor: Arc<dyn JobExecutor>,
        queue: Arc<dyn WakeQueue>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            coordinator,
            executor,
            queue,
            settings,
        }
    }

    /// Run until `cancel` fires. Fails only if registration fails.
    ///
    /// A job that is executing when `cancel` fires is finished and reported
    /// before this returns.
    pub async fn run(self, cancel: CancellationToken) -> Result<()> {
        let worker = self
            .coordinator
            .register_worker(&self.settings.hostname)
            .await?;
        info!(
            worker_id = %worker.id,
            hostname = %worker.hostname,
            executor = self.executor.name(),
            "Starting worker"
        );

        // Heartbeats outlive `cancel` so a draining job keeps its worker ONLINE.
        let stop_heartbeat = CancellationToken::new();
        let heartbeat = tokio::spawn(heartbeat_loop(
            self.coordinator.clone(),
            worker.id,
            self.settings.heartbeat_interval,
            stop_heartbeat.clone(),
        ));

        self.work(worker.id, &cancel).await;

        stop_heartbeat.cancel();
        if let Err(e) = heartbeat.await {
            error!(worker_id = %worker.id, error = %e, "Heartbeat task panicked");
        }
        info!(worker_id = %worker.id, "Worker stopped");
        Ok(())
    }

    async fn work(&self, worker_id: ResourceId, cancel: &CancellationToken) {
        while !cancel.is_cancelled() {
            match self.coordinator.claim_next(worker_id).await {
                Ok(Some(job)) => {
                    if let Some(delay) = self.process(worker_id, job, cancel).await {
                        debug!(worker_id = %worker_id, delay_ms = delay.as_millis() as u64, "Backing off");
                        pause(delay, cancel).await;
                    }
                    // Drain the backlog before blocking again.
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker_id = %worker_id, error = %e, "Failed to claim job");
                    pause(self.settings.error_pause, cancel).await;
                    continue;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                woken = self.queue.wait(self.settings.poll_interval) => match woken {
                    Ok(Some(token)) => debug!(worker_id = %worker_id, token = %token, "Woken"),
                    Ok(None) => {}
                    Err(e) => {
                        warn!(worker_id = %worker_id, error = %e, "Wake queue unavailable");
                        pause(self.settings.error_pause, cancel).await;
                    }
                },
            }
        }
    }

    /// Execute and report one job. Returns the backoff to observe when the
    /// attempt failed.
    async fn process(
        &self,
        worker_id: ResourceId,
        job: ClaimedJob,
        cancel: &CancellationToken,
    ) -> Option<Duration> {
        info!(
            job_id = %job.id,
            job_type = %job.job_type,
            attempt = job.attempt(),
            max_attempts = job.max_attempts(),
            "Executing job"
        );

        let limit = Duration::from_secs(u64::try_from(job.timeout_seconds).unwrap_or(1).max(1));
        let outcome =
            match tokio::time::timeout(limit, self.executor.execute(&job.job_type, &job.payload))
                .await
            {
                Ok(Ok(())) => JobOutcome::Success,
                Ok(Err(e)) => JobOutcome::failure(e),
                Err(_) => JobOutcome::failure(format!(
                    "job exceeded timeout of {}s",
                    job.timeout_seconds
                )),
            };

        self.report(worker_id, job.id, &outcome, cancel).await;

        match outcome {
            JobOutcome::Success => None,
            JobOutcome::Failure { error } => {
                warn!(job_id = %job.id, error = %error, "Job attempt failed");
                let attempt = u32::try_from(job.retry_count).unwrap_or(0);
                Some(self.settings.backoff.delay(attempt))
            }
        }
    }

    /// Report until the orchestrator answers. Transient errors are retried
    /// with backoff; a report that already landed comes back as a conflict.
    /// Once `cancel` fires, one more attempt is made before giving up.
    async fn report(
        &self,
        worker_id: ResourceId,
        job_id: ResourceId,
        outcome: &JobOutcome,
        cancel: &CancellationToken,
    ) {
        let mut attempt = 0u32;
        loop {
            let shutting_down = cancel.is_cancelled();
            match self
                .coordinator
                .report_outcome(job_id, worker_id, outcome)
                .await
            {
                Ok(report) => {
                    info!(
                        job_id = %job_id,
                        status = %report.status,
                        retry_count = report.retry_count,
                        "Reported outcome"
                    );
                    return;
                }
                Err(e) if e.is_transient() && !shutting_down => {
                    let delay = self.settings.backoff.delay(attempt);
                    warn!(
                        job_id = %job_id,
                        error = %e,
                        delay_ms = delay.as_millis() as u64,
                        "Failed to report outcome, retrying"
                    );
                    pause(delay, cancel).await;
                    attempt = attempt.saturating_add(1);
                }
                Err(e) => {
                    error!(job_id = %job_id, error = %e, "Failed to report outcome");
                    return;
                }
            }
        }
    }
}

async fn heartbeat_loop(
    coordinator: Arc<dyn Coordinator>,
    worker_id: ResourceId,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // Registration counts as the first heartbeat.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => match coordinator.heartbeat(worker_id).await {
                Ok(()) => debug!(worker_id = %worker_id, "Heartbeat sent"),
                Err(e) => warn!(worker_id = %worker_id, error = %e, "Heartbeat failed"),
            },
        }
    }
}

async fn pause(duration: Duration, cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = sleep(duration) => {}
    }
}
