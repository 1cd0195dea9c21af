//! Worker liveness sweep and the opt-in orphan reaper.

use jobrelay_core::{Error, OutcomeReport, ResourceId, Result, WorkerStatus};
use jobrelay_db::{DbResult, JobRepo, WorkerRepo};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::DEFAULT_STORE_TIMEOUT;

const ORPHAN_REASON: &str = "assigned worker went offline";

/// Periodically demotes workers whose heartbeat is older than the threshold.
///
/// Demotion is the only effect unless an [`OrphanReaper`] is attached;
/// RUNNING jobs bound to an offline worker otherwise stay RUNNING.
pub struct LivenessMonitor {
    workers: Arc<dyn WorkerRepo>,
    interval: Duration,
    threshold: Duration,
    store_timeout: Duration,
    reaper: Option<OrphanReaper>,
}

impl LivenessMonitor {
    pub fn new(workers: Arc<dyn WorkerRepo>, interval: Duration, threshold: Duration) -> Self {
        Self {
            workers,
            interval,
            threshold,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            reaper: None,
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    pub fn with_reaper(mut self, reaper: OrphanReaper) -> Self {
        self.reaper = Some(reaper);
        self
    }

    /// One pass. Returns the workers demoted by this pass.
    pub async fn sweep(&self) -> Result<Vec<ResourceId>> {
        let demoted = bounded(
            self.store_timeout,
            self.workers.mark_stale_offline(self.threshold),
        )
        .await?;
        for worker_id in &demoted {
            warn!(worker_id = %worker_id, "Worker missed heartbeats, marked offline");
        }
        if let Some(reaper) = &self.reaper {
            // Covers workers demoted by earlier passes whose reap failed.
            if let Err(e) = self.reap_offline(reaper).await {
                warn!(error = %e, "Orphan reaping failed, retrying next sweep");
            }
        }
        Ok(demoted)
    }

    async fn reap_offline(&self, reaper: &OrphanReaper) -> Result<()> {
        let offline: Vec<ResourceId> = bounded(self.store_timeout, self.workers.list_workers())
            .await?
            .into_iter()
            .filter(|w| w.status == WorkerStatus::Offline)
            .map(|w| w.id)
            .collect();
        bounded(self.store_timeout, reaper.reap(&offline)).await?;
        Ok(())
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs(),
            threshold_secs = self.threshold.as_secs(),
            reap_orphans = self.reaper.is_some(),
            "Starting liveness monitor"
        );
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => match self.sweep().await {
                    Ok(demoted) => debug!(demoted = demoted.len(), "Liveness sweep complete"),
                    Err(e) => warn!(error = %e, "Liveness sweep failed"),
                },
            }
        }
        info!("Liveness monitor stopped");
    }
}

/// Fails the RUNNING jobs of offline workers, one attempt each, so they
/// retry elsewhere or go DEAD.
pub struct OrphanReaper {
    jobs: Arc<dyn JobRepo>,
}

impl OrphanReaper {
    pub fn new(jobs: Arc<dyn JobRepo>) -> Self {
        Self { jobs }
    }

    /// Requeue (or dead-letter) every RUNNING job bound to `worker_ids`.
    pub async fn reap(&self, worker_ids: &[ResourceId]) -> DbResult<Vec<OutcomeReport>> {
        let reaped = self
            .jobs
            .requeue_orphaned(worker_ids, ORPHAN_REASON)
            .await?;
        for report in &reaped {
            info!(
                job_id = %report.job_id,
                status = %report.status,
                "Reclaimed orphaned job"
            );
        }
        Ok(reaped)
    }
}

async fn bounded<T>(limit: Duration, call: impl Future<Output = DbResult<T>>) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Error::from),
        Err(_) => Err(Error::Timeout(format!(
            "liveness store call did not complete within {:?}",
            limit
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobrelay_core::{JobStatus, ManualClock, NewJob};
    use jobrelay_db::MemStore;
    use serde_json::json;

    fn store() -> (Arc<MemStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (Arc::new(MemStore::with_clock(clock.clone())), clock)
    }

    fn monitor(store: &Arc<MemStore>) -> LivenessMonitor {
        LivenessMonitor::new(
            store.clone(),
            Duration::from_secs(10),
            Duration::from_secs(15),
        )
    }

    #[tokio::test]
    async fn test_silent_worker_goes_offline_until_heartbeat() {
        let (store, clock) = store();
        let monitor = monitor(&store);
        let worker = store.register("node-1").await.unwrap();

        clock.advance(chrono::Duration::seconds(10));
        assert!(monitor.sweep().await.unwrap().is_empty());

        clock.advance(chrono::Duration::seconds(10));
        assert_eq!(monitor.sweep().await.unwrap(), vec![worker.id]);
        assert!(monitor.sweep().await.unwrap().is_empty());
        let offline = store.get_worker(worker.id).await.unwrap().unwrap();
        assert_eq!(offline.status, WorkerStatus::Offline);

        let online = store.heartbeat(worker.id).await.unwrap();
        assert_eq!(online.status, WorkerStatus::Online);
        assert!(monitor.sweep().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_orphaned_job_stays_running_without_reaper() {
        let (store, clock) = store();
        let monitor = monitor(&store);
        let worker = store.register("node-1").await.unwrap();
        let job = store
            .create(&NewJob::new("email", json!({}), 3, 30).unwrap())
            .await
            .unwrap();
        store.claim_next(worker.id).await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(20));
        monitor.sweep().await.unwrap();

        let orphan = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(orphan.status, JobStatus::Running);
        assert_eq!(orphan.worker_id, Some(worker.id));
    }

    #[tokio::test]
    async fn test_reaper_requeues_orphaned_job() {
        let (store, clock) = store();
        let monitor = monitor(&store).with_reaper(OrphanReaper::new(store.clone()));
        let lost = store.register("node-1").await.unwrap();
        let alive = store.register("node-2").await.unwrap();
        let job = store
            .create(&NewJob::new("email", json!({}), 3, 30).unwrap())
            .await
            .unwrap();
        store.claim_next(lost.id).await.unwrap().unwrap();

        clock.advance(chrono::Duration::seconds(20));
        store.heartbeat(alive.id).await.unwrap();
        assert_eq!(monitor.sweep().await.unwrap(), vec![lost.id]);

        let requeued = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);
        assert_eq!(requeued.retry_count, 1);
        assert_eq!(requeued.error.as_deref(), Some(ORPHAN_REASON));
        let reclaimed = store.claim_next(alive.id).await.unwrap().unwrap();
        assert_eq!(reclaimed.id, job.id);
    }

    #[tokio::test]
    async fn test_reaper_covers_workers_demoted_earlier() {
        let (store, clock) = store();
        let worker = store.register("node-1").await.unwrap();
        let job = store
            .create(&NewJob::new("email", json!({}), 3, 30).unwrap())
            .await
            .unwrap();
        store.claim_next(worker.id).await.unwrap().unwrap();

        // Demoted by a pass that did not reap.
        clock.advance(chrono::Duration::seconds(20));
        assert_eq!(monitor(&store).sweep().await.unwrap(), vec![worker.id]);
        let stranded = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(stranded.status, JobStatus::Running);

        let reaping = monitor(&store).with_reaper(OrphanReaper::new(store.clone()));
        assert!(reaping.sweep().await.unwrap().is_empty());
        let requeued = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);
        assert_eq!(requeued.retry_count, 1);
    }

    #[tokio::test]
    async fn test_reap_failure_does_not_fail_sweep() {
        let (store, clock) = store();
        let worker = store.register("node-1").await.unwrap();
        let job = store
            .create(&NewJob::new("email", json!({}), 3, 30).unwrap())
            .await
            .unwrap();
        store.claim_next(worker.id).await.unwrap().unwrap();
        clock.advance(chrono::Duration::seconds(20));

        let down = Arc::new(MemStore::new());
        down.set_unavailable(true);
        let failing = monitor(&store).with_reaper(OrphanReaper::new(down));
        assert_eq!(failing.sweep().await.unwrap(), vec![worker.id]);

        let reaping = monitor(&store).with_reaper(OrphanReaper::new(store.clone()));
        reaping.sweep().await.unwrap();
        let requeued = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(requeued.status, JobStatus::Pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let (store, _) = store();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(monitor(&store).run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(25)).await;
        cancel.cancel();
        handle.await.unwrap();
    }
}
