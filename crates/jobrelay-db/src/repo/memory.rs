//! In-memory store implementing both repositories.
//!
//! A single mutex plays the part of the row locks: every operation is one
//! critical section, so the claim and report contracts match the PostgreSQL
//! implementation. Used by tests and single-process setups.

use async_trait::async_trait;
use jobrelay_core::{
    ClaimedJob, Clock, Job, JobOutcome, JobStatus, JobSummary, NewJob, OutcomeReport, ResourceId,
    SystemClock, Worker, WorkerStatus,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::{DbError, DbResult, JobRepo, WorkerRepo};

#[derive(Default)]
struct Tables {
    jobs: HashMap<ResourceId, Job>,
    workers: HashMap<ResourceId, Worker>,
}

pub struct MemStore {
    clock: Arc<dyn Clock>,
    tables: Mutex<Tables>,
    unavailable: AtomicBool,
}

impl MemStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tables: Mutex::new(Tables::default()),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Make every subsequent call fail as if the database were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn tables(&self) -> DbResult<MutexGuard<'_, Tables>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DbError::Database(sqlx::Error::PoolTimedOut));
        }
        Ok(self.tables.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobRepo for MemStore {
    async fn create(&self, new: &NewJob) -> DbResult<Job> {
        new.validate()?;
        let mut tables = self.tables()?;
        let job = Job::from_new(new, self.clock.now());
        tables.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn claim_next(&self, worker_id: ResourceId) -> DbResult<Option<ClaimedJob>> {
        let now = self.clock.now();
        let mut tables = self.tables()?;
        if !tables.workers.contains_key(&worker_id) {
            return Err(DbError::NotFound(format!("worker {}", worker_id)));
        }

        let next = tables
            .jobs
            .values_mut()
            .filter(|job| job.status.is_claimable())
            .min_by_key(|job| (job.created_at, job.id));

        match next {
            Some(job) => Ok(Some(job.claim(worker_id, now)?)),
            None => Ok(None),
        }
    }

    async fn report_outcome(
        &self,
        job_id: ResourceId,
        outcome: &JobOutcome,
        expected_worker: Option<ResourceId>,
    ) -> DbResult<OutcomeReport> {
        let now = self.clock.now();
        let mut tables = self.tables()?;
        let job = tables
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| DbError::NotFound(format!("job {}", job_id)))?;

        // Work on a copy so a rejected outcome leaves the record untouched.
        let mut updated = job.clone();
        let report = updated.apply_outcome(outcome, expected_worker, now)?;
        *job = updated;
        Ok(report)
    }

    async fn get_job(&self, job_id: ResourceId) -> DbResult<Option<Job>> {
        Ok(self.tables()?.jobs.get(&job_id).cloned())
    }

    async fn list_jobs(&self, limit: i64, offset: i64) -> DbResult<Vec<JobSummary>> {
        let tables = self.tables()?;
        let mut jobs: Vec<&Job> = tables.jobs.values().collect();
        jobs.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
        Ok(jobs
            .into_iter()
            .skip(usize::try_from(offset).unwrap_or(0))
            .take(usize::try_from(limit).unwrap_or(0))
            .map(Job::summary)
            .collect())
    }

    async fn count_by_status(&self) -> DbResult<Vec<(JobStatus, i64)>> {
        let tables = self.tables()?;
        Ok(JobStatus::ALL
            .into_iter()
            .filter_map(|status| {
                let count = tables.jobs.values().filter(|j| j.status == status).count();
                (count > 0).then_some((status, count as i64))
            })
            .collect())
    }

    async fn requeue_orphaned(
        &self,
        worker_ids: &[ResourceId],
        reason: &str,
    ) -> DbResult<Vec<OutcomeReport>> {
        let now = self.clock.now();
        let mut tables = self.tables()?;
        let outcome = JobOutcome::failure(reason);

        let mut orphaned: Vec<&mut Job> = tables
            .jobs
            .values_mut()
            .filter(|job| {
                job.status == JobStatus::Running
                    && job.worker_id.is_some_and(|w| worker_ids.contains(&w))
            })
            .collect();
        orphaned.sort_by_key(|job| job.created_at);

        orphaned
            .into_iter()
            .map(|job| job.apply_outcome(&outcome, None, now).map_err(DbError::from))
            .collect()
    }
}

#[async_trait]
impl WorkerRepo for MemStore {
    async fn register(&self, hostname: &str) -> DbResult<Worker> {
        let worker = Worker::register(hostname, self.clock.now())?;
        self.tables()?.workers.insert(worker.id, worker.clone());
        Ok(worker)
    }

    async fn heartbeat(&self, id: ResourceId) -> DbResult<Worker> {
        let now = self.clock.now();
        let mut tables = self.tables()?;
        let worker = tables
            .workers
            .get_mut(&id)
            .ok_or_else(|| DbError::NotFound(format!("worker {}", id)))?;
        worker.heartbeat(now);
        Ok(worker.clone())
    }

    async fn get_worker(&self, id: ResourceId) -> DbResult<Option<Worker>> {
        Ok(self.tables()?.workers.get(&id).cloned())
    }

    async fn list_workers(&self) -> DbResult<Vec<Worker>> {
        let tables = self.tables()?;
        let mut workers: Vec<Worker> = tables.workers.values().cloned().collect();
        workers.sort_by(|a, b| (b.last_heartbeat, b.id).cmp(&(a.last_heartbeat, a.id)));
        Ok(workers)
    }

    async fn mark_stale_offline(&self, threshold: Duration) -> DbResult<Vec<ResourceId>> {
        let now = self.clock.now();
        let mut tables = self.tables()?;
        let mut demoted = Vec::new();
        for worker in tables.workers.values_mut() {
            if worker.status == WorkerStatus::Online && worker.is_stale(now, threshold) {
                worker.status = WorkerStatus::Offline;
                demoted.push(worker.id);
            }
        }
        demoted.sort();
        Ok(demoted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobrelay_core::{ManualClock, OutcomeDecision};
    use serde_json::json;
    use std::collections::HashSet;

    fn store_with_clock() -> (Arc<MemStore>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (Arc::new(MemStore::with_clock(clock.clone())), clock)
    }

    fn new_job(job_type: &str, max_retries: i32) -> NewJob {
        NewJob::new(job_type, json!({}), max_retries, 30).unwrap()
    }

    #[tokio::test]
    async fn test_concurrent_claims_never_share_a_job() {
        let store = Arc::new(MemStore::new());
        let mut workers = Vec::new();
        for i in 0..16 {
            workers.push(store.register(&format!("node-{i}")).await.unwrap().id);
        }
        for _ in 0..5 {
            store.create(&new_job("email", 0)).await.unwrap();
        }

        let handles: Vec<_> = workers
            .iter()
            .map(|&worker| {
                let store = store.clone();
                tokio::spawn(async move { store.claim_next(worker).await.unwrap() })
            })
            .collect();

        let mut claimed = Vec::new();
        for handle in handles {
            if let Some(job) = handle.await.unwrap() {
                claimed.push(job.id);
            }
        }

        let distinct: HashSet<_> = claimed.iter().collect();
        assert_eq!(claimed.len(), 5);
        assert_eq!(distinct.len(), 5);

        let stats = store.count_by_status().await.unwrap();
        assert_eq!(stats, vec![(JobStatus::Running, 5)]);
    }

    #[tokio::test]
    async fn test_two_claimers_one_job() {
        let store = Arc::new(MemStore::new());
        let a = store.register("a").await.unwrap().id;
        let b = store.register("b").await.unwrap().id;
        store.create(&new_job("email", 0)).await.unwrap();

        let (ra, rb) = tokio::join!(store.claim_next(a), store.claim_next(b));
        let results = [ra.unwrap(), rb.unwrap()];
        assert_eq!(results.iter().filter(|r| r.is_some()).count(), 1);
    }

    #[tokio::test]
    async fn test_claims_oldest_first() {
        let (store, clock) = store_with_clock();
        let worker = store.register("node").await.unwrap().id;
        let first = store.create(&new_job("first", 0)).await.unwrap();
        clock.advance(chrono::Duration::seconds(1));
        let second = store.create(&new_job("second", 0)).await.unwrap();

        assert_eq!(store.claim_next(worker).await.unwrap().unwrap().id, first.id);
        assert_eq!(store.claim_next(worker).await.unwrap().unwrap().id, second.id);
        assert!(store.claim_next(worker).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_same_timestamp_breaks_ties_by_id() {
        let (store, _clock) = store_with_clock();
        let worker = store.register("node").await.unwrap().id;
        let first = store.create(&new_job("a", 0)).await.unwrap();
        let second = store.create(&new_job("b", 0)).await.unwrap();
        assert_eq!(first.created_at, second.created_at);

        let claimed = store.claim_next(worker).await.unwrap().unwrap();
        assert_eq!(claimed.id, first.id.min(second.id));
    }

    #[tokio::test]
    async fn test_claim_by_unknown_worker() {
        let store = MemStore::new();
        store.create(&new_job("email", 0)).await.unwrap();
        let result = store.claim_next(ResourceId::new()).await;
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_no_retries_goes_dead_on_first_failure() {
        let store = MemStore::new();
        let worker = store.register("node").await.unwrap().id;
        let job = store.create(&new_job("fail", 0)).await.unwrap();

        let claimed = store.claim_next(worker).await.unwrap().unwrap();
        let report = store
            .report_outcome(claimed.id, &JobOutcome::failure("simulated job failure"), None)
            .await
            .unwrap();
        assert_eq!(report.decision, OutcomeDecision::DeadLettered);

        let job = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Dead);
        assert_eq!(job.retry_count, 0);
        assert_eq!(job.error.as_deref(), Some("simulated job failure"));
        assert!(store.claim_next(worker).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_retry_count_tracks_failures() {
        let store = MemStore::new();
        let worker = store.register("node").await.unwrap().id;
        let job = store.create(&new_job("flaky", 3)).await.unwrap();

        for failures in 1..=3 {
            let claimed = store.claim_next(worker).await.unwrap().unwrap();
            assert_eq!(claimed.retry_count, failures - 1);
            store
                .report_outcome(claimed.id, &JobOutcome::failure("nope"), Some(worker))
                .await
                .unwrap();
            let current = store.get_job(job.id).await.unwrap().unwrap();
            assert_eq!(current.status, JobStatus::Pending);
            assert_eq!(current.retry_count, failures);
        }

        let claimed = store.claim_next(worker).await.unwrap().unwrap();
        store
            .report_outcome(claimed.id, &JobOutcome::failure("nope"), None)
            .await
            .unwrap();
        let dead = store.get_job(job.id).await.unwrap().unwrap();
        assert_eq!(dead.status, JobStatus::Dead);
        assert_eq!(dead.retry_count, 3);
    }

    #[tokio::test]
    async fn test_terminal_jobs_are_immutable() {
        let store = MemStore::new();
        let worker = store.register("node").await.unwrap().id;
        let job = store.create(&new_job("email", 2)).await.unwrap();
        let claimed = store.claim_next(worker).await.unwrap().unwrap();
        store
            .report_outcome(claimed.id, &JobOutcome::Success, None)
            .await
            .unwrap();
        let done = store.get_job(job.id).await.unwrap().unwrap();

        let late = store
            .report_outcome(job.id, &JobOutcome::failure("late"), None)
            .await;
        assert!(matches!(late, Err(DbError::Conflict(_))));
        assert!(store.claim_next(worker).await.unwrap().is_none());
        assert_eq!(store.get_job(job.id).await.unwrap().unwrap(), done);
    }

    #[tokio::test]
    async fn test_report_for_unknown_job() {
        let store = MemStore::new();
        let result = store
            .report_outcome(ResourceId::new(), &JobOutcome::Success, None)
            .await;
        assert!(matches!(result, Err(DbError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_newest_first_with_pagination() {
        let (store, clock) = store_with_clock();
        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(store.create(&new_job(&format!("t{i}"), 0)).await.unwrap().id);
            clock.advance(chrono::Duration::seconds(1));
        }

        let page = store.list_jobs(2, 1).await.unwrap();
        let listed: Vec<_> = page.iter().map(|j| j.id).collect();
        assert_eq!(listed, vec![ids[3], ids[2]]);
        assert!(store.list_jobs(10, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_liveness_sweep_is_idempotent() {
        let (store, clock) = store_with_clock();
        let stale = store.register("stale").await.unwrap().id;
        clock.advance(chrono::Duration::seconds(10));
        store.register("fresh").await.unwrap();
        clock.advance(chrono::Duration::seconds(10));

        let threshold = Duration::from_secs(15);
        assert_eq!(store.mark_stale_offline(threshold).await.unwrap(), vec![stale]);
        let offline = |workers: Vec<Worker>| -> Vec<ResourceId> {
            workers
                .into_iter()
                .filter(|w| w.status == WorkerStatus::Offline)
                .map(|w| w.id)
                .collect()
        };
        let first = offline(store.list_workers().await.unwrap());

        assert!(store.mark_stale_offline(threshold).await.unwrap().is_empty());
        let second = offline(store.list_workers().await.unwrap());
        assert_eq!(first, second);
        assert_eq!(first, vec![stale]);

        store.heartbeat(stale).await.unwrap();
        let worker = store.get_worker(stale).await.unwrap().unwrap();
        assert_eq!(worker.status, WorkerStatus::Online);
        assert_eq!(store.list_workers().await.unwrap()[0].id, stale);
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_worker() {
        let store = MemStore::new();
        assert!(matches!(
            store.heartbeat(ResourceId::new()).await,
            Err(DbError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_requeue_orphaned_counts_as_attempt() {
        let store = MemStore::new();
        let gone = store.register("gone").await.unwrap().id;
        let alive = store.register("alive").await.unwrap().id;
        let retryable = store.create(&new_job("a", 1)).await.unwrap();
        let last_try = store.create(&new_job("b", 0)).await.unwrap();
        let other = store.create(&new_job("c", 0)).await.unwrap();

        store.claim_next(gone).await.unwrap();
        store.claim_next(gone).await.unwrap();
        store.claim_next(alive).await.unwrap();

        let reports = store
            .requeue_orphaned(&[gone], "assigned worker went offline")
            .await
            .unwrap();
        assert_eq!(reports.len(), 2);

        let retryable = store.get_job(retryable.id).await.unwrap().unwrap();
        assert_eq!(retryable.status, JobStatus::Pending);
        assert_eq!(retryable.retry_count, 1);
        assert_eq!(
            store.get_job(last_try.id).await.unwrap().unwrap().status,
            JobStatus::Dead
        );
        assert_eq!(
            store.get_job(other.id).await.unwrap().unwrap().status,
            JobStatus::Running
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_without_side_effects() {
        let store = MemStore::new();
        store.set_unavailable(true);
        let result = store.create(&new_job("email", 0)).await;
        assert!(matches!(result, Err(DbError::Database(_))));
        store.set_unavailable(false);
        assert!(store.list_jobs(10, 0).await.unwrap().is_empty());
    }
}
