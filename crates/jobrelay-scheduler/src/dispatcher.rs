//! Orchestrator-side facade over the record store and the wake queue.

use async_trait::async_trait;
use jobrelay_core::{
    ClaimedJob, Error, Job, JobOutcome, JobStatus, JobSummary, NewJob, OutcomeDecision,
    OutcomeReport, ResourceId, Result, Worker,
};
use jobrelay_db::{DbResult, JobRepo, WorkerRepo};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::notify::WakeQueue;
use crate::worker::Coordinator;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(3);

/// Job counts keyed by status name. Every status is present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub counts: BTreeMap<String, i64>,
}

impl JobStats {
    pub fn count(&self, status: JobStatus) -> i64 {
        self.counts.get(status.as_str()).copied().unwrap_or(0)
    }
}

/// Entry point for every state change requested by clients and workers.
#[derive(Clone)]
pub struct Dispatcher {
    jobs: Arc<dyn JobRepo>,
    workers: Arc<dyn WorkerRepo>,
    queue: Arc<dyn WakeQueue>,
    store_timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        jobs: Arc<dyn JobRepo>,
        workers: Arc<dyn WorkerRepo>,
        queue: Arc<dyn WakeQueue>,
    ) -> Self {
        Self {
            jobs,
            workers,
            queue,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    async fn store<T>(&self, op: &str, call: impl Future<Output = DbResult<T>>) -> Result<T> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result.map_err(Error::from),
            Err(_) => Err(Error::Timeout(format!(
                "{} did not complete within {:?}",
                op, self.store_timeout
            ))),
        }
    }

    /// Persist a new PENDING job, then wake a worker.
    ///
    /// The job is durable once this returns; a failed wake-up is only logged
    /// since idle workers poll anyway.
    pub async fn submit(&self, new: NewJob) -> Result<Job> {
        new.validate()?;
        let job = self.store("create job", self.jobs.create(&new)).await?;
        info!(job_id = %job.id, job_type = %job.job_type, max_retries = job.max_retries, "Job submitted");

        if let Err(e) = self.queue.push(&job.id.to_string()).await {
            warn!(job_id = %job.id, error = %e, "Failed to publish wake token");
        }
        Ok(job)
    }

    pub async fn claim_next(&self, worker_id: ResourceId) -> Result<Option<ClaimedJob>> {
        let claimed = self
            .store("claim job", self.jobs.claim_next(worker_id))
            .await?;
        if let Some(job) = &claimed {
            info!(
                job_id = %job.id,
                worker_id = %worker_id,
                attempt = job.attempt(),
                max_attempts = job.max_attempts(),
                "Job assigned"
            );
        }
        Ok(claimed)
    }

    pub async fn report_outcome(
        &self,
        job_id: ResourceId,
        outcome: &JobOutcome,
        worker_id: Option<ResourceId>,
    ) -> Result<OutcomeReport> {
        let report = self
            .store(
                "report outcome",
                self.jobs.report_outcome(job_id, outcome, worker_id),
            )
            .await?;

        match report.decision {
            OutcomeDecision::Succeeded => info!(job_id = %job_id, "Job succeeded"),
            OutcomeDecision::Requeued => {
                info!(job_id = %job_id, retry_count = report.retry_count, "Job failed, requeued")
            }
            OutcomeDecision::DeadLettered => {
                warn!(job_id = %job_id, retry_count = report.retry_count, "Job retries exhausted, marked dead")
            }
        }
        Ok(report)
    }

    pub async fn get_job(&self, job_id: ResourceId) -> Result<Job> {
        self.store("get job", self.jobs.get_job(job_id))
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))
    }

    pub async fn list_jobs(&self, limit: i64, offset: i64) -> Result<Vec<JobSummary>> {
        self.store("list jobs", self.jobs.list_jobs(limit, offset))
            .await
    }

    pub async fn job_stats(&self) -> Result<JobStats> {
        let rows = self
            .store("count jobs", self.jobs.count_by_status())
            .await?;
        let mut counts: BTreeMap<String, i64> = JobStatus::ALL
            .iter()
            .map(|status| (status.as_str().to_string(), 0))
            .collect();
        for (status, count) in rows {
            counts.insert(status.as_str().to_string(), count);
        }
        Ok(JobStats { counts })
    }

    pub async fn register_worker(&self, hostname: &str) -> Result<Worker> {
        let worker = self
            .store("register worker", self.workers.register(hostname))
            .await?;
        info!(worker_id = %worker.id, hostname = %worker.hostname, "Worker registered");
        Ok(worker)
    }

    pub async fn heartbeat(&self, worker_id: ResourceId) -> Result<Worker> {
        let worker = self
            .store("heartbeat", self.workers.heartbeat(worker_id))
            .await?;
        debug!(worker_id = %worker_id, "Heartbeat received");
        Ok(worker)
    }

    pub async fn list_workers(&self) -> Result<Vec<Worker>> {
        self.store("list workers", self.workers.list_workers())
            .await
    }

    /// Cheap round-trip to the record store, for readiness probes.
    pub async fn check_store(&self) -> Result<()> {
        self.store("readiness check", self.jobs.count_by_status())
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl Coordinator for Dispatcher {
    async fn register_worker(&self, hostname: &str) -> Result<Worker> {
        Dispatcher::register_worker(self, hostname).await
    }

    async fn heartbeat(&self, worker_id: ResourceId) -> Result<()> {
        Dispatcher::heartbeat(self, worker_id).await.map(|_| ())
    }

    async fn claim_next(&self, worker_id: ResourceId) -> Result<Option<ClaimedJob>> {
        Dispatcher::claim_next(self, worker_id).await
    }

    async fn report_outcome(
        &self,
        job_id: ResourceId,
        worker_id: ResourceId,
        outcome: &JobOutcome,
    ) -> Result<OutcomeReport> {
        Dispatcher::report_outcome(self, job_id, outcome, Some(worker_id)).await
    }
}
