//! Job record store.
//!
//! All state transitions happen here. Claiming relies on
//! `FOR UPDATE SKIP LOCKED` so concurrent claimers never receive the same
//! row and never queue up behind each other's locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobrelay_core::{
    ClaimedJob, Job, JobOutcome, JobStatus, JobSummary, NewJob, OutcomeReport, ResourceId,
};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::{DbError, DbResult};

#[async_trait]
pub trait JobRepo: Send + Sync {
    /// Insert a PENDING job with retry_count 0.
    async fn create(&self, new: &NewJob) -> DbResult<Job>;

    /// Atomically move the oldest PENDING job to RUNNING bound to `worker_id`.
    /// Returns `None` when nothing is claimable.
    async fn claim_next(&self, worker_id: ResourceId) -> DbResult<Option<ClaimedJob>>;

    /// Record the outcome of a RUNNING job, applying the retry policy on
    /// failure. Read and write happen under one row lock.
    async fn report_outcome(
        &self,
        job_id: ResourceId,
        outcome: &JobOutcome,
        expected_worker: Option<ResourceId>,
    ) -> DbResult<OutcomeReport>;

    async fn get_job(&self, job_id: ResourceId) -> DbResult<Option<Job>>;

    /// Newest first.
    async fn list_jobs(&self, limit: i64, offset: i64) -> DbResult<Vec<JobSummary>>;

    async fn count_by_status(&self) -> DbResult<Vec<(JobStatus, i64)>>;

    /// Fail the RUNNING jobs bound to `worker_ids` as one attempt each.
    /// Only called when orphan reaping is enabled.
    async fn requeue_orphaned(
        &self,
        worker_ids: &[ResourceId],
        reason: &str,
    ) -> DbResult<Vec<OutcomeReport>>;
}

/// Database row for jobs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobRow {
    pub id: Uuid,
    #[sqlx(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub retry_count: i32,
    pub max_retries: i32,
    pub timeout_seconds: i32,
    pub worker_id: Option<Uuid>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for Job {
    type Error = DbError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let status = parse_status(&row.status)?;
        Ok(Job {
            id: ResourceId::from_uuid(row.id),
            job_type: row.job_type,
            payload: row.payload,
            status,
            retry_count: row.retry_count,
            max_retries: row.max_retries,
            timeout_seconds: row.timeout_seconds,
            worker_id: row.worker_id.map(ResourceId::from_uuid),
            error: row.error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Database row for job listings.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct JobSummaryRow {
    pub id: Uuid,
    #[sqlx(rename = "type")]
    pub job_type: String,
    pub status: String,
    pub retry_count: i32,
    pub worker_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

impl TryFrom<JobSummaryRow> for JobSummary {
    type Error = DbError;

    fn try_from(row: JobSummaryRow) -> Result<Self, Self::Error> {
        Ok(JobSummary {
            id: ResourceId::from_uuid(row.id),
            job_type: row.job_type,
            status: parse_status(&row.status)?,
            retry_count: row.retry_count,
            worker_id: row.worker_id.map(ResourceId::from_uuid),
            created_at: row.created_at,
        })
    }
}

fn parse_status(status: &str) -> DbResult<JobStatus> {
    status
        .parse()
        .map_err(|_| DbError::InvalidData(format!("Unknown job status: {}", status)))
}

/// PostgreSQL implementation of JobRepo.
pub struct PgJobRepo {
    pool: PgPool,
}

impl PgJobRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn write_transition(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        job: &Job,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2,
                retry_count = $3,
                error = $4,
                updated_at = GREATEST(NOW(), updated_at + INTERVAL '1 microsecond')
            WHERE id = $1
            "#,
        )
        .bind(job.id.as_uuid())
        .bind(job.status.as_str())
        .bind(job.retry_count)
        .bind(&job.error)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl JobRepo for PgJobRepo {
    async fn create(&self, new: &NewJob) -> DbResult<Job> {
        new.validate()?;
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            INSERT INTO jobs (id, type, payload, status, retry_count, max_retries, timeout_seconds, created_at, updated_at)
            VALUES ($1, $2, $3, 'PENDING', 0, $4, $5, NOW(), NOW())
            RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(&new.job_type)
        .bind(&new.payload)
        .bind(new.max_retries)
        .bind(new.timeout_seconds)
        .fetch_one(&self.pool)
        .await?;
        Job::try_from(row)
    }

    async fn claim_next(&self, worker_id: ResourceId) -> DbResult<Option<ClaimedJob>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE jobs
            SET status = 'RUNNING',
                worker_id = $1,
                updated_at = GREATEST(NOW(), updated_at + INTERVAL '1 microsecond')
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'PENDING'
                ORDER BY created_at ASC, id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            AND status = 'PENDING'
            RETURNING *
            "#,
        )
        .bind(worker_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                DbError::NotFound(format!("worker {}", worker_id))
            }
            _ => DbError::Database(e),
        })?;

        match row {
            Some(row) => {
                let job = Job::try_from(row)?;
                debug!(job_id = %job.id, worker_id = %worker_id, "Claimed job");
                Ok(Some(ClaimedJob::from(&job)))
            }
            None => Ok(None),
        }
    }

    async fn report_outcome(
        &self,
        job_id: ResourceId,
        outcome: &JobOutcome,
        expected_worker: Option<ResourceId>,
    ) -> DbResult<OutcomeReport> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1 FOR UPDATE")
            .bind(job_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| DbError::NotFound(format!("job {}", job_id)))?;

        // Dropping `tx` on an early return rolls the lock back untouched.
        let mut job = Job::try_from(row)?;
        let report = job.apply_outcome(outcome, expected_worker, Utc::now())?;
        Self::write_transition(&mut tx, &job).await?;
        tx.commit().await?;

        Ok(report)
    }

    async fn get_job(&self, job_id: ResourceId) -> DbResult<Option<Job>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM jobs WHERE id = $1")
            .bind(job_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Job::try_from).transpose()
    }

    async fn list_jobs(&self, limit: i64, offset: i64) -> DbResult<Vec<JobSummary>> {
        let rows = sqlx::query_as::<_, JobSummaryRow>(
            r#"
            SELECT id, type, status, retry_count, worker_id, created_at
            FROM jobs
            ORDER BY created_at DESC, id DESC
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(JobSummary::try_from).collect()
    }

    async fn count_by_status(&self) -> DbResult<Vec<(JobStatus, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT status, COUNT(*) FROM jobs GROUP BY status ORDER BY status",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|(status, count)| Ok((parse_status(&status)?, count)))
            .collect()
    }

    async fn requeue_orphaned(
        &self,
        worker_ids: &[ResourceId],
        reason: &str,
    ) -> DbResult<Vec<OutcomeReport>> {
        if worker_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<Uuid> = worker_ids.iter().map(|id| *id.as_uuid()).collect();

        let mut tx = self.pool.begin().await?;
        let rows = sqlx::query_as::<_, JobRow>(
            r#"
            SELECT * FROM jobs
            WHERE status = 'RUNNING' AND worker_id = ANY($1)
            ORDER BY created_at ASC
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await?;

        let outcome = JobOutcome::failure(reason);
        let mut reports = Vec::with_capacity(rows.len());
        for row in rows {
            let mut job = Job::try_from(row)?;
            reports.push(job.apply_outcome(&outcome, None, Utc::now())?);
            Self::write_transition(&mut tx, &job).await?;
        }
        tx.commit().await?;

        Ok(reports)
    }
}
