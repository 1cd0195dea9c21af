//! Worker registry.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobrelay_core::{ResourceId, Worker, WorkerStatus};
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use crate::{DbError, DbResult};

#[async_trait]
pub trait WorkerRepo: Send + Sync {
    /// Register a new worker identity, ONLINE with a fresh heartbeat.
    /// Hostnames are not deduplicated.
    async fn register(&self, hostname: &str) -> DbResult<Worker>;

    /// Refresh the heartbeat and mark the worker ONLINE.
    async fn heartbeat(&self, id: ResourceId) -> DbResult<Worker>;

    async fn get_worker(&self, id: ResourceId) -> DbResult<Option<Worker>>;

    /// Most recent heartbeat first.
    async fn list_workers(&self) -> DbResult<Vec<Worker>>;

    /// Demote every ONLINE worker whose heartbeat is older than `threshold`.
    /// Returns the ids demoted by this call.
    async fn mark_stale_offline(&self, threshold: Duration) -> DbResult<Vec<ResourceId>>;
}

/// Database row for workers.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct WorkerRow {
    pub id: Uuid,
    pub hostname: String,
    pub status: String,
    pub last_heartbeat: DateTime<Utc>,
}

impl TryFrom<WorkerRow> for Worker {
    type Error = DbError;

    fn try_from(row: WorkerRow) -> Result<Self, Self::Error> {
        let status = match row.status.as_str() {
            "ONLINE" => WorkerStatus::Online,
            "OFFLINE" => WorkerStatus::Offline,
            _ => {
                return Err(DbError::InvalidData(format!(
                    "Unknown worker status: {}",
                    row.status
                )));
            }
        };
        Ok(Worker {
            id: ResourceId::from_uuid(row.id),
            hostname: row.hostname,
            status,
            last_heartbeat: row.last_heartbeat,
        })
    }
}

/// PostgreSQL implementation of WorkerRepo.
pub struct PgWorkerRepo {
    pool: PgPool,
}

impl PgWorkerRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkerRepo for PgWorkerRepo {
    async fn register(&self, hostname: &str) -> DbResult<Worker> {
        let worker = Worker::register(hostname, Utc::now())?;
        let row = sqlx::query_as::<_, WorkerRow>(
            r#"
            INSERT INTO workers (id, hostname, status, last_heartbeat)
            VALUES ($1, $2, 'ONLINE', NOW())
            RETURNING *
            "#,
        )
        .bind(worker.id.as_uuid())
        .bind(&worker.hostname)
        .fetch_one(&self.pool)
        .await?;
        Worker::try_from(row)
    }

    async fn heartbeat(&self, id: ResourceId) -> DbResult<Worker> {
        let row = sqlx::query_as::<_, WorkerRow>(
            r#"
            UPDATE workers
            SET last_heartbeat = NOW(), status = 'ONLINE'
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| DbError::NotFound(format!("worker {}", id)))?;
        Worker::try_from(row)
    }

    async fn get_worker(&self, id: ResourceId) -> DbResult<Option<Worker>> {
        let row = sqlx::query_as::<_, WorkerRow>("SELECT * FROM workers WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Worker::try_from).transpose()
    }

    async fn list_workers(&self) -> DbResult<Vec<Worker>> {
        let rows = sqlx::query_as::<_, WorkerRow>(
            "SELECT * FROM workers ORDER BY last_heartbeat DESC, id DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Worker::try_from).collect()
    }

    async fn mark_stale_offline(&self, threshold: Duration) -> DbResult<Vec<ResourceId>> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE workers
            SET status = 'OFFLINE'
            WHERE status = 'ONLINE'
              AND last_heartbeat < NOW() - make_interval(secs => $1)
            RETURNING id
            "#,
        )
        .bind(threshold.as_secs_f64())
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(ResourceId::from_uuid).collect())
    }
}
