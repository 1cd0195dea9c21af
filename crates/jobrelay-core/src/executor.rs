//! Job execution trait.
//!
//! The orchestrator never interprets payloads; executors decide what a job
//! type actually does.

use async_trait::async_trait;

/// Runs one attempt of a job.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Execute a job of `job_type`. `Err` carries the failure reason that is
    /// recorded on the job.
    async fn execute(
        &self,
        job_type: &str,
        payload: &serde_json::Value,
    ) -> std::result::Result<(), String>;
}
