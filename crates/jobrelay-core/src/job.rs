//! Job records and the job state machine.
//!
//! A job moves `PENDING -> RUNNING` when a worker claims it, and leaves
//! `RUNNING` only through an outcome report: `SUCCESS` on success, back to
//! `PENDING` while retries remain, `DEAD` once they are exhausted.
//! `FAILED` and `RETRYING` are reporting labels only; the store never
//! leaves a job in either.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::retry::RetryDecision;
use crate::{Error, ResourceId, Result};

pub const MAX_JOB_TYPE_LEN: usize = 255;
pub const MAX_RETRIES_LIMIT: i32 = 100;
pub const MAX_TIMEOUT_SECONDS: i32 = 86_400;

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Pending,
    Running,
    Success,
    Failed,
    Retrying,
    Dead,
}

impl JobStatus {
    pub const ALL: [JobStatus; 6] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Success,
        JobStatus::Failed,
        JobStatus::Retrying,
        JobStatus::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::Running => "RUNNING",
            JobStatus::Success => "SUCCESS",
            JobStatus::Failed => "FAILED",
            JobStatus::Retrying => "RETRYING",
            JobStatus::Dead => "DEAD",
        }
    }

    /// No transition is permitted out of a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Success | JobStatus::Dead)
    }

    pub fn is_claimable(&self) -> bool {
        matches!(self, JobStatus::Pending)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown job status: {}", s)))
    }
}

/// A validated job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewJob {
    pub job_type: String,
    pub payload: serde_json::Value,
    pub max_retries: i32,
    pub timeout_seconds: i32,
}

impl NewJob {
    pub fn new(
        job_type: impl Into<String>,
        payload: serde_json::Value,
        max_retries: i32,
        timeout_seconds: i32,
    ) -> Result<Self> {
        let job = Self {
            job_type: job_type.into().trim().to_string(),
            payload,
            max_retries,
            timeout_seconds,
        };
        job.validate()?;
        Ok(job)
    }

    pub fn validate(&self) -> Result<()> {
        if self.job_type.trim().is_empty() {
            return Err(Error::Validation("job type must not be empty".to_string()));
        }
        if self.job_type.len() > MAX_JOB_TYPE_LEN {
            return Err(Error::Validation(format!(
                "job type longer than {} characters",
                MAX_JOB_TYPE_LEN
            )));
        }
        if !(0..=MAX_RETRIES_LIMIT).contains(&self.max_retries) {
            return Err(Error::Validation(format!(
                "max_retries must be between 0 and {}",
                MAX_RETRIES_LIMIT
            )));
        }
        if !(1..=MAX_TIMEOUT_SECONDS).contains(&self.timeout_seconds) {
            return Err(Error::Validation(format!(
                "timeout_seconds must be between 1 and {}",
                MAX_TIMEOUT_SECONDS
            )));
        }
        Ok(())
    }
}

/// A job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: ResourceId,
    pub job_type: String,
    pub payload: serde_json::Value,
    pub status: JobStatus,
    pub retry_count: i32,
    pub max_retries: i32,
    pub timeout_seconds: i32,
    /// Bound while RUNNING; kept afterwards for audit only.
    pub worker_id: Option<ResourceId>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn from_new(new: &NewJob, now: DateTime<Utc>) -> Self {
        Self {
            id: ResourceId::new(),
            job_type: new.job_type.clone(),
            payload: new.payload.clone(),
            status: JobStatus::Pending,
            retry_count: 0,
            max_retries: new.max_retries,
            timeout_seconds: new.timeout_seconds,
            worker_id: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move a PENDING job to RUNNING bound to `worker_id`.
    pub fn claim(&mut self, worker_id: ResourceId, now: DateTime<Utc>) -> Result<ClaimedJob> {
        if !self.status.is_claimable() {
            return Err(Error::Conflict(format!(
                "job {} is {}, not claimable",
                self.id, self.status
            )));
        }
        self.status = JobStatus::Running;
        self.worker_id = Some(worker_id);
        self.touch(now);
        Ok(ClaimedJob::from(&*self))
    }

    /// Apply an outcome reported for a RUNNING job.
    ///
    /// `expected_worker`, when given, must match the bound worker.
    pub fn apply_outcome(
        &mut self,
        outcome: &JobOutcome,
        expected_worker: Option<ResourceId>,
        now: DateTime<Utc>,
    ) -> Result<OutcomeReport> {
        if self.status != JobStatus::Running {
            return Err(Error::Conflict(format!(
                "job {} is {}, not running",
                self.id, self.status
            )));
        }
        if let Some(expected) = expected_worker {
            if self.worker_id != Some(expected) {
                return Err(Error::Conflict(format!(
                    "job {} is not assigned to worker {}",
                    self.id, expected
                )));
            }
        }

        let decision = match outcome {
            JobOutcome::Success => {
                self.status = JobStatus::Success;
                self.error = None;
                OutcomeDecision::Succeeded
            }
            JobOutcome::Failure { error } => {
                self.error = Some(error.clone());
                match RetryDecision::decide(self.retry_count, self.max_retries) {
                    RetryDecision::Requeue { retry_count } => {
                        self.retry_count = retry_count;
                        self.status = JobStatus::Pending;
                        OutcomeDecision::Requeued
                    }
                    RetryDecision::DeadLetter => {
                        self.status = JobStatus::Dead;
                        OutcomeDecision::DeadLettered
                    }
                }
            }
        };
        self.touch(now);

        Ok(OutcomeReport {
            job_id: self.id,
            status: self.status,
            retry_count: self.retry_count,
            decision,
        })
    }

    /// Advance `updated_at`, keeping it strictly increasing even when the
    /// clock has not moved since the previous transition.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = next_updated_at(self.updated_at, now);
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            job_type: self.job_type.clone(),
            status: self.status,
            retry_count: self.retry_count,
            worker_id: self.worker_id,
            created_at: self.created_at,
        }
    }
}

pub fn next_updated_at(previous: DateTime<Utc>, now: DateTime<Utc>) -> DateTime<Utc> {
    let floor = previous + Duration::microseconds(1);
    if now > floor { now } else { floor }
}

/// What a worker receives when it claims a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimedJob {
    pub id: ResourceId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub payload: serde_json::Value,
    pub retry_count: i32,
    pub max_retries: i32,
    pub timeout_seconds: i32,
}

impl ClaimedJob {
    /// 1-based attempt number of this execution.
    pub fn attempt(&self) -> i32 {
        self.retry_count + 1
    }

    pub fn max_attempts(&self) -> i32 {
        self.max_retries + 1
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempt() >= self.max_attempts()
    }
}

impl From<&Job> for ClaimedJob {
    fn from(job: &Job) -> Self {
        Self {
            id: job.id,
            job_type: job.job_type.clone(),
            payload: job.payload.clone(),
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            timeout_seconds: job.timeout_seconds,
        }
    }
}

/// Listing view of a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: ResourceId,
    #[serde(rename = "type")]
    pub job_type: String,
    pub status: JobStatus,
    pub retry_count: i32,
    pub worker_id: Option<ResourceId>,
    pub created_at: DateTime<Utc>,
}

/// Result of one execution attempt as reported by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobOutcome {
    Success,
    #[serde(rename = "FAILED")]
    Failure { error: String },
}

impl JobOutcome {
    pub fn failure(error: impl Into<String>) -> Self {
        JobOutcome::Failure {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobOutcome::Success)
    }
}

/// What the store did with a reported outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeDecision {
    Succeeded,
    /// Failed attempt with retries left; the job is claimable again.
    Requeued,
    /// Retries exhausted; the job is DEAD.
    DeadLettered,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeReport {
    pub job_id: ResourceId,
    pub status: JobStatus,
    pub retry_count: i32,
    pub decision: OutcomeDecision,
}
