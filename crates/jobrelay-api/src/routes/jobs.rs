//! Job submission, inspection and the claim/report half of the worker protocol.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use jobrelay_core::{Job, JobOutcome, JobSummary, NewJob, OutcomeDecision, OutcomeReport};
use jobrelay_scheduler::JobStats;
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

const DEFAULT_MAX_RETRIES: i32 = 3;
const DEFAULT_TIMEOUT_SECONDS: i32 = 30;
const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_jobs).post(create_job))
        .route("/stats", get(job_stats))
        .route("/next", post(claim_next))
        .route("/{id}", get(get_job))
        .route("/{id}/report", post(report_outcome))
}

#[derive(Debug, Deserialize)]
struct CreateJobRequest {
    #[serde(rename = "type")]
    job_type: String,
    #[serde(default = "empty_payload")]
    payload: serde_json::Value,
    max_retries: Option<i32>,
    timeout_seconds: Option<i32>,
}

fn empty_payload() -> serde_json::Value {
    serde_json::Value::Object(Default::default())
}

#[derive(Debug, Serialize)]
struct CreateJobResponse {
    id: String,
    status: String,
}

async fn create_job(
    State(state): State<AppState>,
    Json(req): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<CreateJobResponse>), ApiError> {
    let new = NewJob::new(
        req.job_type,
        req.payload,
        req.max_retries.unwrap_or(DEFAULT_MAX_RETRIES),
        req.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
    )?;
    let job = state.dispatcher.submit(new).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateJobResponse {
            id: job.id.to_string(),
            status: job.status.to_string(),
        }),
    ))
}

/// Raw query values; anything unparseable falls back to the defaults.
#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<String>,
    offset: Option<String>,
}

impl ListParams {
    fn limit(&self) -> i64 {
        self.limit
            .as_deref()
            .and_then(|l| l.trim().parse::<i64>().ok())
            .filter(|l| *l > 0)
            .map_or(DEFAULT_LIMIT, |l| l.min(MAX_LIMIT))
    }

    fn offset(&self) -> i64 {
        self.offset
            .as_deref()
            .and_then(|o| o.trim().parse::<i64>().ok())
            .filter(|o| *o >= 0)
            .unwrap_or(0)
    }
}

#[derive(Debug, Serialize)]
struct JobListResponse {
    jobs: Vec<JobSummary>,
    limit: i64,
    offset: i64,
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<JobListResponse>, ApiError> {
    let (limit, offset) = (params.limit(), params.offset());
    let jobs = state.dispatcher.list_jobs(limit, offset).await?;
    Ok(Json(JobListResponse {
        jobs,
        limit,
        offset,
    }))
}

async fn job_stats(State(state): State<AppState>) -> Result<Json<JobStats>, ApiError> {
    Ok(Json(state.dispatcher.job_stats().await?))
}

#[derive(Debug, Serialize)]
struct JobDetailResponse {
    id: String,
    #[serde(rename = "type")]
    job_type: String,
    payload: serde_json::Value,
    status: String,
    retry_count: i32,
    max_retries: i32,
    timeout_seconds: i32,
    worker_id: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<Job> for JobDetailResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id.to_string(),
            job_type: job.job_type,
            payload: job.payload,
            status: job.status.to_string(),
            retry_count: job.retry_count,
            max_retries: job.max_retries,
            timeout_seconds: job.timeout_seconds,
            worker_id: job.worker_id.map(|w| w.to_string()),
            error: job.error,
            created_at: job.created_at,
            updated_at: job.updated_at,
        }
    }
}

async fn get_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<JobDetailResponse>, ApiError> {
    let job_id = parse_id(&id, "job")?;
    let job = state.dispatcher.get_job(job_id).await?;
    Ok(Json(job.into()))
}

#[derive(Debug, Deserialize)]
struct ClaimRequest {
    worker_id: String,
}

/// 200 with the job, or 204 when nothing is claimable.
async fn claim_next(
    State(state): State<AppState>,
    Json(req): Json<ClaimRequest>,
) -> Result<Response, ApiError> {
    let worker_id = parse_id(&req.worker_id, "worker")?;
    match state.dispatcher.claim_next(worker_id).await? {
        Some(job) => Ok(Json(job).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

#[derive(Debug, Deserialize)]
struct ReportRequest {
    status: String,
    error: Option<String>,
    worker_id: Option<String>,
}

impl ReportRequest {
    fn outcome(&self) -> Result<JobOutcome, ApiError> {
        match self.status.as_str() {
            "SUCCESS" => Ok(JobOutcome::Success),
            "FAILED" => Ok(JobOutcome::failure(
                self.error
                    .clone()
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| "job failed".to_string()),
            )),
            other => Err(ApiError::BadRequest(format!(
                "Invalid outcome status: {} (expected SUCCESS or FAILED)",
                other
            ))),
        }
    }
}

#[derive(Debug, Serialize)]
struct ReportResponse {
    id: String,
    status: String,
    retry_count: i32,
    decision: OutcomeDecision,
}

impl From<OutcomeReport> for ReportResponse {
    fn from(report: OutcomeReport) -> Self {
        Self {
            id: report.job_id.to_string(),
            status: report.status.to_string(),
            retry_count: report.retry_count,
            decision: report.decision,
        }
    }
}

async fn report_outcome(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<ReportRequest>,
) -> Result<Json<ReportResponse>, ApiError> {
    let job_id = parse_id(&id, "job")?;
    let worker_id = req
        .worker_id
        .as_deref()
        .map(|w| parse_id(w, "worker"))
        .transpose()?;
    let outcome = req.outcome()?;
    let report = state
        .dispatcher
        .report_outcome(job_id, &outcome, worker_id)
        .await?;
    Ok(Json(report.into()))
}
