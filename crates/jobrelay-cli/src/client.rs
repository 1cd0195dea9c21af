//! HTTP client for the orchestrator API.

use async_trait::async_trait;
use chrono::Utc;
use jobrelay_core::{
    ClaimedJob, Error, JobOutcome, JobStatus, OutcomeReport, ResourceId, Result, Worker,
    WorkerStatus,
};
use jobrelay_scheduler::Coordinator;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::time::Duration;
use url::Url;

pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Deserialize)]
struct IdStatus {
    id: ResourceId,
    status: String,
}

#[derive(Debug, Deserialize)]
struct ReportBody {
    id: ResourceId,
    status: JobStatus,
    retry_count: i32,
    decision: jobrelay_core::OutcomeDecision,
}

impl ApiClient {
    pub fn new(api_url: &str, request_timeout: Duration) -> Result<Self> {
        let mut base = Url::parse(api_url)
            .map_err(|e| Error::Validation(format!("invalid API URL {}: {}", api_url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| Error::Internal(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http, base })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base
            .join(&format!("api/v1/{}", path))
            .map_err(|e| Error::Internal(format!("invalid request path {}: {}", path, e)))
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("orchestrator unreachable: {}", e)))?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        Err(error_for_status(status, message))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(self.http.get(self.url(path)?)).await?;
        decode(response).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Response> {
        self.send(self.http.post(self.url(path)?).json(body)).await
    }

    pub async fn submit_job(
        &self,
        job_type: &str,
        payload: Value,
        max_retries: Option<i32>,
        timeout_seconds: Option<i32>,
    ) -> Result<(ResourceId, String)> {
        let mut body = json!({ "type": job_type, "payload": payload });
        if let Some(max_retries) = max_retries {
            body["max_retries"] = json!(max_retries);
        }
        if let Some(timeout_seconds) = timeout_seconds {
            body["timeout_seconds"] = json!(timeout_seconds);
        }
        let created: IdStatus = decode(self.post("jobs", &body).await?).await?;
        Ok((created.id, created.status))
    }

    pub async fn list_jobs(&self, limit: u32, offset: u32) -> Result<Value> {
        self.get(&format!("jobs?limit={}&offset={}", limit, offset))
            .await
    }

    pub async fn get_job(&self, id: ResourceId) -> Result<Value> {
        self.get(&format!("jobs/{}", id)).await
    }

    pub async fn job_stats(&self) -> Result<Value> {
        self.get("jobs/stats").await
    }

    pub async fn list_workers(&self) -> Result<Value> {
        self.get("workers").await
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    response
        .json()
        .await
        .map_err(|e| Error::Internal(format!("unexpected response from orchestrator: {}", e)))
}

fn error_for_status(status: StatusCode, message: String) -> Error {
    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => Error::Validation(message),
        StatusCode::NOT_FOUND => Error::NotFound(message),
        StatusCode::CONFLICT => Error::Conflict(message),
        StatusCode::SERVICE_UNAVAILABLE | StatusCode::BAD_GATEWAY => Error::Unavailable(message),
        StatusCode::GATEWAY_TIMEOUT | StatusCode::REQUEST_TIMEOUT => Error::Timeout(message),
        _ => Error::Internal(format!("{}: {}", status, message)),
    }
}

#[async_trait]
impl Coordinator for ApiClient {
    async fn register_worker(&self, hostname: &str) -> Result<Worker> {
        let body = json!({ "hostname": hostname });
        let created: IdStatus = decode(self.post("workers/register", &body).await?).await?;
        Ok(Worker {
            id: created.id,
            hostname: hostname.to_string(),
            status: created.status.parse().unwrap_or(WorkerStatus::Online),
            last_heartbeat: Utc::now(),
        })
    }

    async fn heartbeat(&self, worker_id: ResourceId) -> Result<()> {
        let body = json!({ "id": worker_id });
        self.post("workers/heartbeat", &body).await.map(|_| ())
    }

    async fn claim_next(&self, worker_id: ResourceId) -> Result<Option<ClaimedJob>> {
        let body = json!({ "worker_id": worker_id });
        let response = self.post("jobs/next", &body).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        decode(response).await.map(Some)
    }

    async fn report_outcome(
        &self,
        job_id: ResourceId,
        worker_id: ResourceId,
        outcome: &JobOutcome,
    ) -> Result<OutcomeReport> {
        let mut body = serde_json::to_value(outcome)
            .map_err(|e| Error::Internal(format!("failed to encode outcome: {}", e)))?;
        body["worker_id"] = json!(worker_id);
        let report: ReportBody =
            decode(self.post(&format!("jobs/{}/report", job_id), &body).await?).await?;
        Ok(OutcomeReport {
            job_id: report.id,
            status: report.status,
            retry_count: report.retry_count,
            decision: report.decision,
        })
    }
}
