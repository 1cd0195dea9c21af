//! Worker registration, heartbeats and listing.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use jobrelay_core::Worker;
use serde::{Deserialize, Serialize};

use super::parse_id;
use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workers))
        .route("/register", post(register_worker))
        .route("/heartbeat", post(heartbeat))
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    hostname: String,
}

#[derive(Debug, Serialize)]
struct RegisterResponse {
    id: String,
    status: String,
}

async fn register_worker(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<RegisterResponse>), ApiError> {
    let worker = state.dispatcher.register_worker(&req.hostname).await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: worker.id.to_string(),
            status: worker.status.to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
struct HeartbeatRequest {
    id: String,
}

#[derive(Debug, Serialize)]
struct HeartbeatResponse {
    status: String,
}

async fn heartbeat(
    State(state): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<HeartbeatResponse>, ApiError> {
    let worker_id = parse_id(&req.id, "worker")?;
    let worker = state.dispatcher.heartbeat(worker_id).await?;
    Ok(Json(HeartbeatResponse {
        status: worker.status.to_string(),
    }))
}

#[derive(Debug, Serialize)]
struct WorkerListResponse {
    workers: Vec<Worker>,
}

async fn list_workers(
    State(state): State<AppState>,
) -> Result<Json<WorkerListResponse>, ApiError> {
    let workers = state.dispatcher.list_workers().await?;
    Ok(Json(WorkerListResponse { workers }))
}
