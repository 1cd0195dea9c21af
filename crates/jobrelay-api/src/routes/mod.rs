//! API routes.

pub mod health;
pub mod jobs;
pub mod workers;

use crate::AppState;
use crate::error::ApiError;
use axum::Router;
use jobrelay_core::ResourceId;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .nest("/api/v1", api_router())
        .merge(health::router())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .nest("/workers", workers::router())
}

pub(crate) fn parse_id(raw: &str, what: &str) -> Result<ResourceId, ApiError> {
    raw.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("Invalid {} ID: {}", what, raw)))
}
