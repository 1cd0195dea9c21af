//! Router tests against the in-memory store.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode};
use jobrelay_api::{AppState, routes};
use jobrelay_db::MemStore;
use jobrelay_scheduler::{Dispatcher, MemoryWakeQueue};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    store: Arc<MemStore>,
}

impl TestApp {
    fn new() -> Self {
        let store = Arc::new(MemStore::new());
        let dispatcher = Dispatcher::new(
            store.clone(),
            store.clone(),
            Arc::new(MemoryWakeQueue::new()),
        );
        Self {
            router: routes::router(AppState::new(dispatcher)),
            store,
        }
    }

    async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.call(Method::GET, uri, None).await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.call(Method::POST, uri, Some(body)).await
    }

    async fn register(&self, hostname: &str) -> String {
        let (status, body) = self
            .post("/api/v1/workers/register", json!({ "hostname": hostname }))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }

    async fn submit(&self, body: Value) -> String {
        let (status, body) = self.post("/api/v1/jobs", body).await;
        assert_eq!(status, StatusCode::CREATED);
        body["id"].as_str().unwrap().to_string()
    }
}

#[tokio::test]
async fn health_endpoints() {
    let app = TestApp::new();
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, _) = app.get("/health/ready").await;
    assert_eq!(status, StatusCode::OK);

    app.store.set_unavailable(true);
    let (status, body) = app.get("/health/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn submit_applies_defaults() {
    let app = TestApp::new();
    let (status, body) = app.post("/api/v1/jobs", json!({ "type": "email" })).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "PENDING");

    let id = body["id"].as_str().unwrap();
    let (status, detail) = app.get(&format!("/api/v1/jobs/{id}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["type"], "email");
    assert_eq!(detail["max_retries"], 3);
    assert_eq!(detail["timeout_seconds"], 30);
    assert_eq!(detail["retry_count"], 0);
    assert_eq!(detail["payload"], json!({}));
    assert!(detail["worker_id"].is_null());
}

#[tokio::test]
async fn submit_rejects_invalid_jobs() {
    let app = TestApp::new();
    let (status, body) = app.post("/api/v1/jobs", json!({ "type": "  " })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("job type"));

    let (status, _) = app
        .post("/api/v1/jobs", json!({ "type": "email", "max_retries": -2 }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, list) = app.get("/api/v1/jobs").await;
    assert_eq!(list["jobs"], json!([]));
}

#[tokio::test]
async fn list_paginates_newest_first() {
    let app = TestApp::new();
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(app.submit(json!({ "type": "email" })).await);
    }

    let (status, body) = app.get("/api/v1/jobs?limit=2&offset=1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["limit"], 2);
    assert_eq!(body["offset"], 1);
    let listed: Vec<&str> = body["jobs"]
        .as_array()
        .unwrap()
        .iter()
        .map(|j| j["id"].as_str().unwrap())
        .collect();
    assert_eq!(listed, vec![ids[1].as_str(), ids[0].as_str()]);
}

#[tokio::test]
async fn list_falls_back_to_default_paging() {
    let app = TestApp::new();
    let (_, body) = app.get("/api/v1/jobs?limit=abc&offset=-4").await;
    assert_eq!(body["limit"], 20);
    assert_eq!(body["offset"], 0);

    let (_, body) = app.get("/api/v1/jobs?limit=5000").await;
    assert_eq!(body["limit"], 100);
}

#[tokio::test]
async fn unknown_and_malformed_job_ids() {
    let app = TestApp::new();
    let (status, _) = app.get("/api/v1/jobs/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .get("/api/v1/jobs/0190a3c4-0000-7000-8000-000000000000")
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn claim_returns_no_content_when_idle() {
    let app = TestApp::new();
    let worker = app.register("node-1").await;
    let (status, body) = app
        .post("/api/v1/jobs/next", json!({ "worker_id": worker }))
        .await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert!(body.is_null());
}

#[tokio::test]
async fn claim_rejects_bad_worker_ids() {
    let app = TestApp::new();
    app.submit(json!({ "type": "email" })).await;

    let (status, _) = app
        .post("/api/v1/jobs/next", json!({ "worker_id": "nope" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .post(
            "/api/v1/jobs/next",
            json!({ "worker_id": "0190a3c4-0000-7000-8000-000000000000" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_job_retries_then_dies() {
    let app = TestApp::new();
    let worker = app.register("node-1").await;
    let id = app
        .submit(json!({ "type": "fail", "payload": {"n": 1}, "max_retries": 1 }))
        .await;

    let (status, claimed) = app
        .post("/api/v1/jobs/next", json!({ "worker_id": worker }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(claimed["id"], id.as_str());
    assert_eq!(claimed["type"], "fail");
    assert_eq!(claimed["payload"], json!({"n": 1}));

    let report_uri = format!("/api/v1/jobs/{id}/report");
    let (status, report) = app
        .post(
            &report_uri,
            json!({ "status": "FAILED", "error": "boom", "worker_id": worker }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], "PENDING");
    assert_eq!(report["retry_count"], 1);
    assert_eq!(report["decision"], "requeued");

    app.post("/api/v1/jobs/next", json!({ "worker_id": worker }))
        .await;
    let (_, report) = app
        .post(&report_uri, json!({ "status": "FAILED", "error": "boom again" }))
        .await;
    assert_eq!(report["status"], "DEAD");
    assert_eq!(report["decision"], "dead_lettered");

    let (status, _) = app.post(&report_uri, json!({ "status": "SUCCESS" })).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, detail) = app.get(&format!("/api/v1/jobs/{id}")).await;
    assert_eq!(detail["status"], "DEAD");
    assert_eq!(detail["retry_count"], 1);
    assert_eq!(detail["error"], "boom again");

    let (_, stats) = app.get("/api/v1/jobs/stats").await;
    assert_eq!(stats["counts"]["DEAD"], 1);
    assert_eq!(stats["counts"]["PENDING"], 0);
}

#[tokio::test]
async fn report_rejects_unknown_outcome_status() {
    let app = TestApp::new();
    let worker = app.register("node-1").await;
    let id = app.submit(json!({ "type": "email" })).await;
    app.post("/api/v1/jobs/next", json!({ "worker_id": worker }))
        .await;

    let (status, _) = app
        .post(
            &format!("/api/v1/jobs/{id}/report"),
            json!({ "status": "RETRYING" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, detail) = app.get(&format!("/api/v1/jobs/{id}")).await;
    assert_eq!(detail["status"], "RUNNING");
}

#[tokio::test]
async fn worker_registration_and_heartbeat() {
    let app = TestApp::new();
    let id = app.register("node-1").await;

    let (status, body) = app
        .post("/api/v1/workers/heartbeat", json!({ "id": id }))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "status": "ONLINE" }));

    let (status, _) = app
        .post(
            "/api/v1/workers/heartbeat",
            json!({ "id": "0190a3c4-0000-7000-8000-000000000000" }),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, body) = app.get("/api/v1/workers").await;
    let workers = body["workers"].as_array().unwrap();
    assert_eq!(workers.len(), 1);
    assert_eq!(workers[0]["hostname"], "node-1");
    assert_eq!(workers[0]["status"], "ONLINE");
}

#[tokio::test]
async fn register_requires_hostname() {
    let app = TestApp::new();
    let (status, _) = app
        .post("/api/v1/workers/register", json!({ "hostname": "" }))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}
