//! Common test utilities and helpers for vm-api tests

#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use tower::ServiceExt;
use vm_orchestrator::test_utils::{memory_orchestrator, ScriptedRunner};
use vm_orchestrator::{CreateVmRequest, VmOrchestrator, VmRecord};

/// Create a test app over the given orchestrator
pub fn create_test_app(orchestrator: VmOrchestrator) -> Router {
    vm_api::create_app(orchestrator)
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: Response<Body>) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

pub async fn body_is_empty(response: Response<Body>) -> bool {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body")
        .is_empty()
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
    pub runner: Arc<ScriptedRunner>,
    pub orchestrator: VmOrchestrator,
}

impl TestClient {
    /// In-memory store with a scripted hypervisor where every command succeeds
    pub fn new() -> Self {
        Self::with_runner(Arc::new(ScriptedRunner::new()))
    }

    pub fn with_runner(runner: Arc<ScriptedRunner>) -> Self {
        let (orchestrator, _store) = memory_orchestrator(runner.clone());
        Self::from_orchestrator(orchestrator, runner)
    }

    pub fn from_orchestrator(orchestrator: VmOrchestrator, runner: Arc<ScriptedRunner>) -> Self {
        let app = create_test_app(orchestrator.clone());
        Self {
            app,
            runner,
            orchestrator,
        }
    }

    pub async fn send_request(&self, request: Request<Body>) -> Response<Body> {
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn post<T: serde::Serialize>(&self, uri: &str, body: &T) -> Response<Body> {
        let req_body = serde_json::to_string(body).expect("Failed to serialize request body");
        self.post_raw(uri, req_body).await
    }

    pub async fn post_raw(&self, uri: &str, body: String) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        self.send_request(request).await
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send_empty("GET", uri).await
    }

    pub async fn put(&self, uri: &str) -> Response<Body> {
        self.send_empty("PUT", uri).await
    }

    pub async fn delete(&self, uri: &str) -> Response<Body> {
        self.send_empty("DELETE", uri).await
    }

    async fn send_empty(&self, method: &str, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send_request(request).await
    }

    /// POST /vms and decode the created record
    pub async fn create(&self, req: &CreateVmRequest) -> VmRecord {
        let response = self.post("/vms", req).await;
        assert_eq!(response.status(), axum::http::StatusCode::CREATED);
        extract_json_body(response).await
    }
}
