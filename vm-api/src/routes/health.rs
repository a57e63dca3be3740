use crate::state::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
}

#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses((status = 200, description = "Service is up"))
)]
pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "vm-api",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Reports whether the store answers and the hypervisor executable resolves.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "health",
    responses((status = 200, description = "Readiness report"))
)]
pub async fn readiness_check(State(state): State<AppState>) -> Json<Value> {
    let orchestrator = &state.orchestrator;
    let db_ok = orchestrator.store().find_all().await.is_ok();
    let hypervisor = orchestrator.hypervisor().resolve();
    let hypervisor_ok = hypervisor.is_ok();

    let mut body = json!({
        "status": if db_ok && hypervisor_ok { "ready" } else { "not_ready" },
        "service": "vm-api",
        "version": env!("CARGO_PKG_VERSION"),
        "database": if db_ok { "connected" } else { "disconnected" },
        "hypervisor": if hypervisor_ok { "available" } else { "unavailable" }
    });
    match hypervisor {
        Ok(path) => body["hypervisorPath"] = json!(path.display().to_string()),
        Err(e) => body["hypervisorError"] = json!(e.to_string()),
    }

    Json(body)
}
