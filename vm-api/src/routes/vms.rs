use crate::{
    error::ApiResult,
    state::AppState,
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use vm_orchestrator::{CreateVmRequest, VmId, VmRecord};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/vms", get(list_vms).post(create_vm))
        .route("/vms/{id}", get(get_vm).delete(delete_vm))
        .route("/vms/{id}/start", put(start_vm))
        .route("/vms/{id}/stop", put(stop_vm))
        .route("/vms/{id}/restart", put(restart_vm))
}

#[utoipa::path(
    get,
    path = "/vms",
    tag = "vms",
    responses((status = 200, description = "All VMs", body = [VmRecord]))
)]
pub async fn list_vms(State(state): State<AppState>) -> ApiResult<Json<Vec<VmRecord>>> {
    let vms = state.orchestrator.list_vms().await?;

    Ok(Json(vms))
}

#[utoipa::path(
    post,
    path = "/vms",
    tag = "vms",
    request_body = CreateVmRequest,
    responses(
        (status = 201, description = "VM created", body = VmRecord),
        (status = 400, description = "Invalid request"),
        (status = 409, description = "Name already in use"),
        (status = 502, description = "Hypervisor command failed"),
        (status = 503, description = "Hypervisor not available")
    )
)]
pub async fn create_vm(
    State(state): State<AppState>,
    Json(req): Json<CreateVmRequest>,
) -> ApiResult<(StatusCode, Json<VmRecord>)> {
    let vm = state.orchestrator.create_vm(req).await?;

    Ok((StatusCode::CREATED, Json(vm)))
}

#[utoipa::path(
    get,
    path = "/vms/{id}",
    tag = "vms",
    params(("id" = i64, Path, description = "VM id")),
    responses(
        (status = 200, description = "VM found", body = VmRecord),
        (status = 404, description = "VM not found")
    )
)]
pub async fn get_vm(
    State(state): State<AppState>,
    Path(id): Path<VmId>,
) -> ApiResult<Json<VmRecord>> {
    let vm = state.orchestrator.get_vm(id).await?;

    Ok(Json(vm))
}

#[utoipa::path(
    put,
    path = "/vms/{id}/start",
    tag = "vms",
    params(("id" = i64, Path, description = "VM id")),
    responses(
        (status = 204, description = "VM started"),
        (status = 404, description = "VM not found"),
        (status = 502, description = "Hypervisor command failed")
    )
)]
pub async fn start_vm(
    State(state): State<AppState>,
    Path(id): Path<VmId>,
) -> ApiResult<StatusCode> {
    state.orchestrator.start_vm(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/vms/{id}/stop",
    tag = "vms",
    params(("id" = i64, Path, description = "VM id")),
    responses(
        (status = 204, description = "VM powered off"),
        (status = 404, description = "VM not found"),
        (status = 502, description = "Hypervisor command failed")
    )
)]
pub async fn stop_vm(
    State(state): State<AppState>,
    Path(id): Path<VmId>,
) -> ApiResult<StatusCode> {
    state.orchestrator.stop_vm(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    put,
    path = "/vms/{id}/restart",
    tag = "vms",
    params(("id" = i64, Path, description = "VM id")),
    responses(
        (status = 204, description = "VM restarted"),
        (status = 404, description = "VM not found"),
        (status = 502, description = "Hypervisor command failed")
    )
)]
pub async fn restart_vm(
    State(state): State<AppState>,
    Path(id): Path<VmId>,
) -> ApiResult<StatusCode> {
    state.orchestrator.restart_vm(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    delete,
    path = "/vms/{id}",
    tag = "vms",
    params(("id" = i64, Path, description = "VM id")),
    responses(
        (status = 204, description = "VM deleted"),
        (status = 404, description = "VM not found"),
        (status = 502, description = "Hypervisor command failed")
    )
)]
pub async fn delete_vm(
    State(state): State<AppState>,
    Path(id): Path<VmId>,
) -> ApiResult<StatusCode> {
    state.orchestrator.delete_vm(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
