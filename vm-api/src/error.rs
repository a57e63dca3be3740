use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use vm_orchestrator::OrchestratorError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    /// The hypervisor tool cannot be found or executed.
    Unavailable(String),
    /// The hypervisor tool ran and failed.
    BadGateway { message: String, output: String },
    GatewayTimeout(String),
    Internal { kind: &'static str, message: String },
}

impl ApiError {
    fn kind(&self) -> &'static str {
        match self {
            ApiError::NotFound(_) => "not_found",
            ApiError::BadRequest(_) => "validation",
            ApiError::Conflict(_) => "already_exists",
            ApiError::Unavailable(_) => "hypervisor_unavailable",
            ApiError::BadGateway { .. } => "external_command",
            ApiError::GatewayTimeout(_) => "timeout",
            ApiError::Internal { kind, .. } => kind,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let (status, message, detail) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, None),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, None),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg, None),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg, None),
            ApiError::BadGateway { message, output } => {
                (StatusCode::BAD_GATEWAY, message, Some(output))
            }
            ApiError::GatewayTimeout(msg) => (StatusCode::GATEWAY_TIMEOUT, msg, None),
            ApiError::Internal { message, .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, message, None)
            }
        };

        let mut body = json!({ "error": message, "kind": kind });
        if let Some(detail) = detail.filter(|d| !d.is_empty()) {
            body["detail"] = json!(detail);
        }

        (status, Json(body)).into_response()
    }
}

impl From<OrchestratorError> for ApiError {
    fn from(err: OrchestratorError) -> Self {
        let kind = err.kind();
        match err {
            OrchestratorError::NotFound(id) => ApiError::NotFound(format!("VM not found: {}", id)),
            OrchestratorError::Validation(msg) => ApiError::BadRequest(msg),
            OrchestratorError::AlreadyExists(_) => ApiError::Conflict(err.to_string()),
            OrchestratorError::HypervisorUnavailable { .. } => {
                ApiError::Unavailable(err.to_string())
            }
            OrchestratorError::ExternalCommand {
                step,
                exit_code,
                output,
            } => ApiError::BadGateway {
                message: format!(
                    "Hypervisor command '{}' failed with exit code {}",
                    step,
                    exit_code.map_or_else(|| "none".to_string(), |c| c.to_string())
                ),
                output,
            },
            OrchestratorError::Timeout { .. } => ApiError::GatewayTimeout(err.to_string()),
            _ => ApiError::Internal {
                kind,
                message: err.to_string(),
            },
        }
    }
}
