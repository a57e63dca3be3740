pub mod health;
pub mod vms;

use crate::{api_docs::ApiDoc, state::AppState};
use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;
use vm_orchestrator::VmOrchestrator;

pub fn create_app(orchestrator: VmOrchestrator) -> Router {
    let state = AppState::new(orchestrator);

    // The dashboard is served from a different origin
    let cors = CorsLayer::permissive();

    // SwaggerUi also serves the raw document at /api-docs/openapi.json
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(health::routes())
        .merge(vms::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
