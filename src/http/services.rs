use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post},
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    core::service::ExecutionService,
    http::{
        mappers::status_code,
        models::{ExecuteRequest, ExecuteResponse, HealthResponse},
    },
    native::registry::ProcessRegistry,
};

#[derive(Clone, Debug)]
pub struct AppState {
    service: Arc<ExecutionService>,
    registry: Arc<ProcessRegistry>,
}

impl AppState {
    pub fn new(service: Arc<ExecutionService>, registry: Arc<ProcessRegistry>) -> Self {
        Self { service, registry }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/execute", post(execute))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A body that is missing, unparseable or has no `code` field is treated as
/// empty input, so it gets the same `no_input` answer as blank code.
async fn execute(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> (StatusCode, Json<ExecuteResponse>) {
    let code = match payload {
        Ok(Json(request)) => request.code.unwrap_or_default(),
        Err(rejection) => {
            tracing::info!(error = %rejection, "unreadable execute request");
            String::new()
        }
    };

    let outcome = state.service.execute(&code).await;
    let status = status_code(outcome.error_kind());
    (status, Json(outcome.into()))
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_executions: state.registry.len(),
        queued_executions: state.service.queued_executions(),
        free_slots: state.service.free_slots(),
    })
}
