use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};

use crate::HealthResponse;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/healthz", get(health_check))
}

/// Liveness probe. Succeeds whenever the gateway accepts connections and
/// reports how busy it is.
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Gateway is accepting connections", body = HealthResponse)
    ),
    tag = "system"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            in_flight: state.orchestrator.inflight().list().len(),
            workers_started: state.orchestrator.supervisor().spawn_attempts(),
        }),
    )
}
