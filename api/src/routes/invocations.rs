use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use uuid::Uuid;

use toolgate_core::error::ApiError;

use crate::error::AppError;
use crate::inflight::InFlightInvocation;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/invocations", get(list_invocations))
        .route("/invocations/{id}/stop", post(stop_invocation))
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct InvocationListResponse {
    pub invocations: Vec<InFlightInvocation>,
}

#[derive(Serialize, utoipa::ToSchema)]
pub struct StopInvocationResponse {
    pub invocation: InFlightInvocation,
    pub message: String,
}

/// List invocations that have been accepted and not yet answered
///
/// Includes invocations still waiting for their tool's lease.
#[utoipa::path(
    get,
    path = "/invocations",
    responses(
        (status = 200, description = "In-flight invocations, oldest first", body = InvocationListResponse)
    ),
    tag = "invocations"
)]
pub async fn list_invocations(State(state): State<AppState>) -> Json<InvocationListResponse> {
    Json(InvocationListResponse {
        invocations: state.orchestrator.inflight().list(),
    })
}

/// Stop an in-flight invocation
///
/// A queued invocation never starts its worker; a running worker's process
/// group is killed. The original caller receives a `stopped` failure.
#[utoipa::path(
    post,
    path = "/invocations/{id}/stop",
    params(
        ("id" = String, Path, description = "Invocation id")
    ),
    responses(
        (status = 202, description = "Stop requested", body = StopInvocationResponse),
        (status = 400, description = "Malformed invocation id", body = ApiError),
        (status = 404, description = "No such in-flight invocation", body = ApiError)
    ),
    tag = "invocations"
)]
pub async fn stop_invocation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<StopInvocationResponse>), AppError> {
    if Uuid::parse_str(&id).is_err() {
        return Err(AppError::Validation {
            message: "invocation id must be a UUID".to_string(),
            field: Some("id".to_string()),
            received: Some(serde_json::Value::String(id)),
            docs_hint: Some("GET /invocations lists the ids of in-flight invocations.".to_string()),
        });
    }

    let invocation = state
        .orchestrator
        .inflight()
        .stop(&id)
        .ok_or_else(|| AppError::NotFound {
            resource: format!("in-flight invocation '{id}'"),
        })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(StopInvocationResponse {
            invocation,
            message: "stop requested".to_string(),
        }),
    ))
}
