use std::net::SocketAddr;

use axum::Router;
use serde::Serialize;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use toolgate_core::tools::ToolRegistry;

mod audit;
mod config;
mod error;
mod inflight;
mod keepalive;
mod lease;
mod middleware;
mod orchestrator;
mod routes;
mod state;
mod supervisor;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Toolgate",
        version = "0.1.0",
        description = "Runs schema-described tools as supervised worker processes and returns the artifacts they produce."
    ),
    paths(
        routes::health::health_check,
        routes::discovery::discover,
        routes::tools::invoke_tool,
        routes::invocations::list_invocations,
        routes::invocations::stop_invocation,
    ),
    components(schemas(
        HealthResponse,
        routes::discovery::DiscoveryResponse,
        routes::tools::ToolArguments,
        routes::invocations::InvocationListResponse,
        routes::invocations::StopInvocationResponse,
        inflight::InFlightInvocation,
        supervisor::ProcessState,
        toolgate_core::error::ApiError,
        toolgate_core::tools::ToolDescriptor,
        toolgate_core::invocation::InvocationResult,
        toolgate_core::invocation::InvocationStatus,
    ))
)]
struct ApiDoc;

#[derive(Serialize, utoipa::ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    /// Invocations accepted and not yet answered, queued ones included.
    pub in_flight: usize,
    /// Worker launches attempted since startup.
    pub workers_started: u64,
}

fn app(app_state: state::AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .merge(routes::health::router())
        .merge(routes::discovery::router())
        .merge(routes::tools::router())
        .merge(routes::invocations::router())
        .layer(middleware::access_log::AccessLogLayer::new())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::cors::build_cors_layer()),
        )
        .with_state(app_state)
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "toolgate=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = config::GatewayConfig::from_env().expect("Invalid gateway configuration");

    let registry = ToolRegistry::load(&config.tools_file).expect("Failed to load tool registry");
    if registry.is_empty() {
        tracing::warn!(path = %config.tools_file.display(), "Tool registry is empty");
    }
    tracing::info!(
        tools = registry.len(),
        lease_mode = ?config.lease_mode,
        keepalive_secs = config.keepalive_interval.as_secs(),
        default_timeout_secs = config.default_timeout.as_secs(),
        audit_log = ?config.audit_log,
        "Tool registry loaded"
    );

    let app = app(state::AppState::new(&config, registry));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Toolgate listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind listen address");
    axum::serve(listener, app)
        .await
        .expect("Server error");
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::state::test_state;

    #[tokio::test]
    async fn openapi_document_lists_gateway_routes() {
        let app = super::app(test_state(serde_json::json!([]), Duration::from_secs(1)));
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api-doc/openapi.json")
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        let doc: serde_json::Value = serde_json::from_slice(&bytes).expect("body should be JSON");
        for path in ["/healthz", "/.well-known/mcp", "/tools/{tool}", "/invocations", "/invocations/{id}/stop"] {
            assert!(doc["paths"].get(path).is_some(), "missing {path}");
        }
    }
}
