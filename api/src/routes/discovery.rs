use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use toolgate_core::tools::ToolDescriptor;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/mcp", get(discover).post(discover))
        .route("/tools", get(discover))
}

/// Tool manifest
#[derive(Serialize, utoipa::ToSchema)]
pub struct DiscoveryResponse {
    pub tools: Vec<ToolDescriptor>,
}

/// List the callable tools with their input and output schemas
///
/// Derived from the tool registry loaded at startup; identical on every call.
/// Also answers `POST` for MCP clients that probe discovery that way.
#[utoipa::path(
    get,
    path = "/.well-known/mcp",
    responses(
        (status = 200, description = "Tool manifest", body = DiscoveryResponse)
    ),
    tag = "tools"
)]
pub async fn discover(State(state): State<AppState>) -> Json<DiscoveryResponse> {
    Json(DiscoveryResponse {
        tools: state.orchestrator.registry().describe(),
    })
}

#[cfg(test)]
mod tests {
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::state::test_state;

    fn app() -> Router {
        let tools = json!([{
            "name": "execute_powershell_assessment",
            "description": "Run an Azure assessment",
            "worker": { "program": "pwsh" },
            "output_dir": "/assessment",
            "input": [
                { "name": "subscriptionId", "type": "string", "required": true },
                { "name": "resourceGroups", "type": "array", "required": true, "min_items": 1 },
                { "name": "outPath", "type": "string", "default": "/assessment" }
            ],
            "artifacts": [{ "name": "xlsx", "prefix": "AzureAssessment", "extension": "xlsx" }]
        }]);
        super::router().with_state(test_state(tools, Duration::from_secs(1)))
    }

    async fn get_json(app: Router, uri: &str) -> Value {
        request_json(app, "GET", uri).await
    }

    async fn request_json(app: Router, method: &str, uri: &str) -> Value {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        serde_json::from_slice(&bytes).expect("body should be JSON")
    }

    #[tokio::test]
    async fn manifest_describes_input_and_output_schemas() {
        let body = get_json(app(), "/.well-known/mcp").await;
        let tool = &body["tools"][0];
        assert_eq!(tool["name"], "execute_powershell_assessment");

        let input = &tool["inputSchema"];
        assert_eq!(input["type"], "object");
        assert_eq!(input["required"], json!(["subscriptionId", "resourceGroups"]));
        assert_eq!(input["additionalProperties"], false);
        assert_eq!(input["properties"]["resourceGroups"]["minItems"], 1);

        let output = &tool["outputSchema"];
        assert!(output["properties"]["artifacts"]["properties"].get("xlsx").is_some());
    }

    #[tokio::test]
    async fn manifest_is_stable_across_calls_and_paths() {
        let app = app();
        let first = get_json(app.clone(), "/.well-known/mcp").await;
        let second = get_json(app.clone(), "/.well-known/mcp").await;
        let listing = get_json(app, "/tools").await;
        assert_eq!(first, second);
        assert_eq!(first, listing);
    }

    #[tokio::test]
    async fn manifest_answers_post_probes() {
        let app = app();
        let probed = request_json(app.clone(), "POST", "/.well-known/mcp").await;
        assert_eq!(probed, get_json(app, "/.well-known/mcp").await);
    }
}
