use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use serde_json::Value;

use toolgate_core::invocation::InvocationResult;

use crate::keepalive;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/tools/{tool}", post(invoke_tool))
        .route("/mcp/tools/{tool}", post(invoke_tool))
}

/// Tool arguments, shaped by the tool's `inputSchema`. An MCP-style
/// `{"params": {"arguments": {...}}}` envelope is accepted as well.
#[derive(utoipa::ToSchema)]
#[schema(value_type = Object)]
pub struct ToolArguments(pub Value);

/// Invoke a tool
///
/// Validates the body, runs the tool's worker and answers with the
/// invocation result once the worker has finished. Long runs commit a `200`
/// early and stream whitespace every keep-alive interval before the final
/// JSON body; check `status` in the body, not the HTTP status, for those.
#[utoipa::path(
    post,
    path = "/tools/{tool}",
    params(
        ("tool" = String, Path, description = "Tool name from the discovery manifest")
    ),
    request_body(content = ToolArguments, description = "Tool arguments", content_type = "application/json"),
    responses(
        (status = 200, description = "Invocation completed (or kept alive; see body status)", body = InvocationResult),
        (status = 400, description = "Request failed validation", body = InvocationResult),
        (status = 404, description = "Unknown tool", body = InvocationResult),
        (status = 409, description = "Tool already has an invocation in flight", body = InvocationResult),
        (status = 500, description = "Spawn, runtime, timeout or artifact failure", body = InvocationResult)
    ),
    tag = "tools"
)]
pub async fn invoke_tool(
    State(state): State<AppState>,
    Path(tool): Path<String>,
    body: Bytes,
) -> Response {
    let raw = parse_body(&body);
    let request = match state.orchestrator.validate(&tool, &raw) {
        Ok(request) => request,
        Err(rejected) => return rejected.into_response(),
    };

    let outcome = state.orchestrator.dispatch(request);
    keepalive::respond(outcome, state.keepalive_interval).await
}

/// Empty bodies count as `{}`; anything that is not JSON becomes `null`,
/// which validation rejects as a non-object.
fn parse_body(body: &[u8]) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Object(Default::default());
    }
    serde_json::from_slice(body).unwrap_or_else(|err| {
        tracing::debug!(error = %err, "invocation body is not JSON");
        Value::Null
    })
}

#[cfg(all(test, unix))]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use serde_json::{Value, json};
    use std::path::Path;
    use std::time::Duration;
    use tower::ServiceExt;

    use crate::state::test_state;

    fn app(dir: &Path, script: &str, keepalive: Duration) -> axum::Router {
        super::router().with_state(test_state(tools(dir, script), keepalive))
    }

    fn tools(dir: &Path, script: &str) -> Value {
        json!([{
            "name": "assess",
            "worker": { "program": "/bin/sh", "args": ["-c", script, "worker"] },
            "output_dir": dir,
            "input": [
                { "name": "subscriptionId", "type": "string", "required": true, "flag": "-SubscriptionId" },
                { "name": "resourceGroups", "type": "array", "required": true, "min_items": 1,
                  "flag": "-ResourceGroups", "separator": "," }
            ],
            "artifacts": [{ "name": "xlsx", "prefix": "report", "extension": "xlsx" }]
        }])
    }

    async fn post(app: axum::Router, uri: &str, body: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(body.to_string()))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should be readable");
        (status, String::from_utf8(bytes.to_vec()).expect("body should be utf-8"))
    }

    const REQUEST: &str = r#"{"subscriptionId":"sub-123","resourceGroups":["rg-a","rg-b"]}"#;
    const WRITES_REPORT: &str = r#"touch "$TOOLGATE_OUTPUT_DIR/report.xlsx""#;

    #[tokio::test]
    async fn completed_invocation_returns_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post(app(dir.path(), WRITES_REPORT, Duration::from_secs(5)), "/tools/assess", REQUEST).await;

        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["status"], "completed");
        assert_eq!(body["subscriptionId"], "sub-123");
        assert!(body["artifacts"]["xlsx"].as_str().unwrap().ends_with("report.xlsx"));
        assert!(body["invocation_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn empty_resource_groups_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post(
            app(dir.path(), WRITES_REPORT, Duration::from_secs(5)),
            "/tools/assess",
            r#"{"subscriptionId":"sub-123","resourceGroups":[]}"#,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(body["status"], "failed");
        let message = body["message"].as_str().unwrap();
        assert!(message.contains("resourceGroups") && message.contains("required"));
        assert!(std::fs::read_dir(dir.path()).unwrap().next().is_none());
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post(app(dir.path(), WRITES_REPORT, Duration::from_secs(5)), "/tools/nope", REQUEST).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body.contains("unknown_tool"));
    }

    #[tokio::test]
    async fn malformed_json_is_a_bad_request() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post(app(dir.path(), WRITES_REPORT, Duration::from_secs(5)), "/tools/assess", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body.contains("validation_failed"));
    }

    #[tokio::test]
    async fn mcp_alias_accepts_argument_envelopes() {
        let dir = tempfile::tempdir().unwrap();
        let envelope = format!(r#"{{"params":{{"arguments":{REQUEST}}}}}"#);
        let (status, body) = post(app(dir.path(), WRITES_REPORT, Duration::from_secs(5)), "/mcp/tools/assess", &envelope).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(body.contains("\"completed\""));
    }

    #[tokio::test]
    async fn slow_invocation_is_kept_alive_with_whitespace() {
        let dir = tempfile::tempdir().unwrap();
        let script = format!("sleep 1; {WRITES_REPORT}");
        let (status, body) = post(app(dir.path(), &script, Duration::from_millis(100)), "/tools/assess", REQUEST).await;

        assert_eq!(status, StatusCode::OK);
        assert!(body.starts_with(' '), "expected filler before the body: {body:?}");
        let parsed: Value = serde_json::from_str(&body).expect("filler is valid JSON whitespace");
        assert_eq!(parsed["status"], "completed");
    }

    #[tokio::test]
    async fn slow_failure_is_reported_in_the_body() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = post(
            app(dir.path(), "sleep 1; echo 'quota exceeded' >&2; exit 4", Duration::from_millis(100)),
            "/tools/assess",
            REQUEST,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let parsed: Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["status"], "failed");
        assert_eq!(parsed["error"], "runtime_failure");
        assert_eq!(parsed["message"], "worker exited with code 4: quota exceeded");
    }

    #[tokio::test]
    async fn caller_disconnect_leaves_the_worker_running() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(
            tools(dir.path(), &format!("sleep 1; {WRITES_REPORT}")),
            Duration::from_millis(100),
        );
        let app = super::router().with_state(state.clone());

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tools/assess")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(REQUEST))
                    .expect("request should build"),
            )
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), StatusCode::OK);
        assert!(!state.orchestrator.inflight().is_empty());
        drop(response);

        let report = dir.path().join("report.xlsx");
        for _ in 0..300 {
            if report.exists() && state.orchestrator.inflight().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(report.exists(), "worker should finish after the caller hung up");
        assert!(state.orchestrator.inflight().is_empty());
        assert_eq!(state.orchestrator.supervisor().spawn_attempts(), 1);
    }

    #[test]
    fn blank_bodies_are_empty_objects() {
        assert_eq!(super::parse_body(b""), json!({}));
        assert_eq!(super::parse_body(b" \n"), json!({}));
        assert_eq!(super::parse_body(b"nope"), Value::Null);
    }
}
