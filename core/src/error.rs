use serde::Serialize;
use utoipa::ToSchema;

/// Structured error envelope for non-invocation endpoints.
/// Tool invocations answer with [`crate::invocation::InvocationResult`] instead,
/// so callers always see `status` on the tool routes.
#[derive(Debug, Serialize, ToSchema)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "not_found", "validation_failed")
    pub error: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Which field caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// The value that was received (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub received: Option<serde_json::Value>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
}

/// Error codes used across the gateway
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
    pub const TOOL_BUSY: &str = "tool_busy";
    pub const SPAWN_FAILED: &str = "spawn_failed";
    pub const RUNTIME_FAILURE: &str = "runtime_failure";
    pub const TIMEOUT: &str = "timeout";
    pub const STOPPED: &str = "stopped";
    pub const ARTIFACTS_NOT_FOUND: &str = "artifacts_not_found";
    pub const NOT_FOUND: &str = "not_found";
    pub const INTERNAL_ERROR: &str = "internal_error";
}
