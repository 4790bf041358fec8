use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

use crate::artifacts::ArtifactSet;
use crate::error::codes;
use crate::tools::ValidationError;

/// Upper bound on any caller-visible diagnostic.
pub const MAX_MESSAGE_CHARS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum InvocationStatus {
    Completed,
    Failed,
}

/// Wire-level response of one tool invocation.
///
/// On success: `status`, the echoed request fields and `artifacts`.
/// On failure: `status`, `error` (machine code) and a bounded `message`.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InvocationResult {
    pub status: InvocationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    /// Echoed request fields
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub fields: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifacts: Option<BTreeMap<String, String>>,
    /// Declared artifacts that did not resolve
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl InvocationResult {
    pub fn completed(
        invocation_id: impl Into<String>,
        fields: Map<String, Value>,
        artifacts: &ArtifactSet,
    ) -> Self {
        Self {
            status: InvocationStatus::Completed,
            invocation_id: Some(invocation_id.into()),
            fields,
            artifacts: Some(artifacts.found()),
            missing_artifacts: artifacts.missing(),
            error: None,
            message: None,
        }
    }

    pub fn failed(invocation_id: Option<String>, err: &InvocationError) -> Self {
        Self {
            status: InvocationStatus::Failed,
            invocation_id,
            fields: Map::new(),
            artifacts: None,
            missing_artifacts: Vec::new(),
            error: Some(err.code().to_string()),
            message: Some(err.message()),
        }
    }
}

/// Terminal failure of one invocation. Every variant is final; nothing retries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvocationError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("tool '{tool}' already has an invocation in flight; retry later")]
    Busy { tool: String },
    #[error("failed to start worker: {reason}")]
    Spawn { reason: String },
    #[error("{diagnostic}")]
    Runtime {
        exit_code: Option<i32>,
        diagnostic: String,
    },
    #[error("worker exceeded the {}s time limit and was terminated", .limit.as_secs_f64())]
    Timeout { limit: Duration },
    #[error("invocation was stopped by an operator")]
    Stopped,
    #[error(
        "worker exited successfully but produced none of the declared artifacts ({})",
        .expected.join(", ")
    )]
    ArtifactsNotFound { expected: Vec<String> },
    #[error("internal error: {0}")]
    Internal(String),
}

impl InvocationError {
    pub fn code(&self) -> &'static str {
        match self {
            InvocationError::Validation(err) => err.code(),
            InvocationError::Busy { .. } => codes::TOOL_BUSY,
            InvocationError::Spawn { .. } => codes::SPAWN_FAILED,
            InvocationError::Runtime { .. } => codes::RUNTIME_FAILURE,
            InvocationError::Timeout { .. } => codes::TIMEOUT,
            InvocationError::Stopped => codes::STOPPED,
            InvocationError::ArtifactsNotFound { .. } => codes::ARTIFACTS_NOT_FOUND,
            InvocationError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Caller-visible message, capped at [`MAX_MESSAGE_CHARS`].
    pub fn message(&self) -> String {
        truncate_chars(&self.to_string(), MAX_MESSAGE_CHARS)
    }
}

/// First `max` characters of `text`, trimmed. Never splits a code point.
pub fn truncate_chars(text: &str, max: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max) {
        Some((cut, _)) => text[..cut].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactSpec, resolve};
    use serde_json::json;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("  héllo  ", 3), "hél");
        assert_eq!(truncate_chars("short", 1000), "short");
        let long = "é".repeat(1500);
        assert_eq!(truncate_chars(&long, MAX_MESSAGE_CHARS).chars().count(), 1000);
    }

    #[test]
    fn failed_result_carries_code_and_bounded_message() {
        let err = InvocationError::Runtime {
            exit_code: Some(1),
            diagnostic: "x".repeat(5000),
        };
        let result = InvocationResult::failed(Some("inv-1".into()), &err);
        let wire = serde_json::to_value(&result).unwrap();
        assert_eq!(wire["status"], "failed");
        assert_eq!(wire["error"], "runtime_failure");
        assert_eq!(wire["message"].as_str().unwrap().len(), MAX_MESSAGE_CHARS);
        assert!(wire.get("artifacts").is_none());
    }

    #[test]
    fn completed_result_echoes_fields_and_lists_missing() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.xlsx"), b"x").unwrap();
        let set = resolve(
            dir.path(),
            &[
                ArtifactSpec { name: "xlsx".into(), prefix: Some("report".into()), extension: "xlsx".into() },
                ArtifactSpec { name: "pdf".into(), prefix: Some("report".into()), extension: "pdf".into() },
            ],
        );
        let mut fields = Map::new();
        fields.insert("subscriptionId".into(), json!("sub-123"));

        let wire = serde_json::to_value(InvocationResult::completed("inv-2", fields, &set)).unwrap();
        assert_eq!(wire["status"], "completed");
        assert_eq!(wire["subscriptionId"], "sub-123");
        assert!(wire["artifacts"]["xlsx"].as_str().unwrap().ends_with("report.xlsx"));
        assert_eq!(wire["missing_artifacts"], json!(["pdf"]));
        assert!(wire.get("message").is_none());
    }

    #[test]
    fn timeout_message_names_the_limit() {
        let err = InvocationError::Timeout { limit: Duration::from_secs(900) };
        assert_eq!(err.code(), "timeout");
        assert_eq!(err.message(), "worker exceeded the 900s time limit and was terminated");
    }
}
