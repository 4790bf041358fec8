//! Invocation orchestration: validate, lease, supervise, resolve artifacts,
//! answer, audit.
//!
//! Validation happens before anything else and never spawns a process. A
//! validated request runs on its own task (see [`Orchestrator::dispatch`]),
//! so a caller that disconnects does not take the worker down with it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::{Serialize, Serializer};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::Instrument;
use uuid::Uuid;

use toolgate_core::artifacts::{self, ArtifactSet};
use toolgate_core::command::{self, CommandLine};
use toolgate_core::invocation::{InvocationError, InvocationResult, MAX_MESSAGE_CHARS, truncate_chars};
use toolgate_core::tools::{ToolConfig, ToolRegistry, ValidatedRequest, ValidationError};

use crate::audit::{AuditEntry, AuditLog};
use crate::inflight::InFlight;
use crate::keepalive::TerminalResponse;
use crate::lease::ToolLeases;
use crate::supervisor::{ExecOptions, FailureReason, Outcome, ProcessControl, Supervisor};

/// Terminal answer for one invocation request.
#[derive(Debug)]
pub struct Invocation {
    pub tool: String,
    pub result: InvocationResult,
    pub error: Option<InvocationError>,
}

impl Invocation {
    fn rejected(tool: &str, error: InvocationError) -> Self {
        Self {
            tool: tool.to_string(),
            result: InvocationResult::failed(None, &error),
            error: Some(error),
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.result.invocation_id.as_deref()
    }

    pub fn status_code(&self) -> StatusCode {
        status_for(self.error.as_ref())
    }
}

/// 400 for request-shape problems, 404 for unknown tools, 409 when the
/// tool is leased in reject mode, 500 for everything that went wrong after
/// the request was accepted.
pub fn status_for(error: Option<&InvocationError>) -> StatusCode {
    match error {
        None => StatusCode::OK,
        Some(InvocationError::Validation(ValidationError::UnknownTool { .. })) => {
            StatusCode::NOT_FOUND
        }
        Some(InvocationError::Validation(_)) => StatusCode::BAD_REQUEST,
        Some(InvocationError::Busy { .. }) => StatusCode::CONFLICT,
        Some(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl Serialize for Invocation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.result.serialize(serializer)
    }
}

impl IntoResponse for Invocation {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.result)).into_response()
    }
}

impl TerminalResponse for Invocation {
    fn status(&self) -> StatusCode {
        self.status_code()
    }

    fn abandoned() -> Self {
        Invocation::rejected(
            "",
            InvocationError::Internal("invocation ended without a result".to_string()),
        )
    }
}

pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    supervisor: Supervisor,
    leases: ToolLeases,
    inflight: Arc<InFlight>,
    audit: Arc<AuditLog>,
    default_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ToolRegistry>,
        supervisor: Supervisor,
        leases: ToolLeases,
        audit: Arc<AuditLog>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            supervisor,
            leases,
            inflight: Arc::new(InFlight::default()),
            audit,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn inflight(&self) -> &InFlight {
        &self.inflight
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    /// Validate without side effects beyond an audit line on rejection.
    pub fn validate(&self, tool: &str, raw: &Value) -> Result<ValidatedRequest, Invocation> {
        self.registry.validate(tool, raw).map_err(|err| {
            tracing::info!(tool = %tool, error = %err, "invocation rejected");
            let rejected = Invocation::rejected(tool, err.into());
            self.audit_rejection(&rejected);
            rejected
        })
    }

    /// Validate and run to completion on the current task.
    #[cfg(test)]
    pub async fn invoke(&self, tool: &str, raw: &Value) -> Invocation {
        match self.validate(tool, raw) {
            Ok(request) => self.run(request).await,
            Err(rejected) => rejected,
        }
    }

    /// Run a validated request on its own task. The receiver yields the
    /// terminal answer; dropping it does not stop the worker.
    pub fn dispatch(self: &Arc<Self>, request: ValidatedRequest) -> oneshot::Receiver<Invocation> {
        let (tx, rx) = oneshot::channel();
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let invocation = orchestrator.run(request).await;
            if let Err(invocation) = tx.send(invocation) {
                tracing::debug!(
                    invocation_id = ?invocation.id(),
                    "invocation finished after its caller went away"
                );
            }
        });
        rx
    }

    pub async fn run(&self, request: ValidatedRequest) -> Invocation {
        let id = Uuid::now_v7().to_string();
        let span = tracing::info_span!("invocation", invocation_id = %id, tool = %request.tool());
        self.run_with_id(id, request).instrument(span).await
    }

    async fn run_with_id(&self, id: String, request: ValidatedRequest) -> Invocation {
        let started = Instant::now();
        let Some(tool) = self.registry.get(request.tool()) else {
            let error = InvocationError::Validation(ValidationError::UnknownTool {
                tool: request.tool().to_string(),
            });
            return self.finish(&id, request.tool(), &request, started, Err(error), None);
        };

        let control = ProcessControl::new();
        let _registration = self.inflight.register(&id, &tool.name, &control);
        let stop = control.stop_token();

        let lease = tokio::select! {
            lease = self.leases.acquire(&tool.name) => lease,
            _ = stop.cancelled() => {
                control.abandon();
                return self.finish(&id, &tool.name, &request, started, Err(InvocationError::Stopped), None);
            }
        };
        let _lease = match lease {
            Ok(lease) => lease,
            Err(_) => {
                control.abandon();
                tracing::info!("tool busy, invocation refused");
                let error = InvocationError::Busy {
                    tool: tool.name.clone(),
                };
                return self.finish(&id, &tool.name, &request, started, Err(error), None);
            }
        };

        let artifact_dir = command::artifact_dir(tool, &request);
        let command = CommandLine::for_request(tool, &request);
        let options = ExecOptions {
            timeout: Some(self.timeout_for(tool)),
            artifact_dir: Some(artifact_dir.clone()),
        };

        let outcome = self.supervisor.execute(&command, &options, &control).await;
        let result = match &outcome {
            Outcome::Success { .. } => {
                let specs = tool.artifacts.clone();
                let dir = artifact_dir.clone();
                match tokio::task::spawn_blocking(move || artifacts::resolve(&dir, &specs)).await {
                    Ok(set) if set.any_found() => Ok(set),
                    Ok(_) => Err(InvocationError::ArtifactsNotFound {
                        expected: tool.artifact_names(),
                    }),
                    Err(e) => Err(InvocationError::Internal(format!(
                        "artifact scan failed: {e}"
                    ))),
                }
            }
            Outcome::Failure { reason, .. } => Err(failure_error(reason, &outcome)),
        };

        self.finish(&id, &tool.name, &request, started, result, Some(&outcome))
    }

    fn timeout_for(&self, tool: &ToolConfig) -> Duration {
        tool.worker
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }

    fn finish(
        &self,
        id: &str,
        tool: &str,
        request: &ValidatedRequest,
        started: Instant,
        result: Result<ArtifactSet, InvocationError>,
        outcome: Option<&Outcome>,
    ) -> Invocation {
        let elapsed = started.elapsed();
        let (result, error) = match result {
            Ok(set) => {
                tracing::info!(
                    elapsed_ms = elapsed.as_millis() as u64,
                    missing = ?set.missing(),
                    "invocation completed"
                );
                (InvocationResult::completed(id, request.echo(), &set), None)
            }
            Err(err) => {
                if matches!(err, InvocationError::Spawn { .. }) {
                    tracing::error!(error = %err, "invocation failed: worker could not start");
                } else {
                    tracing::warn!(code = err.code(), error = %err, "invocation failed");
                }
                (InvocationResult::failed(Some(id.to_string()), &err), Some(err))
            }
        };

        self.audit.record(AuditEntry {
            timestamp: Utc::now(),
            invocation_id: Some(id.to_string()),
            tool: tool.to_string(),
            outcome: if error.is_none() { "completed" } else { "failed" },
            error: error.as_ref().map(InvocationError::code),
            exit_code: outcome.and_then(Outcome::exit_code),
            duration_ms: elapsed.as_millis() as u64,
            artifacts: result.artifacts.clone().unwrap_or_default(),
            detail: error.as_ref().map(ToString::to_string),
            stdout: outcome.map(|o| o.stdout().to_string()).unwrap_or_default(),
            stderr: outcome.map(|o| o.stderr().to_string()).unwrap_or_default(),
        });

        Invocation {
            tool: tool.to_string(),
            result,
            error,
        }
    }

    fn audit_rejection(&self, rejected: &Invocation) {
        self.audit.record(AuditEntry {
            timestamp: Utc::now(),
            invocation_id: None,
            tool: rejected.tool.clone(),
            outcome: "failed",
            error: rejected.error.as_ref().map(InvocationError::code),
            exit_code: None,
            duration_ms: 0,
            artifacts: Default::default(),
            detail: rejected.error.as_ref().map(ToString::to_string),
            stdout: String::new(),
            stderr: String::new(),
        });
    }
}

fn failure_error(reason: &FailureReason, outcome: &Outcome) -> InvocationError {
    match reason {
        FailureReason::Spawn(reason) => InvocationError::Spawn {
            reason: reason.clone(),
        },
        FailureReason::Timeout(limit) => InvocationError::Timeout { limit: *limit },
        FailureReason::Stopped => InvocationError::Stopped,
        FailureReason::Exit(code) => InvocationError::Runtime {
            exit_code: *code,
            diagnostic: diagnostic(*code, outcome.stderr(), outcome.stdout()),
        },
    }
}

/// Bounded runtime diagnostic: the head of stderr, or stdout when stderr is empty.
fn diagnostic(code: Option<i32>, stderr: &str, stdout: &str) -> String {
    let prefix = match code {
        Some(code) => format!("worker exited with code {code}"),
        None => "worker was terminated by a signal".to_string(),
    };
    let text = if stderr.trim().is_empty() { stdout } else { stderr };
    if text.trim().is_empty() {
        prefix
    } else {
        truncate_chars(&format!("{prefix}: {}", text.trim()), MAX_MESSAGE_CHARS)
    }
}
