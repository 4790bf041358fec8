use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

/// One line of the audit log. Unlike the caller-visible result this keeps
/// the captured worker output (bounded by the supervisor's buffer cap).
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invocation_id: Option<String>,
    pub tool: String,
    /// "completed" or "failed"
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub artifacts: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

/// Append-only JSON-lines audit log. Write-only: the gateway never reads it back.
pub struct AuditLog {
    path: Option<PathBuf>,
    write_lock: tokio::sync::Mutex<()>,
}

impl AuditLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(None)
    }

    /// Fire-and-forget append. Failures are logged and otherwise ignored.
    pub fn record(self: &Arc<Self>, entry: AuditEntry) {
        if self.path.is_none() {
            return;
        }
        let log = self.clone();
        tokio::spawn(async move {
            if let Err(e) = log.append(&entry).await {
                tracing::warn!(error = %e, path = ?log.path, tool = %entry.tool, "Failed to write audit log entry");
            }
        });
    }

    pub async fn append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await
    }
}
