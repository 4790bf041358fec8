use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::supervisor::{ProcessControl, ProcessState};

/// Snapshot of one invocation that has been accepted and not yet answered.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct InFlightInvocation {
    pub invocation_id: String,
    pub tool: String,
    pub started_at: DateTime<Utc>,
    pub state: ProcessState,
}

struct Entry {
    tool: String,
    started_at: DateTime<Utc>,
    stop: CancellationToken,
    state: watch::Receiver<ProcessState>,
}

impl Entry {
    fn snapshot(&self, id: &str) -> InFlightInvocation {
        InFlightInvocation {
            invocation_id: id.to_string(),
            tool: self.tool.clone(),
            started_at: self.started_at,
            state: *self.state.borrow(),
        }
    }
}

/// Registry of accepted invocations, including ones still queued for a lease.
/// Backs the operator listing and the administrative stop.
#[derive(Default)]
pub struct InFlight {
    entries: Mutex<HashMap<String, Entry>>,
}

/// Removes its invocation from the registry when dropped.
pub struct Registration {
    registry: Arc<InFlight>,
    id: String,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

impl InFlight {
    pub fn register(self: &Arc<Self>, id: &str, tool: &str, control: &ProcessControl) -> Registration {
        self.lock().insert(
            id.to_string(),
            Entry {
                tool: tool.to_string(),
                started_at: Utc::now(),
                stop: control.stop_token(),
                state: control.subscribe(),
            },
        );
        Registration {
            registry: self.clone(),
            id: id.to_string(),
        }
    }

    /// Oldest first.
    pub fn list(&self) -> Vec<InFlightInvocation> {
        let mut invocations: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, entry)| entry.snapshot(id))
            .collect();
        invocations.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.invocation_id.cmp(&b.invocation_id))
        });
        invocations
    }

    /// Request termination of one invocation. The invocation still answers
    /// its caller, with a `stopped` failure.
    pub fn stop(&self, id: &str) -> Option<InFlightInvocation> {
        let entries = self.lock();
        let entry = entries.get(id)?;
        entry.stop.cancel();
        tracing::warn!(invocation_id = %id, tool = %entry.tool, "operator stop requested");
        Some(entry.snapshot(id))
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Entry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
