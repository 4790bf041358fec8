use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// What to do with a request for a tool that already has one in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseMode {
    Queue,
    Reject,
}

/// Per-tool execution lease: at most one in-flight invocation per tool, so
/// the artifact directory is only ever written by a single worker when it
/// is scanned.
pub struct ToolLeases {
    mode: LeaseMode,
    slots: Mutex<HashMap<String, Arc<Semaphore>>>,
}

/// Held for the duration of one invocation; released on drop.
#[derive(Debug)]
pub struct Lease {
    _permit: OwnedSemaphorePermit,
}

#[derive(Debug, PartialEq, Eq)]
pub struct LeaseBusy;

impl ToolLeases {
    pub fn new(mode: LeaseMode) -> Self {
        Self {
            mode,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub async fn acquire(&self, tool: &str) -> Result<Lease, LeaseBusy> {
        let slot = self.slot(tool);
        let permit = match self.mode {
            LeaseMode::Reject => slot.try_acquire_owned().map_err(|_| LeaseBusy)?,
            // The semaphore is never closed, so acquire only fails if that changes.
            LeaseMode::Queue => slot.acquire_owned().await.map_err(|_| LeaseBusy)?,
        };
        Ok(Lease { _permit: permit })
    }

    fn slot(&self, tool: &str) -> Arc<Semaphore> {
        let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        slots
            .entry(tool.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }
}
