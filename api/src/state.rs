use std::sync::Arc;
use std::time::Duration;

use toolgate_core::tools::ToolRegistry;

use crate::audit::AuditLog;
use crate::config::GatewayConfig;
use crate::lease::ToolLeases;
use crate::orchestrator::Orchestrator;
use crate::supervisor::Supervisor;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub keepalive_interval: Duration,
}

impl AppState {
    pub fn new(config: &GatewayConfig, registry: ToolRegistry) -> Self {
        let orchestrator = Orchestrator::new(
            Arc::new(registry),
            Supervisor::new(config.output_cap_bytes),
            ToolLeases::new(config.lease_mode),
            Arc::new(AuditLog::new(config.audit_log.clone())),
            config.default_timeout,
        );
        Self {
            orchestrator: Arc::new(orchestrator),
            keepalive_interval: config.keepalive_interval,
        }
    }
}

/// State over an inline tool list, with the audit log disabled.
#[cfg(test)]
pub(crate) fn test_state(tools: serde_json::Value, keepalive_interval: Duration) -> AppState {
    let registry = ToolRegistry::from_json(&serde_json::json!({ "tools": tools }).to_string())
        .expect("test registry should load");
    let config = GatewayConfig {
        audit_log: None,
        keepalive_interval,
        ..GatewayConfig::default()
    };
    AppState::new(&config, registry)
}
