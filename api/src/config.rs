use std::path::PathBuf;
use std::time::Duration;

use crate::lease::LeaseMode;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_TOOLS_FILE: &str = "config/tools.json";
const DEFAULT_AUDIT_LOG: &str = "log/audit.log";
const DEFAULT_KEEPALIVE_SECS: u64 = 15;
const DEFAULT_TIMEOUT_SECS: u64 = 600;
const DEFAULT_OUTPUT_CAP_BYTES: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be {expected}, got '{value}'")]
    Invalid {
        var: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Gateway settings, read once from the environment at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub port: u16,
    pub tools_file: PathBuf,
    /// `None` disables the audit log
    pub audit_log: Option<PathBuf>,
    pub keepalive_interval: Duration,
    pub default_timeout: Duration,
    pub lease_mode: LeaseMode,
    pub output_cap_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            tools_file: PathBuf::from(DEFAULT_TOOLS_FILE),
            audit_log: Some(PathBuf::from(DEFAULT_AUDIT_LOG)),
            keepalive_interval: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            lease_mode: LeaseMode::Queue,
            output_cap_bytes: DEFAULT_OUTPUT_CAP_BYTES,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(port) = lookup("PORT") {
            config.port = parse(&port, "PORT", "a port number")?;
        }
        if let Some(path) = lookup("TOOLGATE_TOOLS_FILE").filter(|v| !v.trim().is_empty()) {
            config.tools_file = PathBuf::from(path.trim());
        }
        if let Some(path) = lookup("TOOLGATE_AUDIT_LOG") {
            let path = path.trim();
            config.audit_log = (!path.is_empty()).then(|| PathBuf::from(path));
        }
        if let Some(secs) = lookup("TOOLGATE_KEEPALIVE_SECS") {
            let secs: u64 = parse(&secs, "TOOLGATE_KEEPALIVE_SECS", "a positive integer")?;
            config.keepalive_interval = Duration::from_secs(positive(
                secs,
                "TOOLGATE_KEEPALIVE_SECS",
            )?);
        }
        if let Some(secs) = lookup("TOOLGATE_DEFAULT_TIMEOUT_SECS") {
            let secs: u64 = parse(&secs, "TOOLGATE_DEFAULT_TIMEOUT_SECS", "a positive integer")?;
            config.default_timeout = Duration::from_secs(positive(
                secs,
                "TOOLGATE_DEFAULT_TIMEOUT_SECS",
            )?);
        }
        if let Some(mode) = lookup("TOOLGATE_LEASE_MODE") {
            config.lease_mode = match mode.trim().to_lowercase().as_str() {
                "" | "queue" => LeaseMode::Queue,
                "reject" => LeaseMode::Reject,
                _ => {
                    return Err(ConfigError::Invalid {
                        var: "TOOLGATE_LEASE_MODE",
                        expected: "'queue' or 'reject'",
                        value: mode,
                    });
                }
            };
        }
        if let Some(cap) = lookup("TOOLGATE_OUTPUT_CAP_BYTES") {
            let cap: u64 = parse(&cap, "TOOLGATE_OUTPUT_CAP_BYTES", "a positive integer")?;
            config.output_cap_bytes = positive(cap, "TOOLGATE_OUTPUT_CAP_BYTES")? as usize;
        }

        Ok(config)
    }
}

fn parse<T: std::str::FromStr>(
    raw: &str,
    var: &'static str,
    expected: &'static str,
) -> Result<T, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var,
        expected,
        value: raw.to_string(),
    })
}

fn positive(value: u64, var: &'static str) -> Result<u64, ConfigError> {
    if value == 0 {
        return Err(ConfigError::Invalid {
            var,
            expected: "a positive integer",
            value: value.to_string(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<GatewayConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        GatewayConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.keepalive_interval, Duration::from_secs(15));
        assert_eq!(config.default_timeout, Duration::from_secs(600));
        assert_eq!(config.lease_mode, LeaseMode::Queue);
        assert_eq!(config.audit_log, Some(PathBuf::from("log/audit.log")));
        assert_eq!(config.output_cap_bytes, 65536);
    }

    #[test]
    fn overrides_are_parsed() {
        let config = config_from(&[
            ("PORT", "4002"),
            ("TOOLGATE_TOOLS_FILE", "/etc/toolgate/tools.json"),
            ("TOOLGATE_AUDIT_LOG", ""),
            ("TOOLGATE_KEEPALIVE_SECS", "5"),
            ("TOOLGATE_LEASE_MODE", "Reject"),
        ])
        .unwrap();
        assert_eq!(config.port, 4002);
        assert_eq!(config.tools_file, PathBuf::from("/etc/toolgate/tools.json"));
        assert_eq!(config.audit_log, None);
        assert_eq!(config.keepalive_interval, Duration::from_secs(5));
        assert_eq!(config.lease_mode, LeaseMode::Reject);
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(config_from(&[("PORT", "http")]).is_err());
        assert!(config_from(&[("TOOLGATE_KEEPALIVE_SECS", "0")]).is_err());
        let err = config_from(&[("TOOLGATE_LEASE_MODE", "wait")]).unwrap_err();
        assert!(err.to_string().contains("TOOLGATE_LEASE_MODE"));
    }
}
