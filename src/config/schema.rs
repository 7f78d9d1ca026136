//! Configuration schema definitions.
//!
//! The complete configuration structure for the relay. All types derive
//! Serde traits; every field has a default so a minimal environment (just
//! the manager token) is enough to start.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (port, connection limit).
    pub listener: ListenerConfig,

    /// Manager control-channel settings.
    pub manager: ManagerConfig,

    /// Request/response buffering limits.
    pub limits: LimitsConfig,

    /// How approved CONNECT tunnels move bytes.
    pub connect_mode: ConnectMode,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl RelayConfig {
    /// Address the proxy listener binds to.
    pub fn bind_address(&self) -> String {
        format!("0.0.0.0:{}", self.listener.port)
    }

    /// Interval between manager keepalive probes.
    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.manager.keepalive_secs)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Listen port for the proxy surface and the manager upgrade path.
    pub port: u16,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            max_connections: 10_000,
        }
    }
}

/// Manager control-channel settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Shared secret the upgrade gate requires. Must be non-empty.
    pub token: String,

    /// Path the manager upgrades on.
    pub path: String,

    /// Deadline for each review RPC, in milliseconds.
    pub decision_timeout_ms: u64,

    /// Interval between keepalive probes, in seconds.
    pub keepalive_secs: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            path: "/manager".to_string(),
            decision_timeout_ms: 8_000,
            keepalive_secs: 30,
        }
    }
}

/// Buffering limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum buffered request or response body, in bytes. Exceeding it
    /// answers 413.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 8 * 1024 * 1024,
        }
    }
}

/// How approved CONNECT tunnels move bytes. The choice is per deployment;
/// the two modes are never mixed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConnectMode {
    /// Dial the target and splice bytes directly; the manager reviews only
    /// the intent.
    Direct,
    /// Move every byte through the manager channel as data frames.
    #[default]
    Relayed,
}

impl std::str::FromStr for ConnectMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(ConnectMode::Direct),
            "relayed" => Ok(ConnectMode::Relayed),
            other => Err(format!("unknown connect mode '{other}'")),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Prometheus exporter bind address. Unset disables the exporter.
    pub metrics_address: Option<String>,
}
