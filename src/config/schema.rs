//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the forward proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Logging destinations and level filter.
    pub log: LogConfig,

    /// Listener settings shared by every endpoint.
    pub listener: ListenerConfig,

    /// Concurrency gate settings.
    pub admission: AdmissionConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Proxy endpoints, one listener group each.
    #[serde(rename = "proxy")]
    pub endpoints: Vec<ProxyEndpoint>,
}

/// Protocol identity of a configured endpoint.
///
/// Every identity serves both plain relays and `CONNECT` tunnels; the
/// identity labels logs and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Http,
    Https,
    Aggregate,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Http => "http",
            Protocol::Https => "https",
            Protocol::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured `{protocol, ports}` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProxyEndpoint {
    pub protocol: Protocol,
    pub ports: BTreeSet<u16>,
}

impl ProxyEndpoint {
    pub fn new(protocol: Protocol, ports: impl IntoIterator<Item = u16>) -> Self {
        Self {
            protocol,
            ports: ports.into_iter().collect(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory for `access.log`, `service.log` and `startup.log`.
    /// An empty string disables file output.
    pub log_dir: String,

    /// Mirror leveled messages to stdout.
    pub enable_console: bool,

    /// Minimum level (debug, info, notice, warn, error).
    pub min_level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: "logs".to_string(),
            enable_console: true,
            min_level: "info".to_string(),
        }
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Host every configured port is bound on.
    pub bind_host: String,

    /// Capacity of the accepted-connection queue of each listener group.
    pub queue_capacity: usize,

    /// Upper bound on the request head (request line + headers).
    pub max_header_bytes: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            queue_capacity: 100,
            max_header_bytes: 1024 * 1024,
        }
    }
}

/// Admission (bounded concurrency) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdmissionConfig {
    /// Number of connections processed at once.
    pub max_concurrent: usize,

    /// Give up waiting for a token after this long and answer 429.
    /// Waits until shutdown when unset.
    pub acquire_timeout_ms: Option<u64>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 50,
            acquire_timeout_ms: None,
        }
    }
}

impl AdmissionConfig {
    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout_ms.map(Duration::from_millis)
    }
}

/// How the tunnel deadline is applied to each direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TunnelDeadline {
    /// Set once when the direction starts; the direction faults once it elapses.
    Absolute,
    /// Refreshed after every chunk; only inactivity faults the direction.
    Idle,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Origin connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Time allowed for the client to deliver its request head, in seconds.
    pub read_request_secs: u64,

    /// Tunnel deadline in seconds.
    pub tunnel_idle_secs: u64,

    /// Deadline mode for tunnels.
    pub tunnel_deadline: TunnelDeadline,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            read_request_secs: 30,
            tunnel_idle_secs: 60,
            tunnel_deadline: TunnelDeadline::Absolute,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    /// `None` when the read timeout is disabled (0).
    pub fn read_request(&self) -> Option<Duration> {
        (self.read_request_secs > 0).then(|| Duration::from_secs(self.read_request_secs))
    }

    pub fn tunnel_idle(&self) -> Duration {
        Duration::from_secs(self.tunnel_idle_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
