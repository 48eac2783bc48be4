//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file
//! - Environment variables (SWITCHBOARD_HOST, SWITCHBOARD_PORT)
//! - Command line arguments

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use switchboard_core::{LivenessConfig, RouterConfig};

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Device liveness configuration.
    #[serde(default)]
    pub liveness: LivenessSettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Events queued per connection before new ones are dropped.
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,
}

/// Device liveness configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessSettings {
    /// Time between sweeps in milliseconds.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_ms: u64,

    /// Silence after which a device is evicted, in milliseconds.
    #[serde(default = "default_liveness_timeout")]
    pub timeout_ms: u64,

    /// Upper bound on evictions per sweep.
    #[serde(default = "default_max_evictions")]
    pub max_evictions_per_sweep: usize,

    /// Heartbeat cadence advertised to devices. Half the timeout when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_ms: Option<u64>,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_sweep_interval() -> u64 {
    60_000 // 1 minute
}

fn default_liveness_timeout() -> u64 {
    300_000 // 5 minutes
}

fn default_max_evictions() -> usize {
    1_000
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            liveness: LivenessSettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            outbound_queue_capacity: default_outbound_queue_capacity(),
        }
    }
}

impl Default for LivenessSettings {
    fn default() -> Self {
        Self {
            sweep_interval_ms: default_sweep_interval(),
            timeout_ms: default_liveness_timeout(),
            max_evictions_per_sweep: default_max_evictions(),
            heartbeat_interval_ms: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl LivenessSettings {
    /// Heartbeat cadence devices are asked to keep.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.unwrap_or(self.timeout_ms / 2))
    }
}

impl Config {
    /// Load configuration from an explicit file, or from the first default
    /// location that exists, then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be read or parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::discover()?,
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn discover() -> Result<Self> {
        let config_paths = [
            "switchboard.toml",
            "/etc/switchboard/switchboard.toml",
            "~/.config/switchboard/switchboard.toml",
        ];

        for path in &config_paths {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Apply `SWITCHBOARD_HOST` and `SWITCHBOARD_PORT` from `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("SWITCHBOARD_HOST").filter(|h| !h.is_empty()) {
            self.host = host;
        }
        if let Some(port) = lookup("SWITCHBOARD_PORT").and_then(|p| p.parse().ok()) {
            self.port = port;
        }
    }

    /// The `host:port` to bind to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn router_config(&self) -> RouterConfig {
        RouterConfig {
            mailbox_capacity: self.limits.outbound_queue_capacity,
            heartbeat_interval: self.liveness.heartbeat_interval(),
            max_connections: self.limits.max_connections,
        }
    }

    #[must_use]
    pub fn liveness_config(&self) -> LivenessConfig {
        LivenessConfig {
            sweep_interval: Duration::from_millis(self.liveness.sweep_interval_ms),
            timeout: Duration::from_millis(self.liveness.timeout_ms),
            max_evictions_per_sweep: self.liveness.max_evictions_per_sweep,
        }
    }
}
