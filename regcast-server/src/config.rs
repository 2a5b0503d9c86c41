//! Configuration for the regcast server.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use regcast_core::ServiceConfig;

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Simulated devices.
    pub simulation: SimulationConfig,
    /// Delta delivery.
    pub broadcast: BroadcastConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the TCP listener on.
    pub bind_addr: String,
    /// TCP port for client connections.
    pub port: u16,
    /// Maximum concurrent client connections.
    pub max_connections: usize,
}

/// Simulation configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Devices created at startup (`device_1` ..= `device_N`).
    pub device_count: u32,
    /// Registers per device (1..=65536).
    pub registers_per_device: usize,
    /// Simulation tick in milliseconds.
    pub tick_ms: u64,
}

/// Broadcast scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BroadcastConfig {
    /// How often due subscribers are checked, in milliseconds.
    pub tick_ms: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 7440,
            max_connections: 256,
        }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            device_count: 2,
            registers_per_device: 10_000,
            tick_ms: 100,
        }
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self { tick_ms: 10 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

/// Where a loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    /// Parsed from the file.
    File,
    /// No readable file; defaults used.
    Missing,
    /// The file did not parse; defaults used. Holds the parse error.
    Invalid(String),
}

impl ServerConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    ///
    /// Nothing is logged here since tracing is configured from the
    /// result; the caller reports the returned [`ConfigSource`].
    pub fn load(path: &Path) -> (Self, ConfigSource) {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => (config, ConfigSource::File),
                Err(e) => (Self::default(), ConfigSource::Invalid(e.to_string())),
            },
            Err(_) => (Self::default(), ConfigSource::Missing),
        }
    }

    /// `bind_addr:port` for the listener.
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.network.bind_addr, self.network.port)
    }

    /// Convert simulation and broadcast settings into a `ServiceConfig`.
    /// Zero tick periods are raised to 1 ms.
    pub fn to_service_config(&self) -> ServiceConfig {
        ServiceConfig {
            simulation_tick: Duration::from_millis(self.simulation.tick_ms.max(1)),
            broadcast_tick: Duration::from_millis(self.broadcast.tick_ms.max(1)),
            device_count: self.simulation.device_count,
            registers_per_device: self.simulation.registers_per_device,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
