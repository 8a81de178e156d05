//! Configuration system.
//!
//! Server and client settings load from JSON strings or files; any field
//! left out takes its default. Binaries apply command-line overrides on top.

use std::{path::Path, time::Duration};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::{
    net::DEFAULT_PORT,
    particles::{DEFAULT_CHUNK_SIZE, DEFAULT_PARTICLE_COUNT},
};

/// Server settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address, e.g. `0.0.0.0:8000`.
    pub listen_addr: String,
    /// Period of the aggregation-and-broadcast tick.
    pub broadcast_interval_ms: u64,
    /// Average energy used while no session is connected.
    pub fallback_energy: f32,
    /// Upper bound (exclusive) of the random jitter added to the average.
    pub jitter_max: f32,
    /// A session whose write stalls longer than this is dropped.
    pub write_timeout_ms: u64,
    /// Seed for jitter and wind; entropy when unset.
    pub seed: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            broadcast_interval_ms: 1000,
            fallback_energy: 0.1,
            jitter_max: 0.2,
            write_timeout_ms: 500,
            seed: None,
        }
    }
}

impl ServerConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read server config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse server config {}", path.display()))
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_millis(self.broadcast_interval_ms.max(1))
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms.max(1))
    }
}

/// Client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. `127.0.0.1:8000`.
    pub server_addr: String,
    /// Period of the energy send loop.
    pub send_interval_ms: u64,
    pub particle_count: usize,
    /// Particles per parallel work unit.
    pub chunk_size: usize,
    /// Simulation tick rate.
    pub tick_hz: u32,
    /// Seed for initial particle placement; entropy when unset.
    pub seed: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("127.0.0.1:{DEFAULT_PORT}"),
            send_interval_ms: 500,
            particle_count: DEFAULT_PARTICLE_COUNT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            tick_hz: 60,
            seed: None,
        }
    }
}

impl ClientConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read client config {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parse client config {}", path.display()))
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms.max(1))
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.tick_hz.max(1) as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg = ServerConfig::from_json_str(r#"{"broadcast_interval_ms": 250, "seed": 9}"#).unwrap();
        assert_eq!(cfg.broadcast_interval(), Duration::from_millis(250));
        assert_eq!(cfg.seed, Some(9));
        assert_eq!(cfg.listen_addr, "0.0.0.0:8000");
        assert_eq!(cfg.jitter_max, 0.2);

        let cfg = ClientConfig::from_json_str("{}").unwrap();
        assert_eq!(cfg, ClientConfig::default());
        assert_eq!(cfg.send_interval(), Duration::from_millis(500));
    }

    #[test]
    fn unknown_shape_is_an_error() {
        assert!(ClientConfig::from_json_str(r#"{"tick_hz": "fast"}"#).is_err());
    }
}
