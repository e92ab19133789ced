//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for both relay
//! roles. All types derive Serde traits for deserialization from TOML, and
//! every field has a default so an empty file is a valid configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::DEFAULT_MAX_PAYLOAD;

/// Root configuration, shared by the `ship` and `offshore` roles.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Ship side: local proxy listener and uplink.
    pub ship: ShipConfig,

    /// Offshore side: ship link listener and upstream limits.
    pub offshore: OffshoreConfig,

    /// Framing and buffering shared by both ends of the link.
    pub link: LinkConfig,

    /// Upstream timeouts applied by the offshore relay.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Which end of the link this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Restricted side: local HTTP proxy plus the uplink.
    Ship,
    /// Egress side: accepts ship links and performs upstream I/O.
    Offshore,
}

/// Ship (restricted side) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ShipConfig {
    /// Local HTTP proxy bind address (e.g., "0.0.0.0:8080").
    pub listen_address: String,

    /// Offshore relay address as "host:port".
    pub offshore_address: String,

    /// Fixed delay between uplink reconnection attempts.
    pub reconnect_delay_ms: u64,

    /// Random extra delay (0 to this value) added to each reconnect wait.
    pub reconnect_jitter_ms: u64,

    /// Maximum concurrent local proxy connections.
    pub max_connections: usize,

    /// Largest request body buffered for a plain HTTP job.
    pub max_request_body: usize,
}

impl Default for ShipConfig {
    fn default() -> Self {
        Self {
            listen_address: "0.0.0.0:8080".to_string(),
            offshore_address: "localhost:9999".to_string(),
            reconnect_delay_ms: 1000,
            reconnect_jitter_ms: 0,
            max_connections: 10_000,
            max_request_body: 8 * 1024 * 1024,
        }
    }
}

impl ShipConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn reconnect_jitter(&self) -> Duration {
        Duration::from_millis(self.reconnect_jitter_ms)
    }
}

/// Offshore (egress side) configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OffshoreConfig {
    /// Bind address for ship links (e.g., "0.0.0.0:9999").
    pub bind_address: String,

    /// Maximum concurrent ship links.
    pub max_connections: usize,

    /// Largest upstream response body buffered into one RESPONSE frame.
    pub max_response_body: usize,
}

impl Default for OffshoreConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:9999".to_string(),
            max_connections: 1024,
            max_response_body: 8 * 1024 * 1024,
        }
    }
}

/// Link framing and buffering.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Largest frame payload accepted or sent, in bytes.
    pub max_frame_payload: u32,

    /// Number of frames that may wait for the link writer.
    pub write_queue_depth: usize,

    /// Size of a single socket read; bounds TUNNEL_DATA payloads.
    pub read_chunk_size: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            max_frame_payload: DEFAULT_MAX_PAYLOAD,
            write_queue_depth: 256,
            read_chunk_size: 16 * 1024,
        }
    }
}

/// Timeout configuration for upstream operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Total time for one forwarded HTTP request/response in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 10,
            request_secs: 60,
        }
    }
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: RelayConfig = toml::from_str("").unwrap();
        assert_eq!(config.ship.listen_address, "0.0.0.0:8080");
        assert_eq!(config.ship.offshore_address, "localhost:9999");
        assert_eq!(config.ship.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.offshore.bind_address, "0.0.0.0:9999");
        assert_eq!(config.link.max_frame_payload, DEFAULT_MAX_PAYLOAD);
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config: RelayConfig = toml::from_str(
            r#"
            [ship]
            offshore_address = "relay.example.net:7000"

            [link]
            write_queue_depth = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.ship.offshore_address, "relay.example.net:7000");
        assert_eq!(config.ship.reconnect_delay_ms, 1000);
        assert_eq!(config.link.write_queue_depth, 8);
        assert_eq!(config.link.read_chunk_size, 16 * 1024);
    }
}
