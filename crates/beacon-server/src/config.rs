//! Server configuration.

use std::time::Duration;

use beacon_settings::BeaconSettings;
use serde::{Deserialize, Serialize};

use crate::websocket::keepalive::KeepaliveConfig;

/// Path of the system-events `WebSocket` endpoint.
pub const WS_PATH: &str = "/api/ws/v1/system/events";

/// Path of the HTTP emit endpoint.
pub const EMIT_PATH: &str = "/api/v1/system/events";

/// Configuration for the Beacon server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Outbound frames buffered per connection.
    pub send_buffer_size: usize,
    /// Max inbound `WebSocket` message size in bytes.
    pub max_message_size: usize,
    /// Bearer token for the emit endpoint; the route is absent when `None`.
    pub emit_token: Option<String>,
    /// Keepalive enabled flag.
    pub keepalive_enabled: bool,
    /// Keepalive interval in milliseconds.
    pub keepalive_interval_ms: u64,
    /// Optional dead-man timeout in milliseconds.
    pub keepalive_ack_timeout_ms: Option<u64>,
    /// Bound on simultaneous probe sends.
    pub max_concurrent_probes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            send_buffer_size: 1024,
            max_message_size: 64 * 1024,
            emit_token: None,
            keepalive_enabled: false,
            keepalive_interval_ms: 60_000,
            keepalive_ack_timeout_ms: None,
            max_concurrent_probes: 64,
        }
    }
}

impl ServerConfig {
    /// Keepalive monitor configuration.
    pub fn keepalive(&self) -> KeepaliveConfig {
        KeepaliveConfig {
            enabled: self.keepalive_enabled,
            interval: Duration::from_millis(self.keepalive_interval_ms),
            ack_timeout: self.keepalive_ack_timeout_ms.map(Duration::from_millis),
            max_concurrent_probes: self.max_concurrent_probes.max(1),
        }
    }
}

impl From<&BeaconSettings> for ServerConfig {
    fn from(settings: &BeaconSettings) -> Self {
        let keepalive = &settings.websocket.keepalive;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            send_buffer_size: settings.websocket.send_buffer_size.max(1),
            max_message_size: settings.websocket.max_message_size,
            emit_token: settings.server.emit_token.clone(),
            keepalive_enabled: keepalive.enabled,
            keepalive_interval_ms: keepalive.interval_ms,
            keepalive_ack_timeout_ms: keepalive.ack_timeout_ms,
            max_concurrent_probes: keepalive.max_concurrent_probes,
        }
    }
}
