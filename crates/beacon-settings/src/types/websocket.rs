//! WebSocket endpoint and keepalive settings.

use serde::{Deserialize, Serialize};

/// Lowest accepted keepalive interval in milliseconds.
pub const MIN_KEEPALIVE_INTERVAL_MS: u64 = 100;

/// WebSocket endpoint settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketSettings {
    /// Ping/pong liveness probing.
    pub keepalive: KeepaliveSettings,
    /// Outbound frames buffered per connection before new frames are dropped.
    pub send_buffer_size: usize,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            keepalive: KeepaliveSettings::default(),
            send_buffer_size: 1024,
            max_message_size: 64 * 1024,
        }
    }
}

/// Ping/pong liveness probing.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct KeepaliveSettings {
    /// Whether probes are sent at all.
    pub enabled: bool,
    /// Delay before each probe, in milliseconds.
    pub interval_ms: u64,
    /// Close a connection that has not acknowledged a probe within this many
    /// milliseconds. Unset leaves unresponsive connections to be pruned by
    /// the next broadcast that finds them closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ack_timeout_ms: Option<u64>,
    /// Upper bound on probes being sent at the same moment.
    pub max_concurrent_probes: usize,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_ms: 60_000,
            ack_timeout_ms: None,
            max_concurrent_probes: 64,
        }
    }
}

impl KeepaliveSettings {
    /// Clamp values that would make the monitor spin or deadlock.
    pub fn validate(&mut self) {
        if self.interval_ms < MIN_KEEPALIVE_INTERVAL_MS {
            tracing::warn!(
                interval_ms = self.interval_ms,
                "keepalive interval below {MIN_KEEPALIVE_INTERVAL_MS}ms, clamping"
            );
            self.interval_ms = MIN_KEEPALIVE_INTERVAL_MS;
        }
        if self.max_concurrent_probes == 0 {
            tracing::warn!("maxConcurrentProbes must be at least 1, correcting");
            self.max_concurrent_probes = 1;
        }
        if self.ack_timeout_ms == Some(0) {
            tracing::warn!("ackTimeoutMs of 0 disables the dead-man timer");
            self.ack_timeout_ms = None;
        }
    }
}
