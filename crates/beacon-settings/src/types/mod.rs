//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a settings
//! file only needs the keys it wants to change.

mod server;
mod websocket;

pub use server::*;
pub use websocket::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 9090 },
///   "websocket": { "keepalive": { "enabled": true, "intervalMs": 30000 } },
///   "auth": { "tokens": [{ "token": "t1", "userId": "admin", "roles": ["admin"] }] }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BeaconSettings {
    /// Settings schema version.
    pub version: String,
    /// Service name.
    pub name: String,
    /// HTTP listener settings.
    pub server: ServerSettings,
    /// WebSocket endpoint and keepalive settings.
    pub websocket: WebSocketSettings,
    /// Static token table used by the default authenticator.
    pub auth: AuthSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for BeaconSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "beacon".to_string(),
            server: ServerSettings::default(),
            websocket: WebSocketSettings::default(),
            auth: AuthSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl BeaconSettings {
    /// Correct out-of-range values in place. Called automatically on load.
    pub fn validate(&mut self) {
        self.websocket.keepalive.validate();
        if self.websocket.send_buffer_size == 0 {
            tracing::warn!("sendBufferSize must be at least 1, correcting");
            self.websocket.send_buffer_size = 1;
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// `"compact"` or `"json"`.
    pub format: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "compact".to_string(),
        }
    }
}
