//! Listener and authentication settings.

use serde::{Deserialize, Serialize};

/// HTTP listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` auto-assigns).
    pub port: u16,
    /// Bearer token required by the HTTP emit endpoint. The endpoint is not
    /// mounted when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emit_token: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            emit_token: None,
        }
    }
}

/// Static token table for the default authenticator.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Accepted tokens and the identity each one grants.
    pub tokens: Vec<TokenGrant>,
}

/// One accepted token and the identity it maps to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TokenGrant {
    /// Opaque bearer token.
    pub token: String,
    /// User the token authenticates as.
    pub user_id: String,
    /// Display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Roles granted.
    pub roles: Vec<String>,
    /// Preferred locale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Administrator flag.
    pub admin: bool,
}
