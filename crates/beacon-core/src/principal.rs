//! The authenticated identity bound to a subscriber connection.

use serde::{Deserialize, Serialize};

/// An authenticated user as seen by the broadcast core.
///
/// Produced by the authentication collaborator when a connection opens and
/// stored next to the connection handle in the registry. Verifiers and
/// processors receive it read-only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    /// Stable user identifier.
    pub user_id: String,
    /// Human-readable name, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Role keys the user belongs to.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Preferred locale tag (e.g. `"es-ES"`), used by localizing processors.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    /// Whether the user is an administrator.
    #[serde(default)]
    pub admin: bool,
}

impl Principal {
    /// Create a principal with only a user ID.
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: None,
            roles: Vec::new(),
            locale: None,
            admin: false,
        }
    }

    /// Builder: add a role.
    #[must_use]
    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.roles.push(role.into());
        self
    }

    /// Builder: set the locale.
    #[must_use]
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        self.locale = Some(locale.into());
        self
    }

    /// Builder: mark as administrator.
    #[must_use]
    pub fn with_admin(mut self, admin: bool) -> Self {
        self.admin = admin;
        self
    }

    /// Literal role membership check. Admin status does not imply roles.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
