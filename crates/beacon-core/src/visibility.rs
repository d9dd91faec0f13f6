//! Visibility descriptors attached to event payloads.

use serde::{Deserialize, Serialize};

/// Describes which subscribers may receive a payload.
///
/// The descriptor is data only; the rule that evaluates it is a verifier
/// resolved by [`Visibility::kind`] at dispatch time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    /// Every authenticated subscriber.
    Global,
    /// Only the given user.
    #[serde(rename_all = "camelCase")]
    User {
        /// Target user.
        user_id: String,
    },
    /// Any of the listed users.
    #[serde(rename_all = "camelCase")]
    Users {
        /// Target users.
        user_ids: Vec<String>,
    },
    /// Members of the given role.
    Role {
        /// Role key.
        role: String,
    },
    /// Everyone except the user who caused the event.
    #[serde(rename_all = "camelCase")]
    ExcludeOwner {
        /// The acting user.
        user_id: String,
    },
}

impl Visibility {
    /// Registry key for this descriptor.
    pub fn kind(&self) -> VisibilityKind {
        match self {
            Self::Global => VisibilityKind::Global,
            Self::User { .. } => VisibilityKind::User,
            Self::Users { .. } => VisibilityKind::Users,
            Self::Role { .. } => VisibilityKind::Role,
            Self::ExcludeOwner { .. } => VisibilityKind::ExcludeOwner,
        }
    }
}

/// Enumerated tag used to key verifier lookups.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VisibilityKind {
    /// See [`Visibility::Global`].
    Global,
    /// See [`Visibility::User`].
    User,
    /// See [`Visibility::Users`].
    Users,
    /// See [`Visibility::Role`].
    Role,
    /// See [`Visibility::ExcludeOwner`].
    ExcludeOwner,
}

impl VisibilityKind {
    /// Wire name of the kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Global => "GLOBAL",
            Self::User => "USER",
            Self::Users => "USERS",
            Self::Role => "ROLE",
            Self::ExcludeOwner => "EXCLUDE_OWNER",
        }
    }
}
