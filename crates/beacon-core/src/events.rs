//! System events: the unit of information fanned out to subscribers.
//!
//! An event is created by an emitter, consumed by one broadcast pass, and
//! never stored. The wire format is camelCase JSON:
//!
//! ```json
//! {
//!   "id": "0190...",
//!   "eventType": "NOTIFICATION",
//!   "payload": {
//!     "type": "notification",
//!     "data": { "message": "hi" },
//!     "visibility": { "kind": "ROLE", "role": "admin" }
//!   },
//!   "createdAt": "2026-01-01T00:00:00Z"
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::EventId;
use crate::visibility::Visibility;

/// Event-type tags understood by the service.
///
/// Processors are registered per tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemEventType {
    /// User-facing notification.
    Notification,
    /// Free-form message.
    Message,
    /// A site was created.
    SaveSite,
    /// A site was updated.
    UpdateSite,
    /// A site was archived.
    ArchiveSite,
    /// A site was restored from the archive.
    UnArchiveSite,
    /// A site was deleted.
    DeleteSite,
    /// The acting user switched the current site.
    SwitchSite,
    /// A content type was created.
    SaveBaseContentType,
    /// A content type was updated.
    UpdateBaseContentType,
    /// A content type was deleted.
    DeleteBaseContentType,
    /// A web session expired.
    SessionDestroyed,
    /// A user logged out.
    SessionLogout,
}

impl SystemEventType {
    /// Wire name of the tag (used as a log and metric label).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notification => "NOTIFICATION",
            Self::Message => "MESSAGE",
            Self::SaveSite => "SAVE_SITE",
            Self::UpdateSite => "UPDATE_SITE",
            Self::ArchiveSite => "ARCHIVE_SITE",
            Self::UnArchiveSite => "UN_ARCHIVE_SITE",
            Self::DeleteSite => "DELETE_SITE",
            Self::SwitchSite => "SWITCH_SITE",
            Self::SaveBaseContentType => "SAVE_BASE_CONTENT_TYPE",
            Self::UpdateBaseContentType => "UPDATE_BASE_CONTENT_TYPE",
            Self::DeleteBaseContentType => "DELETE_BASE_CONTENT_TYPE",
            Self::SessionDestroyed => "SESSION_DESTROYED",
            Self::SessionLogout => "SESSION_LOGOUT",
        }
    }
}

impl std::fmt::Display for SystemEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured body of an event plus its optional visibility descriptor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Payload class (free-form, e.g. `"notification"`, `"site"`).
    #[serde(rename = "type")]
    pub payload_type: String,
    /// Opaque structured value.
    #[serde(default)]
    pub data: serde_json::Value,
    /// `None` means visible to every authenticated subscriber.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<Visibility>,
}

impl Payload {
    /// Create a globally visible payload.
    pub fn new(payload_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            payload_type: payload_type.into(),
            data,
            visibility: None,
        }
    }

    /// Builder: attach a visibility descriptor.
    #[must_use]
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = Some(visibility);
        self
    }
}

/// A unit of broadcast information.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemEvent {
    /// Event ID.
    #[serde(default)]
    pub id: EventId,
    /// Event-type tag.
    pub event_type: SystemEventType,
    /// Body. An event without a payload is never delivered.
    #[serde(default)]
    pub payload: Option<Payload>,
    /// Emission time.
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl SystemEvent {
    /// Create an event with a payload.
    pub fn new(event_type: SystemEventType, payload: Payload) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            payload: Some(payload),
            created_at: Utc::now(),
        }
    }

    /// Create an event with no payload.
    pub fn without_payload(event_type: SystemEventType) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            payload: None,
            created_at: Utc::now(),
        }
    }

    /// Copy of this event with the payload replaced, keeping ID and timestamp.
    #[must_use]
    pub fn with_payload(&self, payload: Payload) -> Self {
        Self {
            id: self.id.clone(),
            event_type: self.event_type,
            payload: Some(payload),
            created_at: self.created_at,
        }
    }

    /// Visibility descriptor of the payload, if any.
    pub fn visibility(&self) -> Option<&Visibility> {
        self.payload.as_ref().and_then(|p| p.visibility.as_ref())
    }
}
