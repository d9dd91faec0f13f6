//! Per-subscriber visibility filtering.
//!
//! A payload's [`Visibility`](beacon_core::Visibility) descriptor is resolved
//! to a [`PayloadVerifier`] by its kind. Decision order in
//! [`VisibilityFilter::is_visible`]:
//!
//! | Situation | Visible |
//! |-----------|---------|
//! | no payload | no |
//! | no descriptor | yes |
//! | no principal | no |
//! | no verifier registered for the kind | **yes** (fail-open) |
//! | verifier returns `Ok(b)` | `b` |
//! | verifier returns `Err` | no |
//!
//! `GLOBAL` has no verifier and so reaches every principal. Any kind that must
//! restrict delivery needs a registered verifier.

pub mod verifiers;

use std::collections::HashMap;
use std::sync::Arc;

use beacon_core::{Payload, Principal, SystemEvent, VerifyError, VisibilityKind};
use tracing::{debug, warn};

pub use verifiers::{ExcludeOwnerVerifier, RoleVerifier, UserVerifier, UsersVerifier};

/// Decides whether one principal may receive one payload.
pub trait PayloadVerifier: Send + Sync {
    /// `Ok(true)` to deliver, `Ok(false)` to skip, `Err` when no decision can
    /// be made (treated as skip).
    fn verify(&self, payload: &Payload, principal: &Principal) -> Result<bool, VerifyError>;
}

/// Verifiers keyed by descriptor kind.
#[derive(Default, Clone)]
pub struct VerifierRegistry {
    verifiers: HashMap<VisibilityKind, Arc<dyn PayloadVerifier>>,
}

impl VerifierRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in user, users, role and exclude-owner verifiers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let _ = registry.register(VisibilityKind::User, Arc::new(UserVerifier));
        let _ = registry.register(VisibilityKind::Users, Arc::new(UsersVerifier));
        let _ = registry.register(VisibilityKind::Role, Arc::new(RoleVerifier));
        let _ = registry.register(VisibilityKind::ExcludeOwner, Arc::new(ExcludeOwnerVerifier));
        registry
    }

    /// Register `verifier` for `kind`, returning the one it replaces.
    pub fn register(
        &mut self,
        kind: VisibilityKind,
        verifier: Arc<dyn PayloadVerifier>,
    ) -> Option<Arc<dyn PayloadVerifier>> {
        self.verifiers.insert(kind, verifier)
    }

    /// Verifier for `kind`, if any.
    pub fn resolve(&self, kind: VisibilityKind) -> Option<&Arc<dyn PayloadVerifier>> {
        self.verifiers.get(&kind)
    }

    /// Registered kinds, sorted by wire name.
    pub fn kinds(&self) -> Vec<VisibilityKind> {
        let mut kinds: Vec<_> = self.verifiers.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Number of registered verifiers.
    pub fn len(&self) -> usize {
        self.verifiers.len()
    }

    /// Whether no verifier is registered.
    pub fn is_empty(&self) -> bool {
        self.verifiers.is_empty()
    }
}

/// Applies the decision table above.
#[derive(Clone)]
pub struct VisibilityFilter {
    verifiers: VerifierRegistry,
}

impl VisibilityFilter {
    /// Create a filter over `verifiers`.
    pub fn new(verifiers: VerifierRegistry) -> Self {
        Self { verifiers }
    }

    /// Whether `principal` may receive `event`.
    pub fn is_visible(&self, event: &SystemEvent, principal: Option<&Principal>) -> bool {
        let Some(payload) = &event.payload else {
            return false;
        };
        let Some(visibility) = &payload.visibility else {
            return true;
        };
        let Some(principal) = principal else {
            return false;
        };
        let kind = visibility.kind();
        let Some(verifier) = self.verifiers.resolve(kind) else {
            debug!(kind = kind.as_str(), event_type = %event.event_type, "no verifier for kind, delivering");
            return true;
        };
        match verifier.verify(payload, principal) {
            Ok(visible) => visible,
            Err(error) => {
                warn!(
                    %error,
                    event_type = %event.event_type,
                    user_id = %principal.user_id,
                    "visibility check failed, skipping subscriber"
                );
                false
            }
        }
    }
}

impl Default for VisibilityFilter {
    fn default() -> Self {
        Self::new(VerifierRegistry::with_defaults())
    }
}
