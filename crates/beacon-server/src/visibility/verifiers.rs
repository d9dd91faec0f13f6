//! Built-in payload verifiers, one per descriptor kind.

use beacon_core::{Payload, Principal, VerifyError, Visibility, VisibilityKind};

use super::PayloadVerifier;

fn mismatch(kind: VisibilityKind, payload: &Payload) -> VerifyError {
    let found = payload
        .visibility
        .as_ref()
        .map_or("none", |v| v.kind().as_str());
    VerifyError::new(kind, format!("descriptor kind mismatch: found {found}"))
}

/// Visible only to [`Visibility::User`]'s user.
#[derive(Debug, Default, Clone, Copy)]
pub struct UserVerifier;

impl PayloadVerifier for UserVerifier {
    fn verify(&self, payload: &Payload, principal: &Principal) -> Result<bool, VerifyError> {
        match &payload.visibility {
            Some(Visibility::User { user_id }) => Ok(principal.user_id == *user_id),
            _ => Err(mismatch(VisibilityKind::User, payload)),
        }
    }
}

/// Visible to any user listed in [`Visibility::Users`].
#[derive(Debug, Default, Clone, Copy)]
pub struct UsersVerifier;

impl PayloadVerifier for UsersVerifier {
    fn verify(&self, payload: &Payload, principal: &Principal) -> Result<bool, VerifyError> {
        match &payload.visibility {
            Some(Visibility::Users { user_ids }) => {
                Ok(user_ids.iter().any(|id| *id == principal.user_id))
            }
            _ => Err(mismatch(VisibilityKind::Users, payload)),
        }
    }
}

/// Visible to members of [`Visibility::Role`]'s role.
#[derive(Debug, Default, Clone, Copy)]
pub struct RoleVerifier;

impl PayloadVerifier for RoleVerifier {
    fn verify(&self, payload: &Payload, principal: &Principal) -> Result<bool, VerifyError> {
        match &payload.visibility {
            Some(Visibility::Role { role }) if role.is_empty() => {
                Err(VerifyError::new(VisibilityKind::Role, "empty role key"))
            }
            Some(Visibility::Role { role }) => Ok(principal.has_role(role)),
            _ => Err(mismatch(VisibilityKind::Role, payload)),
        }
    }
}

/// Visible to everyone except [`Visibility::ExcludeOwner`]'s user.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExcludeOwnerVerifier;

impl PayloadVerifier for ExcludeOwnerVerifier {
    fn verify(&self, payload: &Payload, principal: &Principal) -> Result<bool, VerifyError> {
        match &payload.visibility {
            Some(Visibility::ExcludeOwner { user_id }) => Ok(principal.user_id != *user_id),
            _ => Err(mismatch(VisibilityKind::ExcludeOwner, payload)),
        }
    }
}
