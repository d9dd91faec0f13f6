//! Resolving the principal behind a `WebSocket` upgrade request.

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;
use beacon_core::Principal;
use beacon_settings::{AuthSettings, TokenGrant};
use tracing::debug;

/// Resolves a principal from the upgrade request. `None` rejects the socket.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Principal for this request, if it belongs to a valid session.
    ///
    /// `query_token` is the already decoded `?token=` value, for clients that
    /// cannot set headers.
    async fn authenticate(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Option<Principal>;
}

/// Static bearer tokens, each bound to one principal.
#[derive(Debug, Default, Clone)]
pub struct TokenAuthenticator {
    grants: HashMap<String, Principal>,
}

impl TokenAuthenticator {
    /// Create an authenticator that accepts nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the configured token grants. Later duplicates win.
    pub fn from_settings(settings: &AuthSettings) -> Self {
        let mut auth = Self::new();
        for grant in &settings.tokens {
            auth.grant(grant.token.clone(), principal_for(grant));
        }
        auth
    }

    /// Accept `token` as `principal`.
    pub fn grant(&mut self, token: impl Into<String>, principal: Principal) {
        let _ = self.grants.insert(token.into(), principal);
    }

    /// Number of accepted tokens.
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Whether no token is accepted.
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[async_trait]
impl Authenticator for TokenAuthenticator {
    async fn authenticate(
        &self,
        headers: &HeaderMap,
        query_token: Option<&str>,
    ) -> Option<Principal> {
        let token = bearer_token(headers)
            .or_else(|| query_token.filter(|token| !token.is_empty()))?;
        let principal = self.grants.get(token).cloned();
        if principal.is_none() {
            debug!("unknown session token");
        }
        principal
    }
}

fn principal_for(grant: &TokenGrant) -> Principal {
    Principal {
        user_id: grant.user_id.clone(),
        display_name: grant.display_name.clone(),
        roles: grant.roles.clone(),
        locale: grant.locale.clone(),
        admin: grant.admin,
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
