use std::collections::BTreeSet;

use axum::http::HeaderMap;
use serde::Serialize;

use crate::auth::{decode_jwt, Claims};

pub const GUEST_ROLE: &str = "guest";
pub const ADMIN_ROLE: &str = "admin";

/// Caller identity for one request. Built once at request entry and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    caller_id: String,
    roles: BTreeSet<String>,
    is_guest: bool,
}

impl AuthContext {
    pub fn new<I, S>(caller_id: impl Into<String>, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let caller_id = caller_id.into();
        let roles: BTreeSet<String> = roles.into_iter().map(Into::into).collect();
        let only_guest_role = roles.len() == 1 && roles.contains(GUEST_ROLE);
        let is_guest = caller_id.is_empty() || only_guest_role;

        Self {
            caller_id,
            roles,
            is_guest,
        }
    }

    pub fn guest() -> Self {
        Self::new("", [GUEST_ROLE])
    }

    pub fn caller_id(&self) -> &str {
        &self.caller_id
    }

    pub fn roles(&self) -> &BTreeSet<String> {
        &self.roles
    }

    pub fn is_guest(&self) -> bool {
        self.is_guest
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|r| self.has_role(r))
    }

    pub fn is_platform_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }
}

impl From<Claims> for AuthContext {
    fn from(claims: Claims) -> Self {
        AuthContext::new(claims.sub, claims.roles)
    }
}

/// Derive the caller identity from the request's bearer token.
///
/// Never fails: a missing, malformed or unverifiable token yields the guest context.
pub fn extract_identity(headers: &HeaderMap, secret: &str) -> AuthContext {
    let token = match bearer_token(headers) {
        Some(token) => token,
        None => {
            tracing::debug!("No bearer token presented, treating caller as guest");
            return AuthContext::guest();
        }
    };

    match decode_jwt(token, secret) {
        Ok(claims) => AuthContext::from(claims),
        Err(e) => {
            tracing::warn!("Rejected bearer token, treating caller as guest: {}", e);
            AuthContext::guest()
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?.trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}
