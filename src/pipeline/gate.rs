// Permission Gate
//
// One decision per request, evaluated in order and short-circuiting:
// authentication, platform role (with declared substitutes), central policy.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::identity::AuthContext;
use super::metadata::MetadataDocument;
use super::policy::{ActionPolicy, Authentication, Domain};
use super::resource::ResourceRoleBinding;

/// Answer of the authorization service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthzVerdict {
    Allow,
    Deny,
    Unauthenticated,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("authorization service unreachable: {0}")]
    Transport(String),

    #[error("authorization service timed out")]
    Timeout,

    #[error("authorization service returned status {0}")]
    Status(u16),

    #[error("authorization verdict could not be decoded: {0}")]
    Decode(String),
}

/// Body sent to the authorization service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthzRequest {
    pub principal_id: String,
    pub action: String,
    pub resource_kind: String,
    pub metadata: MetadataDocument,
}

#[async_trait]
pub trait AuthorizationService: Send + Sync {
    async fn evaluate(&self, request: &AuthzRequest) -> Result<AuthzVerdict, AuthzError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Ok,
    Unauthenticated,
    Forbidden,
    UpstreamError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionDecision {
    pub allowed: bool,
    pub reason: DecisionReason,
    /// Client-safe explanation
    pub message: String,
    /// Upstream failure behind an `UpstreamError` decision
    pub cause: Option<AuthzError>,
}

impl PermissionDecision {
    pub fn ok() -> Self {
        Self {
            allowed: true,
            reason: DecisionReason::Ok,
            message: String::new(),
            cause: None,
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::denied(DecisionReason::Unauthenticated, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::denied(DecisionReason::Forbidden, message)
    }

    pub fn upstream_error(cause: AuthzError) -> Self {
        Self {
            cause: Some(cause),
            ..Self::denied(DecisionReason::UpstreamError, "authorization service unavailable")
        }
    }

    fn denied(reason: DecisionReason, message: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason,
            message: message.into(),
            cause: None,
        }
    }
}

/// Everything the gate looks at besides the caller and the binding
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub action: &'a str,
    pub domain: Domain,
    pub policy: ActionPolicy,
    pub fields: &'a Map<String, Value>,
    pub metadata: &'a MetadataDocument,
}

#[derive(Clone)]
pub struct PermissionGate {
    authz: Arc<dyn AuthorizationService>,
}

impl PermissionGate {
    pub fn new(authz: Arc<dyn AuthorizationService>) -> Self {
        Self { authz }
    }

    pub async fn check(
        &self,
        request: &GateRequest<'_>,
        ctx: &AuthContext,
        binding: Option<&ResourceRoleBinding>,
    ) -> PermissionDecision {
        let policy = &request.policy;

        if let Some(decision) = check_authentication(policy, request.fields, ctx) {
            return decision;
        }

        if let Some(decision) = check_roles(policy, request.fields, ctx, binding) {
            return decision;
        }

        if policy.central {
            let authz_request = AuthzRequest {
                principal_id: ctx.caller_id().to_string(),
                action: request.action.to_string(),
                resource_kind: request.domain.as_str().to_string(),
                metadata: request.metadata.clone(),
            };

            return match self.authz.evaluate(&authz_request).await {
                Ok(AuthzVerdict::Allow) => PermissionDecision::ok(),
                Ok(AuthzVerdict::Deny) => PermissionDecision::forbidden("action denied by policy"),
                Ok(AuthzVerdict::Unauthenticated) => {
                    PermissionDecision::unauthenticated("authentication required")
                }
                Err(e) => PermissionDecision::upstream_error(e),
            };
        }

        PermissionDecision::ok()
    }
}

fn check_authentication(
    policy: &ActionPolicy,
    fields: &Map<String, Value>,
    ctx: &AuthContext,
) -> Option<PermissionDecision> {
    if !ctx.is_guest() {
        return None;
    }

    match policy.authentication {
        Authentication::Optional => None,
        Authentication::Required => Some(PermissionDecision::unauthenticated("authentication required")),
        Authentication::GuestProof(field) => {
            let proven = fields
                .get(field)
                .and_then(Value::as_str)
                .map(|s| !s.trim().is_empty())
                .unwrap_or(false);
            if proven {
                None
            } else {
                Some(PermissionDecision::unauthenticated(format!(
                    "authentication or {} required",
                    field
                )))
            }
        }
    }
}

fn check_roles(
    policy: &ActionPolicy,
    fields: &Map<String, Value>,
    ctx: &AuthContext,
    binding: Option<&ResourceRoleBinding>,
) -> Option<PermissionDecision> {
    if policy.platform_roles.is_empty() {
        return None;
    }

    // Role requirements need an identity to hold the role
    if ctx.is_guest() {
        return Some(PermissionDecision::unauthenticated("authentication required"));
    }

    if ctx.has_any_role(policy.platform_roles) {
        return None;
    }

    // A referenced resource decides on its own; self-asserted ownership only
    // counts for unscoped requests
    if let (Some(field), None) = (policy.owner_field, binding) {
        if fields.get(field).and_then(Value::as_str) == Some(ctx.caller_id()) {
            tracing::debug!("Caller '{}' owns the request via {}", ctx.caller_id(), field);
            return None;
        }
    }

    if policy.resource_admin_substitutes {
        if let Some(binding) = binding {
            if binding.caller_role.is_administrative() {
                tracing::debug!(
                    "Resource role {:?} on {} stands in for platform role",
                    binding.caller_role,
                    binding.resource_id
                );
                return None;
            }
        }
    }

    Some(PermissionDecision::forbidden(format!(
        "requires one of: {}",
        policy.platform_roles.join(", ")
    )))
}
