// Resource-scoped role resolution

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::identity::AuthContext;
use super::metadata::MetadataDocument;

/// Kinds of resource an action may be scoped to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ResourceKind {
    Campaign,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Campaign => "campaign",
        }
    }

    /// Request field holding a numeric id
    pub fn id_field(&self) -> &'static str {
        match self {
            ResourceKind::Campaign => "campaign_id",
        }
    }

    /// Request field holding a slug
    pub fn slug_field(&self) -> &'static str {
        match self {
            ResourceKind::Campaign => "campaign_slug",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceKey {
    Id(i64),
    Slug(String),
}

/// Reference to one resource instance, taken from exactly one of two request fields
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub key: ResourceKey,
}

impl ResourceRef {
    pub fn id(kind: ResourceKind, id: i64) -> Self {
        Self {
            kind,
            key: ResourceKey::Id(id),
        }
    }

    pub fn slug(kind: ResourceKind, slug: impl Into<String>) -> Self {
        Self {
            kind,
            key: ResourceKey::Slug(slug.into()),
        }
    }

    /// Read the reference from a request. `<kind>_id` must be a positive integer,
    /// `<kind>_slug` a non-empty string, and at most one of them may be present.
    pub fn from_fields(kind: ResourceKind, fields: &Map<String, Value>) -> Result<Option<Self>, String> {
        let id_field = kind.id_field();
        let slug_field = kind.slug_field();

        let id = match fields.get(id_field) {
            None | Some(Value::Null) => None,
            Some(Value::Number(n)) => match n.as_i64() {
                Some(id) if id > 0 => Some(id),
                _ => return Err(format!("{} must be a positive integer", id_field)),
            },
            Some(Value::String(_)) => {
                return Err(format!("{} must be a number; use {} for slugs", id_field, slug_field));
            }
            Some(_) => return Err(format!("{} must be a positive integer", id_field)),
        };

        let slug = match fields.get(slug_field) {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
            Some(_) => return Err(format!("{} must be a non-empty string", slug_field)),
        };

        match (id, slug) {
            (Some(_), Some(_)) => Err(format!("provide either {} or {}, not both", id_field, slug_field)),
            (Some(id), None) => Ok(Some(Self::id(kind, id))),
            (None, Some(slug)) => Ok(Some(Self::slug(kind, slug))),
            (None, None) => Ok(None),
        }
    }

    /// The bare id or slug
    pub fn key_string(&self) -> String {
        match &self.key {
            ResourceKey::Id(id) => id.to_string(),
            ResourceKey::Slug(slug) => slug.clone(),
        }
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.key_string())
    }
}

/// A fetched resource, reduced to what role resolution needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub owner_id: String,
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub metadata: MetadataDocument,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected string or number id, got {}", other))),
    }
}

impl Resource {
    /// System resources are administrable by any platform admin
    pub fn is_system(&self, kind: ResourceKind) -> bool {
        self.system
            || self
                .metadata
                .section(kind.as_str())
                .and_then(|s| s.get("system_created"))
                .and_then(Value::as_bool)
                .unwrap_or(false)
    }

    /// Explicit assignment from `service_specific.<kind>.members`
    pub fn assigned_role(&self, kind: ResourceKind, caller_id: &str) -> Option<&str> {
        let members = self.metadata.section(kind.as_str())?.get("members")?.as_array()?;
        members
            .iter()
            .filter_map(Value::as_object)
            .find(|m| m.get("user_id").and_then(Value::as_str) == Some(caller_id))
            .and_then(|m| m.get("role"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("resource service unreachable: {0}")]
    Transport(String),

    #[error("resource service returned status {0}")]
    Status(u16),

    #[error("resource payload could not be decoded: {0}")]
    Decode(String),
}

/// Looks up resources by reference
#[async_trait]
pub trait ResourceFetch: Send + Sync {
    /// `Ok(None)` when the resource does not exist
    async fn get(&self, reference: &ResourceRef) -> Result<Option<Resource>, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceRole {
    Owner,
    Admin,
    Member,
    None,
}

impl ResourceRole {
    /// Owner or admin of the resource
    pub fn is_administrative(&self) -> bool {
        matches!(self, ResourceRole::Owner | ResourceRole::Admin)
    }
}

/// What the lookup behind a binding produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found,
    NotFound,
    Failed(FetchError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRoleBinding {
    pub resource_id: String,
    pub caller_role: ResourceRole,
    pub lookup: Lookup,
}

impl ResourceRoleBinding {
    fn unresolved(reference: &ResourceRef, lookup: Lookup) -> Self {
        Self {
            resource_id: reference.key_string(),
            caller_role: ResourceRole::None,
            lookup,
        }
    }
}

/// Computes the caller's role within one resource. Recomputed on every request.
#[derive(Clone)]
pub struct ResourceRoleResolver {
    fetch: Arc<dyn ResourceFetch>,
}

impl ResourceRoleResolver {
    pub fn new(fetch: Arc<dyn ResourceFetch>) -> Self {
        Self { fetch }
    }

    /// Fails closed: a missing resource or a failed fetch binds the caller to `None`.
    pub async fn resolve(&self, reference: &ResourceRef, ctx: &AuthContext) -> ResourceRoleBinding {
        match self.fetch.get(reference).await {
            Ok(Some(resource)) => {
                let caller_role = role_in(&resource, reference.kind, ctx);
                tracing::debug!("Caller '{}' holds {:?} on {}", ctx.caller_id(), caller_role, reference);
                ResourceRoleBinding {
                    resource_id: resource.id,
                    caller_role,
                    lookup: Lookup::Found,
                }
            }
            Ok(None) => {
                tracing::debug!("Resource {} not found", reference);
                ResourceRoleBinding::unresolved(reference, Lookup::NotFound)
            }
            Err(e) => {
                tracing::warn!("Resource fetch for {} failed: {}", reference, e);
                ResourceRoleBinding::unresolved(reference, Lookup::Failed(e))
            }
        }
    }
}

/// Role of `ctx` within a fetched resource
pub fn role_in(resource: &Resource, kind: ResourceKind, ctx: &AuthContext) -> ResourceRole {
    if ctx.is_guest() {
        return ResourceRole::None;
    }

    let caller_id = ctx.caller_id();
    if !resource.owner_id.is_empty() && resource.owner_id == caller_id {
        return ResourceRole::Owner;
    }

    let assigned = match resource.assigned_role(kind, caller_id) {
        Some("admin") => ResourceRole::Admin,
        Some("member") => ResourceRole::Member,
        _ => ResourceRole::None,
    };

    if assigned != ResourceRole::Admin && ctx.is_platform_admin() && resource.is_system(kind) {
        return ResourceRole::Admin;
    }

    assigned
}
