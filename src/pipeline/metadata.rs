// Metadata document carried alongside every domain request, plus the audit stamp.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use super::identity::AuthContext;
use super::policy::Domain;

pub const SERVICE_SPECIFIC: &str = "service_specific";
pub const AUDIT_KEY: &str = "audit";
pub const ROLES_KEY: &str = "roles";

/// Keys that only the audit builder may write, at the top level and in any domain section
pub const RESERVED_KEYS: [&str; 2] = [AUDIT_KEY, ROLES_KEY];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("metadata must be a JSON object")]
    NotAnObject,

    #[error("metadata.service_specific must be a JSON object")]
    ServiceSpecificNotAnObject,

    #[error("metadata.service_specific.{0} must be a JSON object")]
    SectionNotAnObject(String),
}

/// Ordered JSON object with the conventional `service_specific.<domain>` layout.
///
/// Open for arbitrary extension keys; the builder below owns every `audit` and
/// `roles` key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataDocument(Map<String, Value>);

impl MetadataDocument {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept caller-supplied metadata. Absent or `null` is an empty document.
    pub fn from_value(value: Option<Value>) -> Result<Self, MetadataError> {
        let map = match value {
            None | Some(Value::Null) => return Ok(Self::new()),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(MetadataError::NotAnObject),
        };

        match map.get(SERVICE_SPECIFIC) {
            None => {}
            Some(Value::Object(sections)) => {
                if let Some((name, _)) = sections.iter().find(|(_, v)| !v.is_object()) {
                    return Err(MetadataError::SectionNotAnObject(name.clone()));
                }
            }
            Some(_) => return Err(MetadataError::ServiceSpecificNotAnObject),
        }

        Ok(Self(map))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn service_specific(&self) -> Option<&Map<String, Value>> {
        self.0.get(SERVICE_SPECIFIC).and_then(Value::as_object)
    }

    /// Extension fields of one domain, e.g. `service_specific.campaign`
    pub fn section(&self, name: &str) -> Option<&Map<String, Value>> {
        self.service_specific()?.get(name).and_then(Value::as_object)
    }

    pub fn audit(&self, name: &str) -> Option<AuditRecord> {
        let value = self.section(name)?.get(AUDIT_KEY)?;
        serde_json::from_value(value.clone()).ok()
    }

    /// Write the audit record at the top level and into one section, overwriting
    /// the reserved keys wherever a caller placed them. Every other key is
    /// left untouched.
    pub fn with_audit(mut self, name: &str, record: AuditRecord) -> Self {
        let roles = Value::from(record.roles.clone());
        let audit = serde_json::to_value(&record).unwrap_or(Value::Null);

        self.0.insert(AUDIT_KEY.to_string(), audit.clone());

        let sections = object_entry(&mut self.0, SERVICE_SPECIFIC);
        for (_, section) in sections.iter_mut() {
            if let Value::Object(section) = section {
                if let Some(slot) = section.get_mut(AUDIT_KEY) {
                    *slot = audit.clone();
                }
                if let Some(slot) = section.get_mut(ROLES_KEY) {
                    *slot = roles.clone();
                }
            }
        }

        let section = object_entry(sections, name);
        section.insert(AUDIT_KEY.to_string(), audit);
        section.insert(ROLES_KEY.to_string(), roles);
        self
    }
}

fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let slot = map.entry(key).or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(inner) => inner,
        _ => unreachable!("slot was just made an object"),
    }
}

/// Who performed a request, as recorded in the metadata that travels with it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub performed_by: String,
    pub roles: Vec<String>,
    pub timestamp: String,
}

impl AuditRecord {
    pub fn for_caller(ctx: &AuthContext, at: DateTime<Utc>) -> Self {
        let performed_by = if ctx.caller_id().is_empty() {
            "guest".to_string()
        } else {
            ctx.caller_id().to_string()
        };

        Self {
            performed_by,
            roles: ctx.roles().iter().cloned().collect(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Stamp a fresh audit record into the acting domain's section
pub fn stamp_audit(doc: MetadataDocument, domain: Domain, ctx: &AuthContext) -> MetadataDocument {
    stamp_audit_at(doc, domain, ctx, Utc::now())
}

pub fn stamp_audit_at(doc: MetadataDocument, domain: Domain, ctx: &AuthContext, at: DateTime<Utc>) -> MetadataDocument {
    doc.with_audit(domain.as_str(), AuditRecord::for_caller(ctx, at))
}
