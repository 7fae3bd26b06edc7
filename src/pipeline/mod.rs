// Authorization-and-orchestration pipeline
//
// request -> identity -> audit metadata -> resource role -> gate -> dispatch
//         -> domain service -> sink -> response

pub mod dispatch;
pub mod error;
pub mod gate;
pub mod identity;
pub mod metadata;
pub mod policy;
pub mod resource;
pub mod sink;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::Instrument;
use uuid::Uuid;

pub use dispatch::{ActionDispatcher, ActionRequest, DomainService, ServiceCode, ServiceError};
pub use error::PipelineError;
pub use gate::{AuthorizationService, AuthzError, AuthzRequest, AuthzVerdict, PermissionDecision, PermissionGate};
pub use identity::{extract_identity, AuthContext};
pub use metadata::{stamp_audit, AuditRecord, MetadataDocument};
pub use policy::{Action, ActionPolicy, Domain};
pub use resource::{Resource, ResourceFetch, ResourceRef, ResourceRoleBinding, ResourceRoleResolver};
pub use sink::{Cache, CacheError, EmitError, EventEmitter, OrchestrationSink, OutcomeContext, PendingOutcome};

use crate::error::ApiError;
use gate::GateRequest;
use resource::Lookup;

pub const ACTION_FIELD: &str = "action";
pub const METADATA_FIELD: &str = "metadata";
pub const CACHE_KEY_FIELD: &str = "cache_key";

/// One shared code path for every action of every domain
#[derive(Clone)]
pub struct ActionPipeline {
    resolver: ResourceRoleResolver,
    gate: PermissionGate,
    dispatcher: ActionDispatcher,
    sink: OrchestrationSink,
    deadline: Option<Duration>,
}

impl ActionPipeline {
    pub fn new(
        fetch: Arc<dyn ResourceFetch>,
        authz: Arc<dyn AuthorizationService>,
        dispatcher: ActionDispatcher,
        sink: OrchestrationSink,
    ) -> Self {
        Self {
            resolver: ResourceRoleResolver::new(fetch),
            gate: PermissionGate::new(authz),
            dispatcher,
            sink,
            deadline: None,
        }
    }

    /// Bound every request so that an expired call still settles its outcome.
    /// Must sit inside any outer deadline that drops the request future.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Run one `<domain>_ops` request body through the pipeline
    pub async fn handle(&self, domain: Domain, body: &[u8], ctx: AuthContext) -> Result<Value, ApiError> {
        let mut fields = parse_envelope(body).map_err(|e| {
            tracing::warn!("Rejected {} request envelope: {}", domain, e.message());
            e
        })?;

        let name = match fields.remove(ACTION_FIELD) {
            Some(Value::String(name)) if !name.is_empty() => name,
            _ => {
                tracing::warn!("Rejected {} request without an action", domain);
                return Err(ApiError::invalid_request("action is required"));
            }
        };

        let request_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "action",
            request_id = %request_id,
            domain = %domain,
            action = %name,
            caller = %ctx.caller_id()
        );

        async move {
            let mut outcome = self.sink.begin(OutcomeContext {
                request_id,
                domain,
                action: name.clone(),
                metadata: stamp_audit(MetadataDocument::new(), domain, &ctx),
                cache_key: None,
            });

            let run = self.run(request_id, domain, &name, fields, ctx, &mut outcome);
            let result = match self.deadline {
                Some(limit) => tokio::time::timeout(limit, run)
                    .await
                    .unwrap_or(Err(PipelineError::DeadlineExceeded(limit))),
                None => run.await,
            };
            outcome.settle(result).await
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        request_id: Uuid,
        domain: Domain,
        name: &str,
        mut fields: Map<String, Value>,
        ctx: AuthContext,
        outcome: &mut PendingOutcome<'_>,
    ) -> Result<Value, PipelineError> {
        let action = Action::parse(domain, name);
        let policy = action.map(|a| a.policy()).unwrap_or(ActionPolicy::FALLBACK);

        // Validation, before any collaborator is consulted
        let metadata = MetadataDocument::from_value(fields.remove(METADATA_FIELD))?;
        let metadata = stamp_audit(metadata, domain, &ctx);
        outcome.set_metadata(metadata.clone());

        // Only authenticated callers may name a cache entry
        let caller_key = take_cache_key(&mut fields)?.filter(|_| !ctx.is_guest());
        validate_required(&policy, &fields)?;

        let reference = match policy.scope {
            Some(kind) => ResourceRef::from_fields(kind, &fields).map_err(PipelineError::InvalidRequest)?,
            None => None,
        };

        let binding = match &reference {
            Some(reference) => Some(self.resolver.resolve(reference, &ctx).await),
            None => None,
        };

        let request = GateRequest {
            action: name,
            domain,
            policy,
            fields: &fields,
            metadata: &metadata,
        };
        let decision = self.gate.check(&request, &ctx, binding.as_ref()).await;
        tracing::debug!("Permission decision: {:?}", decision.reason);

        let action = self.dispatcher.admit(action, name, &decision)?;

        // Denied requests never touch the cache
        outcome.set_cache_key(cache_key(domain, caller_key, &policy, &fields, reference.as_ref()));

        if let (Some(reference), Some(binding)) = (&reference, binding) {
            match binding.lookup {
                Lookup::Found => {}
                Lookup::NotFound => return Err(PipelineError::NotFound(reference.to_string())),
                Lookup::Failed(e) => return Err(PipelineError::Fetch(e)),
            }
        }

        let request = ActionRequest {
            request_id,
            action,
            caller: ctx,
            fields,
            metadata,
        };
        self.dispatcher.invoke(&request).await
    }
}

fn parse_envelope(body: &[u8]) -> Result<Map<String, Value>, ApiError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(ApiError::invalid_request("request body must be a JSON object")),
        Err(e) => Err(ApiError::invalid_json(format!("invalid JSON body: {}", e))),
    }
}

fn take_cache_key(fields: &mut Map<String, Value>) -> Result<Option<String>, PipelineError> {
    match fields.remove(CACHE_KEY_FIELD) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(key)) if !key.is_empty() => Ok(Some(key)),
        Some(_) => Err(PipelineError::InvalidRequest(
            "cache_key must be a non-empty string".to_string(),
        )),
    }
}

fn validate_required(policy: &ActionPolicy, fields: &Map<String, Value>) -> Result<(), PipelineError> {
    for field in policy.required_fields {
        match fields.get(*field) {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            Some(Value::String(_)) | None | Some(Value::Null) => {
                return Err(PipelineError::InvalidRequest(format!("{} is required", field)));
            }
            Some(_) => return Err(PipelineError::InvalidRequest(format!("{} must be a string", field))),
        }
    }
    Ok(())
}

/// `service:<domain>:<id>`. A key derived from the request wins over a
/// caller-supplied one, which stays inside the domain's namespace.
fn cache_key(
    domain: Domain,
    caller_key: Option<String>,
    policy: &ActionPolicy,
    fields: &Map<String, Value>,
    reference: Option<&ResourceRef>,
) -> Option<String> {
    let derived = policy.key_field.and_then(|field| match fields.get(field)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    let id = derived
        .or_else(|| reference.map(ResourceRef::key_string))
        .or(caller_key)?;

    Some(format!("service:{}:{}", domain, id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fields(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_envelope_errors() {
        assert_eq!(parse_envelope(b"{not json").unwrap_err().error_code(), "INVALID_JSON");
        assert_eq!(parse_envelope(b"[1, 2]").unwrap_err().error_code(), "INVALID_REQUEST");
        assert!(parse_envelope(br#"{"action": "search"}"#).is_ok());
    }

    #[test]
    fn test_required_fields_are_strings() {
        let policy = Action::GetUser.policy();
        assert!(validate_required(&policy, &fields(json!({"user_id": "u-1"}))).is_ok());
        assert!(validate_required(&policy, &fields(json!({}))).is_err());
        assert!(validate_required(&policy, &fields(json!({"user_id": " "}))).is_err());
        assert!(validate_required(&policy, &fields(json!({"user_id": 7}))).is_err());
    }

    #[test]
    fn test_cache_key_derivation() {
        let update_content = Action::UpdateContent.policy();
        let f = fields(json!({"id": "c-9", "campaign_id": 42}));
        let reference = ResourceRef::id(resource::ResourceKind::Campaign, 42);

        assert_eq!(
            cache_key(Domain::Content, None, &update_content, &f, Some(&reference)),
            Some("service:content:c-9".to_string())
        );
        assert_eq!(
            cache_key(Domain::Content, Some("99".into()), &update_content, &f, Some(&reference)),
            Some("service:content:c-9".to_string())
        );

        let get_campaign = Action::GetCampaign.policy();
        let slug = ResourceRef::slug(resource::ResourceKind::Campaign, "a");
        assert_eq!(
            cache_key(Domain::Campaign, Some("99".into()), &get_campaign, &fields(json!({})), Some(&slug)),
            Some("service:campaign:a".to_string())
        );
        assert_eq!(
            cache_key(Domain::Search, Some("boots".into()), &Action::Search.policy(), &f, None),
            Some("service:search:boots".to_string())
        );

        let update_campaign = Action::UpdateCampaign.policy();
        assert_eq!(
            cache_key(Domain::Campaign, None, &update_campaign, &f, Some(&reference)),
            Some("service:campaign:42".to_string())
        );
        assert_eq!(cache_key(Domain::Search, None, &Action::Search.policy(), &f, None), None);
    }

    #[test]
    fn test_cache_key_field_type() {
        let mut f = fields(json!({"cache_key": 5}));
        assert!(take_cache_key(&mut f).is_err());

        let mut f = fields(json!({"cache_key": "k", "other": 1}));
        assert_eq!(take_cache_key(&mut f).unwrap(), Some("k".to_string()));
        assert!(!f.contains_key(CACHE_KEY_FIELD));
    }
}
