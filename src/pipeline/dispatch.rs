// Action Dispatcher
//
// Admits an action only on an allowing decision, then routes it to the domain
// service registered for its domain.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use super::error::PipelineError;
use super::gate::{DecisionReason, PermissionDecision};
use super::identity::AuthContext;
use super::metadata::MetadataDocument;
use super::policy::{Action, Domain};

/// Failure classification reported by domain services (gRPC status codes)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCode {
    Canceled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl ServiceCode {
    pub fn http_status(&self) -> u16 {
        match self {
            ServiceCode::Canceled => 499,
            ServiceCode::Unknown => 500,
            ServiceCode::InvalidArgument => 400,
            ServiceCode::DeadlineExceeded => 504,
            ServiceCode::NotFound => 404,
            ServiceCode::AlreadyExists => 409,
            ServiceCode::PermissionDenied => 403,
            ServiceCode::ResourceExhausted => 429,
            ServiceCode::FailedPrecondition => 400,
            ServiceCode::Aborted => 409,
            ServiceCode::OutOfRange => 400,
            ServiceCode::Unimplemented => 501,
            ServiceCode::Internal => 500,
            ServiceCode::Unavailable => 503,
            ServiceCode::DataLoss => 500,
            ServiceCode::Unauthenticated => 401,
        }
    }

    /// Parse the snake_case wire name; unrecognised names are `Unknown`
    pub fn from_name(name: &str) -> ServiceCode {
        match name {
            "canceled" | "cancelled" => ServiceCode::Canceled,
            "invalid_argument" => ServiceCode::InvalidArgument,
            "deadline_exceeded" => ServiceCode::DeadlineExceeded,
            "not_found" => ServiceCode::NotFound,
            "already_exists" => ServiceCode::AlreadyExists,
            "permission_denied" => ServiceCode::PermissionDenied,
            "resource_exhausted" => ServiceCode::ResourceExhausted,
            "failed_precondition" => ServiceCode::FailedPrecondition,
            "aborted" => ServiceCode::Aborted,
            "out_of_range" => ServiceCode::OutOfRange,
            "unimplemented" => ServiceCode::Unimplemented,
            "internal" => ServiceCode::Internal,
            "unavailable" => ServiceCode::Unavailable,
            "data_loss" => ServiceCode::DataLoss,
            "unauthenticated" => ServiceCode::Unauthenticated,
            _ => ServiceCode::Unknown,
        }
    }
}

/// Structured failure from a domain service
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{code:?}: {message}")]
pub struct ServiceError {
    pub code: ServiceCode,
    pub message: String,
    /// Message may be shown to the caller
    pub safe: bool,
}

impl ServiceError {
    pub fn new(code: ServiceCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            safe: false,
        }
    }

    pub fn client_safe(code: ServiceCode, message: impl Into<String>) -> Self {
        Self {
            safe: true,
            ..Self::new(code, message)
        }
    }
}

/// One admitted action on its way to a domain service
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub request_id: Uuid,
    pub action: Action,
    pub caller: AuthContext,
    /// Action-specific request fields, without the envelope keys
    pub fields: Map<String, Value>,
    pub metadata: MetadataDocument,
}

#[async_trait]
pub trait DomainService: Send + Sync {
    async fn call(&self, request: &ActionRequest) -> Result<Value, ServiceError>;
}

#[derive(Clone, Default)]
pub struct ActionDispatcher {
    services: HashMap<Domain, Arc<dyn DomainService>>,
    fallback: Option<Arc<dyn DomainService>>,
}

impl ActionDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every action of `domain` to `service`
    pub fn register(&mut self, domain: Domain, service: Arc<dyn DomainService>) {
        self.services.insert(domain, service);
    }

    pub fn with_service(mut self, domain: Domain, service: Arc<dyn DomainService>) -> Self {
        self.register(domain, service);
        self
    }

    /// Service used for domains without a dedicated registration
    pub fn with_fallback(mut self, service: Arc<dyn DomainService>) -> Self {
        self.fallback = Some(service);
        self
    }

    /// Turn a decision into an admitted action. Unknown names are rejected only
    /// after the decision allowed them.
    pub fn admit(
        &self,
        action: Option<Action>,
        name: &str,
        decision: &PermissionDecision,
    ) -> Result<Action, PipelineError> {
        if !decision.allowed {
            return Err(match decision.reason {
                DecisionReason::Unauthenticated => PipelineError::Unauthenticated(decision.message.clone()),
                DecisionReason::Forbidden => PipelineError::Forbidden(decision.message.clone()),
                DecisionReason::UpstreamError | DecisionReason::Ok => match &decision.cause {
                    Some(cause) => PipelineError::Authorization(cause.clone()),
                    None => PipelineError::Forbidden(decision.message.clone()),
                },
            });
        }

        action.ok_or_else(|| PipelineError::InvalidRequest(format!("unknown action: {}", name)))
    }

    /// Call the domain service. A panic inside the service becomes an error.
    pub async fn invoke(&self, request: &ActionRequest) -> Result<Value, PipelineError> {
        let domain = request.action.domain();
        let service = self
            .services
            .get(&domain)
            .or(self.fallback.as_ref())
            .ok_or(PipelineError::Unrouted(domain))?;

        match AssertUnwindSafe(service.call(request)).catch_unwind().await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(PipelineError::Service(e)),
            Err(panic) => Err(PipelineError::ServicePanicked(panic_message(panic.as_ref()))),
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::gate::AuthzError;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl DomainService for Echo {
        async fn call(&self, request: &ActionRequest) -> Result<Value, ServiceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({"action": request.action.as_str()}))
        }
    }

    struct Panics;

    #[async_trait]
    impl DomainService for Panics {
        async fn call(&self, _request: &ActionRequest) -> Result<Value, ServiceError> {
            panic!("handler blew up");
        }
    }

    fn request(action: Action) -> ActionRequest {
        ActionRequest {
            request_id: Uuid::new_v4(),
            action,
            caller: AuthContext::new("u-1", ["user"]),
            fields: Map::new(),
            metadata: MetadataDocument::new(),
        }
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServiceCode::InvalidArgument.http_status(), 400);
        assert_eq!(ServiceCode::AlreadyExists.http_status(), 409);
        assert_eq!(ServiceCode::Canceled.http_status(), 499);
        assert_eq!(ServiceCode::Unavailable.http_status(), 503);
        assert_eq!(ServiceCode::from_name("permission_denied"), ServiceCode::PermissionDenied);
        assert_eq!(ServiceCode::from_name("bogus"), ServiceCode::Unknown);
    }

    #[test]
    fn test_denials_map_without_revealing_unknown_actions() {
        let dispatcher = ActionDispatcher::new();

        let denied = PermissionDecision::forbidden("requires one of: admin");
        assert!(matches!(dispatcher.admit(None, "drop_tables", &denied), Err(PipelineError::Forbidden(_))));

        let unauth = PermissionDecision::unauthenticated("authentication required");
        assert!(matches!(
            dispatcher.admit(Some(Action::CreateCampaign), "create_campaign", &unauth),
            Err(PipelineError::Unauthenticated(_))
        ));

        let upstream = PermissionDecision::upstream_error(AuthzError::Timeout);
        assert!(matches!(
            dispatcher.admit(Some(Action::UpdateUser), "update_user", &upstream),
            Err(PipelineError::Authorization(AuthzError::Timeout))
        ));

        let ok = PermissionDecision::ok();
        assert!(matches!(dispatcher.admit(None, "drop_tables", &ok), Err(PipelineError::InvalidRequest(_))));
        assert_eq!(dispatcher.admit(Some(Action::Search), "search", &ok).unwrap(), Action::Search);
    }

    #[tokio::test]
    async fn test_routes_by_domain() {
        let search = Arc::new(Echo::default());
        let fallback = Arc::new(Echo::default());
        let dispatcher = ActionDispatcher::new()
            .with_service(Domain::Search, search.clone())
            .with_fallback(fallback.clone());

        let value = dispatcher.invoke(&request(Action::Suggest)).await.unwrap();
        assert_eq!(value["action"], "suggest");
        dispatcher.invoke(&request(Action::GetCampaign)).await.unwrap();

        assert_eq!(search.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fallback.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unrouted_domain() {
        let dispatcher = ActionDispatcher::new().with_service(Domain::Search, Arc::new(Echo::default()));
        let err = dispatcher.invoke(&request(Action::GetCampaign)).await.unwrap_err();
        assert!(matches!(err, PipelineError::Unrouted(Domain::Campaign)));
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let dispatcher = ActionDispatcher::new().with_fallback(Arc::new(Panics));
        let err = dispatcher.invoke(&request(Action::CreateContent)).await.unwrap_err();
        match err {
            PipelineError::ServicePanicked(msg) => assert_eq!(msg, "handler blew up"),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
