#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use serde_json::Value;
use tower::ServiceExt;

use action_gateway::app::{pipeline_deadline, router, AppState};
use action_gateway::auth::{generate_jwt, Claims};
use action_gateway::config::AppConfig;
use action_gateway::pipeline::resource::FetchError;
use action_gateway::pipeline::{
    ActionDispatcher, ActionPipeline, ActionRequest, AuthorizationService, AuthzError, AuthzRequest, AuthzVerdict,
    Cache, CacheError, DomainService, EmitError, EventEmitter, MetadataDocument, OrchestrationSink, Resource,
    ResourceFetch, ResourceRef, ServiceError,
};

pub const OWNER_ID: &str = "u-owner";

pub fn config() -> AppConfig {
    AppConfig::development()
}

/// Bearer token for `user` signed with the test secret
pub fn token(user: &str, roles: &[&str]) -> String {
    let claims = Claims::new(user, roles.iter().map(|r| r.to_string()).collect(), 1);
    generate_jwt(&claims, &config().security.jwt_secret).expect("token")
}

/// Campaign owned by `owner` with explicit member assignments
pub fn campaign(owner: &str, members: Value) -> Resource {
    let metadata = serde_json::json!({"service_specific": {"campaign": {"members": members}}});
    Resource {
        id: "42".to_string(),
        owner_id: owner.to_string(),
        system: false,
        metadata: MetadataDocument::from_value(Some(metadata)).expect("metadata"),
    }
}

pub struct StubFetch {
    pub result: Mutex<Result<Option<Resource>, FetchError>>,
    pub calls: Mutex<Vec<ResourceRef>>,
}

#[async_trait]
impl ResourceFetch for StubFetch {
    async fn get(&self, reference: &ResourceRef) -> Result<Option<Resource>, FetchError> {
        self.calls.lock().unwrap().push(reference.clone());
        self.result.lock().unwrap().clone()
    }
}

pub struct StubAuthz {
    pub verdict: Mutex<Result<AuthzVerdict, AuthzError>>,
    pub delay: Mutex<Option<Duration>>,
    pub calls: Mutex<Vec<AuthzRequest>>,
}

#[async_trait]
impl AuthorizationService for StubAuthz {
    async fn evaluate(&self, request: &AuthzRequest) -> Result<AuthzVerdict, AuthzError> {
        self.calls.lock().unwrap().push(request.clone());
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.verdict.lock().unwrap().clone()
    }
}

#[derive(Clone)]
pub enum Behavior {
    Reply(Value),
    Fail(ServiceError),
    Panic,
}

pub struct RecordingService {
    pub behavior: Mutex<Behavior>,
    pub calls: Mutex<Vec<ActionRequest>>,
}

#[async_trait]
impl DomainService for RecordingService {
    async fn call(&self, request: &ActionRequest) -> Result<Value, ServiceError> {
        self.calls.lock().unwrap().push(request.clone());
        let behavior = self.behavior.lock().unwrap().clone();
        match behavior {
            Behavior::Reply(value) => Ok(value),
            Behavior::Fail(err) => Err(err),
            Behavior::Panic => panic!("domain service crashed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CacheOp {
    Set { key: String, field: String },
    Delete { key: String, fields: Vec<String> },
}

#[derive(Default)]
pub struct RecordingCache {
    pub ops: Mutex<Vec<CacheOp>>,
}

#[async_trait]
impl Cache for RecordingCache {
    async fn set(&self, key: &str, field: &str, _value: &Value, _ttl: Duration) -> Result<(), CacheError> {
        self.ops.lock().unwrap().push(CacheOp::Set {
            key: key.to_string(),
            field: field.to_string(),
        });
        Ok(())
    }

    async fn delete(&self, key: &str, fields: &[&str]) -> Result<(), CacheError> {
        self.ops.lock().unwrap().push(CacheOp::Delete {
            key: key.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
        });
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: String,
    pub event_id: String,
    pub metadata: Value,
    pub payload: Value,
}

#[derive(Default)]
pub struct RecordingEvents {
    pub events: Mutex<Vec<Event>>,
}

#[async_trait]
impl EventEmitter for RecordingEvents {
    async fn emit(
        &self,
        event_type: &str,
        event_id: &str,
        metadata: &MetadataDocument,
        payload: &Value,
    ) -> Result<(), EmitError> {
        self.events.lock().unwrap().push(Event {
            event_type: event_type.to_string(),
            event_id: event_id.to_string(),
            metadata: metadata.clone().into_value(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

/// Router wired to recording collaborators
pub struct TestGateway {
    pub router: Router,
    pub fetch: Arc<StubFetch>,
    pub authz: Arc<StubAuthz>,
    pub domain: Arc<RecordingService>,
    pub cache: Arc<RecordingCache>,
    pub events: Arc<RecordingEvents>,
}

impl TestGateway {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: AppConfig) -> Self {
        let fetch = Arc::new(StubFetch {
            result: Mutex::new(Ok(None)),
            calls: Mutex::new(Vec::new()),
        });
        let authz = Arc::new(StubAuthz {
            verdict: Mutex::new(Ok(AuthzVerdict::Allow)),
            delay: Mutex::new(None),
            calls: Mutex::new(Vec::new()),
        });
        let domain = Arc::new(RecordingService {
            behavior: Mutex::new(Behavior::Reply(serde_json::json!({"ok": true}))),
            calls: Mutex::new(Vec::new()),
        });
        let cache = Arc::new(RecordingCache::default());
        let events = Arc::new(RecordingEvents::default());

        let sink = OrchestrationSink::new(cache.clone(), events.clone(), Duration::from_secs(60));
        let dispatcher = ActionDispatcher::new().with_fallback(domain.clone());
        let pipeline = ActionPipeline::new(fetch.clone(), authz.clone(), dispatcher, sink)
            .with_deadline(pipeline_deadline(&config.api));
        let state = AppState::new(pipeline, config.security.jwt_secret.clone());

        Self {
            router: router(state, &config),
            fetch,
            authz,
            domain,
            cache,
            events,
        }
    }

    pub fn with_resource(self, result: Result<Option<Resource>, FetchError>) -> Self {
        *self.fetch.result.lock().unwrap() = result;
        self
    }

    pub fn with_verdict(self, verdict: Result<AuthzVerdict, AuthzError>) -> Self {
        *self.authz.verdict.lock().unwrap() = verdict;
        self
    }

    /// Authorization answers only after `delay`
    pub fn with_authz_delay(self, delay: Duration) -> Self {
        *self.authz.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn with_behavior(self, behavior: Behavior) -> Self {
        *self.domain.behavior.lock().unwrap() = behavior;
        self
    }

    /// POST a JSON body to `/api/<endpoint>`
    pub async fn post(&self, endpoint: &str, bearer: Option<&str>, body: Value) -> Result<(StatusCode, Value)> {
        self.send_raw(Method::POST, &format!("/api/{}", endpoint), bearer, body.to_string())
            .await
    }

    pub async fn send_raw(
        &self,
        method: Method,
        uri: &str,
        bearer: Option<&str>,
        body: String,
    ) -> Result<(StatusCode, Value)> {
        let mut builder = Request::builder()
            .method(method)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let request = builder.body(Body::from(body))?;

        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)?
        };
        Ok((status, body))
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.events.lock().unwrap().clone()
    }

    pub fn events_ending(&self, suffix: &str) -> usize {
        self.events().iter().filter(|e| e.event_type.ends_with(suffix)).count()
    }

    pub fn domain_calls(&self) -> Vec<ActionRequest> {
        self.domain.calls.lock().unwrap().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetch.calls.lock().unwrap().len()
    }

    pub fn authz_calls(&self) -> Vec<AuthzRequest> {
        self.authz.calls.lock().unwrap().clone()
    }

    pub fn cache_ops(&self) -> Vec<CacheOp> {
        self.cache.ops.lock().unwrap().clone()
    }
}
