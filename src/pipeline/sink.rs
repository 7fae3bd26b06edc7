// Orchestration Sink
//
// Post-processing of an action outcome. A request's outcome is held in a
// `PendingOutcome` whose `succeed` and `fail` consume it, so exactly one path
// runs per request.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use super::error::PipelineError;
use super::metadata::MetadataDocument;
use super::policy::Domain;
use crate::error::ApiError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Hash-style cache: one key, many fields
#[async_trait]
pub trait Cache: Send + Sync {
    async fn set(&self, key: &str, field: &str, value: &Value, ttl: Duration) -> Result<(), CacheError>;
    async fn delete(&self, key: &str, fields: &[&str]) -> Result<(), CacheError>;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EmitError {
    #[error("event bus unreachable: {0}")]
    Transport(String),

    #[error("event rejected with status {0}")]
    Rejected(u16),
}

#[async_trait]
pub trait EventEmitter: Send + Sync {
    async fn emit(
        &self,
        event_type: &str,
        event_id: &str,
        metadata: &MetadataDocument,
        payload: &Value,
    ) -> Result<(), EmitError>;
}

pub fn success_event(domain: Domain, action: &str) -> String {
    format!("{}:{}:v1:success", domain, action)
}

pub fn failure_event(domain: Domain, action: &str) -> String {
    format!("{}:{}:v1:failed", domain, action)
}

/// Request facts the sink needs to settle an outcome
#[derive(Debug, Clone)]
pub struct OutcomeContext {
    pub request_id: Uuid,
    pub domain: Domain,
    pub action: String,
    pub metadata: MetadataDocument,
    pub cache_key: Option<String>,
}

#[derive(Clone)]
pub struct OrchestrationSink {
    cache: Arc<dyn Cache>,
    events: Arc<dyn EventEmitter>,
    ttl: Duration,
}

impl OrchestrationSink {
    pub fn new(cache: Arc<dyn Cache>, events: Arc<dyn EventEmitter>, ttl: Duration) -> Self {
        Self { cache, events, ttl }
    }

    /// Open the outcome of one request
    pub fn begin(&self, context: OutcomeContext) -> PendingOutcome<'_> {
        PendingOutcome { sink: self, context }
    }

    async fn on_success(&self, ctx: &OutcomeContext, result: &Value) {
        if let Some(key) = &ctx.cache_key {
            if let Err(e) = self.cache.set(key, &ctx.action, result, self.ttl).await {
                tracing::warn!("Cache write for {} failed: {}", key, e);
            }
        }

        let event_type = success_event(ctx.domain, &ctx.action);
        if let Err(e) = self
            .events
            .emit(&event_type, &ctx.request_id.to_string(), &ctx.metadata, result)
            .await
        {
            tracing::warn!("Failed to emit {}: {}", event_type, e);
        }

        tracing::info!("Action {} succeeded", ctx.action);
    }

    async fn on_failure(&self, ctx: &OutcomeContext, err: &PipelineError) -> ApiError {
        let api_error = err.to_api_error();
        tracing::error!(
            status = api_error.status_code(),
            code = api_error.error_code(),
            "Action {} failed: {}",
            ctx.action,
            err
        );

        if let Some(key) = &ctx.cache_key {
            if let Err(e) = self.cache.delete(key, &[ctx.action.as_str()]).await {
                tracing::warn!("Cache invalidation for {} failed: {}", key, e);
            }
        }

        let payload = json!({
            "code": api_error.error_code(),
            "status": api_error.status_code(),
            "message": api_error.message(),
            "detail": err.to_string(),
        });
        let event_type = failure_event(ctx.domain, &ctx.action);
        if let Err(e) = self
            .events
            .emit(&event_type, &ctx.request_id.to_string(), &ctx.metadata, &payload)
            .await
        {
            tracing::warn!("Failed to emit {}: {}", event_type, e);
        }

        api_error
    }
}

/// The not-yet-settled outcome of one request
pub struct PendingOutcome<'a> {
    sink: &'a OrchestrationSink,
    context: OutcomeContext,
}

impl<'a> PendingOutcome<'a> {
    pub fn set_metadata(&mut self, metadata: MetadataDocument) {
        self.context.metadata = metadata;
    }

    pub fn set_cache_key(&mut self, key: Option<String>) {
        self.context.cache_key = key;
    }

    pub async fn succeed(self, result: Value) -> Value {
        self.sink.on_success(&self.context, &result).await;
        result
    }

    pub async fn fail(self, err: PipelineError) -> ApiError {
        self.sink.on_failure(&self.context, &err).await
    }

    pub async fn settle(self, outcome: Result<Value, PipelineError>) -> Result<Value, ApiError> {
        match outcome {
            Ok(result) => Ok(self.succeed(result).await),
            Err(err) => Err(self.fail(err).await),
        }
    }
}
