use std::time::Duration;

use thiserror::Error;

use super::dispatch::ServiceError;
use super::gate::AuthzError;
use super::metadata::MetadataError;
use super::policy::Domain;
use super::resource::FetchError;
use crate::error::ApiError;

/// Everything that can end a request after its action is known.
///
/// `Display` carries internal detail for logs and events; `to_api_error` is the
/// only view a caller gets.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error(transparent)]
    Authorization(#[from] AuthzError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("domain service failed: {0}")]
    Service(#[from] ServiceError),

    #[error("domain service panicked: {0}")]
    ServicePanicked(String),

    #[error("no domain service registered for {0}")]
    Unrouted(Domain),

    #[error("request deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl From<MetadataError> for PipelineError {
    fn from(err: MetadataError) -> Self {
        PipelineError::InvalidRequest(err.to_string())
    }
}

impl PipelineError {
    /// Client-facing classification
    pub fn to_api_error(&self) -> ApiError {
        match self {
            PipelineError::InvalidRequest(msg) => ApiError::invalid_request(msg.clone()),
            PipelineError::Unauthenticated(msg) => ApiError::unauthenticated(msg.clone()),
            PipelineError::Forbidden(msg) => ApiError::forbidden(msg.clone()),
            PipelineError::NotFound(what) => ApiError::not_found(format!("{} not found", what)),
            PipelineError::Authorization(_) | PipelineError::Fetch(_) => {
                ApiError::upstream_unavailable("upstream service unavailable")
            }
            PipelineError::Service(e) => {
                let message = if e.safe {
                    e.message.clone()
                } else {
                    "domain service error".to_string()
                };
                ApiError::domain(e.code.http_status(), message)
            }
            PipelineError::ServicePanicked(_) | PipelineError::Unrouted(_) | PipelineError::DeadlineExceeded(_) => {
                ApiError::upstream_unavailable("upstream service unavailable")
            }
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        err.to_api_error()
    }
}
