// reqwest-backed collaborators. Single attempt per call; retries belong to the
// services behind these URLs.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use url::Url;

use crate::pipeline::resource::{FetchError, ResourceKey};
use crate::pipeline::{
    ActionRequest, AuthorizationService, AuthzError, AuthzRequest, AuthzVerdict, DomainService, EmitError,
    EventEmitter, MetadataDocument, Resource, ResourceFetch, ResourceRef, ServiceCode, ServiceError,
};

/// Parse a base URL so that relative joins append to its path
pub fn base_url(raw: &str) -> anyhow::Result<Url> {
    let mut url = Url::parse(raw)?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

fn join(base: &Url, path: &str) -> Result<Url, String> {
    base.join(path).map_err(|e| e.to_string())
}

#[derive(Deserialize)]
struct VerdictBody {
    verdict: AuthzVerdict,
}

/// `POST {base}/authorize`
#[derive(Clone)]
pub struct HttpAuthorizationService {
    client: Client,
    base: Url,
}

impl HttpAuthorizationService {
    pub fn new(client: Client, base: Url) -> Self {
        Self { client, base }
    }
}

#[async_trait]
impl AuthorizationService for HttpAuthorizationService {
    async fn evaluate(&self, request: &AuthzRequest) -> Result<AuthzVerdict, AuthzError> {
        let url = join(&self.base, "authorize").map_err(AuthzError::Transport)?;

        let response = self.client.post(url).json(request).send().await.map_err(|e| {
            if e.is_timeout() {
                AuthzError::Timeout
            } else {
                AuthzError::Transport(e.to_string())
            }
        })?;

        match response.status() {
            StatusCode::FORBIDDEN => return Ok(AuthzVerdict::Deny),
            StatusCode::UNAUTHORIZED => return Ok(AuthzVerdict::Unauthenticated),
            status if !status.is_success() => return Err(AuthzError::Status(status.as_u16())),
            _ => {}
        }

        let body: VerdictBody = response.json().await.map_err(|e| AuthzError::Decode(e.to_string()))?;
        Ok(body.verdict)
    }
}

/// `GET {base}/<kind>s/<id>` or `GET {base}/<kind>s/by-slug/<slug>`
#[derive(Clone)]
pub struct HttpResourceFetch {
    client: Client,
    base: Url,
}

impl HttpResourceFetch {
    pub fn new(client: Client, base: Url) -> Self {
        Self { client, base }
    }

    fn resource_url(&self, reference: &ResourceRef) -> Result<Url, String> {
        let collection = format!("{}s", reference.kind.as_str());
        let mut url = join(&self.base, &collection)?;
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| "resource URL cannot be a base".to_string())?;
            match &reference.key {
                ResourceKey::Id(id) => {
                    segments.push(&id.to_string());
                }
                ResourceKey::Slug(slug) => {
                    segments.push("by-slug").push(slug);
                }
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl ResourceFetch for HttpResourceFetch {
    async fn get(&self, reference: &ResourceRef) -> Result<Option<Resource>, FetchError> {
        let url = self.resource_url(reference).map_err(FetchError::Transport)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let resource = response.json().await.map_err(|e| FetchError::Decode(e.to_string()))?;
                Ok(Some(resource))
            }
            status => Err(FetchError::Status(status.as_u16())),
        }
    }
}

#[derive(Deserialize)]
struct ServiceErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    safe: bool,
}

/// `POST {base}/<domain>/<action>` with `{fields, metadata, caller}`
#[derive(Clone)]
pub struct HttpDomainService {
    client: Client,
    base: Url,
}

impl HttpDomainService {
    pub fn new(client: Client, base: Url) -> Self {
        Self { client, base }
    }
}

#[async_trait]
impl DomainService for HttpDomainService {
    async fn call(&self, request: &ActionRequest) -> Result<Value, ServiceError> {
        let path = format!("{}/{}", request.action.domain(), request.action);
        let url = join(&self.base, &path).map_err(|e| ServiceError::new(ServiceCode::Internal, e))?;

        let body = json!({
            "request_id": request.request_id,
            "caller": request.caller,
            "fields": request.fields,
            "metadata": request.metadata,
        });

        let response = self.client.post(url).json(&body).send().await.map_err(|e| {
            let code = if e.is_timeout() {
                ServiceCode::DeadlineExceeded
            } else {
                ServiceCode::Unavailable
            };
            ServiceError::new(code, e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return response
                .json()
                .await
                .map_err(|e| ServiceError::new(ServiceCode::Internal, e.to_string()));
        }

        // Structured failures carry their own classification
        match response.json::<ServiceErrorBody>().await {
            Ok(err) => Err(ServiceError {
                code: ServiceCode::from_name(&err.code),
                message: err.message,
                safe: err.safe,
            }),
            Err(_) => Err(ServiceError::new(
                ServiceCode::Unknown,
                format!("domain service returned status {}", status.as_u16()),
            )),
        }
    }
}

/// `POST {base}/events`
#[derive(Clone)]
pub struct HttpEventEmitter {
    client: Client,
    base: Url,
}

impl HttpEventEmitter {
    pub fn new(client: Client, base: Url) -> Self {
        Self { client, base }
    }
}

#[async_trait]
impl EventEmitter for HttpEventEmitter {
    async fn emit(
        &self,
        event_type: &str,
        event_id: &str,
        metadata: &MetadataDocument,
        payload: &Value,
    ) -> Result<(), EmitError> {
        let url = join(&self.base, "events").map_err(EmitError::Transport)?;
        let body = json!({
            "type": event_type,
            "id": event_id,
            "metadata": metadata,
            "payload": payload,
        });

        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| EmitError::Transport(e.to_string()))?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(EmitError::Rejected(response.status().as_u16()))
        }
    }
}
