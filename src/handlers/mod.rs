// HTTP handlers: public banner and health, plus the single action entry point
// shared by every `<domain>_ops` endpoint.

use axum::{
    body::Bytes,
    extract::{Path, State},
    Extension, Json,
};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::error::ApiError;
use crate::middleware::{ApiResult, IntoApiResponse};
use crate::pipeline::{AuthContext, Domain};

/// `POST /api/:endpoint`
pub async fn action_ops(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    Extension(auth): Extension<AuthContext>,
    body: Bytes,
) -> ApiResult<Value> {
    let domain = Domain::from_endpoint(&endpoint)
        .ok_or_else(|| ApiError::not_found(format!("Unknown endpoint: {}", endpoint)))?;

    let result = state.pipeline.handle(domain, &body, auth).await?;
    Ok(result.into_api_response())
}

pub async fn root() -> Json<Value> {
    let endpoints: Vec<String> = Domain::ALL
        .iter()
        .map(|d| format!("/api/{}_ops", d.as_str()))
        .collect();

    Json(json!({
        "success": true,
        "data": {
            "name": "Action Gateway",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "Authorization and orchestration pipeline for backend domain services",
            "endpoints": endpoints,
        }
    }))
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "success": true,
        "data": {
            "status": "ok",
            "timestamp": chrono::Utc::now(),
        }
    }))
}
