use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::clients::{
    base_url, HttpAuthorizationService, HttpDomainService, HttpEventEmitter, HttpResourceFetch, MemoryCache,
};
use crate::config::{ApiConfig, AppConfig};
use crate::handlers;
use crate::middleware::identity_middleware;
use crate::pipeline::{ActionDispatcher, ActionPipeline, Cache, OrchestrationSink};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<ActionPipeline>,
    pub jwt_secret: Arc<String>,
}

impl AppState {
    pub fn new(pipeline: ActionPipeline, jwt_secret: impl Into<String>) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            jwt_secret: Arc::new(jwt_secret.into()),
        }
    }
}

pub fn router(state: AppState, config: &AppConfig) -> Router {
    let api = Router::new()
        .route("/api/:endpoint", post(handlers::action_ops))
        .route_layer(middleware::from_fn_with_state(state.clone(), identity_middleware));

    Router::new()
        // Public
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        // Action endpoints, one per domain
        .merge(api)
        // Body limit from config replaces axum's default
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(config.api.max_request_size_bytes))
        // Global middleware
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(config))
                .layer(TimeoutLayer::new(Duration::from_secs(config.api.request_timeout_secs))),
        )
        .with_state(state)
}

fn cors_layer(config: &AppConfig) -> CorsLayer {
    if !config.security.enable_cors {
        return CorsLayer::new();
    }

    let origins: Vec<HeaderValue> = config
        .security
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin '{}'", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

/// Pipeline deadline: four fifths of the outer request deadline, leaving the
/// remainder for the sink to settle before the timeout layer answers
pub fn pipeline_deadline(api: &ApiConfig) -> Duration {
    Duration::from_secs(api.request_timeout_secs) * 4 / 5
}

/// Wire the network collaborators named in the configuration
pub fn build_state(config: &AppConfig, cache: Arc<dyn Cache>) -> anyhow::Result<AppState> {
    let services = &config.services;
    let client = reqwest::Client::builder()
        .user_agent(concat!("action-gateway/", env!("CARGO_PKG_VERSION")))
        .timeout(Duration::from_secs(services.timeout_secs))
        .build()
        .context("failed to build HTTP client")?;

    let authz = HttpAuthorizationService::new(
        client.clone(),
        base_url(&services.authorization_url).context("invalid authorization service URL")?,
    );
    let fetch = HttpResourceFetch::new(
        client.clone(),
        base_url(&services.resource_url).context("invalid resource service URL")?,
    );
    let domain = HttpDomainService::new(
        client.clone(),
        base_url(&services.domain_url).context("invalid domain service URL")?,
    );
    let events = HttpEventEmitter::new(client, base_url(&services.events_url).context("invalid event service URL")?);

    let sink = OrchestrationSink::new(cache, Arc::new(events), Duration::from_secs(config.cache.ttl_secs));
    let dispatcher = ActionDispatcher::new().with_fallback(Arc::new(domain));
    let pipeline = ActionPipeline::new(Arc::new(fetch), Arc::new(authz), dispatcher, sink)
        .with_deadline(pipeline_deadline(&config.api));

    Ok(AppState::new(pipeline, config.security.jwt_secret.clone()))
}

pub async fn serve(config: &AppConfig, port: Option<u16>) -> anyhow::Result<()> {
    if config.security.jwt_secret.is_empty() {
        anyhow::bail!("JWT_SECRET must be set for the {:?} environment", config.environment);
    }

    let cache = Arc::new(MemoryCache::new());
    let state = build_state(config, cache.clone())?;

    let ttl = Duration::from_secs(config.cache.ttl_secs.max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(ttl);
        loop {
            interval.tick().await;
            cache.purge_expired().await;
        }
    });

    let app = router(state, config);

    let bind_addr = format!("0.0.0.0:{}", port.unwrap_or(config.api.port));
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", bind_addr))?;

    tracing::info!("Action gateway listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
