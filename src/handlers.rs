use axum::{
    body::Bytes,
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;

use crate::cache::CacheAside;
use crate::error::{GatewayError, Result, UpstreamError};
use crate::keys;
use crate::rate_limiter::RateLimiter;
use crate::response::{HealthResponse, StoreStatus};
use crate::store::TtlStore;
use crate::upstream::Upstream;

/// Shared application state
pub type SharedState = Arc<AppState>;

/// Collaborators injected into every handler and the rate-limit middleware
pub struct AppState {
    pub store: Arc<dyn TtlStore>,
    pub upstream: Arc<dyn Upstream>,
    pub rate_limiter: RateLimiter,
    pub cache: CacheAside,
    pub client_ip_header: String,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        store: Arc<dyn TtlStore>,
        upstream: Arc<dyn Upstream>,
        rate_limiter: RateLimiter,
        cache: CacheAside,
        client_ip_header: impl Into<String>,
    ) -> Self {
        Self {
            store,
            upstream,
            rate_limiter,
            cache,
            client_ip_header: client_ip_header.into(),
            started_at: Instant::now(),
        }
    }
}

/// The two cached endpoints differ only in field, key namespace and upstream call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    Chat,
    Images,
}

impl Endpoint {
    pub fn field(self) -> &'static str {
        match self {
            Endpoint::Chat => "ask",
            Endpoint::Images => "prompt",
        }
    }

    pub fn cache_prefix(self) -> &'static str {
        match self {
            Endpoint::Chat => keys::CHAT_CACHE_PREFIX,
            Endpoint::Images => keys::IMAGES_CACHE_PREFIX,
        }
    }

    fn content_type(self) -> &'static str {
        match self {
            Endpoint::Chat => "text/plain; charset=utf-8",
            Endpoint::Images => "application/json",
        }
    }

    /// Calls upstream and turns its response into the stored representation.
    async fn fetch(self, upstream: &dyn Upstream, text: &str) -> Result<String> {
        match self {
            Endpoint::Chat => completion_text(&upstream.complete(text).await?),
            Endpoint::Images => image_payload(&upstream.generate_images(text).await?),
        }
    }
}

/// Text of the first completion choice
pub fn completion_text(response: &Value) -> Result<String> {
    response
        .pointer("/choices/0/text")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| {
            UpstreamError::Malformed("completion response has no choices[0].text".to_string()).into()
        })
}

/// The whole image generation response, serialized as JSON
pub fn image_payload(response: &Value) -> Result<String> {
    serde_json::to_string(response).map_err(|e| UpstreamError::Malformed(e.to_string()).into())
}

/// Request text taken as-is from a JSON body: strings verbatim, anything
/// else non-null as its JSON text. An absent field, a null, or a body that
/// is not a JSON object all read as empty.
pub fn request_text(body: &[u8], field: &str) -> String {
    let parsed: Value = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(_) => return String::new(),
    };
    match parsed.get(field) {
        Some(Value::String(text)) => text.clone(),
        None | Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Cache-aside flow shared by `/chat` and `/images`
pub async fn serve_cached(
    state: &AppState,
    endpoint: Endpoint,
    body: &[u8],
) -> Result<Response> {
    if !state.upstream.is_configured() {
        return Err(GatewayError::ConfigurationMissing("OPENAI_API_KEY"));
    }

    let text = request_text(body, endpoint.field());
    let key = keys::cache_key(endpoint.cache_prefix(), &text);

    let upstream = state.upstream.as_ref();
    let lookup = state
        .cache
        .get_or_fetch(&key, || endpoint.fetch(upstream, &text))
        .await?;

    if !lookup.is_hit() {
        tracing::info!(endpoint = ?endpoint, text = %text, "cache miss, upstream response stored");
    }

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, endpoint.content_type())],
        lookup.into_value(),
    )
        .into_response())
}

/// POST /chat
pub async fn chat(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Response> {
    serve_cached(&state, Endpoint::Chat, &body).await
}

/// POST /images
pub async fn images(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Response> {
    serve_cached(&state, Endpoint::Images, &body).await
}

/// Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> impl IntoResponse {
    let store = match state.store.ping().await {
        Ok(()) => StoreStatus::reachable(state.store.backend()),
        Err(err) => StoreStatus::unreachable(state.store.backend(), err.to_string()),
    };

    let healthy = store.reachable;
    let body = HealthResponse::new(
        store,
        state.started_at.elapsed().as_secs(),
        state.rate_limiter.policy().clone(),
        state.cache.policy().clone(),
        state.upstream.is_configured(),
    );

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}
