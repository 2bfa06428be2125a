use axum::extract::{ConnectInfo, Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use tracing::{info, Instrument};
use uuid::Uuid;

use crate::error::GatewayError;
use crate::handlers::SharedState;

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Logging middleware for request/response tracking
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!("request", request_id = %request_id);

    async move {
        info!(
            target: "ai_gateway::middleware",
            method = %method,
            uri = %uri,
            "Incoming request"
        );

        let mut response = next.run(request).await;

        let status = response.status();
        info!(
            target: "ai_gateway::middleware",
            method = %method,
            uri = %uri,
            status = %status,
            "Request completed"
        );

        if let Ok(value) = HeaderValue::from_str(&request_id) {
            response.headers_mut().insert(REQUEST_ID_HEADER, value);
        }
        response
    }
    .instrument(span)
    .await
}

/// Counts the request against its client's window and rejects it once the
/// limit is exceeded. Store failures reject the request as well.
pub async fn rate_limit_middleware(
    State(state): State<SharedState>,
    request: Request,
    next: Next,
) -> Response {
    let identity = client_identity(&request, &state.client_ip_header);

    let decision = match state.rate_limiter.check(&identity).await {
        Ok(decision) => decision,
        Err(err) => return GatewayError::from(err).into_response(),
    };

    if !decision.allowed {
        tracing::warn!(identity = %identity, count = decision.count, "rate limit exceeded");
        return GatewayError::RateLimitExceeded {
            retry_after: state.rate_limiter.policy().window,
        }
        .into_response();
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-ratelimit-limit",
        HeaderValue::from(state.rate_limiter.policy().max_requests),
    );
    headers.insert("x-ratelimit-remaining", HeaderValue::from(decision.remaining));
    response
}

/// Client identity used to bucket rate counters: the forwarded address
/// header verbatim, then the peer address, then `unknown`.
pub fn client_identity(request: &Request, header: &str) -> String {
    if let Some(value) = request.headers().get(header) {
        if let Ok(value) = value.to_str() {
            return value.to_string();
        }
    }

    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        addr.ip().to_string()
    } else {
        "unknown".to_string()
    }
}
