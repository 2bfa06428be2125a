use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Failures of the TTL key-value store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("value at '{key}' is not an integer counter")]
    NotACounter { key: String },
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(err.to_string())
    }
}

/// Failures talking to the generative-AI service.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream transport error: {0}")]
    Transport(String),
    #[error("upstream request timed out")]
    Timeout,
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

impl UpstreamError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Transport(_) | UpstreamError::Timeout => true,
            UpstreamError::Status { status, .. } => *status == 429 || *status >= 500,
            UpstreamError::Malformed(_) => false,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            UpstreamError::Timeout
        } else if err.is_decode() {
            UpstreamError::Malformed(err.to_string())
        } else {
            UpstreamError::Transport(err.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("missing configuration: {0}")]
    ConfigurationMissing(&'static str),
    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after: Duration },
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::ConfigurationMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::RateLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::Upstream(UpstreamError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Upstream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Plain-text body sent to the caller. Internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            GatewayError::ConfigurationMissing(name) => format!("Please add your {}", name),
            GatewayError::RateLimitExceeded { .. } => "Sorry, too many requests for this IP".to_string(),
            GatewayError::Upstream(UpstreamError::Timeout) => "Upstream service timed out".to_string(),
            GatewayError::Upstream(_) => "Upstream service error".to_string(),
            GatewayError::Store(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, status = %status, "request failed");
        }

        let mut response = (status, self.public_message()).into_response();
        if let GatewayError::RateLimitExceeded { retry_after } = &self {
            let secs = retry_after.as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&secs.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}
