//! Outbound calls to the generative-AI service.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;

use crate::error::{GatewayError, UpstreamError};
use crate::policy::RetryPolicy;

pub const COMPLETIONS_PATH: &str = "/v1/completions";
pub const IMAGES_PATH: &str = "/v1/images/generations";

const TEMPERATURE: f64 = 0.6;
const MAX_TOKENS: u32 = 1024;
const IMAGE_COUNT: u32 = 2;
const IMAGE_SIZE: &str = "1024x1024";

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    temperature: f64,
    max_tokens: u32,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
    n: u32,
    size: &'a str,
}

/// The generative-AI service as seen by the request handlers
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Whether a credential is available for outbound calls
    fn is_configured(&self) -> bool;

    /// Text completion for `prompt`; returns the raw response document.
    async fn complete(&self, prompt: &str) -> Result<Value, GatewayError>;

    /// Image generation for `prompt`; returns the raw response document.
    async fn generate_images(&self, prompt: &str) -> Result<Value, GatewayError>;
}

pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    retry: RetryPolicy,
}

impl OpenAiClient {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, UpstreamError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            retry,
        })
    }

    async fn post_json<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Value, GatewayError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(GatewayError::ConfigurationMissing("OPENAI_API_KEY"))?;
        let url = format!("{}{}", self.base_url, path);

        let mut attempt = 0;
        loop {
            match self.send_once(&url, api_key, body).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        url = %url,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "upstream call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    async fn send_once<B: Serialize + Sync>(
        &self,
        url: &str,
        api_key: &str,
        body: &B,
    ) -> Result<Value, UpstreamError> {
        let response = self
            .http
            .post(url)
            .bearer_auth(api_key)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UpstreamError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| UpstreamError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl Upstream for OpenAiClient {
    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn complete(&self, prompt: &str) -> Result<Value, GatewayError> {
        let request = CompletionRequest {
            model: &self.model,
            prompt,
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
            stream: false,
        };
        self.post_json(COMPLETIONS_PATH, &request).await
    }

    async fn generate_images(&self, prompt: &str) -> Result<Value, GatewayError> {
        let request = ImageRequest {
            prompt,
            n: IMAGE_COUNT,
            size: IMAGE_SIZE,
        };
        self.post_json(IMAGES_PATH, &request).await
    }
}
