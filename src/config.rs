use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;
use validator::Validate;

use crate::policy::{CachePolicy, RateLimitPolicy, RetryPolicy, WindowMode};

/// Gateway configuration, read from command-line flags or the environment.
#[derive(Debug, Clone, Parser, Validate)]
#[command(name = "ai-gateway", version, about = "Rate-limited, caching gateway for a generative-AI API")]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:3000")]
    pub bind_addr: SocketAddr,

    /// Log level for the gateway's own targets
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Redis connection URL; empty runs with the in-process store
    #[arg(long, env = "REDIS_URL", default_value = "")]
    pub redis_url: String,

    /// Credential for the upstream API
    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    pub openai_api_key: Option<String>,

    #[arg(long, env = "UPSTREAM_BASE_URL", default_value = "https://api.openai.com")]
    #[validate(url)]
    pub upstream_base_url: String,

    #[arg(long, env = "COMPLETION_MODEL", default_value = "text-davinci-003")]
    #[validate(length(min = 1))]
    pub completion_model: String,

    #[arg(long, env = "UPSTREAM_TIMEOUT_MS", default_value = "30000")]
    #[validate(range(min = 1))]
    pub upstream_timeout_ms: u64,

    #[arg(long, env = "UPSTREAM_MAX_RETRIES", default_value = "2")]
    #[validate(range(max = 10))]
    pub upstream_max_retries: u32,

    #[arg(long, env = "UPSTREAM_RETRY_BACKOFF_MS", default_value = "250")]
    pub upstream_retry_backoff_ms: u64,

    /// Requests allowed per client within one window
    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value = "10")]
    #[validate(range(min = 1))]
    pub rate_limit_max_requests: u64,

    #[arg(long, env = "RATE_LIMIT_WINDOW_MS", default_value = "60000")]
    #[validate(range(min = 1))]
    pub rate_limit_window_ms: u64,

    #[arg(long, env = "RATE_LIMIT_WINDOW_MODE", value_enum, default_value = "fixed")]
    pub rate_limit_window_mode: WindowMode,

    /// Header carrying the forwarded client address
    #[arg(long, env = "CLIENT_IP_HEADER", default_value = "x-real-ip")]
    #[validate(length(min = 1))]
    pub client_ip_header: String,

    #[arg(long, env = "CACHE_TTL_MS", default_value = "60000")]
    #[validate(range(min = 1))]
    pub cache_ttl_ms: u64,

    /// Sweep interval for expired entries in the in-process store
    #[arg(long, env = "CLEANUP_INTERVAL_SECS", default_value = "300")]
    #[validate(range(min = 1))]
    pub cleanup_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self, clap::Error> {
        Config::try_parse_from(["ai-gateway"])
    }

    /// The upstream credential, treating an empty value as absent
    pub fn api_key(&self) -> Option<&str> {
        self.openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }

    pub fn rate_limit_policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(
            self.rate_limit_max_requests,
            Duration::from_millis(self.rate_limit_window_ms),
            self.rate_limit_window_mode,
        )
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            ttl: Duration::from_millis(self.cache_ttl_ms),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.upstream_max_retries,
            base_delay: Duration::from_millis(self.upstream_retry_backoff_ms),
        }
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn uses_redis(&self) -> bool {
        !self.redis_url.trim().is_empty()
    }
}
