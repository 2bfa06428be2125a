use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::policy::{CachePolicy, RateLimitPolicy};

#[derive(Debug, Serialize)]
pub struct StoreStatus {
    pub backend: &'static str,
    pub reachable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StoreStatus {
    pub fn reachable(backend: &'static str) -> Self {
        Self {
            backend,
            reachable: true,
            error: None,
        }
    }

    pub fn unreachable(backend: &'static str, error: String) -> Self {
        Self {
            backend,
            reachable: false,
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub store: StoreStatus,
    pub upstream_configured: bool,
    pub rate_limit: RateLimitPolicy,
    pub cache: CachePolicy,
}

impl HealthResponse {
    pub fn new(
        store: StoreStatus,
        uptime_seconds: u64,
        rate_limit: RateLimitPolicy,
        cache: CachePolicy,
        upstream_configured: bool,
    ) -> Self {
        let status = if store.reachable { "healthy" } else { "unhealthy" };
        Self {
            status: status.to_string(),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds,
            store,
            upstream_configured,
            rate_limit,
            cache,
        }
    }
}
