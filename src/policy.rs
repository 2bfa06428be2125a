use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::store::Expiry;

/// How the rate-limit window reacts to new requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum WindowMode {
    /// The window starts at the first request and is never extended.
    Fixed,
    /// Every request pushes the window end out again.
    Sliding,
}

impl WindowMode {
    pub fn expiry(self) -> Expiry {
        match self {
            WindowMode::Fixed => Expiry::OnCreate,
            WindowMode::Sliding => Expiry::Refresh,
        }
    }
}

/// Per-client request throttling rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    pub max_requests: u64,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    pub mode: WindowMode,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
            mode: WindowMode::Fixed,
        }
    }
}

impl RateLimitPolicy {
    pub fn new(max_requests: u64, window: Duration, mode: WindowMode) -> Self {
        Self {
            max_requests,
            window,
            mode,
        }
    }

    /// Requests still allowed in the window after `count` have been seen
    pub fn remaining(&self, count: i64) -> u64 {
        self.max_requests.saturating_sub(count.max(0) as u64)
    }

    pub fn is_exceeded(&self, count: i64) -> bool {
        count > 0 && count as u64 > self.max_requests
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachePolicy {
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
        }
    }
}

/// Bounded retry with exponential backoff for upstream calls
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(with = "humantime_serde")]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (zero based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}
