use std::sync::Arc;

use crate::error::StoreError;
use crate::keys;
use crate::policy::RateLimitPolicy;
use crate::store::TtlStore;

/// Outcome of counting one request against a client's window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub count: i64,
    pub remaining: u64,
}

/// Counter-based limiter keyed by client identity
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn TtlStore>,
    policy: RateLimitPolicy,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn TtlStore>, policy: RateLimitPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Count one request from `identity` and decide whether it may proceed.
    ///
    /// The counter is written for every request, including rejected ones.
    pub async fn check(&self, identity: &str) -> Result<RateLimitDecision, StoreError> {
        let key = keys::rate_counter_key(identity);
        let count = self
            .store
            .increment(&key, 1, self.policy.window, self.policy.mode.expiry())
            .await?;

        tracing::info!(
            target: "ai_gateway::rate_limiter",
            identity = %identity,
            count,
            "request counted"
        );

        Ok(RateLimitDecision {
            allowed: !self.policy.is_exceeded(count),
            count,
            remaining: self.policy.remaining(count),
        })
    }
}
