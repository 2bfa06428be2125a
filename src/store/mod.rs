//! TTL key-value store used for rate counters and cached responses.
//!
//! Two backends implement [`TtlStore`]: Redis for shared deployments and an
//! in-process map for local-only mode and tests.

mod memory;
mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use crate::error::StoreError;
use async_trait::async_trait;
use std::time::Duration;

/// When an increment applies the TTL to a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// TTL is set only when the key is created (fixed window).
    OnCreate,
    /// TTL is reset on every increment (sliding window).
    Refresh,
}

#[async_trait]
pub trait TtlStore: Send + Sync {
    /// Returns the live value for `key`, or `None` when absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Atomically adds `delta` to the counter at `key` and returns the new count.
    /// A missing or expired key starts from zero.
    async fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl: Duration,
        expiry: Expiry,
    ) -> Result<i64, StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    /// Short backend name for diagnostics
    fn backend(&self) -> &'static str;
}
