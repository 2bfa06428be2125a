//! Cache-aside lookups over the shared TTL store.
//!
//! Concurrent misses for the same key are funnelled through a per-key gate:
//! the first caller fetches and writes the store, later callers re-read it
//! once the gate opens.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::Mutex as AsyncMutex;

use crate::error::GatewayError;
use crate::policy::CachePolicy;
use crate::store::TtlStore;

/// Where a value came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Hit(String),
    Miss(String),
}

impl Lookup {
    pub fn into_value(self) -> String {
        match self {
            Lookup::Hit(value) | Lookup::Miss(value) => value,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Lookup::Hit(_))
    }
}

type Gate = Arc<AsyncMutex<()>>;

/// A caller's hold on a key's gate. Dropping it, on completion, error,
/// cancellation or panic, removes the gate once no other caller holds it.
struct GateGuard<'a> {
    in_flight: &'a Mutex<HashMap<String, Gate>>,
    key: &'a str,
    gate: Option<Gate>,
}

impl GateGuard<'_> {
    async fn lock(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        match &self.gate {
            Some(gate) => Some(gate.lock().await),
            None => None,
        }
    }
}

// Gates are cloned and dropped only under the map lock; a count of one means nobody waits.
impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        drop(self.gate.take());
        if in_flight
            .get(self.key)
            .is_some_and(|current| Arc::strong_count(current) == 1)
        {
            in_flight.remove(self.key);
        }
    }
}

pub struct CacheAside {
    store: Arc<dyn TtlStore>,
    policy: CachePolicy,
    in_flight: Mutex<HashMap<String, Gate>>,
}

impl CacheAside {
    pub fn new(store: Arc<dyn TtlStore>, policy: CachePolicy) -> Self {
        Self {
            store,
            policy,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Returns the cached value for `key`, or runs `fetch`, stores its
    /// result with the configured TTL and returns it.
    ///
    /// Failed fetches are never written to the store.
    pub async fn get_or_fetch<F, Fut>(&self, key: &str, fetch: F) -> Result<Lookup, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, GatewayError>>,
    {
        if let Some(value) = self.store.get(key).await? {
            return Ok(Lookup::Hit(value));
        }

        let gate = self.gate(key);
        let _held = gate.lock().await;
        self.fill(key, fetch).await
    }

    async fn fill<F, Fut>(&self, key: &str, fetch: F) -> Result<Lookup, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<String, GatewayError>>,
    {
        if let Some(value) = self.store.get(key).await? {
            return Ok(Lookup::Hit(value));
        }

        let value = fetch().await?;
        self.store.set(key, &value, self.policy.ttl).await?;
        Ok(Lookup::Miss(value))
    }

    fn gate<'a>(&'a self, key: &'a str) -> GateGuard<'a> {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let gate = in_flight.entry(key.to_string()).or_default().clone();
        GateGuard {
            in_flight: &self.in_flight,
            key,
            gate: Some(gate),
        }
    }

    #[cfg(test)]
    fn gates_open(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}
