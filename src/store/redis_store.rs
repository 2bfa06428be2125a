use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{Client, ErrorKind, RedisError, Script};
use std::time::Duration;

use super::{Expiry, TtlStore};
use crate::error::StoreError;

// KEYS[1] counter, ARGV[1] delta, ARGV[2] ttl ms, ARGV[3] "1" to refresh on every call
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCRBY', KEYS[1], ARGV[1])
if ARGV[3] == '1' or redis.call('PTTL', KEYS[1]) < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
end
return count
"#;

/// Redis-backed store shared by every gateway instance.
pub struct RedisStore {
    connection: MultiplexedConnection,
    increment: Script,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Backend(format!("Failed to create Redis client: {}", e)))?;
        let connection = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self {
            connection,
            increment: Script::new(INCREMENT_SCRIPT),
        })
    }
}

// WRONGTYPE, or INCRBY on a non-numeric string; script errors arrive wrapped, so match the text.
fn is_not_a_counter(err: &RedisError) -> bool {
    err.kind() == ErrorKind::TypeError
        || err.code() == Some("WRONGTYPE")
        || err.to_string().contains("not an integer")
}

fn ttl_millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl TtlStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn increment(
        &self,
        key: &str,
        delta: i64,
        ttl: Duration,
        expiry: Expiry,
    ) -> Result<i64, StoreError> {
        let mut conn = self.connection.clone();
        let refresh = if expiry == Expiry::Refresh { "1" } else { "0" };
        let count: i64 = self
            .increment
            .key(key)
            .arg(delta)
            .arg(ttl_millis(ttl))
            .arg(refresh)
            .invoke_async(&mut conn)
            .await
            .map_err(|e| {
                if is_not_a_counter(&e) {
                    StoreError::NotACounter {
                        key: key.to_string(),
                    }
                } else {
                    StoreError::from(e)
                }
            })?;
        Ok(count)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let reply: String = redis::cmd("PING").query_async(&mut conn).await?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Backend(format!("unexpected PING reply: {}", reply)))
        }
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
