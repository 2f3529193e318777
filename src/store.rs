//! The remote shared store of record.
//!
//! The core never performs network transport itself; it talks to an
//! injected [`WindowStore`]. The reference implementation is
//! [`RedisStore`], a thin string-keyed GET/SET-with-TTL client over a
//! multiplexed async connection.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;

use crate::error::Result;

/// String-keyed GET/SET-with-TTL against a shared key-value store.
///
/// Values are canonical window encodings (see [`crate::window::Window`]).
/// Implementations must be safe to call from many tasks concurrently.
#[async_trait]
pub trait WindowStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Stores `value` under `key`, expiring after `ttl`.
    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;
}

/// Redis-backed [`WindowStore`].
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
}

impl RedisStore {
    /// Connects to Redis at `url` (e.g. `redis://127.0.0.1/`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let connection = client.get_multiplexed_tokio_connection().await?;
        Ok(Self { connection })
    }

    /// Wraps an already-established connection.
    pub fn from_connection(connection: MultiplexedConnection) -> Self {
        Self { connection }
    }

    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        redis::cmd("PING")
            .query_async::<_, String>(&mut conn)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl WindowStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn put(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let mut conn = self.connection.clone();
        // SETEX takes whole seconds; sub-second TTLs round up to one.
        let seconds = ttl.as_secs().max(1);
        redis::cmd("SETEX")
            .arg(key)
            .arg(seconds)
            .arg(value)
            .query_async::<_, ()>(&mut conn)
            .await?;
        Ok(())
    }
}
