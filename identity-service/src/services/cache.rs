//! Shared cache seam. Everything transient (rate counters, transient
//! OTP records, OAuth state nonces) lives behind this trait so that all
//! service instances observe the same state and tests can run against
//! the in-memory implementation.

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    /// Set a value with a TTL, replacing any existing value.
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: i64)
        -> Result<(), anyhow::Error>;

    /// Set a value with a TTL only if the key is absent. Returns true if
    /// the value was written. This is the single-use gate for nonces.
    async fn set_nx_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: i64,
    ) -> Result<bool, anyhow::Error>;

    /// Atomically fetch and delete. At most one concurrent caller
    /// observes the value; everyone else gets None.
    async fn get_del(&self, key: &str) -> Result<Option<String>, anyhow::Error>;

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error>;

    /// Atomically increment a counter and arm its window expiry if not
    /// already armed. Returns the post-increment count.
    async fn incr_with_window(
        &self,
        key: &str,
        window_seconds: i64,
    ) -> Result<i64, anyhow::Error>;

    /// Atomically decrement a counter. Returns the post-decrement value.
    async fn decr(&self, key: &str) -> Result<i64, anyhow::Error>;

    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisCache {
    manager: ConnectionManager,
}

impl RedisCache {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!(url = %config.url, "Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // ConnectionManager reconnects automatically.
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self { manager })
    }
}

#[async_trait]
impl Cache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get key: {}", e))
    }

    async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set key: {}", e))
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: i64,
    ) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set key: {}", e))?;
        Ok(reply.is_some())
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GETDEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to consume key: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete key: {}", e))
    }

    async fn incr_with_window(
        &self,
        key: &str,
        window_seconds: i64,
    ) -> Result<i64, anyhow::Error> {
        let mut conn = self.manager.clone();
        // INCR + EXPIRE NX in one atomic transaction: the window is
        // armed exactly once, when the counter is created.
        let (count,): (i64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("EXPIRE")
            .arg(key)
            .arg(window_seconds)
            .arg("NX")
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to increment counter: {}", e))?;
        Ok(count)
    }

    async fn decr(&self, key: &str) -> Result<i64, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DECR")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to decrement counter: {}", e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-memory cache with TTL semantics, for tests.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn deadline(ttl_seconds: i64) -> Option<Instant> {
        u64::try_from(ttl_seconds)
            .ok()
            .map(|s| Instant::now() + Duration::from_secs(s))
    }

    fn live_value(entry: Option<&(String, Option<Instant>)>) -> Option<String> {
        match entry {
            Some((value, deadline)) => {
                if deadline.map_or(true, |d| d > Instant::now()) {
                    Some(value.clone())
                } else {
                    None
                }
            }
            None => None,
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, (String, Option<Instant>)>>, anyhow::Error>
    {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Memory cache mutex poisoned: {}", e))
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let entries = self.lock()?;
        Ok(Self::live_value(entries.get(key)))
    }

    async fn set_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: i64,
    ) -> Result<(), anyhow::Error> {
        let mut entries = self.lock()?;
        entries.insert(
            key.to_string(),
            (value.to_string(), Self::deadline(ttl_seconds)),
        );
        Ok(())
    }

    async fn set_nx_ex(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: i64,
    ) -> Result<bool, anyhow::Error> {
        let mut entries = self.lock()?;
        if Self::live_value(entries.get(key)).is_some() {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            (value.to_string(), Self::deadline(ttl_seconds)),
        );
        Ok(true)
    }

    async fn get_del(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut entries = self.lock()?;
        let value = Self::live_value(entries.get(key));
        entries.remove(key);
        Ok(value)
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut entries = self.lock()?;
        entries.remove(key);
        Ok(())
    }

    async fn incr_with_window(
        &self,
        key: &str,
        window_seconds: i64,
    ) -> Result<i64, anyhow::Error> {
        let mut entries = self.lock()?;
        let live = entries
            .get(key)
            .filter(|(_, d)| d.map_or(true, |d| d > Instant::now()))
            .map(|(v, d)| (v.parse::<i64>().unwrap_or(0), *d));
        // Keep the existing window when the counter is live; arm a new
        // one only on creation.
        let (current, deadline) = match live {
            Some((count, deadline)) => (count, deadline),
            None => (0, Self::deadline(window_seconds)),
        };
        let next = current + 1;
        entries.insert(key.to_string(), (next.to_string(), deadline));
        Ok(next)
    }

    async fn decr(&self, key: &str) -> Result<i64, anyhow::Error> {
        let mut entries = self.lock()?;
        let (current, deadline) = entries
            .get(key)
            .filter(|(_, d)| d.map_or(true, |d| d > Instant::now()))
            .map(|(v, d)| (v.parse::<i64>().unwrap_or(0), *d))
            .unwrap_or((0, None));
        let next = current - 1;
        entries.insert(key.to_string(), (next.to_string(), deadline));
        Ok(next)
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        Ok(())
    }
}
