//! KV store abstraction
//!
//! The kernel is agnostic about the durable store as long as it offers
//! atomic numeric increment and plain get/set/delete. Production runs
//! against Redis through a connection manager; tests and KV-outage
//! degradation run against the in-memory backend.

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::warn;

use crate::errors::{KernelError, KernelResult};

/// Minimal command set the kernel relies on
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Liveness probe (PING)
    async fn ping(&self) -> KernelResult<()>;

    async fn get(&self, key: &str) -> KernelResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> KernelResult<()>;

    async fn delete(&self, key: &str) -> KernelResult<()>;

    /// Atomic floating-point increment; returns the new value
    async fn incr_by_float(&self, key: &str, delta: f64) -> KernelResult<f64>;

    /// Push to the head of a list and trim it to the most recent `keep`
    async fn lpush_trim(&self, key: &str, value: &str, keep: usize) -> KernelResult<()>;

    /// Publish on a pub/sub channel; returns the receiver count
    async fn publish(&self, channel: &str, payload: &str) -> KernelResult<usize>;

    /// Fetch and parse a float; unparseable values read as absent
    async fn get_f64(&self, key: &str) -> KernelResult<Option<f64>> {
        match self.get(key).await? {
            Some(raw) => match raw.parse::<f64>() {
                Ok(v) => Ok(Some(v)),
                Err(_) => {
                    warn!(key, raw, "non-numeric value where a float was expected");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Fetch and parse an integer; unparseable values read as absent
    async fn get_i64(&self, key: &str) -> KernelResult<Option<i64>> {
        match self.get(key).await? {
            Some(raw) => match raw.parse::<i64>() {
                Ok(v) => Ok(Some(v)),
                Err(_) => {
                    warn!(key, raw, "non-numeric value where an integer was expected");
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }
}

/// Redis-backed store over a reconnecting connection manager
pub struct RedisKv {
    manager: redis::aio::ConnectionManager,
}

impl RedisKv {
    /// Connect to the given Redis URL (e.g. `redis://127.0.0.1:6379`)
    pub async fn connect(url: &str) -> KernelResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| KernelError::Configuration(format!("invalid redis url: {e}")))?;
        let manager = client.get_connection_manager().await?;
        Ok(Self { manager })
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn ping(&self) -> KernelResult<()> {
        let mut conn = self.manager.clone();
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> KernelResult<Option<String>> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET").arg(key).query_async(&mut conn).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> KernelResult<()> {
        let mut conn = self.manager.clone();
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> KernelResult<()> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("DEL").arg(key).query_async(&mut conn).await?;
        Ok(())
    }

    async fn incr_by_float(&self, key: &str, delta: f64) -> KernelResult<f64> {
        let mut conn = self.manager.clone();
        let value: f64 = redis::cmd("INCRBYFLOAT")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await?;
        Ok(value)
    }

    async fn lpush_trim(&self, key: &str, value: &str, keep: usize) -> KernelResult<()> {
        let mut conn = self.manager.clone();
        let _: i64 = redis::cmd("LPUSH")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        let end = keep.saturating_sub(1);
        let _: () = redis::cmd("LTRIM")
            .arg(key)
            .arg(0)
            .arg(end as i64)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> KernelResult<usize> {
        let mut conn = self.manager.clone();
        let receivers: i64 = redis::cmd("PUBLISH")
            .arg(channel)
            .arg(payload)
            .query_async(&mut conn)
            .await?;
        Ok(usize::try_from(receivers).unwrap_or(0))
    }
}

/// In-memory store for tests and KV-outage degradation
///
/// Counters reset on restart. Published messages are retained so tests can
/// assert on emergency signals.
#[derive(Default)]
pub struct MemoryKv {
    entries: RwLock<FxHashMap<String, String>>,
    lists: RwLock<FxHashMap<String, Vec<String>>>,
    published: RwLock<Vec<(String, String)>>,
}

impl MemoryKv {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages published so far as (channel, payload) pairs
    #[must_use]
    pub fn published(&self) -> Vec<(String, String)> {
        self.published.read().clone()
    }

    /// List contents, head first
    #[must_use]
    pub fn list(&self, key: &str) -> Vec<String> {
        self.lists.read().get(key).cloned().unwrap_or_default()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn ping(&self) -> KernelResult<()> {
        Ok(())
    }

    async fn get(&self, key: &str) -> KernelResult<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> KernelResult<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> KernelResult<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    async fn incr_by_float(&self, key: &str, delta: f64) -> KernelResult<f64> {
        let mut entries = self.entries.write();
        let current = entries
            .get(key)
            .and_then(|raw| raw.parse::<f64>().ok())
            .unwrap_or(0.0);
        let next = current + delta;
        entries.insert(key.to_string(), next.to_string());
        Ok(next)
    }

    async fn lpush_trim(&self, key: &str, value: &str, keep: usize) -> KernelResult<()> {
        let mut lists = self.lists.write();
        let list = lists.entry(key.to_string()).or_default();
        list.insert(0, value.to_string());
        list.truncate(keep);
        Ok(())
    }

    async fn publish(&self, channel: &str, payload: &str) -> KernelResult<usize> {
        self.published
            .write()
            .push((channel.to_string(), payload.to_string()));
        Ok(0)
    }
}
