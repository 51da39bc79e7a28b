// src/storage/mod.rs

pub mod glob;
pub mod memory;
pub mod redis;

#[cfg(test)]
mod tests;

pub use glob::glob_match;
pub use memory::MemoryStore;
pub use redis::RedisStore;

use super::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use std::fmt::Debug;
use std::time::Duration;

/// Operations shared by the local and the remote tier.
///
/// Values are opaque encoded bytes; the façade owns serialization.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Short tier name used in log events
    fn name(&self) -> &'static str;

    // Retrieves a value by key
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    // Stores a value, replacing any previous entry and its TTL
    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()>;

    // Deletes a key, returning whether it existed
    async fn delete(&self, key: &str) -> Result<bool>;

    // Checks if a key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Atomically adds `amount` to the integer stored at `key` (missing counts as 0).
    /// When `ttl` is given the key expiry is refreshed.
    async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64>;

    /// Fetches several keys, preserving the order of `keys`
    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            values.push(self.get(key).await?);
        }
        Ok(values)
    }

    /// Removes every key matching a glob pattern, returning how many were removed
    async fn remove_by_pattern(&self, pattern: &str) -> Result<u64>;

    // Removes every entry
    async fn clear(&self) -> Result<()>;
}

/// Role of a backend node in a replicated deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Primary,
    Replica,
    Unknown,
}

/// A backend node as seen by the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeInfo {
    pub address: String,
    pub role: NodeRole,
}

/// The shared, networked tier
#[async_trait]
pub trait RemoteStore: CacheStore {
    /// Round-trip latency of a PING; bounded by the store's own command timeout
    async fn ping(&self) -> Result<Duration>;

    /// Lazily yields the keys matching `pattern` on every primary node.
    ///
    /// Each call starts a fresh server-side cursor; the stream ends once every cursor has
    /// wrapped around.
    fn scan_keys<'a>(&'a self, pattern: &'a str) -> BoxStream<'a, Result<String>>;

    /// Known nodes, replicas included
    fn nodes(&self) -> Vec<NodeInfo>;
}
