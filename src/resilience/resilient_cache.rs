use futures::future::join_all;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache_op;
use crate::codec::{Codec, JsonCodec};
use crate::config::{CacheConfig, MAX_TTL};
use crate::error::{CacheError, Result};
use crate::resilience::connection_monitor::{ConnectionMonitor, ConnectionSnapshot, ConnectionState};
use crate::resilience::health::HealthReport;
use crate::storage::{CacheStore, MemoryStore, RedisStore, RemoteStore};

/// Two-tier cache that never fails its caller.
///
/// Writes always land in the local tier first and are mirrored to the remote tier while it
/// is available. Reads go to the remote tier while it is available and to the local tier
/// otherwise. Every fault is logged and turned into a miss or a no-op.
///
/// # Architecture
///
/// ```plaintext
/// ┌─────────────┐
/// │   Caller    │
/// └─────────────┘
///        │
///        ▼
/// ┌────────────────┐      ┌───────────────────┐
/// │ ResilientCache │◄────►│ ConnectionMonitor │
/// └────────────────┘      └───────────────────┘
///        │                          │ throttled PING
///        ├──────────────────┐       ▼
///        ▼                  ▼  ┌─────────────┐
/// ┌─────────────┐  while available │ RemoteStore │
/// │ MemoryStore │  ───────────────►│   (Redis)   │
/// └─────────────┘                  └─────────────┘
/// ```
#[derive(Debug, Clone)]
pub struct ResilientCache<C: Codec = JsonCodec> {
    local: MemoryStore,
    monitor: Arc<ConnectionMonitor>,
    codec: C,
    config: CacheConfig,
}

impl ResilientCache<JsonCodec> {
    /// Builds the cache from configuration, connecting to Redis when the remote tier is enabled.
    ///
    /// A failed connection leaves the remote tier not configured (local only) unless
    /// `abort_on_connect_fail` is set, in which case the error is returned.
    pub async fn connect(config: CacheConfig) -> Result<Self> {
        config.validate()?;

        if !config.remote.enabled {
            info!("Remote cache disabled; using local tier only");
            return Ok(Self::local_only(config));
        }

        match RedisStore::connect(config.remote.clone()).await {
            Ok(store) => Ok(Self::with_remote(config, Arc::new(store))),
            Err(err) if config.remote.abort_on_connect_fail => Err(err),
            Err(err) => {
                warn!(
                    error = %err,
                    endpoints = ?config.remote.endpoints,
                    "Remote cache not configured; running on local tier only"
                );
                Ok(Self::local_only(config))
            }
        }
    }

    pub fn local_only(config: CacheConfig) -> Self {
        Self::with_parts(config, None, JsonCodec)
    }

    pub fn with_remote(config: CacheConfig, remote: Arc<dyn RemoteStore>) -> Self {
        Self::with_parts(config, Some(remote), JsonCodec)
    }
}

impl<C: Codec> ResilientCache<C> {
    pub fn with_parts(config: CacheConfig, remote: Option<Arc<dyn RemoteStore>>, codec: C) -> Self {
        let local = MemoryStore::new(config.local.clone());

        let monitor = Arc::new(match remote {
            Some(remote) => ConnectionMonitor::new(remote, config.monitor.clone()),
            None => ConnectionMonitor::not_configured(config.monitor.clone()),
        });
        if config.monitor.background_keep_alive {
            monitor.start_keep_alive(config.remote.keep_alive);
        }

        Self {
            local,
            monitor,
            codec,
            config,
        }
    }

    /// Fetches and decodes `key`; `None` on a miss or any failure
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !valid_key("get", key) {
            return None;
        }
        let started = Instant::now();

        let (tier, bytes) = match self.available_remote().await {
            Some(remote) => match remote.get(key).await {
                // A remote miss is authoritative; the local tier is not consulted
                Ok(bytes) => (remote.name(), bytes),
                Err(err) => {
                    if !self.remote_failed("get", key, &err) {
                        return None;
                    }
                    (self.local.name(), self.local.lookup(key))
                }
            },
            None => (self.local.name(), self.local.lookup(key)),
        };

        let outcome = if bytes.is_some() { "hit" } else { "miss" };
        cache_op!("get", key, tier, outcome, started.elapsed());

        self.decode(key, tier, &bytes?)
    }

    /// Stores `value` in the local tier and, while available, in the remote tier.
    ///
    /// `None` or a zero TTL means `CacheConfig::default_ttl`; anything above `MAX_TTL` is clamped.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        if !valid_key("set", key) {
            return;
        }

        let bytes = match self.codec.encode(value) {
            Ok(bytes) => bytes,
            Err(err) => {
                error!(key, error = %err, "Failed to serialize cache value; nothing stored");
                return;
            }
        };
        let ttl = self.effective_ttl(ttl);
        let started = Instant::now();

        if let Err(err) = self.local.insert(key, &bytes, ttl) {
            error!(key, tier = "local", error = %err, "Local cache write failed");
        }

        let Some(remote) = self.available_remote().await else {
            cache_op!("set", key, "local", "stored", started.elapsed());
            return;
        };
        match remote.set(key, &bytes, ttl).await {
            Ok(()) => cache_op!("set", key, "both", "stored", started.elapsed()),
            // The local write stays in place
            Err(err) => {
                self.remote_failed("set", key, &err);
            }
        }
    }

    pub async fn remove(&self, key: &str) {
        if !valid_key("remove", key) {
            return;
        }
        let started = Instant::now();
        self.local.remove(key);

        if let Some(remote) = self.available_remote().await {
            if let Err(err) = remote.delete(key).await {
                self.remote_failed("remove", key, &err);
                return;
            }
        }
        cache_op!("remove", key, "all", "removed", started.elapsed());
    }

    /// Removes every key matching the glob `pattern` from both tiers
    pub async fn remove_by_pattern(&self, pattern: &str) {
        if !valid_key("remove_by_pattern", pattern) {
            return;
        }

        let local_removed = match self.local.remove_by_pattern(pattern).await {
            Ok(count) => count,
            Err(err) => {
                error!(pattern, tier = "local", error = %err, "Local pattern removal failed");
                0
            }
        };

        let remote_removed = match self.available_remote().await {
            Some(remote) => match remote.remove_by_pattern(pattern).await {
                Ok(count) => Some(count),
                Err(err) => {
                    self.remote_failed("remove_by_pattern", pattern, &err);
                    None
                }
            },
            None => None,
        };

        info!(pattern, local_removed, remote_removed, "Removed cache keys by pattern");
    }

    /// Same tier selection as [`ResilientCache::get`], without decoding
    pub async fn exists(&self, key: &str) -> bool {
        if !valid_key("exists", key) {
            return false;
        }

        match self.available_remote().await {
            Some(remote) => match remote.exists(key).await {
                Ok(found) => found,
                Err(err) => self.remote_failed("exists", key, &err) && self.local.contains(key),
            },
            None => self.local.contains(key),
        }
    }

    /// Empties the local tier and, while available, the remote tier
    pub async fn clear(&self) {
        self.local.purge_all();
        info!("Local cache cleared");

        let Some(remote) = self.available_remote().await else {
            return;
        };
        warn!(
            nodes = ?remote.nodes(),
            "Flushing remote cache on every primary node"
        );
        if let Err(err) = remote.clear().await {
            self.remote_failed("clear", "*", &err);
        }
    }

    /// Fetches several keys at once; every requested key is present in the result
    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[String]) -> HashMap<String, Option<T>> {
        let mut values: HashMap<String, Option<T>> =
            keys.iter().map(|key| (key.clone(), None)).collect();
        let wanted: Vec<String> = keys
            .iter()
            .filter(|key| valid_key("get_many", key))
            .cloned()
            .collect();
        if wanted.is_empty() {
            return values;
        }

        let (tier, found) = match self.available_remote().await {
            Some(remote) => match remote.get_many(&wanted).await {
                Ok(found) => (remote.name(), found),
                Err(err) => {
                    if !self.remote_failed("get_many", &wanted.join(","), &err) {
                        return values;
                    }
                    (self.local.name(), self.local_many(&wanted))
                }
            },
            None => (self.local.name(), self.local_many(&wanted)),
        };

        for (key, bytes) in wanted.into_iter().zip(found) {
            let value = bytes.and_then(|bytes| self.decode(&key, tier, &bytes));
            values.insert(key, value);
        }
        values
    }

    /// Adds `amount` to the counter at `key`, returning the new value; 0 on failure.
    ///
    /// Counts on the remote tier while it is available and on the local tier otherwise;
    /// the two tiers are not reconciled.
    pub async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>) -> i64 {
        if !valid_key("increment", key) {
            return 0;
        }
        let ttl = ttl.map(|ttl| ttl.min(MAX_TTL));

        if let Some(remote) = self.available_remote().await {
            match remote.increment(key, amount, ttl).await {
                Ok(value) => return value,
                Err(err) => {
                    if !self.remote_failed("increment", key, &err) {
                        return 0;
                    }
                }
            }
        }

        match self.local.add(key, amount, ttl) {
            Ok(value) => value,
            Err(err) => {
                error!(key, tier = "local", error = %err, "Local increment failed");
                0
            }
        }
    }

    /// Subtracts `amount` from the counter at `key`; same tier rules as [`ResilientCache::increment`]
    pub async fn decrement(&self, key: &str, amount: i64, ttl: Option<Duration>) -> i64 {
        self.increment(key, amount.saturating_neg(), ttl).await
    }

    /// Stores every entry with the same TTL; each key is handled like [`ResilientCache::set`]
    pub async fn set_many<T: Serialize>(&self, entries: &HashMap<String, T>, ttl: Option<Duration>) {
        join_all(
            entries
                .iter()
                .map(|(key, value)| self.set(key, value, ttl)),
        )
        .await;
    }

    pub async fn remove_many(&self, keys: &[String]) {
        join_all(keys.iter().map(|key| self.remove(key))).await;
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.monitor.state()
    }

    pub async fn snapshot(&self) -> ConnectionSnapshot {
        self.monitor.snapshot().await
    }

    /// Pings the remote tier directly; the monitor state is left untouched
    pub async fn health_report(&self) -> HealthReport {
        HealthReport::check(
            self.monitor.remote().map(|remote| remote.as_ref()),
            self.config.monitor.latency_budget,
        )
        .await
    }

    /// Stops background work; the cache keeps serving afterwards
    pub fn shutdown(&self) {
        self.monitor.stop();
        info!("Resilient cache shut down");
    }

    pub fn local(&self) -> &MemoryStore {
        &self.local
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        self.monitor.remote()
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Operations on this cache that give up when `token` is cancelled
    pub fn with_cancellation(&self, token: CancellationToken) -> ScopedCache<'_, C> {
        ScopedCache {
            cache: self,
            token,
            deadline: None,
        }
    }

    /// Operations on this cache that give up at `deadline`
    pub fn with_deadline(&self, deadline: time::Instant) -> ScopedCache<'_, C> {
        ScopedCache {
            cache: self,
            token: CancellationToken::new(),
            deadline: Some(deadline),
        }
    }

    async fn available_remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        let remote = self.monitor.remote()?;
        self.monitor.is_available().await.then_some(remote)
    }

    /// Logs a remote failure; returns true when it was a connection failure, which also
    /// flips the monitor and means the caller should fall back to the local tier
    fn remote_failed(&self, operation: &str, key: &str, err: &CacheError) -> bool {
        if err.is_connection_failure() {
            warn!(operation, key, error = %err, "Remote cache unreachable; using local tier");
            self.monitor.mark_unavailable(&err.to_string());
            true
        } else {
            error!(operation, key, error = %err, "Remote cache operation failed");
            false
        }
    }

    fn decode<T: DeserializeOwned>(&self, key: &str, tier: &str, bytes: &[u8]) -> Option<T> {
        match self.codec.decode(bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                error!(key, tier, error = %err, "Failed to deserialize cached value");
                None
            }
        }
    }

    fn local_many(&self, keys: &[String]) -> Vec<Option<Vec<u8>>> {
        keys.iter().map(|key| self.local.lookup(key)).collect()
    }

    fn effective_ttl(&self, ttl: Option<Duration>) -> Duration {
        let ttl = match ttl {
            Some(ttl) if !ttl.is_zero() => ttl,
            _ => self.config.default_ttl,
        };
        ttl.min(MAX_TTL)
    }
}

fn valid_key(operation: &str, key: &str) -> bool {
    if key.trim().is_empty() {
        warn!(operation, "Ignoring cache operation with an empty key");
        return false;
    }
    true
}

/// A borrowed view of a [`ResilientCache`] whose operations race a cancellation token and an
/// optional deadline. A cancelled operation yields the same value as a miss or no-op.
#[derive(Debug)]
pub struct ScopedCache<'a, C: Codec = JsonCodec> {
    cache: &'a ResilientCache<C>,
    token: CancellationToken,
    deadline: Option<time::Instant>,
}

impl<'a, C: Codec> ScopedCache<'a, C> {
    /// Adds (or tightens) a deadline
    pub fn with_deadline(mut self, deadline: time::Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    async fn guard<R, F>(&self, operation: &str, fallback: R, work: F) -> R
    where
        F: Future<Output = R>,
    {
        let deadline = async {
            match self.deadline {
                Some(deadline) => time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => {
                debug!(operation, "Cache operation cancelled");
                fallback
            }
            _ = deadline => {
                debug!(operation, "Cache operation deadline reached");
                fallback
            }
            result = work => result,
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.guard("get", None, self.cache.get(key)).await
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        self.guard("set", (), self.cache.set(key, value, ttl)).await
    }

    pub async fn remove(&self, key: &str) {
        self.guard("remove", (), self.cache.remove(key)).await
    }

    pub async fn remove_by_pattern(&self, pattern: &str) {
        self.guard("remove_by_pattern", (), self.cache.remove_by_pattern(pattern))
            .await
    }

    pub async fn exists(&self, key: &str) -> bool {
        self.guard("exists", false, self.cache.exists(key)).await
    }

    pub async fn clear(&self) {
        self.guard("clear", (), self.cache.clear()).await
    }

    pub async fn get_many<T: DeserializeOwned>(&self, keys: &[String]) -> HashMap<String, Option<T>> {
        let misses = keys.iter().map(|key| (key.clone(), None)).collect();
        self.guard("get_many", misses, self.cache.get_many(keys)).await
    }

    pub async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>) -> i64 {
        self.guard("increment", 0, self.cache.increment(key, amount, ttl))
            .await
    }

    pub async fn decrement(&self, key: &str, amount: i64, ttl: Option<Duration>) -> i64 {
        self.guard("decrement", 0, self.cache.decrement(key, amount, ttl))
            .await
    }

    pub async fn set_many<T: Serialize>(&self, entries: &HashMap<String, T>, ttl: Option<Duration>) {
        self.guard("set_many", (), self.cache.set_many(entries, ttl)).await
    }

    pub async fn remove_many(&self, keys: &[String]) {
        self.guard("remove_many", (), self.cache.remove_many(keys)).await
    }
}
