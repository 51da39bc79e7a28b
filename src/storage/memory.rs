// src/storage/memory.rs

// In-process tier of the cache.
// Entries live in a shared map and expire lazily on access plus periodically in the background.
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

use crate::config::{LocalStoreConfig, PatternRemoval, MAX_TTL};
use crate::error::{Result, StorageError};
use crate::storage::{glob_match, CacheStore};

type EntryMap = HashMap<String, MemoryEntry>;

/// Entry in the in-memory store
#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Vec<u8>,
    expiry: Option<Instant>,
}

impl MemoryEntry {
    fn is_live(&self, now: Instant) -> bool {
        self.expiry.map_or(true, |expiry| expiry > now)
    }
}

/// Deadline `ttl` after `now`, clamped to `MAX_TTL` where the clock cannot represent it
fn expiry_after(now: Instant, ttl: Duration) -> Option<Instant> {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(ttl.min(MAX_TTL)))
}

/// Aborts the sweeper once the last store handle is gone
#[derive(Debug)]
struct SweeperGuard(JoinHandle<()>);

impl Drop for SweeperGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// In-memory store; cheap to clone, clones share the same entries
#[derive(Debug, Clone)]
pub struct MemoryStore {
    data: Arc<RwLock<EntryMap>>,
    config: LocalStoreConfig,
    _sweeper: Option<Arc<SweeperGuard>>,
}

impl MemoryStore {
    /// Creates a new in-memory store with the given configuration.
    ///
    /// The background sweeper only starts when called inside a Tokio runtime; otherwise
    /// expired entries are still dropped lazily on access.
    pub fn new(config: LocalStoreConfig) -> Self {
        let data = Arc::new(RwLock::new(HashMap::with_capacity(
            config.max_entries.min(10_000),
        )));

        let sweeper = if config.use_background_task {
            Self::spawn_sweeper(Arc::downgrade(&data), config.cleanup_interval)
        } else {
            None
        };

        Self {
            data,
            config,
            _sweeper: sweeper,
        }
    }

    fn spawn_sweeper(data: Weak<RwLock<EntryMap>>, every: Duration) -> Option<Arc<SweeperGuard>> {
        let handle = match Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!("No Tokio runtime; local expiry sweeper disabled");
                return None;
            }
        };

        let task = handle.spawn(async move {
            let mut interval = time::interval(every);
            // First tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                let Some(data) = data.upgrade() else {
                    break;
                };
                let removed = Self::purge_expired(&data);
                if removed > 0 {
                    debug!(removed, "Swept expired local entries");
                }
            }
        });

        Some(Arc::new(SweeperGuard(task)))
    }

    fn read(&self) -> RwLockReadGuard<'_, EntryMap> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, EntryMap> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Removes expired entries, returning how many were dropped
    fn purge_expired(data: &RwLock<EntryMap>) -> usize {
        let now = Instant::now();
        let mut data = data.write().unwrap_or_else(PoisonError::into_inner);
        let before = data.len();
        data.retain(|_, entry| entry.is_live(now));
        before - data.len()
    }

    /// Live value for `key`; an expired entry is removed on the way
    pub fn lookup(&self, key: &str) -> Option<Vec<u8>> {
        let now = Instant::now();
        {
            let data = self.read();
            match data.get(key) {
                Some(entry) if entry.is_live(now) => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        // Expired: re-check under the write lock, a concurrent writer may have refreshed it
        let mut data = self.write();
        if data.get(key).is_some_and(|entry| !entry.is_live(now)) {
            data.remove(key);
        }
        None
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lookup(key).is_some()
    }

    /// Stores `value` with a fresh expiry, enforcing `max_entries` for new keys
    pub fn insert(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut data = self.write();
        Self::ensure_room(&mut data, key, self.config.max_entries)?;

        data.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_vec(),
                expiry: expiry_after(Instant::now(), ttl),
            },
        );
        Ok(())
    }

    fn ensure_room(data: &mut EntryMap, key: &str, max_entries: usize) -> Result<()> {
        if data.contains_key(key) || data.len() < max_entries {
            return Ok(());
        }

        // Make room from expired entries before refusing
        let now = Instant::now();
        data.retain(|_, entry| entry.is_live(now));
        if data.len() < max_entries {
            return Ok(());
        }

        Err(StorageError::Capacity(format!(
            "local store holds the maximum of {} entries",
            max_entries
        ))
        .into())
    }

    pub fn remove(&self, key: &str) -> bool {
        let now = Instant::now();
        self.write()
            .remove(key)
            .is_some_and(|entry| entry.is_live(now))
    }

    /// Counter stored as decimal text so it decodes like any JSON integer
    pub fn add(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        let now = Instant::now();
        let mut data = self.write();

        let live = data.get(key).filter(|entry| entry.is_live(now)).cloned();
        let (current, expiry) = match live {
            Some(entry) => {
                let current = std::str::from_utf8(&entry.value)
                    .ok()
                    .and_then(|text| text.trim().parse::<i64>().ok())
                    .ok_or_else(|| {
                        StorageError::Command(format!("value at '{}' is not an integer", key))
                    })?;
                (current, entry.expiry)
            }
            None => {
                Self::ensure_room(&mut data, key, self.config.max_entries)?;
                (0, None)
            }
        };

        let next = current.checked_add(amount).ok_or_else(|| {
            StorageError::Command(format!("increment of '{}' would overflow", key))
        })?;

        data.insert(
            key.to_string(),
            MemoryEntry {
                value: next.to_string().into_bytes(),
                expiry: ttl.and_then(|ttl| expiry_after(now, ttl)).or(expiry),
            },
        );
        Ok(next)
    }

    /// Removes live keys matching the glob `pattern`
    pub fn purge_matching(&self, pattern: &str) -> u64 {
        let now = Instant::now();
        let mut data = self.write();
        let mut removed = 0;
        data.retain(|key, entry| {
            if !glob_match(pattern, key) {
                return true;
            }
            if entry.is_live(now) {
                removed += 1;
            }
            false
        });
        removed
    }

    /// Live keys matching the glob `pattern`
    pub fn keys_matching(&self, pattern: &str) -> Vec<String> {
        let now = Instant::now();
        self.read()
            .iter()
            .filter(|(key, entry)| entry.is_live(now) && glob_match(pattern, key))
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn purge_all(&self) {
        self.write().clear();
    }

    /// Number of held entries, expired ones not yet swept included
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn config(&self) -> &LocalStoreConfig {
        &self.config
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(LocalStoreConfig::default())
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.lookup(key))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.insert(key, value, ttl)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.remove(key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.contains(key))
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        self.add(key, amount, ttl)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        Ok(keys.iter().map(|key| self.lookup(key)).collect())
    }

    async fn remove_by_pattern(&self, pattern: &str) -> Result<u64> {
        match self.config.pattern_removal {
            PatternRemoval::Scan => Ok(self.purge_matching(pattern)),
            PatternRemoval::Unsupported => {
                warn!(
                    pattern,
                    "Pattern removal is not supported by the local store; entries expire by TTL"
                );
                Ok(0)
            }
        }
    }

    async fn clear(&self) -> Result<()> {
        self.purge_all();
        Ok(())
    }
}
