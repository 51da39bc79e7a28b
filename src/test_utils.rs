// src/test_utils.rs

use super::config::{LocalStoreConfig, PatternRemoval};
use super::error::{Result, StorageError};
use super::storage::{CacheStore, MemoryStore, NodeInfo, NodeRole, RemoteStore};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time;

/// In-process stand-in for the remote tier that can simulate outages, slow pings and
/// rejected commands
#[derive(Debug)]
pub struct MockRemoteStore {
    data: MemoryStore,
    down: AtomicBool,
    fail_operations: AtomicBool,
    ping_delay: Mutex<Duration>,
    pings: AtomicUsize,
    operations: AtomicUsize,
}

impl Default for MockRemoteStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRemoteStore {
    pub fn new() -> Self {
        Self {
            data: MemoryStore::new(LocalStoreConfig {
                max_entries: usize::MAX,
                use_background_task: false,
                cleanup_interval: Duration::from_secs(60),
                pattern_removal: PatternRemoval::Scan,
            }),
            down: AtomicBool::new(false),
            fail_operations: AtomicBool::new(false),
            ping_delay: Mutex::new(Duration::ZERO),
            pings: AtomicUsize::new(0),
            operations: AtomicUsize::new(0),
        }
    }

    /// Every command and ping fails with a connection error while down
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Commands fail with a command error (the backend answered but refused)
    pub fn set_fail_operations(&self, fail: bool) {
        self.fail_operations.store(fail, Ordering::SeqCst);
    }

    pub fn set_ping_delay(&self, delay: Duration) {
        *self.ping_delay.lock().unwrap() = delay;
    }

    pub fn ping_count(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Commands attempted, failed ones included; pings are not counted
    pub fn operation_count(&self) -> usize {
        self.operations.load(Ordering::SeqCst)
    }

    /// Reads a value without going through the failure switches
    pub fn raw_get(&self, key: &str) -> Option<Vec<u8>> {
        self.data.lookup(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn check(&self) -> Result<()> {
        self.operations.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("simulated outage".to_string()).into());
        }
        if self.fail_operations.load(Ordering::SeqCst) {
            return Err(StorageError::Command("simulated command failure".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for MockRemoteStore {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.check()?;
        Ok(self.data.lookup(key))
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.check()?;
        self.data.insert(key, value, ttl)
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.data.remove(key))
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        self.check()?;
        Ok(self.data.contains(key))
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        self.check()?;
        self.data.add(key, amount, ttl)
    }

    async fn remove_by_pattern(&self, pattern: &str) -> Result<u64> {
        self.check()?;
        Ok(self.data.purge_matching(pattern))
    }

    async fn clear(&self) -> Result<()> {
        self.check()?;
        self.data.purge_all();
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MockRemoteStore {
    async fn ping(&self) -> Result<Duration> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        let delay = *self.ping_delay.lock().unwrap();
        if !delay.is_zero() {
            time::sleep(delay).await;
        }
        if self.down.load(Ordering::SeqCst) {
            return Err(StorageError::Connection("simulated outage".to_string()).into());
        }
        Ok(delay)
    }

    fn scan_keys<'a>(&'a self, pattern: &'a str) -> BoxStream<'a, Result<String>> {
        match self.check() {
            Ok(()) => stream::iter(self.data.keys_matching(pattern).into_iter().map(Ok)).boxed(),
            Err(err) => stream::once(async move { Err(err) }).boxed(),
        }
    }

    fn nodes(&self) -> Vec<NodeInfo> {
        vec![NodeInfo {
            address: "mock:6379".to_string(),
            role: NodeRole::Primary,
        }]
    }
}
