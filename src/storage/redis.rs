// src/storage/redis.rs

use async_trait::async_trait;
use futures::future::join_all;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use redis::aio::ConnectionManager;
use redis::cluster::ClusterClient;
use redis::cluster_async::ClusterConnection;
use redis::{Client, Cmd, FromRedisValue, Pipeline, RedisResult};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::{RemoteConfig, MAX_TTL};
use crate::error::{CacheError, Result, StorageError};
use crate::resilience::{ExponentialBackoff, RetryConfig};
use crate::storage::{CacheStore, NodeInfo, NodeRole, RemoteStore};

/// Connection used for single-key commands
#[derive(Clone)]
enum KeyRouter {
    Standalone(ConnectionManager),
    Cluster(ClusterConnection),
}

impl KeyRouter {
    async fn query<T: FromRedisValue>(&self, cmd: &Cmd) -> RedisResult<T> {
        match self {
            KeyRouter::Standalone(conn) => cmd.query_async(&mut conn.clone()).await,
            KeyRouter::Cluster(conn) => cmd.query_async(&mut conn.clone()).await,
        }
    }

    async fn pipeline<T: FromRedisValue>(&self, pipe: &Pipeline) -> RedisResult<T> {
        match self {
            KeyRouter::Standalone(conn) => pipe.query_async(&mut conn.clone()).await,
            KeyRouter::Cluster(conn) => pipe.query_async(&mut conn.clone()).await,
        }
    }
}

/// A primary node with its own connection, used for node-wide commands (SCAN, FLUSHDB)
#[derive(Clone)]
struct RedisNode {
    info: NodeInfo,
    connection: ConnectionManager,
}

/// Remote tier backed by a standalone/replicated Redis deployment or a Redis Cluster.
///
/// Connections multiplex internally, so operations clone a handle instead of taking a lock.
/// Replicas are recorded in the topology but never written to or scanned.
#[derive(Clone)]
pub struct RedisStore {
    router: KeyRouter,
    primaries: Vec<RedisNode>,
    topology: Vec<NodeInfo>,
    config: RemoteConfig,
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("endpoints", &self.config.endpoints)
            .field("cluster", &self.config.cluster)
            .field("instance_name", &self.config.instance_name)
            .field("topology", &self.topology)
            .finish()
    }
}

impl RedisStore {
    /// Connects to the configured endpoints, retrying connection failures `connect_retry` times
    pub async fn connect(config: RemoteConfig) -> Result<Self> {
        if !config.enabled {
            return Err(CacheError::Config("remote tier is disabled".to_string()));
        }

        let attempts = config.connect_retry.max(1);
        let mut backoff = ExponentialBackoff::new(RetryConfig::for_connect(attempts));

        loop {
            let err = match Self::try_connect(&config).await {
                Ok(store) => {
                    info!(
                        endpoints = ?config.endpoints,
                        cluster = config.cluster,
                        primaries = store.primaries.len(),
                        "Connected to Redis"
                    );
                    return Ok(store);
                }
                Err(err) => err,
            };

            if !err.is_connection_failure() {
                return Err(err);
            }
            match backoff.next_backoff() {
                Some(delay) => {
                    warn!(
                        attempt = backoff.attempts(),
                        of = attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %err,
                        "Redis connection attempt failed"
                    );
                    time::sleep(delay).await;
                }
                None => return Err(err),
            }
        }
    }

    async fn try_connect(config: &RemoteConfig) -> Result<Self> {
        if config.cluster {
            Self::connect_cluster(config).await
        } else {
            Self::connect_standalone(config).await
        }
    }

    async fn connect_standalone(config: &RemoteConfig) -> Result<Self> {
        let mut topology = Vec::with_capacity(config.endpoints.len());
        let mut primaries = Vec::new();
        let mut last_error = None;

        for endpoint in &config.endpoints {
            let mut connection =
                match open(endpoint, &config.node_url(endpoint), config.connect_timeout).await {
                    Ok(connection) => connection,
                    Err(err) => {
                        warn!(endpoint = %endpoint, error = %err, "Skipping unreachable Redis endpoint");
                        last_error = Some(err);
                        continue;
                    }
                };

            let replication: String = with_timeout(
                config.sync_timeout,
                "INFO replication",
                redis::cmd("INFO").arg("replication").query_async(&mut connection),
            )
            .await?;
            let info = NodeInfo {
                address: endpoint.clone(),
                role: parse_role(&replication),
            };
            debug!(address = %info.address, role = ?info.role, "Discovered Redis node");

            // A node that does not report its role is written to like a primary
            if info.role != NodeRole::Replica {
                primaries.push(RedisNode {
                    info: info.clone(),
                    connection,
                });
            }
            topology.push(info);
        }

        let Some(first) = primaries.first() else {
            return Err(last_error.unwrap_or_else(|| {
                StorageError::Connection("no primary among the configured endpoints".to_string())
                    .into()
            }));
        };

        Ok(Self {
            router: KeyRouter::Standalone(first.connection.clone()),
            primaries,
            topology,
            config: config.clone(),
        })
    }

    async fn connect_cluster(config: &RemoteConfig) -> Result<Self> {
        let client = ClusterClient::new(config.connection_urls())?;
        let mut connection =
            match time::timeout(config.connect_timeout, client.get_async_connection()).await {
                Ok(result) => result?,
                Err(_) => {
                    return Err(StorageError::Timeout(format!(
                        "connecting to cluster {:?} timed out after {:?}",
                        config.endpoints, config.connect_timeout
                    ))
                    .into())
                }
            };

        let listing: String = with_timeout(
            config.sync_timeout,
            "CLUSTER NODES",
            redis::cmd("CLUSTER").arg("NODES").query_async(&mut connection),
        )
        .await?;
        let topology = parse_cluster_nodes(&listing);

        let mut primaries = Vec::new();
        for info in topology.iter().filter(|n| n.role == NodeRole::Primary) {
            match open(&info.address, &config.node_url(&info.address), config.connect_timeout).await {
                Ok(connection) => primaries.push(RedisNode {
                    info: info.clone(),
                    connection,
                }),
                // Key commands still work through the cluster connection
                Err(err) => warn!(
                    address = %info.address,
                    error = %err,
                    "Cluster primary unreachable; it will be skipped by scans"
                ),
            }
        }

        Ok(Self {
            router: KeyRouter::Cluster(connection),
            primaries,
            topology,
            config: config.clone(),
        })
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.config.instance_name, key)
    }

    fn scoped_pattern(&self, pattern: &str) -> String {
        format!("{}{}", escape_glob(&self.config.instance_name), pattern)
    }

    async fn run<T: FromRedisValue>(&self, what: &str, cmd: &Cmd) -> Result<T> {
        with_timeout(self.config.sync_timeout, what, self.router.query(cmd)).await
    }

    /// Pages of full (prefixed) keys matching `pattern` on one node
    fn scan_pages(&self, node: &RedisNode, pattern: String) -> BoxStream<'static, Result<Vec<String>>> {
        let connection = node.connection.clone();
        let page_size = self.config.scan_page_size;
        let limit = self.config.sync_timeout;

        stream::try_unfold(Some(0u64), move |cursor| {
            let mut connection = connection.clone();
            let pattern = pattern.clone();
            async move {
                let Some(cursor) = cursor else {
                    return Ok(None);
                };
                let (next, keys): (u64, Vec<String>) = with_timeout(
                    limit,
                    "SCAN",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(&pattern)
                        .arg("COUNT")
                        .arg(page_size)
                        .query_async(&mut connection),
                )
                .await?;
                Ok(Some((keys, (next != 0).then_some(next))))
            }
        })
        .boxed()
    }

    async fn remove_on_node(&self, node: &RedisNode, pattern: String) -> Result<u64> {
        let mut pages = self.scan_pages(node, pattern);
        let mut removed = 0u64;

        while let Some(page) = pages.try_next().await? {
            if page.is_empty() {
                continue;
            }
            let mut pipe = redis::pipe();
            for key in &page {
                pipe.cmd("DEL").arg(key);
            }
            let mut connection = node.connection.clone();
            let counts: Vec<u64> = with_timeout(
                self.config.sync_timeout,
                "DEL batch",
                pipe.query_async(&mut connection),
            )
            .await?;
            removed += counts.iter().sum::<u64>();
        }

        debug!(address = %node.info.address, removed, "Removed keys from node");
        Ok(removed)
    }

    async fn flush_all_primaries(&self) -> Result<()> {
        require_primaries(&self.primaries, "FLUSHDB")?;
        let flushes = self.primaries.iter().map(|node| {
            let mut connection = node.connection.clone();
            async move {
                with_timeout::<()>(
                    self.config.sync_timeout,
                    "FLUSHDB",
                    redis::cmd("FLUSHDB").query_async(&mut connection),
                )
                .await
            }
        });

        join_all(flushes).await.into_iter().collect::<Result<Vec<()>>>()?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        self.run("GET", redis::cmd("GET").arg(self.key(key))).await
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        self.run(
            "SET",
            redis::cmd("SET")
                .arg(self.key(key))
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl)),
        )
        .await
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let removed: i64 = self.run("DEL", redis::cmd("DEL").arg(self.key(key))).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let found: i64 = self.run("EXISTS", redis::cmd("EXISTS").arg(self.key(key))).await?;
        Ok(found > 0)
    }

    async fn increment(&self, key: &str, amount: i64, ttl: Option<Duration>) -> Result<i64> {
        let full_key = self.key(key);
        let Some(ttl) = ttl else {
            return self
                .run("INCRBY", redis::cmd("INCRBY").arg(&full_key).arg(amount))
                .await;
        };

        let mut pipe = redis::pipe();
        pipe.cmd("INCRBY")
            .arg(&full_key)
            .arg(amount)
            .cmd("PEXPIRE")
            .arg(&full_key)
            .arg(ttl_millis(ttl))
            .ignore();
        let (value,): (i64,) = with_timeout(
            self.config.sync_timeout,
            "INCRBY",
            self.router.pipeline(&pipe),
        )
        .await?;
        Ok(value)
    }

    async fn get_many(&self, keys: &[String]) -> Result<Vec<Option<Vec<u8>>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        match self.router {
            KeyRouter::Standalone(_) => {
                let full_keys: Vec<String> = keys.iter().map(|key| self.key(key)).collect();
                self.run("MGET", redis::cmd("MGET").arg(&full_keys)).await
            }
            // Keys may live in different slots
            KeyRouter::Cluster(_) => join_all(keys.iter().map(|key| self.get(key)))
                .await
                .into_iter()
                .collect(),
        }
    }

    async fn remove_by_pattern(&self, pattern: &str) -> Result<u64> {
        require_primaries(&self.primaries, "pattern removal")?;
        let scoped = self.scoped_pattern(pattern);
        let results = join_all(
            self.primaries
                .iter()
                .map(|node| self.remove_on_node(node, scoped.clone())),
        )
        .await;

        let mut removed = 0;
        let mut first_error = None;
        for result in results {
            match result {
                Ok(count) => removed += count,
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => {
                warn!(pattern, removed, error = %err, "Pattern removal incomplete");
                Err(err)
            }
            None => Ok(removed),
        }
    }

    async fn clear(&self) -> Result<()> {
        // FLUSHDB would also drop keys of other instances sharing the database
        if self.config.allow_admin && self.config.instance_name.is_empty() {
            return self.flush_all_primaries().await;
        }
        let removed = self.remove_by_pattern("*").await?;
        debug!(removed, "Cleared remote keys by scan");
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for RedisStore {
    async fn ping(&self) -> Result<Duration> {
        let started = Instant::now();
        let reply: String = self.run("PING", &redis::cmd("PING")).await?;
        if reply != "PONG" {
            return Err(StorageError::Command(format!("unexpected PING reply: {}", reply)).into());
        }
        Ok(started.elapsed())
    }

    fn scan_keys<'a>(&'a self, pattern: &'a str) -> BoxStream<'a, Result<String>> {
        let scoped = self.scoped_pattern(pattern);
        let prefix = self.config.instance_name.clone();

        let pages: Vec<_> = self
            .primaries
            .iter()
            .map(|node| self.scan_pages(node, scoped.clone()))
            .collect();

        stream::iter(pages)
            .flatten()
            .map_ok(move |page| {
                let keys: Vec<Result<String>> = page
                    .into_iter()
                    .map(|key| Ok(strip_prefix(&prefix, key)))
                    .collect();
                stream::iter(keys)
            })
            .try_flatten()
            .boxed()
    }

    fn nodes(&self) -> Vec<NodeInfo> {
        self.topology.clone()
    }
}

async fn open(endpoint: &str, url: &str, connect_timeout: Duration) -> Result<ConnectionManager> {
    let client = Client::open(url)?;
    match time::timeout(connect_timeout, ConnectionManager::new(client)).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StorageError::Timeout(format!(
            "connecting to {} timed out after {:?}",
            endpoint, connect_timeout
        ))
        .into()),
    }
}

/// Bounds a command round-trip; an elapsed limit is reported as a timeout
async fn with_timeout<T>(
    limit: Duration,
    what: &str,
    command: impl Future<Output = RedisResult<T>>,
) -> Result<T> {
    match time::timeout(limit, command).await {
        Ok(result) => Ok(result?),
        Err(_) => Err(StorageError::Timeout(format!("{} timed out after {:?}", what, limit)).into()),
    }
}

/// Node-wide commands need at least one connected primary
fn require_primaries<T>(primaries: &[T], operation: &str) -> Result<()> {
    if primaries.is_empty() {
        return Err(StorageError::Connection(format!(
            "{} needs a connected primary node and none is reachable",
            operation
        ))
        .into());
    }
    Ok(())
}

/// Millisecond TTL for `PX`/`PEXPIRE`, within what Redis accepts
fn ttl_millis(ttl: Duration) -> u64 {
    let max = u64::try_from(MAX_TTL.as_millis()).unwrap_or(u64::MAX);
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).clamp(1, max)
}

fn strip_prefix(prefix: &str, key: String) -> String {
    match key.strip_prefix(prefix) {
        Some(rest) => rest.to_string(),
        None => key,
    }
}

/// Escapes glob metacharacters so a key prefix matches literally
fn escape_glob(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Role reported in the `role:` line of `INFO replication`
pub(crate) fn parse_role(info: &str) -> NodeRole {
    info.lines()
        .find_map(|line| line.trim().strip_prefix("role:"))
        .map(|role| match role.trim() {
            "master" => NodeRole::Primary,
            "slave" | "replica" => NodeRole::Replica,
            _ => NodeRole::Unknown,
        })
        .unwrap_or(NodeRole::Unknown)
}

/// Healthy nodes from `CLUSTER NODES` output
pub(crate) fn parse_cluster_nodes(listing: &str) -> Vec<NodeInfo> {
    listing
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() < 3 {
                return None;
            }

            let flags: Vec<&str> = fields[2].split(',').collect();
            if flags
                .iter()
                .any(|flag| matches!(*flag, "fail" | "handshake" | "noaddr"))
            {
                return None;
            }

            // ip:port@cport[,hostname]
            let address = fields[1].split('@').next().unwrap_or_default();
            if address.is_empty() || address.starts_with(':') {
                return None;
            }

            let role = if flags.contains(&"master") {
                NodeRole::Primary
            } else if flags.contains(&"slave") || flags.contains(&"replica") {
                NodeRole::Replica
            } else {
                NodeRole::Unknown
            };

            Some(NodeInfo {
                address: address.to_string(),
                role,
            })
        })
        .collect()
}
