// src/config/mod.rs

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::error::{CacheError, Result};

/// Top-level configuration for the two-tier cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL applied when a caller passes none (or zero)
    #[serde(default = "default_ttl", with = "duration_serde")]
    pub default_ttl: Duration,

    #[serde(default)]
    pub local: LocalStoreConfig,

    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_ttl() -> Duration {
    Duration::from_secs(30 * 60)
}

/// Longest TTL either tier is asked to hold; longer requests are clamped to it
pub const MAX_TTL: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: default_ttl(),
            local: LocalStoreConfig::default(),
            remote: RemoteConfig::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

/// How the local tier handles `remove_by_pattern`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternRemoval {
    /// Linear scan over held keys with glob matching
    Scan,
    /// Logged no-op; matching local entries live until their TTL runs out
    Unsupported,
}

impl FromStr for PatternRemoval {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scan" => Ok(PatternRemoval::Scan),
            "unsupported" | "none" => Ok(PatternRemoval::Unsupported),
            other => Err(CacheError::Config(format!(
                "unknown pattern removal mode '{}'",
                other
            ))),
        }
    }
}

/// Configuration for the in-process tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalStoreConfig {
    /// Maximum number of entries to store
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Whether to use a background task for expiration
    #[serde(default = "default_use_background_task")]
    pub use_background_task: bool,

    /// How often to run the background expiration task
    #[serde(default = "default_cleanup_interval", with = "duration_serde")]
    pub cleanup_interval: Duration,

    #[serde(default = "default_pattern_removal")]
    pub pattern_removal: PatternRemoval,
}

fn default_max_entries() -> usize {
    10_000
}

fn default_use_background_task() -> bool {
    true
}

fn default_cleanup_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_pattern_removal() -> PatternRemoval {
    PatternRemoval::Scan
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            use_background_task: default_use_background_task(),
            cleanup_interval: default_cleanup_interval(),
            pattern_removal: default_pattern_removal(),
        }
    }
}

/// Configuration for the Redis tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// Turn the remote tier off entirely (local tier only)
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `host:port` pairs or full `redis://` URLs
    #[serde(default = "default_endpoints")]
    pub endpoints: Vec<String>,

    /// Treat the endpoints as seeds of a Redis Cluster
    #[serde(default)]
    pub cluster: bool,

    #[serde(default)]
    pub password: Option<String>,

    /// Prefix prepended to every key, for isolating tenants on a shared backend
    #[serde(default)]
    pub instance_name: String,

    #[serde(default = "default_connect_timeout", with = "duration_serde")]
    pub connect_timeout: Duration,

    /// Upper bound for every command round-trip
    #[serde(default = "default_sync_timeout", with = "duration_serde")]
    pub sync_timeout: Duration,

    /// Connection attempts made at startup before giving up
    #[serde(default = "default_connect_retry")]
    pub connect_retry: u32,

    /// Interval of the background keep-alive ping
    #[serde(default = "default_keep_alive", with = "duration_serde")]
    pub keep_alive: Duration,

    /// Fail startup instead of degrading to the local tier
    #[serde(default)]
    pub abort_on_connect_fail: bool,

    /// Allow FLUSHDB on `clear`
    #[serde(default)]
    pub allow_admin: bool,

    #[serde(default)]
    pub ssl: bool,

    #[serde(default)]
    pub default_database: i64,

    /// COUNT hint passed to SCAN
    #[serde(default = "default_scan_page_size")]
    pub scan_page_size: usize,
}

fn default_true() -> bool {
    true
}

fn default_endpoints() -> Vec<String> {
    vec!["localhost:6379".to_string()]
}

fn default_connect_timeout() -> Duration {
    Duration::from_millis(5000)
}

fn default_sync_timeout() -> Duration {
    Duration::from_millis(5000)
}

fn default_connect_retry() -> u32 {
    3
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(60)
}

fn default_scan_page_size() -> usize {
    1000
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoints: default_endpoints(),
            cluster: false,
            password: None,
            instance_name: String::new(),
            connect_timeout: default_connect_timeout(),
            sync_timeout: default_sync_timeout(),
            connect_retry: default_connect_retry(),
            keep_alive: default_keep_alive(),
            abort_on_connect_fail: false,
            allow_admin: false,
            ssl: false,
            default_database: 0,
            scan_page_size: default_scan_page_size(),
        }
    }
}

impl RemoteConfig {
    /// Parses `host:port[,host:port],key=value,...`.
    ///
    /// Tokens without `=` are endpoints. Option names are case-insensitive; times are in
    /// milliseconds except `keepAlive`, which is in seconds.
    pub fn from_connection_string(input: &str) -> Result<Self> {
        let mut config = RemoteConfig {
            endpoints: Vec::new(),
            ..RemoteConfig::default()
        };

        for token in input.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let Some((name, value)) = token.split_once('=') else {
                config.endpoints.push(token.to_string());
                continue;
            };
            let value = value.trim();

            match name.trim().to_ascii_lowercase().as_str() {
                "password" => config.password = Some(value.to_string()),
                "abortconnect" => config.abort_on_connect_fail = parse_value(name, value)?,
                "connectretry" => config.connect_retry = parse_value(name, value)?,
                "connecttimeout" => {
                    config.connect_timeout = Duration::from_millis(parse_value(name, value)?)
                }
                "synctimeout" => {
                    config.sync_timeout = Duration::from_millis(parse_value(name, value)?)
                }
                "keepalive" => config.keep_alive = Duration::from_secs(parse_value(name, value)?),
                "ssl" => config.ssl = parse_value(name, value)?,
                "allowadmin" => config.allow_admin = parse_value(name, value)?,
                "defaultdatabase" => config.default_database = parse_value(name, value)?,
                _ => {
                    return Err(CacheError::Config(format!(
                        "unknown connection string option '{}'",
                        name
                    )))
                }
            }
        }

        if config.endpoints.is_empty() {
            return Err(CacheError::Config(
                "connection string contains no endpoint".to_string(),
            ));
        }

        Ok(config)
    }

    /// Renders the canonical connection string
    pub fn to_connection_string(&self) -> String {
        let mut parts = self.endpoints.clone();

        if let Some(password) = self.password.as_deref().filter(|p| !p.is_empty()) {
            parts.push(format!("password={}", password));
        }
        parts.push(format!("abortConnect={}", self.abort_on_connect_fail));
        parts.push(format!("connectRetry={}", self.connect_retry));
        parts.push(format!("connectTimeout={}", self.connect_timeout.as_millis()));
        parts.push(format!("syncTimeout={}", self.sync_timeout.as_millis()));
        parts.push(format!("keepAlive={}", self.keep_alive.as_secs()));
        if self.ssl {
            parts.push("ssl=true".to_string());
        }
        if self.allow_admin {
            parts.push("allowAdmin=true".to_string());
        }
        parts.push(format!("defaultDatabase={}", self.default_database));

        parts.join(",")
    }

    /// Builds the client URL for one endpoint
    pub fn node_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("redis://") || endpoint.starts_with("rediss://") {
            return endpoint.to_string();
        }

        let scheme = if self.ssl { "rediss" } else { "redis" };
        let auth = match self.password.as_deref().filter(|p| !p.is_empty()) {
            Some(password) => format!(":{}@", password),
            None => String::new(),
        };
        // Cluster nodes only expose database 0
        if self.cluster || self.default_database == 0 {
            format!("{}://{}{}", scheme, auth, endpoint)
        } else {
            format!("{}://{}{}/{}", scheme, auth, endpoint, self.default_database)
        }
    }

    pub fn connection_urls(&self) -> Vec<String> {
        self.endpoints.iter().map(|e| self.node_url(e)).collect()
    }
}

/// Configuration for the connection monitor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Minimum time between two reconnection probes
    #[serde(default = "default_probe_interval", with = "duration_serde")]
    pub probe_interval: Duration,

    /// A probe slower than this counts as a failure
    #[serde(default = "default_latency_budget", with = "duration_serde")]
    pub latency_budget: Duration,

    /// Run a background task pinging the remote every `RemoteConfig::keep_alive`
    #[serde(default = "default_true")]
    pub background_keep_alive: bool,
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_latency_budget() -> Duration {
    Duration::from_millis(1000)
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            probe_interval: default_probe_interval(),
            latency_budget: default_latency_budget(),
            background_keep_alive: true,
        }
    }
}

impl CacheConfig {
    /// Loads the configuration from `CACHE_*` environment variables on top of the defaults
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`CacheConfig::from_env`] with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = CacheConfig::default();

        if let Some(raw) = lookup("CACHE_REDIS_CONFIGURATION") {
            config.remote = RemoteConfig::from_connection_string(&raw)?;
        }

        if let Some(secs) = lookup_parse::<u64, _>(&lookup, "CACHE_DEFAULT_TTL_SECS")? {
            config.default_ttl = Duration::from_secs(secs);
        }
        if let Some(max) = lookup_parse::<usize, _>(&lookup, "CACHE_LOCAL_MAX_ENTRIES")? {
            config.local.max_entries = max;
        }
        if let Some(mode) = lookup_parse::<PatternRemoval, _>(&lookup, "CACHE_LOCAL_PATTERN_REMOVAL")? {
            config.local.pattern_removal = mode;
        }
        if let Some(enabled) = lookup_parse::<bool, _>(&lookup, "CACHE_REDIS_ENABLED")? {
            config.remote.enabled = enabled;
        }
        if let Some(cluster) = lookup_parse::<bool, _>(&lookup, "CACHE_REDIS_CLUSTER")? {
            config.remote.cluster = cluster;
        }
        if let Some(password) = lookup("CACHE_REDIS_PASSWORD") {
            config.remote.password = Some(password);
        }
        if let Some(instance_name) = lookup("CACHE_REDIS_INSTANCE_NAME") {
            config.remote.instance_name = instance_name;
        }
        if let Some(secs) = lookup_parse::<u64, _>(&lookup, "CACHE_MONITOR_PROBE_INTERVAL_SECS")? {
            config.monitor.probe_interval = Duration::from_secs(secs);
        }
        if let Some(ms) = lookup_parse::<u64, _>(&lookup, "CACHE_MONITOR_LATENCY_BUDGET_MS")? {
            config.monitor.latency_budget = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_ttl.is_zero() {
            return Err(CacheError::Config("default_ttl must be positive".to_string()));
        }
        if self.remote.enabled && self.remote.endpoints.is_empty() {
            return Err(CacheError::Config(
                "remote tier is enabled but no endpoint is configured".to_string(),
            ));
        }
        if self.remote.scan_page_size == 0 {
            return Err(CacheError::Config("scan_page_size must be positive".to_string()));
        }
        if self.monitor.probe_interval.is_zero() {
            return Err(CacheError::Config("probe_interval must be positive".to_string()));
        }
        if self.remote.cluster && self.remote.default_database != 0 {
            return Err(CacheError::Config(
                "cluster mode only supports database 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_value<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| {
        CacheError::Config(format!("invalid value '{}' for option '{}'", value, name))
    })
}

fn lookup_parse<T, F>(lookup: &F, name: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| parse_value(name, raw.trim()))
        .transpose()
}

// Helper module to serialize/deserialize Duration with serde
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
