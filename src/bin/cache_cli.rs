// src/bin/cache_cli.rs

use futures::{StreamExt, TryStreamExt};
use prettytable::{row, Table};
use std::path::PathBuf;
use std::time::Duration;
use structopt::StructOpt;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use resilient_cache::{CacheConfig, RemoteConfig, ResilientCache};

#[derive(Debug, StructOpt)]
#[structopt(name = "cache_cli", about = "Inspect and manipulate the two-tier cache")]
struct Opt {
    /// JSON configuration file (defaults to CACHE_* environment variables)
    #[structopt(long, parse(from_os_str))]
    config: Option<PathBuf>,

    /// Redis connection string, e.g. "localhost:6379,password=secret"
    #[structopt(long)]
    redis: Option<String>,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    #[structopt(subcommand)]
    command: Command,
}

#[derive(Debug, StructOpt)]
enum Command {
    /// Print the JSON value stored at a key
    Get { key: String },
    /// Store a value; anything that is not valid JSON is stored as a string
    Set {
        key: String,
        value: String,
        #[structopt(long)]
        ttl_secs: Option<u64>,
    },
    /// Remove a key from both tiers
    Del { key: String },
    Exists { key: String },
    /// Remove every key matching a glob pattern
    RemovePattern { pattern: String },
    /// Flush both tiers
    Clear {
        #[structopt(long)]
        yes: bool,
    },
    /// Add to an integer counter
    Incr {
        key: String,
        #[structopt(default_value = "1")]
        amount: i64,
        #[structopt(long)]
        ttl_secs: Option<u64>,
    },
    /// List keys matching a glob pattern
    Scan {
        pattern: String,
        #[structopt(long, default_value = "100")]
        limit: usize,
    },
    /// Ping the remote tier and show the topology
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = match opt.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "cache_cli={},resilient_cache={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&opt)?;
    let cache = ResilientCache::connect(config).await?;
    info!(state = ?cache.connection_state(), "Cache ready");

    match opt.command {
        Command::Get { key } => match cache.get::<serde_json::Value>(&key).await {
            Some(value) => println!("{}", serde_json::to_string_pretty(&value)?),
            None => println!("(miss)"),
        },
        Command::Set {
            key,
            value,
            ttl_secs,
        } => {
            let value = serde_json::from_str::<serde_json::Value>(&value)
                .unwrap_or(serde_json::Value::String(value));
            cache
                .set(&key, &value, ttl_secs.map(Duration::from_secs))
                .await;
            println!("OK");
        }
        Command::Del { key } => {
            cache.remove(&key).await;
            println!("OK");
        }
        Command::Exists { key } => println!("{}", cache.exists(&key).await),
        Command::RemovePattern { pattern } => {
            cache.remove_by_pattern(&pattern).await;
            println!("OK");
        }
        Command::Clear { yes } => {
            if !yes {
                return Err("clear flushes every primary node; pass --yes to confirm".into());
            }
            cache.clear().await;
            println!("OK");
        }
        Command::Incr {
            key,
            amount,
            ttl_secs,
        } => {
            let value = cache
                .increment(&key, amount, ttl_secs.map(Duration::from_secs))
                .await;
            println!("{}", value);
        }
        Command::Scan { pattern, limit } => scan(&cache, &pattern, limit).await?,
        Command::Health => health(&cache).await?,
    }

    cache.shutdown();
    Ok(())
}

fn load_config(opt: &Opt) -> Result<CacheConfig, Box<dyn std::error::Error>> {
    let mut config = match &opt.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)?;
            serde_json::from_str::<CacheConfig>(&raw)?
        }
        None => CacheConfig::from_env()?,
    };

    if let Some(connection) = &opt.redis {
        config.remote = RemoteConfig::from_connection_string(connection)?;
    }
    // One-shot commands have no use for a keep-alive
    config.monitor.background_keep_alive = false;
    config.local.use_background_task = false;

    config.validate()?;
    Ok(config)
}

async fn scan(cache: &ResilientCache, pattern: &str, limit: usize) -> Result<(), Box<dyn std::error::Error>> {
    let (tier, mut keys) = match cache.remote() {
        Some(remote) => {
            let keys: Vec<String> = remote.scan_keys(pattern).take(limit).try_collect().await?;
            ("remote", keys)
        }
        None => {
            warn!("Remote tier not configured; scanning the local tier");
            let mut keys = cache.local().keys_matching(pattern);
            keys.truncate(limit);
            ("local", keys)
        }
    };
    // SCAN may return a key more than once
    keys.sort();
    keys.dedup();

    let mut table = Table::new();
    table.add_row(row!["#", "Key"]);
    for (index, key) in keys.iter().enumerate() {
        table.add_row(row![index + 1, key]);
    }
    table.printstd();
    println!("{} key(s) from the {} tier", keys.len(), tier);
    Ok(())
}

async fn health(cache: &ResilientCache) -> Result<(), Box<dyn std::error::Error>> {
    let report = cache.health_report().await;
    let snapshot = cache.snapshot().await;

    let mut summary = Table::new();
    summary.add_row(row!["Status", format!("{:?}", report.status)]);
    summary.add_row(row![
        "Ping",
        report
            .ping_ms
            .map(|ms| format!("{:.2} ms", ms))
            .unwrap_or_else(|| "-".to_string())
    ]);
    summary.add_row(row!["Threshold", format!("{} ms", report.threshold_ms)]);
    summary.add_row(row!["Monitor", format!("{:?}", snapshot.state)]);
    summary.add_row(row!["Checked at", report.checked_at.to_rfc3339()]);
    if let Some(error) = &report.error {
        summary.add_row(row!["Error", error]);
    }
    summary.printstd();

    if !report.nodes.is_empty() {
        let mut nodes = Table::new();
        nodes.add_row(row!["Address", "Role"]);
        for node in &report.nodes {
            nodes.add_row(row![node.address, format!("{:?}", node.role)]);
        }
        nodes.printstd();
    }
    Ok(())
}
