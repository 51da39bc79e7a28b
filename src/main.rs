use dotenv::dotenv;
use resilient_cache::{init_logging, CacheConfig, ResilientCache};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct Greeting {
    message: String,
    issued_at: chrono::DateTime<chrono::Utc>,
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    init_logging();
    info!("Resilient cache starting up");

    let config = match CacheConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid cache configuration");
            return;
        }
    };
    debug!(endpoints = ?config.remote.endpoints, cluster = config.remote.cluster, "Configuration loaded");

    let cache = match ResilientCache::connect(config).await {
        Ok(cache) => cache,
        Err(e) => {
            error!(error = %e, "Failed to start the cache");
            return;
        }
    };

    let report = cache.health_report().await;
    info!(status = ?report.status, ping_ms = ?report.ping_ms, nodes = report.nodes.len(), "Remote cache health");

    let greeting = Greeting {
        message: "hello from the two-tier cache".to_string(),
        issued_at: chrono::Utc::now(),
    };
    cache
        .set("startup:greeting", &greeting, Some(Duration::from_secs(60)))
        .await;

    match cache.get::<Greeting>("startup:greeting").await {
        Some(read) if read == greeting => info!(
            operation = "startup",
            state = ?cache.connection_state(),
            "Cache round trip succeeded"
        ),
        Some(_) => warn!("Cache returned a different value than the one stored"),
        None => warn!("Cache round trip missed"),
    }

    cache.remove("startup:greeting").await;
    cache.shutdown();
}
