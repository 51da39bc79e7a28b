// src/bin/cache_bench.rs

use indicatif::{ProgressBar, ProgressStyle};
use prettytable::{row, Table};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use structopt::StructOpt;
use tokio::sync::{Barrier, Semaphore};
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use resilient_cache::{CacheConfig, RemoteConfig, ResilientCache};

#[derive(Debug, Clone, StructOpt)]
#[structopt(
    name = "cache_bench",
    about = "A benchmarking tool for the two-tier resilient cache"
)]
struct Opt {
    /// Tier setup to benchmark
    #[structopt(short, long, possible_values = &["local", "redis"], default_value = "local")]
    storage: String,

    /// Redis connection string (when benchmarking with Redis)
    #[structopt(long, default_value = "localhost:6379")]
    redis: String,

    /// Number of distinct keys in the working set
    #[structopt(short, long, default_value = "1000")]
    keys: usize,

    /// Fraction of operations that are reads
    #[structopt(long, default_value = "0.8")]
    read_ratio: f64,

    /// Number of concurrent clients to simulate
    #[structopt(short = "u", long, default_value = "10")]
    num_clients: usize,

    /// Number of operations per client
    #[structopt(short = "r", long, default_value = "1000")]
    ops_per_client: usize,

    /// Number of iterations to run
    #[structopt(short, long, default_value = "3")]
    iterations: usize,

    /// Maximum concurrency level
    #[structopt(short = "c", long, default_value = "100")]
    concurrency: usize,

    /// TTL for written entries in seconds
    #[structopt(long, default_value = "300")]
    ttl_secs: u64,

    /// Verbosity level
    #[structopt(short, long, parse(from_occurrences))]
    verbose: usize,

    /// Disable logs
    #[structopt(long)]
    disable_logs: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct ClientStats {
    reads: u64,
    hits: u64,
    writes: u64,
}

impl ClientStats {
    fn merge(&mut self, other: ClientStats) {
        self.reads += other.reads;
        self.hits += other.hits;
        self.writes += other.writes;
    }

    fn total(&self) -> u64 {
        self.reads + self.writes
    }

    fn hit_rate(&self) -> f64 {
        if self.reads == 0 {
            0.0
        } else {
            100.0 * self.hits as f64 / self.reads as f64
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opt = Opt::from_args();

    let log_level = if opt.disable_logs {
        "error"
    } else {
        match opt.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!(
            "cache_bench={},resilient_cache={}",
            log_level, log_level
        )))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if !(0.0..=1.0).contains(&opt.read_ratio) {
        return Err(format!("read ratio must be within 0..=1, got {}", opt.read_ratio).into());
    }

    let stop = Arc::new(AtomicBool::new(false));
    let stop_handler = stop.clone();
    ctrlc::set_handler(move || {
        stop_handler.store(true, Ordering::SeqCst);
    })?;

    let mut config = CacheConfig::default();
    config.local.max_entries = opt.keys.max(1) * 2;
    let (cache, name) = match opt.storage.as_str() {
        "local" => (ResilientCache::local_only(config), "Local tier only"),
        "redis" => {
            config.remote = RemoteConfig::from_connection_string(&opt.redis)?;
            config.remote.abort_on_connect_fail = true;
            config.remote.instance_name = format!("bench:{}:", uuid::Uuid::new_v4());
            match ResilientCache::connect(config).await {
                Ok(cache) => (cache, "Local + Redis"),
                Err(e) => {
                    error!("Failed to connect to Redis: {}", e);
                    return Err(format!("Failed to connect to Redis: {}", e).into());
                }
            }
        }
        other => return Err(format!("Unknown storage setup: {}", other).into()),
    };

    run_benchmark(cache.clone(), name, opt, stop).await?;

    // Leave nothing behind under the bench prefix
    cache.remove_by_pattern("*").await;
    cache.shutdown();
    Ok(())
}

async fn run_benchmark(
    cache: ResilientCache,
    name: &str,
    opt: Opt,
    stop: Arc<AtomicBool>,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("\nRunning benchmark: {}", name);
    println!("======================={}", "=".repeat(name.len()));

    let cache = Arc::new(cache);
    let ttl = Some(Duration::from_secs(opt.ttl_secs));
    let total_ops = (opt.num_clients * opt.ops_per_client) as u64;

    let mut results = Table::new();
    results.add_row(row!["Iteration", "Duration", "Reads", "Writes", "Hit rate", "Ops/sec"]);

    let mut total_duration = Duration::from_secs(0);
    let mut totals = ClientStats::default();
    let mut completed: u32 = 0;

    for iteration in 0..opt.iterations {
        if stop.load(Ordering::SeqCst) {
            warn!("Interrupted; skipping the remaining iterations");
            break;
        }
        if !opt.disable_logs {
            info!("Starting iteration {} of {}", iteration + 1, opt.iterations);
        }

        // Every iteration starts cold
        cache.clear().await;

        let progress = ProgressBar::new(total_ops);
        progress.set_style(
            ProgressStyle::with_template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        progress.set_message(format!("iteration {}", iteration + 1));

        let start_time = Instant::now();

        let barrier = Arc::new(Barrier::new(opt.num_clients));
        let semaphore = Arc::new(Semaphore::new(opt.concurrency.max(1)));
        let mut handles = Vec::with_capacity(opt.num_clients);

        for _ in 0..opt.num_clients {
            let cache = cache.clone();
            let barrier = barrier.clone();
            let semaphore = semaphore.clone();
            let stop = stop.clone();
            let progress = progress.clone();
            let ops = opt.ops_per_client;
            let keys = opt.keys.max(1);
            let read_ratio = opt.read_ratio;

            let handle = tokio::spawn(async move {
                barrier.wait().await;

                let mut stats = ClientStats::default();
                for _ in 0..ops {
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let Ok(_permit) = semaphore.acquire().await else {
                        break;
                    };

                    let (key_id, is_read) = {
                        let mut rng = rand::rng();
                        (rng.random_range(0..keys), rng.random_bool(read_ratio))
                    };
                    let key = format!("item:{}", key_id);

                    if is_read {
                        stats.reads += 1;
                        if cache.get::<u64>(&key).await.is_some() {
                            stats.hits += 1;
                        }
                    } else {
                        stats.writes += 1;
                        cache.set(&key, &(key_id as u64), ttl).await;
                    }
                    progress.inc(1);
                }
                stats
            });

            handles.push(handle);
        }

        let mut stats = ClientStats::default();
        for result in futures::future::join_all(handles).await {
            match result {
                Ok(client) => stats.merge(client),
                Err(e) => warn!("Benchmark client failed: {}", e),
            }
        }

        let elapsed = start_time.elapsed();
        progress.finish_with_message(format!("iteration {} done", iteration + 1));

        let ops_per_second = stats.total() as f64 / elapsed.as_secs_f64();
        results.add_row(row![
            iteration + 1,
            format!("{:?}", elapsed),
            stats.reads,
            stats.writes,
            format!("{:.1}%", stats.hit_rate()),
            format!("{:.2}", ops_per_second)
        ]);

        total_duration += elapsed;
        totals.merge(stats);
        completed += 1;
    }

    if completed == 0 {
        println!("No iteration completed");
        return Ok(());
    }

    println!();
    results.printstd();

    let avg_duration = total_duration / completed;
    let avg_ops_per_second = totals.total() as f64 / total_duration.as_secs_f64();

    println!("\nBenchmark Results for {}:", name);
    println!("  Total Operations:   {}", totals.total());
    println!("  Reads:              {} ({:.1}% hits)", totals.reads, totals.hit_rate());
    println!("  Writes:             {}", totals.writes);
    println!("  Avg. Duration:      {:?}", avg_duration);
    println!("  Avg. Throughput:    {:.2} operations/second", avg_ops_per_second);
    println!("  Remote state:       {:?}", cache.connection_state());

    Ok(())
}
