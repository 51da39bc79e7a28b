use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::storage::RemoteStore;

/// Whether the remote tier may currently be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Available,
    Unavailable,
    /// No remote tier was ever established; behaves like `Unavailable` forever
    NotConfigured,
}

/// Point-in-time view of the monitor, for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_latency: Option<Duration>,
    pub probes: u64,
}

/// Mutated only by the holder of the probe slot
#[derive(Debug, Default)]
struct ProbeRecord {
    last_checked: Option<Instant>,
    last_checked_at: Option<DateTime<Utc>>,
    last_latency: Option<Duration>,
}

/// Tracks remote availability and throttles reconnection probes.
///
/// While unavailable at most one probe runs per `probe_interval`, however many callers ask:
/// the first caller to take the probe slot pings the remote, everyone else reads the cached
/// state.
pub struct ConnectionMonitor {
    remote: Option<Arc<dyn RemoteStore>>,
    available: AtomicBool,
    record: Mutex<ProbeRecord>,
    probes: AtomicU64,
    config: MonitorConfig,
    cancel_flag: Arc<AtomicBool>,
    keep_alive: StdMutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("state", &self.state())
            .field("probes", &self.probe_count())
            .field("config", &self.config)
            .finish()
    }
}

impl ConnectionMonitor {
    /// A connected remote starts out available
    pub fn new(remote: Arc<dyn RemoteStore>, config: MonitorConfig) -> Self {
        Self::build(Some(remote), config)
    }

    pub fn not_configured(config: MonitorConfig) -> Self {
        Self::build(None, config)
    }

    fn build(remote: Option<Arc<dyn RemoteStore>>, config: MonitorConfig) -> Self {
        Self {
            available: AtomicBool::new(remote.is_some()),
            remote,
            record: Mutex::new(ProbeRecord::default()),
            probes: AtomicU64::new(0),
            config,
            cancel_flag: Arc::new(AtomicBool::new(false)),
            keep_alive: StdMutex::new(None),
        }
    }

    pub fn remote(&self) -> Option<&Arc<dyn RemoteStore>> {
        self.remote.as_ref()
    }

    /// Decides whether the remote tier should be used for the next operation
    pub async fn is_available(&self) -> bool {
        let Some(remote) = &self.remote else {
            return false;
        };
        if self.available.load(Ordering::Acquire) {
            return true;
        }

        // Somebody else is probing; report what we know
        let Ok(mut record) = self.record.try_lock() else {
            return self.available.load(Ordering::Acquire);
        };

        // Restored while we were acquiring the slot
        if self.available.load(Ordering::Acquire) {
            return true;
        }
        if let Some(last) = record.last_checked {
            if last.elapsed() < self.config.probe_interval {
                return false;
            }
        }

        self.probe(remote.as_ref(), &mut record).await
    }

    async fn probe(&self, remote: &dyn RemoteStore, record: &mut ProbeRecord) -> bool {
        // Stamped before the ping so a cancelled probe still counts against the interval
        record.last_checked = Some(Instant::now());
        record.last_checked_at = Some(Utc::now());
        self.probes.fetch_add(1, Ordering::Relaxed);

        let budget = self.config.latency_budget;
        match time::timeout(budget, remote.ping()).await {
            Ok(Ok(latency)) if latency < budget => {
                record.last_latency = Some(latency);
                self.available.store(true, Ordering::Release);
                info!(
                    latency_ms = latency.as_secs_f64() * 1000.0,
                    "Remote cache connection restored"
                );
                true
            }
            Ok(Ok(latency)) => {
                record.last_latency = Some(latency);
                warn!(
                    latency_ms = latency.as_secs_f64() * 1000.0,
                    budget_ms = budget.as_millis() as u64,
                    "Remote cache answered too slowly; staying on local tier"
                );
                false
            }
            Ok(Err(err)) => {
                warn!(error = %err, "Remote cache probe failed");
                false
            }
            Err(_) => {
                warn!(
                    budget_ms = budget.as_millis() as u64,
                    "Remote cache probe timed out"
                );
                false
            }
        }
    }

    /// Records a connection failure seen by an operation
    pub fn mark_unavailable(&self, reason: &str) {
        if self.remote.is_none() {
            return;
        }
        if self.available.swap(false, Ordering::AcqRel) {
            warn!(reason, "Remote cache marked unavailable; falling back to local tier");
        }
    }

    pub fn state(&self) -> ConnectionState {
        if self.remote.is_none() {
            ConnectionState::NotConfigured
        } else if self.available.load(Ordering::Acquire) {
            ConnectionState::Available
        } else {
            ConnectionState::Unavailable
        }
    }

    /// Number of reconnection probes run so far
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }

    /// Waits for a running probe to finish before reading the record
    pub async fn snapshot(&self) -> ConnectionSnapshot {
        let record = self.record.lock().await;
        ConnectionSnapshot {
            state: self.state(),
            last_checked_at: record.last_checked_at,
            last_latency: record.last_latency,
            probes: self.probe_count(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Starts the background keep-alive.
    ///
    /// While available it pings every `every` and flips to unavailable on a connection failure
    /// or a ping slower than `latency_budget`; while unavailable it runs the throttled probe.
    /// The task only holds a weak reference and ends once the monitor is dropped or stopped.
    pub fn start_keep_alive(self: &Arc<Self>, every: Duration) {
        if self.remote.is_none() || every.is_zero() {
            return;
        }
        let Ok(handle) = Handle::try_current() else {
            debug!("No Tokio runtime; remote keep-alive disabled");
            return;
        };

        let monitor: Weak<Self> = Arc::downgrade(self);
        let cancel_flag = Arc::clone(&self.cancel_flag);

        let task = handle.spawn(async move {
            let mut interval = time::interval(every);
            interval.tick().await;

            loop {
                interval.tick().await;
                if cancel_flag.load(Ordering::SeqCst) {
                    break;
                }
                let Some(monitor) = monitor.upgrade() else {
                    break;
                };
                monitor.keep_alive_tick().await;
            }

            debug!("Remote keep-alive task stopped");
        });

        let mut slot = self.keep_alive.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(previous) = slot.replace(task) {
            previous.abort();
        }
    }

    async fn keep_alive_tick(&self) {
        let Some(remote) = &self.remote else {
            return;
        };

        if !self.available.load(Ordering::Acquire) {
            self.is_available().await;
            return;
        }

        let budget = self.config.latency_budget;
        match time::timeout(budget, remote.ping()).await {
            Ok(Ok(latency)) => debug!(
                latency_ms = latency.as_secs_f64() * 1000.0,
                "Remote keep-alive ping"
            ),
            Ok(Err(err)) if err.is_connection_failure() => {
                self.mark_unavailable(&err.to_string());
            }
            Ok(Err(err)) => warn!(error = %err, "Remote keep-alive ping rejected"),
            Err(_) => self.mark_unavailable(&format!(
                "keep-alive ping exceeded the {}ms latency budget",
                budget.as_millis()
            )),
        }
    }

    /// Stops the keep-alive task
    pub fn stop(&self) {
        self.cancel_flag.store(true, Ordering::SeqCst);
        let mut slot = self.keep_alive.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = slot.take() {
            task.abort();
        }
    }
}

impl Drop for ConnectionMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
