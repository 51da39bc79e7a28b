use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use tokio::time;

use crate::storage::{NodeInfo, RemoteStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    /// PING took longer than the latency budget, or did not answer within it
    Slow,
    Disconnected,
    NotConfigured,
}

/// On-demand health of the remote tier
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub ping_ms: Option<f64>,
    pub threshold_ms: u64,
    pub nodes: Vec<NodeInfo>,
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
}

impl HealthReport {
    /// Pings the remote once, waiting at most `threshold`; never touches the connection monitor
    pub async fn check(remote: Option<&dyn RemoteStore>, threshold: Duration) -> Self {
        let threshold_ms = threshold.as_millis() as u64;
        let Some(remote) = remote else {
            return Self::new(HealthStatus::NotConfigured, None, threshold_ms, Vec::new(), None);
        };

        let nodes = remote.nodes();
        let ping = match time::timeout(threshold, remote.ping()).await {
            Ok(result) => result,
            Err(_) => {
                let error = format!("no PING reply within {}ms", threshold_ms);
                return Self::new(HealthStatus::Slow, None, threshold_ms, nodes, Some(error));
            }
        };
        match ping {
            Ok(latency) => {
                let status = if latency > threshold {
                    HealthStatus::Slow
                } else {
                    HealthStatus::Healthy
                };
                let ping_ms = latency.as_secs_f64() * 1000.0;
                Self::new(status, Some(ping_ms), threshold_ms, nodes, None)
            }
            Err(err) => Self::new(
                HealthStatus::Disconnected,
                None,
                threshold_ms,
                nodes,
                Some(err.to_string()),
            ),
        }
    }

    fn new(
        status: HealthStatus,
        ping_ms: Option<f64>,
        threshold_ms: u64,
        nodes: Vec<NodeInfo>,
        error: Option<String>,
    ) -> Self {
        Self {
            status,
            ping_ms,
            threshold_ms,
            nodes,
            error,
            checked_at: Utc::now(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
