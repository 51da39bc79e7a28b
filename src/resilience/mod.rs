// src/resilience/mod.rs
//! Failover between the remote and the local tier.
//!
//! - **Connection monitor**: one availability flag for the remote tier, with reconnection
//!   probes throttled to one per interval however many callers ask
//! - **Exponential backoff**: spacing of connection attempts at startup
//! - **Resilient cache**: the façade that routes every operation to the right tier and turns
//!   every fault into a logged miss or no-op
//! - **Health report**: on-demand PING with latency classification

mod connection_monitor;
mod exponential_backoff;
mod health;
mod resilient_cache;

#[cfg(test)]
mod tests;

pub use connection_monitor::{ConnectionMonitor, ConnectionSnapshot, ConnectionState};
pub use exponential_backoff::{ExponentialBackoff, RetryConfig};
pub use health::{HealthReport, HealthStatus};
pub use resilient_cache::{ResilientCache, ScopedCache};
