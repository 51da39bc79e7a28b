// library entry
pub mod codec;
pub mod config;
pub mod error;
pub mod logging;
pub mod resilience;
pub mod storage;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

#[cfg(test)]
mod tests;

// Re-export key components for convenience
pub use codec::{Codec, JsonCodec};
pub use config::{CacheConfig, LocalStoreConfig, MonitorConfig, PatternRemoval, RemoteConfig};
pub use error::{CacheError, FailureKind, Result, StorageError};
pub use logging::init as init_logging;
pub use resilience::{
    ConnectionSnapshot, ConnectionState, HealthReport, HealthStatus, ResilientCache, ScopedCache,
};
pub use storage::{CacheStore, MemoryStore, NodeInfo, NodeRole, RedisStore, RemoteStore};
