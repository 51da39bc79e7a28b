// for error definitions
use redis;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CacheError {
    /// Errors raised by one of the storage tiers
    #[error("Storage error: {0}")]
    Storage(StorageError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected or internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Storage-specific errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backend is unreachable or the connection dropped mid-operation
    #[error("Connection error: {0}")]
    Connection(String),

    // Redis authentication errors
    #[error("Authentication error: {0}")]
    Auth(String),

    /// The backend did not answer within the configured timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// The backend answered but rejected the command
    #[error("Command error: {0}")]
    Command(String),

    /// Data serialization/deserialization errors
    #[error("Data serialization error: {0}")]
    Serialization(String),

    /// The local tier is full
    #[error("Capacity exceeded: {0}")]
    Capacity(String),
}

/// How the façade reacts to a failed operation.
///
/// Only `ConnectionFailure` flips the connection monitor to unavailable; both kinds are
/// otherwise swallowed and logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    ConnectionFailure,
    OperationFailure,
}

impl CacheError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            CacheError::Storage(
                StorageError::Connection(_) | StorageError::Auth(_) | StorageError::Timeout(_),
            ) => FailureKind::ConnectionFailure,
            _ => FailureKind::OperationFailure,
        }
    }

    pub fn is_connection_failure(&self) -> bool {
        self.failure_kind() == FailureKind::ConnectionFailure
    }
}

impl From<StorageError> for CacheError {
    fn from(err: StorageError) -> Self {
        CacheError::Storage(err)
    }
}

// Implement conversions from redis::RedisError to StorageError
impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            return CacheError::Storage(StorageError::Timeout(err.to_string()));
        }

        if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
            return CacheError::Storage(StorageError::Connection(err.to_string()));
        }

        match err.kind() {
            redis::ErrorKind::AuthenticationFailed => {
                CacheError::Storage(StorageError::Auth(err.to_string()))
            }
            redis::ErrorKind::IoError => CacheError::Storage(StorageError::Connection(err.to_string())),
            redis::ErrorKind::InvalidClientConfig => CacheError::Config(err.to_string()),
            _ => CacheError::Storage(StorageError::Command(err.to_string())),
        }
    }
}

// implement conversions from serde_json::Error to CacheError
impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Storage(StorageError::Serialization(err.to_string()))
    }
}

// define a Result type alias for convenience
pub type Result<T> = std::result::Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kinds() {
        let connection = CacheError::Storage(StorageError::Connection("reset".into()));
        let timeout = CacheError::Storage(StorageError::Timeout("slow".into()));
        let auth = CacheError::Storage(StorageError::Auth("denied".into()));
        let command = CacheError::Storage(StorageError::Command("WRONGTYPE".into()));
        let serialization = CacheError::Storage(StorageError::Serialization("eof".into()));

        assert_eq!(connection.failure_kind(), FailureKind::ConnectionFailure);
        assert_eq!(timeout.failure_kind(), FailureKind::ConnectionFailure);
        assert_eq!(auth.failure_kind(), FailureKind::ConnectionFailure);
        assert_eq!(command.failure_kind(), FailureKind::OperationFailure);
        assert_eq!(serialization.failure_kind(), FailureKind::OperationFailure);
        assert!(!CacheError::Config("bad".into()).is_connection_failure());
    }

    #[test]
    fn test_redis_error_mapping() {
        let io: redis::RedisError =
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused").into();
        assert!(CacheError::from(io).is_connection_failure());

        let response: redis::RedisError =
            (redis::ErrorKind::ResponseError, "WRONGTYPE Operation").into();
        assert!(matches!(
            CacheError::from(response),
            CacheError::Storage(StorageError::Command(_))
        ));

        // A client-side fault is not a transport failure
        let client: redis::RedisError = (redis::ErrorKind::ClientError, "bad argument").into();
        let client = CacheError::from(client);
        assert!(matches!(client, CacheError::Storage(StorageError::Command(_))));
        assert!(!client.is_connection_failure());

        let auth: redis::RedisError = (redis::ErrorKind::AuthenticationFailed, "bad password").into();
        assert!(matches!(
            CacheError::from(auth),
            CacheError::Storage(StorageError::Auth(_))
        ));
    }

    #[test]
    fn test_serde_error_mapping() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        assert!(matches!(
            CacheError::from(err),
            CacheError::Storage(StorageError::Serialization(_))
        ));
    }
}
