//! Error types for cache operations.
//!
//! Every fallible call in the crate returns [`CacheResult`]. Errors are grouped
//! by [`ErrorKind`] so the driver can decide which of them may be swallowed
//! when it runs with `throw_errors = false`.

use thiserror::Error;

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Broad error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing backend, duplicate shard, invalid option.
    Config,
    /// Identifier or tag rejected by the target backend.
    Validation,
    /// Connection, query or protocol failure in the storage engine.
    Backend,
    /// Payload could not be encoded or decoded.
    Data,
    /// The adapter does not provide an optional primitive.
    Unsupported,
}

/// Cache-specific errors.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid identifier or tag
    #[error("Invalid identifier \"{id}\": {reason}")]
    Validation {
        /// The offending identifier
        id: String,
        /// Why the backend rejects it
        reason: String,
    },

    /// Redis-specific error
    #[cfg(feature = "redis")]
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Memcached-specific error
    #[cfg(feature = "memcached")]
    #[error("Memcached error: {0}")]
    Memcached(#[from] memcache::MemcacheError),

    /// SQL-specific error
    #[cfg(feature = "sqlite")]
    #[error("SQL error: {0}")]
    Sql(#[from] sqlx::Error),

    /// Generic storage engine error
    #[error("Backend error: {0}")]
    Backend(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// Optional adapter primitive not available
    #[error("Operation not supported by {backend}: {operation}")]
    Unsupported {
        /// Adapter name
        backend: &'static str,
        /// Missing primitive
        operation: &'static str,
    },
}

impl CacheError {
    /// Shorthand for a validation error.
    pub fn validation(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Serialization(_) | Self::Deserialization(_) => ErrorKind::Data,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            #[cfg(feature = "redis")]
            Self::Redis(_) => ErrorKind::Backend,
            #[cfg(feature = "memcached")]
            Self::Memcached(_) => ErrorKind::Backend,
            #[cfg(feature = "sqlite")]
            Self::Sql(_) => ErrorKind::Backend,
            Self::Backend(_) => ErrorKind::Backend,
        }
    }

    /// Whether the error may be downgraded to a miss/`false` result.
    ///
    /// Configuration, validation and unsupported-operation errors are
    /// programmer errors and always surface.
    #[must_use]
    pub fn is_degradable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Backend | ErrorKind::Data)
    }
}
