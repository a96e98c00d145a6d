//! Error types for store operations.

use thiserror::Error;

/// Result alias used by every [`CacheStore`](crate::CacheStore) operation.
pub type StoreResult<T> = Result<T, StoreError>;

/// Error type for cache store operations.
///
/// Backends map their native failures into these variants so the
/// middleware can treat every backend uniformly: any store error is
/// counted and the request falls through to upstream.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Local I/O failure (filesystem backend, body readers).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Failure while talking to a remote backend (Redis, purge endpoints).
    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),

    /// The body exceeds the backend's configured size limit.
    ///
    /// The store guarantees nothing was written when this is returned.
    #[error("entry of {size} bytes exceeds the {max} byte limit")]
    EntryTooLarge { size: u64, max: u64 },

    /// Metadata could not be encoded or decoded.
    #[error("metadata serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The operation is not implemented by this backend.
    #[error("{0} is not supported by this backend")]
    Unsupported(&'static str),
}
