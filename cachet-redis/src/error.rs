//! Redis backend error type.

use cachet_core::StoreError;
use thiserror::Error;

/// Error type for Redis backend operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Error produced by the redis client.
    #[error(transparent)]
    Redis(#[from] redis::RedisError),
}

impl From<Error> for StoreError {
    fn from(error: Error) -> Self {
        StoreError::Backend(Box::new(error))
    }
}
