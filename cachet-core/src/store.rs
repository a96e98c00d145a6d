//! The uniform cache store contract.

use std::io::Cursor;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{StoreError, StoreResult};
use crate::key::CacheKey;
use crate::meta::CacheMeta;

/// Streaming body handed across the store boundary.
///
/// Ownership of the reader is ownership of the underlying resource:
/// dropping it releases the file handle or buffer. Stores never
/// interpret body bytes.
pub type BodyReader = Box<dyn AsyncRead + Send + Unpin>;

/// Wraps an in-memory buffer as a [`BodyReader`].
pub fn reader_from_bytes(bytes: Bytes) -> BodyReader {
    Box::new(Cursor::new(bytes))
}

/// A [`BodyReader`] yielding no bytes.
pub fn empty_reader() -> BodyReader {
    Box::new(Cursor::new(Bytes::new()))
}

/// Drains a [`BodyReader`] into memory.
pub async fn read_to_end(mut reader: BodyReader) -> std::io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    reader.read_to_end(&mut buffer).await?;
    Ok(buffer)
}

/// Uniform contract implemented by every cache backend.
///
/// Implementations are safe for concurrent use by many requests and
/// background workers. Per-entry atomicity is the only guarantee:
/// under concurrent writes of the same key a reader observes either
/// the old or the new entry, never a mix, and the last writer wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Retrieves a cached entry.
    ///
    /// Returns `None` when the key is absent or the entry has expired;
    /// expired entries are opportunistically deleted. On `Some`, the
    /// caller owns the reader.
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<(BodyReader, CacheMeta)>>;

    /// Stores an entry, consuming the body reader fully.
    ///
    /// On success the entry is durably observable to subsequent
    /// [`get`](CacheStore::get) calls. On failure no partial entry is
    /// left visible. `meta.size` is recomputed from the bytes actually
    /// written.
    async fn put(&self, key: &CacheKey, body: BodyReader, meta: CacheMeta) -> StoreResult<()>;

    /// Removes an entry. Deleting a missing entry is success.
    async fn delete(&self, key: &CacheKey) -> StoreResult<()>;

    /// Best-effort bulk delete over cache keys: after completion no
    /// entry whose key matches the prefix is returned by `get`.
    async fn purge_prefix(&self, prefix: &str) -> StoreResult<()>;

    /// Bulk invalidation by backend-specific expression.
    ///
    /// Only the HTTP-purge backend implements this; everything else
    /// reports [`StoreError::Unsupported`].
    async fn ban(&self, _expression: &str) -> StoreResult<()> {
        Err(StoreError::Unsupported("ban"))
    }

    /// Whether [`ban`](CacheStore::ban) is available on this backend.
    fn supports_ban(&self) -> bool {
        false
    }

    /// Releases held resources. Behavior of other calls afterwards is
    /// undefined.
    async fn close(&self) -> StoreResult<()>;

    /// Short backend identifier reported by the status endpoint.
    fn name(&self) -> &'static str;
}
