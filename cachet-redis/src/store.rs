use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use cachet_core::{
    reader_from_bytes, BodyReader, CacheKey, CacheMeta, CacheStore, StoreError, StoreResult,
};
use redis::aio::ConnectionManager;
use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use tokio::io::AsyncReadExt;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::error::Error;

/// Default namespace prefix distinguishing this application's entries.
pub const DEFAULT_PREFIX: &str = "cachet:cache:";

/// Default cap on the size of a single cached body.
pub const DEFAULT_MAX_SIZE: u64 = 10 * 1024 * 1024;

/// TTL applied when the entry metadata carries none.
const FALLBACK_TTL: Duration = Duration::from_secs(3600);

const DATA_SUFFIX: &str = ":data";
const META_SUFFIX: &str = ":meta";
const SCAN_BATCH: usize = 100;

/// Configuration for [`RedisStore`].
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// `host:port` of the Redis server.
    pub addr: String,
    /// Password, if the server requires AUTH.
    pub password: Option<String>,
    /// Logical database index.
    pub db: i64,
    /// Namespace prefix for all cache entries.
    pub prefix: String,
    /// Maximum body size accepted by `put`.
    pub max_size: u64,
}

impl RedisConfig {
    /// Creates a configuration with default prefix and size cap.
    pub fn new(addr: impl Into<String>) -> Self {
        RedisConfig {
            addr: addr.into(),
            password: None,
            db: 0,
            prefix: DEFAULT_PREFIX.to_string(),
            max_size: DEFAULT_MAX_SIZE,
        }
    }
}

/// Redis cache store.
///
/// The connection is established lazily on first use and multiplexed
/// for concurrent access. Reads and writes each use a single pipelined
/// request covering both logical keys of an entry; the two keys are
/// not written transactionally, so readers treat a missing half as
/// not-found.
pub struct RedisStore {
    config: RedisConfig,
    connection: OnceCell<ConnectionManager>,
}

impl RedisStore {
    pub fn new(config: RedisConfig) -> Self {
        RedisStore {
            config,
            connection: OnceCell::new(),
        }
    }

    /// Gets or initializes the shared connection.
    async fn connection(&self) -> Result<&ConnectionManager, Error> {
        self.connection
            .get_or_try_init(|| async {
                let client = redis::Client::open(self.connection_info())?;
                let connection = client.get_connection_manager().await?;
                Ok(connection)
            })
            .await
    }

    fn connection_info(&self) -> ConnectionInfo {
        let (host, port) = match self.config.addr.rsplit_once(':') {
            Some((host, port)) => (host.to_string(), port.parse().unwrap_or(6379)),
            None => (self.config.addr.clone(), 6379),
        };
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(host, port),
            redis: RedisConnectionInfo {
                db: self.config.db,
                password: self.config.password.clone(),
                ..RedisConnectionInfo::default()
            },
        }
    }

    fn data_key(&self, key: &CacheKey) -> String {
        format!("{}{}{DATA_SUFFIX}", self.config.prefix, key)
    }

    fn meta_key(&self, key: &CacheKey) -> String {
        format!("{}{}{META_SUFFIX}", self.config.prefix, key)
    }

    /// TTL pushed down to Redis: the entry TTL, or the fallback when
    /// the entry never expires on its own.
    fn entry_ttl(&self, meta: &CacheMeta) -> u64 {
        meta.effective_ttl().unwrap_or(FALLBACK_TTL).as_secs().max(1)
    }

    /// Recovers the base cache key from a namespaced Redis key.
    fn base_key<'a>(&self, full: &'a str) -> Option<&'a str> {
        let rest = full.strip_prefix(&self.config.prefix)?;
        rest.strip_suffix(DATA_SUFFIX)
            .or_else(|| rest.strip_suffix(META_SUFFIX))
    }

    async fn delete_pair(&self, base: &str) -> StoreResult<()> {
        let mut connection = self.connection().await?.clone();
        let prefix = &self.config.prefix;
        let _: () = redis::pipe()
            .cmd("DEL")
            .arg(format!("{prefix}{base}{DATA_SUFFIX}"))
            .ignore()
            .cmd("DEL")
            .arg(format!("{prefix}{base}{META_SUFFIX}"))
            .ignore()
            .query_async(&mut connection)
            .await
            .map_err(Error::from)?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<(BodyReader, CacheMeta)>> {
        let mut connection = self.connection().await?.clone();

        let (data, meta_raw): (Option<Vec<u8>>, Option<Vec<u8>>) = redis::pipe()
            .cmd("GET")
            .arg(self.data_key(key))
            .cmd("GET")
            .arg(self.meta_key(key))
            .query_async(&mut connection)
            .await
            .map_err(Error::from)?;

        // A missing half means not-found; the leftover half expires on
        // its own TTL.
        let (Some(data), Some(meta_raw)) = (data, meta_raw) else {
            return Ok(None);
        };

        let meta: CacheMeta = serde_json::from_slice(&meta_raw)?;
        if meta.is_expired() {
            if let Err(err) = self.delete(key).await {
                warn!(key = %key, error = %err, "failed to delete expired entry");
            }
            return Ok(None);
        }

        Ok(Some((reader_from_bytes(Bytes::from(data)), meta)))
    }

    async fn put(&self, key: &CacheKey, body: BodyReader, mut meta: CacheMeta) -> StoreResult<()> {
        let mut data = Vec::new();
        body.take(self.config.max_size + 1)
            .read_to_end(&mut data)
            .await?;
        if data.len() as u64 > self.config.max_size {
            return Err(StoreError::EntryTooLarge {
                size: data.len() as u64,
                max: self.config.max_size,
            });
        }

        meta.size = data.len() as u64;
        let meta_raw = serde_json::to_vec(&meta)?;
        let ttl = self.entry_ttl(&meta);

        let mut connection = self.connection().await?.clone();
        let _: () = redis::pipe()
            .cmd("SET")
            .arg(self.data_key(key))
            .arg(data)
            .arg("EX")
            .arg(ttl)
            .ignore()
            .cmd("SET")
            .arg(self.meta_key(key))
            .arg(meta_raw)
            .arg("EX")
            .arg(ttl)
            .ignore()
            .query_async(&mut connection)
            .await
            .map_err(Error::from)?;
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> StoreResult<()> {
        self.delete_pair(key.as_str()).await
    }

    async fn purge_prefix(&self, prefix: &str) -> StoreResult<()> {
        let pattern = format!("{}{}*", self.config.prefix, prefix);
        let mut cursor: u64 = 0;
        loop {
            let mut connection = self.connection().await?.clone();
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut connection)
                .await
                .map_err(Error::from)?;

            let bases: BTreeSet<String> = keys
                .iter()
                .filter_map(|full| self.base_key(full))
                .map(str::to_owned)
                .collect();
            for base in bases {
                self.delete_pair(&base).await?;
            }

            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        // The multiplexed connection is released on drop.
        Ok(())
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
