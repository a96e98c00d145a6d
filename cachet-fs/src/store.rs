use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use cachet_core::{BodyReader, CacheKey, CacheMeta, CacheStore, StoreResult};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Default number of nested shard directories.
pub const DEFAULT_SHARD_DEPTH: usize = 2;

/// Maximum supported shard depth; deeper requests fall back to the
/// default.
pub const MAX_SHARD_DEPTH: usize = 4;

const DATA_SUFFIX: &str = ".data";
const META_SUFFIX: &str = ".meta";
const TMP_SUFFIX: &str = ".tmp";

/// Sharded on-disk cache store.
///
/// A key `k` at shard depth `D` lives at
/// `root/k[0:2]/k[2:4]/…/k.data` with its metadata next to it in
/// `k.meta`. Depth 0 disables sharding. Keys are hex SHA-256, so
/// sharding fans entries out uniformly across up to `256^D` leaf
/// directories.
///
/// Writes stream the body to a `.tmp` sibling and publish it with a
/// rename; metadata is written (same discipline) before the data
/// rename so a reader that observes the data file always finds valid
/// metadata. There is no in-process locking: atomicity relies on the
/// rename, and the last concurrent writer of a key wins.
pub struct FsStore {
    root: PathBuf,
    shard_depth: usize,
}

impl FsStore {
    /// Opens a store rooted at `root`, creating the directory if
    /// needed. `shard_depth` outside `0..=4` falls back to the
    /// default of 2.
    pub async fn new(root: impl Into<PathBuf>, shard_depth: usize) -> StoreResult<Self> {
        let root = root.into();
        let shard_depth = if shard_depth > MAX_SHARD_DEPTH {
            DEFAULT_SHARD_DEPTH
        } else {
            shard_depth
        };
        tokio::fs::create_dir_all(&root).await?;
        Ok(FsStore { root, shard_depth })
    }

    fn sharded_path(&self, key: &CacheKey, suffix: &str) -> PathBuf {
        let key = key.as_str();
        let mut path = self.root.clone();
        for level in 0..self.shard_depth {
            path.push(&key[level * 2..level * 2 + 2]);
        }
        path.push(format!("{key}{suffix}"));
        path
    }

    fn data_path(&self, key: &CacheKey) -> PathBuf {
        self.sharded_path(key, DATA_SUFFIX)
    }

    fn meta_path(&self, key: &CacheKey) -> PathBuf {
        self.sharded_path(key, META_SUFFIX)
    }

    async fn read_meta(&self, path: &Path) -> StoreResult<CacheMeta> {
        let raw = tokio::fs::read(path).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn write_meta(&self, path: &Path, meta: &CacheMeta) -> StoreResult<()> {
        let encoded = serde_json::to_vec_pretty(meta)?;
        let tmp_path = tmp_sibling(path);
        if let Err(err) = tokio::fs::write(&tmp_path, &encoded).await {
            remove_quietly(&tmp_path).await;
            return Err(err.into());
        }
        if let Err(err) = tokio::fs::rename(&tmp_path, path).await {
            remove_quietly(&tmp_path).await;
            return Err(err.into());
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FsStore {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<(BodyReader, CacheMeta)>> {
        let data_path = self.data_path(key);
        match tokio::fs::metadata(&data_path).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        }

        let meta = self.read_meta(&self.meta_path(key)).await?;
        if meta.is_expired() {
            if let Err(err) = self.delete(key).await {
                warn!(key = %key, error = %err, "failed to delete expired entry");
            }
            return Ok(None);
        }

        let file = tokio::fs::File::open(&data_path).await?;
        Ok(Some((Box::new(file), meta)))
    }

    async fn put(&self, key: &CacheKey, mut body: BodyReader, mut meta: CacheMeta) -> StoreResult<()> {
        let data_path = self.data_path(key);
        if let Some(dir) = data_path.parent() {
            tokio::fs::create_dir_all(dir).await?;
        }

        let tmp_data_path = tmp_sibling(&data_path);
        let mut tmp_file = tokio::fs::File::create(&tmp_data_path).await?;
        let written = match tokio::io::copy(&mut body, &mut tmp_file).await {
            Ok(written) => written,
            Err(err) => {
                drop(tmp_file);
                remove_quietly(&tmp_data_path).await;
                return Err(err.into());
            }
        };
        if let Err(err) = tmp_file.flush().await {
            drop(tmp_file);
            remove_quietly(&tmp_data_path).await;
            return Err(err.into());
        }
        drop(tmp_file);

        meta.size = written;

        // Metadata lands before the data rename: a reader that sees the
        // data file is guaranteed valid metadata next to it.
        if let Err(err) = self.write_meta(&self.meta_path(key), &meta).await {
            remove_quietly(&tmp_data_path).await;
            return Err(err);
        }
        if let Err(err) = tokio::fs::rename(&tmp_data_path, &data_path).await {
            remove_quietly(&tmp_data_path).await;
            return Err(err.into());
        }
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> StoreResult<()> {
        for path in [self.data_path(key), self.meta_path(key)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    async fn purge_prefix(&self, prefix: &str) -> StoreResult<()> {
        // The prefix is matched against recovered cache keys, never
        // against paths. Symlinks are not followed: entries are only
        // discovered through real directories.
        let mut pending = vec![self.root.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(err) => {
                    debug!(dir = %dir.display(), error = %err, "skipping unreadable directory");
                    continue;
                }
            };
            loop {
                let entry = match entries.next_entry().await {
                    Ok(Some(entry)) => entry,
                    Ok(None) => break,
                    Err(err) => {
                        debug!(dir = %dir.display(), error = %err, "directory walk error");
                        break;
                    }
                };
                let Ok(file_type) = entry.file_type().await else {
                    continue;
                };
                if file_type.is_dir() {
                    pending.push(entry.path());
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let path = entry.path();
                if path.extension().and_then(|ext| ext.to_str()) != Some("data") {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
                    continue;
                };
                let Ok(key) = CacheKey::from_hex(stem) else {
                    continue;
                };
                if key.as_str().contains(prefix) {
                    self.delete(&key).await?;
                }
            }
        }
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "fs"
    }
}

fn tmp_sibling(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TMP_SUFFIX);
    PathBuf::from(tmp)
}

async fn remove_quietly(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != ErrorKind::NotFound {
            debug!(path = %path.display(), error = %err, "temp file cleanup failed");
        }
    }
}
