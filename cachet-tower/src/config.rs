//! The JSON configuration document and the builders that wire the
//! store, pipeline, worker, middleware and admin state from it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cachet_core::{CacheStore, StoreError};
use cachet_fs::FsStore;
use cachet_optimizer::{CompressConfig, CompressTransform, MinifyConfig, MinifyTransform, Pipeline};
use cachet_redis::{RedisConfig, RedisStore};
use cachet_varnish::VarnishStore;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::admin::AdminState;
use crate::layer::{CacheLayer, CacheLayerBuilder};
use crate::stats::{EventCallback, Stats};
use crate::worker::JobQueue;

/// When the optimization pipeline runs relative to the cache write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMode {
    /// No optimization.
    #[default]
    Disabled,
    /// The pipeline runs inline before the cache write.
    Sync,
    /// The raw response is cached and a background job re-optimizes it.
    Async,
}

impl OptimizationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OptimizationMode::Disabled => "disabled",
            OptimizationMode::Sync => "sync",
            OptimizationMode::Async => "async",
        }
    }
}

/// Error type for configuration loading and wiring.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("configuration document malformed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid cacheable path pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Varnish(#[from] cachet_varnish::Error),
}

/// Which backend the store is built on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Fs,
    Redis,
    Varnish,
}

/// Filesystem backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FsSettings {
    pub root: PathBuf,
    pub shard_depth: usize,
}

impl Default for FsSettings {
    fn default() -> Self {
        FsSettings {
            root: PathBuf::from("cache"),
            shard_depth: 2,
        }
    }
}

/// Redis backend settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisSettings {
    pub addr: String,
    pub password: String,
    pub db: i64,
}

/// HTTP-purge backend settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VarnishSettings {
    pub endpoints: Vec<String>,
}

/// Optimization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeSettings {
    pub mode: OptimizationMode,
    pub minify_css: bool,
    pub minify_js: bool,
    pub minify_html: bool,
    pub compress_brotli: bool,
    pub compress_gzip: bool,
}

impl Default for OptimizeSettings {
    fn default() -> Self {
        OptimizeSettings {
            mode: OptimizationMode::Disabled,
            minify_css: true,
            minify_js: true,
            minify_html: true,
            // Brotli preferred over gzip.
            compress_brotli: true,
            compress_gzip: false,
        }
    }
}

/// The cache configuration document, loaded at startup from a single
/// JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfiguration {
    pub enabled: bool,
    pub backend: BackendKind,
    pub fs: FsSettings,
    pub redis: RedisSettings,
    pub varnish: VarnishSettings,
    /// Default TTL in seconds; `0` stores entries that never expire.
    pub ttl: u64,
    /// Largest cacheable response body in bytes.
    pub max_cache_size: u64,
    pub optimize: OptimizeSettings,
    /// Regex patterns gating cacheable request paths; empty means no
    /// gate.
    pub cacheable_paths: Vec<String>,
    /// Shared secret for the admin endpoints; empty disables auth.
    pub admin_secret: String,
}

impl Default for CacheConfiguration {
    fn default() -> Self {
        CacheConfiguration {
            enabled: false,
            backend: BackendKind::Fs,
            fs: FsSettings::default(),
            redis: RedisSettings::default(),
            varnish: VarnishSettings::default(),
            ttl: 3600,
            max_cache_size: 100 * 1024 * 1024,
            optimize: OptimizeSettings::default(),
            cacheable_paths: vec![
                r"^/static/.*\.(js|css|jpg|jpeg|png|gif|svg|ico|woff|woff2|ttf|eot)$".to_string(),
            ],
            admin_secret: String::new(),
        }
    }
}

impl CacheConfiguration {
    /// Loads the document, falling back to defaults when the file does
    /// not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        match std::fs::read(path) {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Ok(CacheConfiguration::default())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Persists the document as pretty-printed JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let encoded = serde_json::to_vec_pretty(self)?;
        std::fs::write(path, encoded)?;
        Ok(())
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }

    /// Constructs the configured store backend.
    pub async fn build_store(&self) -> Result<Arc<dyn CacheStore>, ConfigError> {
        match self.backend {
            BackendKind::Fs => {
                let store = FsStore::new(self.fs.root.clone(), self.fs.shard_depth).await?;
                Ok(Arc::new(store))
            }
            BackendKind::Redis => {
                let mut config = RedisConfig::new(self.redis.addr.clone());
                config.password =
                    (!self.redis.password.is_empty()).then(|| self.redis.password.clone());
                config.db = self.redis.db;
                config.max_size = self.max_cache_size;
                Ok(Arc::new(RedisStore::new(config)))
            }
            BackendKind::Varnish => {
                let store = VarnishStore::new(self.varnish.endpoints.clone())?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Constructs the transform pipeline the optimize settings call
    /// for; `None` when optimization is disabled or no transform is
    /// enabled.
    pub fn build_pipeline(&self) -> Option<Arc<Pipeline>> {
        if self.optimize.mode == OptimizationMode::Disabled {
            return None;
        }

        let mut pipeline = Pipeline::new();
        if self.optimize.minify_html || self.optimize.minify_css || self.optimize.minify_js {
            pipeline = pipeline.with_transform(MinifyTransform::new(MinifyConfig {
                html: self.optimize.minify_html,
                css: self.optimize.minify_css,
                js: self.optimize.minify_js,
                ..MinifyConfig::default()
            }));
        }
        // With both codecs enabled brotli runs first and gzip becomes a
        // no-op on already-encoded bodies.
        if self.optimize.compress_brotli {
            pipeline = pipeline.with_transform(CompressTransform::new(CompressConfig::brotli()));
        }
        if self.optimize.compress_gzip {
            pipeline = pipeline.with_transform(CompressTransform::new(CompressConfig::gzip()));
        }

        (!pipeline.is_empty()).then(|| Arc::new(pipeline))
    }

    /// Whether the configuration calls for a background worker pool.
    pub fn needs_worker(&self) -> bool {
        self.enabled && self.optimize.mode == OptimizationMode::Async
    }

    pub fn compile_paths(&self) -> Result<Vec<Regex>, ConfigError> {
        self.cacheable_paths
            .iter()
            .map(|pattern| Regex::new(pattern).map_err(ConfigError::from))
            .collect()
    }

    /// Wires a [`CacheLayer`] from this document and the already-built
    /// collaborators.
    pub fn build_layer(
        &self,
        store: Arc<dyn CacheStore>,
        queue: Option<JobQueue>,
        events: Option<EventCallback>,
    ) -> Result<CacheLayer, ConfigError> {
        let mut builder = CacheLayerBuilder::new()
            .enabled(self.enabled)
            .store(store)
            .cacheable_paths(self.compile_paths()?)
            .default_ttl(self.default_ttl())
            .max_cache_size(self.max_cache_size)
            .mode(self.optimize.mode);
        if let Some(pipeline) = self.build_pipeline() {
            builder = builder.pipeline(pipeline);
        }
        if let Some(queue) = queue {
            builder = builder.queue(queue);
        }
        if let Some(events) = events {
            builder = builder.on_event(move |hostname, event, bytes| events(hostname, event, bytes));
        }
        Ok(builder.build())
    }

    /// State for the admin endpoints, sharing the middleware counters.
    pub fn build_admin(&self, store: Arc<dyn CacheStore>, stats: Arc<Stats>) -> AdminState {
        AdminState {
            enabled: self.enabled,
            store,
            stats,
            mode: self.optimize.mode,
            default_ttl: self.default_ttl(),
            max_cache_size: self.max_cache_size,
            secret: self.admin_secret.clone(),
        }
    }
}
