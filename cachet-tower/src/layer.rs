//! Cache layer and its builder.

use std::sync::Arc;
use std::time::Duration;

use cachet_core::{CacheStore, KeyGenerator};
use cachet_optimizer::Pipeline;
use regex::Regex;
use tower::Layer;

use crate::config::OptimizationMode;
use crate::service::CacheService;
use crate::stats::{EventCallback, Stats};
use crate::worker::JobQueue;

/// Middleware fallback TTL when none is configured.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Middleware fallback for the largest cacheable response body.
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 10 * 1024 * 1024;

/// Shared, read-only middleware state.
pub(crate) struct Shared {
    pub enabled: bool,
    pub store: Arc<dyn CacheStore>,
    pub key_generator: KeyGenerator,
    /// Empty list means "no path gate": every path passes.
    pub cacheable_paths: Vec<Regex>,
    pub default_ttl: Duration,
    pub max_cache_size: u64,
    pub mode: OptimizationMode,
    pub pipeline: Option<Arc<Pipeline>>,
    pub queue: Option<JobQueue>,
    pub events: Option<EventCallback>,
    pub stats: Arc<Stats>,
}

/// Tower layer wrapping an upstream service with response caching.
#[derive(Clone)]
pub struct CacheLayer {
    shared: Arc<Shared>,
}

impl CacheLayer {
    pub fn builder() -> CacheLayerBuilder {
        CacheLayerBuilder::new()
    }

    /// Counter handle shared with the admin status endpoint.
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.shared.stats)
    }
}

impl<S> Layer<S> for CacheLayer {
    type Service = CacheService<S>;

    fn layer(&self, upstream: S) -> Self::Service {
        CacheService::new(upstream, Arc::clone(&self.shared))
    }
}

/// Builder for [`CacheLayer`].
pub struct CacheLayerBuilder {
    enabled: bool,
    store: Option<Arc<dyn CacheStore>>,
    key_generator: KeyGenerator,
    cacheable_paths: Vec<Regex>,
    default_ttl: Duration,
    max_cache_size: u64,
    mode: OptimizationMode,
    pipeline: Option<Arc<Pipeline>>,
    queue: Option<JobQueue>,
    events: Option<EventCallback>,
}

impl CacheLayerBuilder {
    pub fn new() -> Self {
        CacheLayerBuilder {
            enabled: true,
            store: None,
            key_generator: KeyGenerator::default(),
            cacheable_paths: Vec::new(),
            default_ttl: DEFAULT_TTL,
            max_cache_size: DEFAULT_MAX_CACHE_SIZE,
            mode: OptimizationMode::Disabled,
            pipeline: None,
            queue: None,
            events: None,
        }
    }

    /// Disabled layers delegate every request untouched.
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn key_generator(mut self, key_generator: KeyGenerator) -> Self {
        self.key_generator = key_generator;
        self
    }

    /// Adds a path pattern; when any pattern is present, requests must
    /// match at least one to be cacheable.
    pub fn cacheable_path(mut self, pattern: Regex) -> Self {
        self.cacheable_paths.push(pattern);
        self
    }

    pub fn cacheable_paths(mut self, patterns: Vec<Regex>) -> Self {
        self.cacheable_paths = patterns;
        self
    }

    /// TTL assigned to stored entries; zero stores entries that never
    /// expire.
    pub fn default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn max_cache_size(mut self, bytes: u64) -> Self {
        self.max_cache_size = bytes;
        self
    }

    pub fn mode(mut self, mode: OptimizationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn pipeline(mut self, pipeline: Arc<Pipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn queue(mut self, queue: JobQueue) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn on_event(mut self, callback: impl Fn(&str, crate::CacheEvent, u64) + Send + Sync + 'static) -> Self {
        self.events = Some(Arc::new(callback));
        self
    }

    pub fn build(self) -> CacheLayer {
        CacheLayer {
            shared: Arc::new(Shared {
                enabled: self.enabled,
                store: self.store.expect("a cache store is required"),
                key_generator: self.key_generator,
                cacheable_paths: self.cacheable_paths,
                default_ttl: self.default_ttl,
                max_cache_size: self.max_cache_size,
                mode: self.mode,
                pipeline: self.pipeline,
                queue: self.queue,
                events: self.events,
                stats: Arc::new(Stats::default()),
            }),
        }
    }
}

impl Default for CacheLayerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
