//! Tower integration for the cachet HTTP response cache.
//!
//! [`CacheLayer`] wraps an upstream service with request interception,
//! response capture and storage; [`WorkerPool`] runs asynchronous
//! optimization jobs; [`AdminService`] exposes the purge/status/ban
//! endpoints; [`CacheConfiguration`] is the JSON configuration
//! document everything is built from.

pub mod admin;
pub mod body;
pub mod config;
pub mod layer;
pub mod service;
pub mod stats;
pub mod worker;

pub use admin::{AdminService, AdminState};
pub use body::CachedBody;
pub use config::{CacheConfiguration, ConfigError, OptimizationMode};
pub use layer::{CacheLayer, CacheLayerBuilder};
pub use service::CacheService;
pub use stats::{CacheEvent, EventCallback, Stats, StatsSnapshot};
pub use worker::{JobQueue, OptimizationJob, WorkerConfig, WorkerPool};
