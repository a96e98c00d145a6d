//! Cache statistics and the event callback.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

/// Cache lifecycle events emitted synchronously in the request task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvent {
    Hit,
    Miss,
    Put,
    Traffic,
}

impl CacheEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheEvent::Hit => "hit",
            CacheEvent::Miss => "miss",
            CacheEvent::Put => "put",
            CacheEvent::Traffic => "traffic",
        }
    }
}

/// Callback invoked for every cache event: `(hostname, event, bytes)`.
///
/// Bytes is zero for hit/miss, the stored size for put, and the bytes
/// written to the client for traffic.
pub type EventCallback = Arc<dyn Fn(&str, CacheEvent, u64) + Send + Sync>;

#[derive(Debug, Default, Clone, Copy)]
struct Counters {
    hits: u64,
    misses: u64,
    puts: u64,
    errors: u64,
    bypasses: u64,
}

/// Monotonic cache counters behind a single mutex.
///
/// Callers never hold the lock across I/O: every operation is a single
/// increment or a snapshot copy.
#[derive(Debug, Default)]
pub struct Stats {
    inner: Mutex<Counters>,
}

impl Stats {
    fn lock(&self) -> MutexGuard<'_, Counters> {
        // A poisoned lock only means a panic elsewhere; the counters
        // themselves are always valid.
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn record_hit(&self) {
        self.lock().hits += 1;
    }

    pub fn record_miss(&self) {
        self.lock().misses += 1;
    }

    pub fn record_put(&self) {
        self.lock().puts += 1;
    }

    pub fn record_error(&self) {
        self.lock().errors += 1;
    }

    pub fn record_bypass(&self) {
        self.lock().bypasses += 1;
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let counters = *self.lock();
        let lookups = counters.hits + counters.misses;
        let hit_rate = if lookups > 0 {
            counters.hits as f64 / lookups as f64
        } else {
            0.0
        };
        StatsSnapshot {
            hits: counters.hits,
            misses: counters.misses,
            puts: counters.puts,
            errors: counters.errors,
            bypasses: counters.bypasses,
            hit_rate,
        }
    }
}

/// Point-in-time copy of the counters with the derived hit rate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub errors: u64,
    pub bypasses: u64,
    pub hit_rate: f64,
}
