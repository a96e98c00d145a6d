//! External HTTP-purge backend for the cachet HTTP response cache.
//!
//! This backend targets a fleet of HTTP caches (Varnish-style) sitting
//! in front of the application. The application does not store
//! responses itself, so `get` always misses and `put` is a no-op;
//! invalidation is delegated to the fleet with `PURGE` and `BAN`
//! requests.

mod store;

pub use store::{Error, VarnishStore};
