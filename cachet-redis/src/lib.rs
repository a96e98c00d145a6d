//! Redis backend for the cachet HTTP response cache.
//!
//! Every entry is stored as two logical keys under a namespace prefix,
//! `<prefix><key>:data` and `<prefix><key>:meta`, written and read
//! through pipelined commands with the entry TTL enforced natively by
//! Redis.

mod error;
mod store;

pub use error::Error;
pub use store::{RedisConfig, RedisStore, DEFAULT_MAX_SIZE, DEFAULT_PREFIX};
