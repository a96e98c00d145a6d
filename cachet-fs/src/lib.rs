//! Filesystem backend for the cachet HTTP response cache.
//!
//! Entries are sharded across nested two-character directories derived
//! from the key prefix, with body bytes and metadata in separate
//! `.data` / `.meta` files written through a temp-then-rename
//! discipline.

mod store;

pub use store::{FsStore, DEFAULT_SHARD_DEPTH, MAX_SHARD_DEPTH};
