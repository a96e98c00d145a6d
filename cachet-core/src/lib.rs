//! # cachet-core
//!
//! Core types and traits for the cachet HTTP response cache.
//!
//! This crate provides the foundational abstractions shared by every
//! backend and by the middleware crate:
//!
//! - The per-entry metadata record ([`CacheMeta`]) and its age/expiry
//!   queries.
//! - The uniform store contract ([`CacheStore`]) that the filesystem,
//!   Redis, and HTTP-purge backends implement.
//! - The deterministic request fingerprint and key generator
//!   ([`KeyGenerator`], [`CacheKey`]).
//! - The request and response cacheability predicates
//!   ([`is_request_cacheable`], [`is_response_cacheable`]).

pub mod error;
pub mod key;
pub mod meta;
pub mod policy;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use key::{CacheKey, InvalidKey, KeyGenerator};
pub use meta::{CacheMeta, PRESERVED_HEADERS};
pub use policy::{is_request_cacheable, is_response_cacheable};
pub use store::{empty_reader, read_to_end, reader_from_bytes, BodyReader, CacheStore};
