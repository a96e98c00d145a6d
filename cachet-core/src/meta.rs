//! Per-entry metadata record and its clock-derived queries.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Response headers preserved verbatim on a cached entry and replayed
/// to the client on a hit.
pub const PRESERVED_HEADERS: [&str; 2] = ["Last-Modified", "Vary"];

/// Metadata stored alongside every cached response body.
///
/// One record exists per entry. The record is persisted as UTF-8 JSON
/// wherever a backend stores structured data (the `.meta` file of the
/// filesystem store, the `:meta` key of the Redis store).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheMeta {
    /// MIME type as received from upstream; replayed verbatim on a hit.
    #[serde(default)]
    pub content_type: String,

    /// Content encoding of the stored body: `""`, `"gzip"`, `"br"`, or
    /// `"identity"`. Determines the `Content-Encoding` response header
    /// and whether the compress transform is a no-op.
    #[serde(default)]
    pub encoding: String,

    /// Stored body length in bytes. Recomputed after every transform
    /// and by every store on write.
    #[serde(default)]
    pub size: u64,

    /// Entity tag preserved for replay; empty when upstream sent none.
    #[serde(default)]
    pub etag: String,

    /// HTTP status code of the cached response.
    pub status_code: u16,

    /// Time-to-live. `None` (serialized as `0` seconds) never expires.
    #[serde(with = "ttl_secs")]
    pub ttl: Option<Duration>,

    /// Wall-clock insertion time.
    pub cached_at: DateTime<Utc>,

    /// Additional headers to preserve, minimally `Last-Modified` and
    /// `Vary`.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl CacheMeta {
    /// Creates a record cached now with the given type, status and TTL.
    pub fn new(content_type: impl Into<String>, status_code: u16, ttl: Option<Duration>) -> Self {
        CacheMeta {
            content_type: content_type.into(),
            encoding: String::new(),
            size: 0,
            etag: String::new(),
            status_code,
            ttl,
            cached_at: Utc::now(),
            headers: BTreeMap::new(),
        }
    }

    /// Effective TTL: `None` when the entry never expires.
    ///
    /// A zero duration is treated the same as an absent TTL, matching
    /// the "TTL ≤ 0 never expires" contract.
    pub fn effective_ttl(&self) -> Option<Duration> {
        self.ttl.filter(|ttl| !ttl.is_zero())
    }

    /// Whether the entry has outlived its TTL.
    pub fn is_expired(&self) -> bool {
        let Some(ttl) = self.effective_ttl() else {
            return false;
        };
        match (Utc::now() - self.cached_at).to_std() {
            Ok(elapsed) => elapsed > ttl,
            // cached_at in the future, not expired
            Err(_) => false,
        }
    }

    /// Age of the entry in whole seconds.
    pub fn age(&self) -> u64 {
        (Utc::now() - self.cached_at).num_seconds().max(0) as u64
    }

    /// Whole seconds of TTL remaining, `None` when the entry never
    /// expires or the remainder is not positive.
    ///
    /// Computed over whole seconds so an entry cached 123 s ago with a
    /// 3600 s TTL reports exactly 3477.
    pub fn remaining_ttl_secs(&self) -> Option<u64> {
        let ttl = self.effective_ttl()?;
        let remaining = ttl.as_secs() as i64 - self.age() as i64;
        (remaining > 0).then_some(remaining as u64)
    }
}

/// Serializes the optional TTL as integer seconds, `0` meaning "never
/// expires".
mod ttl_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ttl: &Option<Duration>, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_u64(ttl.map(|t| t.as_secs()).unwrap_or(0))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<Duration>, D::Error> {
        let secs = u64::deserialize(de)?;
        Ok((secs > 0).then(|| Duration::from_secs(secs)))
    }
}
