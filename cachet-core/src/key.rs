//! Deterministic cache key generation from HTTP requests.
//!
//! A request is fingerprinted as the `|`-joined string
//! `scheme|host|path|normalized-query|H1:v1|…` and the cache key is
//! the lowercase hex SHA-256 of that string. Two requests that agree
//! on every fingerprint component always produce the same key.

use std::collections::BTreeMap;
use std::fmt;

use http::header::HOST;
use http::Request;
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Length of a cache key in hex characters.
pub const KEY_LEN: usize = 64;

/// A 64-character lowercase hexadecimal cache key.
///
/// Keys are produced by [`KeyGenerator::generate`] or validated from
/// external input with [`CacheKey::from_hex`]; stores treat them as
/// opaque. Because every key is validated hex, no user-supplied string
/// ever reaches a filesystem path unescaped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

/// Error returned when a string is not a valid cache key.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("cache keys are {KEY_LEN} lowercase hex characters")]
pub struct InvalidKey;

impl CacheKey {
    /// Validates an externally supplied key (admin purge input,
    /// filenames recovered from disk).
    pub fn from_hex(key: &str) -> Result<Self, InvalidKey> {
        let valid = key.len() == KEY_LEN
            && key
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(CacheKey(key.to_owned()))
        } else {
            Err(InvalidKey)
        }
    }

    fn from_fingerprint(fingerprint: &str) -> Self {
        let digest = Sha256::digest(fingerprint.as_bytes());
        CacheKey(hex::encode(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generates cache keys from HTTP requests.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    /// Whether query parameters participate in the key.
    pub include_query: bool,
    /// Request headers appended to the fingerprint, in declaration
    /// order, when the request carries a non-empty value.
    pub vary_headers: Vec<String>,
    /// Whether host and path keep their case.
    pub case_sensitive: bool,
}

impl Default for KeyGenerator {
    fn default() -> Self {
        KeyGenerator {
            include_query: true,
            vary_headers: vec!["Accept-Encoding".to_string()],
            case_sensitive: false,
        }
    }
}

impl KeyGenerator {
    /// Computes the cache key for a request.
    pub fn generate<B>(&self, request: &Request<B>) -> CacheKey {
        CacheKey::from_fingerprint(&self.fingerprint(request))
    }

    fn fingerprint<B>(&self, request: &Request<B>) -> String {
        let mut parts: Vec<String> = Vec::with_capacity(4 + self.vary_headers.len());

        parts.push(request.uri().scheme_str().unwrap_or("http").to_string());

        let host = request
            .headers()
            .get(HOST)
            .and_then(|value| value.to_str().ok())
            .or_else(|| request.uri().host())
            .unwrap_or("");
        parts.push(self.fold_case(host));

        parts.push(self.fold_case(request.uri().path()));

        if self.include_query {
            if let Some(raw) = request.uri().query().filter(|q| !q.is_empty()) {
                parts.push(normalize_query(raw));
            }
        }

        for name in &self.vary_headers {
            let value = request
                .headers()
                .get(name.as_str())
                .and_then(|value| value.to_str().ok())
                .unwrap_or("");
            if !value.is_empty() {
                parts.push(format!("{name}:{value}"));
            }
        }

        parts.join("|")
    }

    fn fold_case(&self, value: &str) -> String {
        if self.case_sensitive {
            value.to_string()
        } else {
            value.to_lowercase()
        }
    }
}

/// Canonicalizes a raw query string: parse into a multimap, sort keys
/// ascending and values ascending per key, percent-encode each pair,
/// and join with `&`. Permutations of the same pairs normalize to the
/// same string.
fn normalize_query(raw: &str) -> String {
    let mut pairs: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, value) in form_urlencoded::parse(raw.as_bytes()) {
        pairs
            .entry(name.into_owned())
            .or_default()
            .push(value.into_owned());
    }

    let mut encoded = form_urlencoded::Serializer::new(String::new());
    for (name, mut values) in pairs {
        values.sort();
        for value in values {
            encoded.append_pair(&name, &value);
        }
    }
    encoded.finish()
}
