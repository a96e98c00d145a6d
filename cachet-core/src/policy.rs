//! Request and response cacheability rules.

use http::header::{AUTHORIZATION, CACHE_CONTROL, PRAGMA, SET_COOKIE};
use http::{HeaderMap, Method, Request, StatusCode};

/// Status codes eligible for caching.
const CACHEABLE_STATUSES: [StatusCode; 5] = [
    StatusCode::OK,
    StatusCode::NON_AUTHORITATIVE_INFORMATION,
    StatusCode::NO_CONTENT,
    StatusCode::MOVED_PERMANENTLY,
    StatusCode::FOUND,
];

/// Whether a request may be served from or admitted into the cache.
///
/// All of the following must hold: the method is `GET` or `HEAD`, no
/// `Authorization` header is present, and `Cache-Control` contains
/// neither `no-cache` nor `no-store` (substring match).
pub fn is_request_cacheable<B>(request: &Request<B>) -> bool {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return false;
    }

    if request.headers().contains_key(AUTHORIZATION) {
        return false;
    }

    let cache_control = header_str(request.headers(), CACHE_CONTROL);
    !(cache_control.contains("no-cache") || cache_control.contains("no-store"))
}

/// Whether an upstream response may be stored.
///
/// All of the following must hold: the status is one of 200, 203, 204,
/// 301, 302; no `Set-Cookie` header is present; `Cache-Control`
/// contains neither `no-store` nor `private`; and `Pragma` is not
/// `no-cache`.
pub fn is_response_cacheable(status: StatusCode, headers: &HeaderMap) -> bool {
    if !CACHEABLE_STATUSES.contains(&status) {
        return false;
    }

    if headers.contains_key(SET_COOKIE) {
        return false;
    }

    let cache_control = header_str(headers, CACHE_CONTROL);
    if cache_control.contains("no-store") || cache_control.contains("private") {
        return false;
    }

    header_str(headers, PRAGMA) != "no-cache"
}

fn header_str(headers: &HeaderMap, name: http::header::HeaderName) -> &str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}
