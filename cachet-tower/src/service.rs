//! Tower service implementing the per-request caching algorithm.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use cachet_core::{
    is_request_cacheable, is_response_cacheable, read_to_end, reader_from_bytes, CacheMeta,
    PRESERVED_HEADERS,
};
use chrono::Utc;
use http::header::{CACHE_CONTROL, CONTENT_ENCODING, CONTENT_TYPE, ETAG, HOST};
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::BodyExt;
use tower::Service;
use tracing::warn;

use crate::body::CachedBody;
use crate::config::OptimizationMode;
use crate::layer::Shared;
use crate::stats::CacheEvent;
use crate::worker::OptimizationJob;

const X_CACHE: HeaderName = HeaderName::from_static("x-cache");
const AGE: HeaderName = HeaderName::from_static("age");

/// Tower [`Service`] that serves cacheable requests from the store and
/// captures upstream responses for future reuse.
///
/// Cache faults are never fatal: any store failure makes the request
/// behave as if the cache were absent.
pub struct CacheService<S> {
    upstream: S,
    shared: Arc<Shared>,
}

impl<S> CacheService<S> {
    pub(crate) fn new(upstream: S, shared: Arc<Shared>) -> Self {
        CacheService { upstream, shared }
    }
}

impl<S: Clone> Clone for CacheService<S> {
    fn clone(&self) -> Self {
        CacheService {
            upstream: self.upstream.clone(),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for CacheService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send,
    ReqBody: Send + 'static,
    ResBody: Body + Send + 'static,
    ResBody::Data: Send,
    ResBody::Error: Send,
{
    type Response = Response<CachedBody<ResBody>>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.upstream.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        let shared = Arc::clone(&self.shared);
        // The cloned service may not be ready; hand the ready one to
        // the future and keep the clone.
        let clone = self.upstream.clone();
        let upstream = std::mem::replace(&mut self.upstream, clone);
        Box::pin(handle(shared, upstream, request))
    }
}

async fn handle<S, ReqBody, ResBody>(
    shared: Arc<Shared>,
    mut upstream: S,
    request: Request<ReqBody>,
) -> Result<Response<CachedBody<ResBody>>, S::Error>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    ResBody: Body,
{
    if !shared.enabled {
        return upstream.call(request).await.map(passthrough);
    }

    if !is_request_cacheable(&request) || !path_allowed(&shared, request.uri().path()) {
        shared.stats.record_bypass();
        return upstream.call(request).await.map(passthrough);
    }

    let hostname = hostname(&request);
    let key = shared.key_generator.generate(&request);

    match shared.store.get(&key).await {
        Err(error) => {
            shared.stats.record_error();
            warn!(key = %key, error = %error, "cache read failed, bypassing");
            return upstream.call(request).await.map(passthrough);
        }
        Ok(Some((reader, meta))) => match read_to_end(reader).await {
            Ok(body) => {
                shared.stats.record_hit();
                emit(&shared, &hostname, CacheEvent::Hit, 0);
                let written = body.len() as u64;
                let response = hit_response(&meta, Bytes::from(body));
                emit(&shared, &hostname, CacheEvent::Traffic, written);
                return Ok(response);
            }
            Err(error) => {
                shared.stats.record_error();
                warn!(key = %key, error = %error, "cached body unreadable, bypassing");
                return upstream.call(request).await.map(passthrough);
            }
        },
        Ok(None) => {
            shared.stats.record_miss();
            emit(&shared, &hostname, CacheEvent::Miss, 0);
        }
    }

    // Capture-and-cache: collect the upstream body so it can be both
    // stored and replayed to the client.
    let response = upstream.call(request).await?;
    let (mut parts, body) = response.into_parts();
    let collected = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(error) => {
            // The client observes the error at the same point it would
            // have without the cache.
            return Ok(Response::from_parts(parts, CachedBody::Error(Some(error))));
        }
    };

    parts
        .headers
        .insert(X_CACHE, HeaderValue::from_static("MISS"));

    let cacheable = is_response_cacheable(parts.status, &parts.headers)
        && collected.len() as u64 <= shared.max_cache_size;
    if cacheable {
        let meta = capture_meta(&shared, parts.status, &parts.headers, collected.len() as u64);
        store_entry(&shared, &hostname, &key, &collected, meta).await;
    }

    emit(&shared, &hostname, CacheEvent::Traffic, collected.len() as u64);
    Ok(Response::from_parts(parts, CachedBody::replay(collected)))
}

/// Builds the metadata record for a captured response.
fn capture_meta(shared: &Shared, status: StatusCode, headers: &HeaderMap, size: u64) -> CacheMeta {
    let ttl = (!shared.default_ttl.is_zero()).then_some(shared.default_ttl);
    let mut meta = CacheMeta::new(header_str(headers, &CONTENT_TYPE), status.as_u16(), ttl);
    meta.cached_at = Utc::now();
    meta.size = size;
    meta.etag = header_str(headers, &ETAG).to_string();
    meta.encoding = header_str(headers, &CONTENT_ENCODING).to_string();
    for name in PRESERVED_HEADERS {
        if let Some(value) = headers.get(name).and_then(|value| value.to_str().ok()) {
            if !value.is_empty() {
                meta.headers.insert(name.to_string(), value.to_string());
            }
        }
    }
    meta
}

/// Runs the sync pipeline (if any) and writes the entry; in async mode
/// a job is enqueued after the successful put.
async fn store_entry(
    shared: &Shared,
    hostname: &str,
    key: &cachet_core::CacheKey,
    collected: &Bytes,
    mut meta: CacheMeta,
) {
    let mut stored = collected.clone();

    if shared.mode == OptimizationMode::Sync {
        if let Some(pipeline) = &shared.pipeline {
            match pipeline.apply_bytes(stored.clone(), &meta).await {
                Ok((optimized, new_meta)) => {
                    stored = optimized;
                    meta = new_meta;
                }
                Err(error) => {
                    warn!(key = %key, error = %error, "pipeline failed, caching original bytes");
                }
            }
        }
    }

    match shared
        .store
        .put(key, reader_from_bytes(stored.clone()), meta)
        .await
    {
        Ok(()) => {
            shared.stats.record_put();
            emit(shared, hostname, CacheEvent::Put, stored.len() as u64);
            if shared.mode == OptimizationMode::Async {
                if let (Some(queue), Some(pipeline)) = (&shared.queue, &shared.pipeline) {
                    queue.enqueue(OptimizationJob {
                        key: key.clone(),
                        store: Arc::clone(&shared.store),
                        pipeline: Arc::clone(pipeline),
                    });
                }
            }
        }
        Err(error) => {
            shared.stats.record_error();
            warn!(key = %key, error = %error, "cache write failed");
        }
    }
}

/// Builds the client response for a cache hit.
fn hit_response<B: Body>(meta: &CacheMeta, body: Bytes) -> Response<CachedBody<B>> {
    let mut response = Response::new(CachedBody::replay(body));
    *response.status_mut() = StatusCode::from_u16(meta.status_code).unwrap_or(StatusCode::OK);

    let headers = response.headers_mut();
    headers.insert(X_CACHE, HeaderValue::from_static("HIT"));
    headers.insert(AGE, HeaderValue::from(meta.age()));
    if !meta.content_type.is_empty() {
        insert_str(headers, CONTENT_TYPE, &meta.content_type);
    }
    if !meta.encoding.is_empty() {
        insert_str(headers, CONTENT_ENCODING, &meta.encoding);
    }
    if !meta.etag.is_empty() {
        insert_str(headers, ETAG, &meta.etag);
    }
    if let Some(max_age) = meta.remaining_ttl_secs() {
        insert_str(headers, CACHE_CONTROL, &format!("public, max-age={max_age}"));
    }
    for (name, value) in &meta.headers {
        if let Ok(name) = HeaderName::from_bytes(name.as_bytes()) {
            insert_str(headers, name, value);
        }
    }
    response
}

fn insert_str(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &HeaderName) -> &'a str {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
}

fn path_allowed(shared: &Shared, path: &str) -> bool {
    shared.cacheable_paths.is_empty()
        || shared
            .cacheable_paths
            .iter()
            .any(|pattern| pattern.is_match(path))
}

fn hostname<B>(request: &Request<B>) -> String {
    request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .or_else(|| request.uri().host())
        .unwrap_or("")
        .to_string()
}

fn emit(shared: &Shared, hostname: &str, event: CacheEvent, bytes: u64) {
    if let Some(callback) = &shared.events {
        callback(hostname, event, bytes);
    }
}

fn passthrough<B: Body>(response: Response<B>) -> Response<CachedBody<B>> {
    response.map(CachedBody::Passthrough)
}
