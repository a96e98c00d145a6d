//! Test doubles shared by the middleware, worker and admin tests.

// Each test binary uses a different subset of these helpers.
#![allow(dead_code)]

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use cachet_core::{
    read_to_end, reader_from_bytes, BodyReader, CacheKey, CacheMeta, CacheStore, StoreError,
    StoreResult,
};
use http::{Request, Response};
use http_body_util::Full;

/// In-memory store double mirroring the real backends' contract,
/// including opportunistic expiry.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (Bytes, CacheMeta)>>,
    puts: AtomicUsize,
}

impl MemoryStore {
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn entry(&self, key: &CacheKey) -> Option<(Bytes, CacheMeta)> {
        self.entries.lock().unwrap().get(key.as_str()).cloned()
    }

    pub fn insert(&self, key: &CacheKey, body: Bytes, meta: CacheMeta) {
        self.entries
            .lock()
            .unwrap()
            .insert(key.as_str().to_string(), (body, meta));
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &CacheKey) -> StoreResult<Option<(BodyReader, CacheMeta)>> {
        let mut entries = self.entries.lock().unwrap();
        let Some((body, meta)) = entries.get(key.as_str()).cloned() else {
            return Ok(None);
        };
        if meta.is_expired() {
            entries.remove(key.as_str());
            return Ok(None);
        }
        Ok(Some((reader_from_bytes(body), meta)))
    }

    async fn put(&self, key: &CacheKey, body: BodyReader, mut meta: CacheMeta) -> StoreResult<()> {
        let data = read_to_end(body).await?;
        meta.size = data.len() as u64;
        self.entries
            .lock()
            .unwrap()
            .insert(key.as_str().to_string(), (Bytes::from(data), meta));
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> StoreResult<()> {
        self.entries.lock().unwrap().remove(key.as_str());
        Ok(())
    }

    async fn purge_prefix(&self, prefix: &str) -> StoreResult<()> {
        self.entries
            .lock()
            .unwrap()
            .retain(|key, _| !key.contains(prefix));
        Ok(())
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Store double whose operations always fail.
#[derive(Default)]
pub struct FailingStore;

fn unavailable() -> StoreError {
    StoreError::Backend("backend unavailable".into())
}

#[async_trait]
impl CacheStore for FailingStore {
    async fn get(&self, _key: &CacheKey) -> StoreResult<Option<(BodyReader, CacheMeta)>> {
        Err(unavailable())
    }

    async fn put(&self, _key: &CacheKey, _body: BodyReader, _meta: CacheMeta) -> StoreResult<()> {
        Err(unavailable())
    }

    async fn delete(&self, _key: &CacheKey) -> StoreResult<()> {
        Err(unavailable())
    }

    async fn purge_prefix(&self, _prefix: &str) -> StoreResult<()> {
        Err(unavailable())
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "failing"
    }
}

/// Store double that records ban expressions and prefix purges.
#[derive(Default)]
pub struct BanRecorder {
    pub bans: Mutex<Vec<String>>,
    pub prefixes: Mutex<Vec<String>>,
}

#[async_trait]
impl CacheStore for BanRecorder {
    async fn get(&self, _key: &CacheKey) -> StoreResult<Option<(BodyReader, CacheMeta)>> {
        Ok(None)
    }

    async fn put(&self, _key: &CacheKey, _body: BodyReader, _meta: CacheMeta) -> StoreResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &CacheKey) -> StoreResult<()> {
        Ok(())
    }

    async fn purge_prefix(&self, prefix: &str) -> StoreResult<()> {
        self.prefixes.lock().unwrap().push(prefix.to_string());
        Ok(())
    }

    async fn ban(&self, expression: &str) -> StoreResult<()> {
        self.bans.lock().unwrap().push(expression.to_string());
        Ok(())
    }

    fn supports_ban(&self) -> bool {
        true
    }

    async fn close(&self) -> StoreResult<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "varnish"
    }
}

/// Upstream double: every call answers with a clone of the canned
/// response and bumps a counter.
#[derive(Clone)]
pub struct Upstream {
    status: http::StatusCode,
    headers: Vec<(&'static str, String)>,
    body: Bytes,
    pub calls: Arc<AtomicUsize>,
}

impl Upstream {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Upstream {
            status: http::StatusCode::OK,
            headers: vec![("content-type", "text/html".to_string())],
            body: body.into(),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn status(mut self, status: u16) -> Self {
        self.status = http::StatusCode::from_u16(status).unwrap();
        self
    }

    pub fn header(mut self, name: &'static str, value: impl Into<String>) -> Self {
        self.headers.push((name, value.into()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn service(
        &self,
    ) -> tower::util::BoxCloneService<Request<Full<Bytes>>, Response<Full<Bytes>>, Infallible> {
        let upstream = self.clone();
        tower::util::BoxCloneService::new(tower::service_fn(
            move |_request: Request<Full<Bytes>>| {
                let upstream = upstream.clone();
                async move {
                    upstream.calls.fetch_add(1, Ordering::SeqCst);
                    let mut builder = Response::builder().status(upstream.status);
                    for (name, value) in &upstream.headers {
                        builder = builder.header(*name, value);
                    }
                    Ok(builder.body(Full::new(upstream.body.clone())).unwrap())
                }
            },
        ))
    }
}

/// GET request with a host header.
pub fn get_request(path: &str) -> Request<Full<Bytes>> {
    Request::builder()
        .method(http::Method::GET)
        .uri(format!("http://example.com{path}"))
        .header("Host", "example.com")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

/// Collects a response body into memory.
pub async fn body_bytes<B>(body: B) -> Bytes
where
    B: http_body::Body,
    B::Error: std::fmt::Debug,
{
    use http_body_util::BodyExt;
    body.collect().await.unwrap().to_bytes()
}
