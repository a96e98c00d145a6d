//! Administrative HTTP endpoints: purge, purge-prefix, status, ban.

use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bytes::Bytes;
use cachet_core::{CacheKey, CacheStore};
use http::header::AUTHORIZATION;
use http::{Method, Request, Response, StatusCode};
use http_body::Body;
use http_body_util::{BodyExt, Full};
use serde::Deserialize;
use serde_json::json;
use tower::Service;
use tracing::warn;

use crate::config::OptimizationMode;
use crate::stats::Stats;

const PURGE_PATH: &str = "/_cache/purge";
const PURGE_PREFIX_PATH: &str = "/_cache/purge-prefix";
const STATUS_PATH: &str = "/_cache/status";
const BAN_PATH: &str = "/_cache/ban";

/// State shared by the admin endpoints.
pub struct AdminState {
    pub enabled: bool,
    pub store: Arc<dyn CacheStore>,
    pub stats: Arc<Stats>,
    pub mode: OptimizationMode,
    pub default_ttl: Duration,
    pub max_cache_size: u64,
    /// Shared secret; empty bypasses authentication.
    pub secret: String,
}

/// Tower service answering the four `/_cache/*` endpoints.
///
/// Authentication accepts `Authorization: Bearer <secret>` or
/// `?secret=<secret>`.
#[derive(Clone)]
pub struct AdminService {
    state: Arc<AdminState>,
}

impl AdminService {
    pub fn new(state: AdminState) -> Self {
        AdminService {
            state: Arc::new(state),
        }
    }
}

impl<B> Service<Request<B>> for AdminService
where
    B: Body + Send + 'static,
    B::Data: Send,
    B::Error: Send,
{
    type Response = Response<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let state = Arc::clone(&self.state);
        Box::pin(async move { Ok(route(state, request).await) })
    }
}

async fn route<B>(state: Arc<AdminState>, request: Request<B>) -> Response<Full<Bytes>>
where
    B: Body,
{
    let path = request.uri().path().to_string();
    match path.as_str() {
        PURGE_PATH | PURGE_PREFIX_PATH | STATUS_PATH | BAN_PATH => {}
        _ => return error_response(StatusCode::NOT_FOUND, "unknown cache endpoint"),
    }

    if !authenticated(&state, &request) {
        return empty_response(StatusCode::UNAUTHORIZED);
    }

    let method = request.method().clone();
    if path == STATUS_PATH {
        if method != Method::GET {
            return error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
        }
        return handle_status(&state);
    }
    if method != Method::POST {
        return error_response(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
    }

    match path.as_str() {
        PURGE_PATH => match read_json_body(request).await {
            Ok(body) => handle_purge(&state, body).await,
            Err(response) => response,
        },
        PURGE_PREFIX_PATH => match read_json_body(request).await {
            Ok(body) => handle_purge_prefix(&state, body).await,
            Err(response) => response,
        },
        _ => match read_json_body(request).await {
            Ok(body) => handle_ban(&state, body).await,
            Err(response) => response,
        },
    }
}

fn authenticated<B>(state: &AdminState, request: &Request<B>) -> bool {
    if state.secret.is_empty() {
        return true;
    }

    if let Some(value) = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return token == state.secret;
        }
    }

    request
        .uri()
        .query()
        .map(|query| {
            form_urlencoded::parse(query.as_bytes())
                .any(|(name, value)| name == "secret" && value == state.secret)
        })
        .unwrap_or(false)
}

/// Collects and deserializes the request body; malformed bodies map to
/// a 400 response.
async fn read_json_body<B, T>(request: Request<B>) -> Result<T, Response<Full<Bytes>>>
where
    B: Body,
    T: for<'de> Deserialize<'de>,
{
    let collected = request
        .into_body()
        .collect()
        .await
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "invalid request body"))?;
    serde_json::from_slice(&collected.to_bytes())
        .map_err(|_| error_response(StatusCode::BAD_REQUEST, "invalid request body"))
}

fn handle_status(state: &AdminState) -> Response<Full<Bytes>> {
    let snapshot = state.stats.snapshot();
    let document = json!({
        "enabled": state.enabled,
        "backend": state.store.name(),
        "stats": snapshot,
        "config": {
            "optimization_mode": state.mode.as_str(),
            "default_ttl_secs": state.default_ttl.as_secs(),
            "max_cache_size": state.max_cache_size,
        },
    });
    json_response(StatusCode::OK, &document)
}

#[derive(Debug, Deserialize)]
struct PurgeBody {
    #[serde(default)]
    key: String,
}

async fn handle_purge(state: &AdminState, body: PurgeBody) -> Response<Full<Bytes>> {
    let Ok(key) = CacheKey::from_hex(&body.key) else {
        return error_response(StatusCode::BAD_REQUEST, "key must be 64 lowercase hex characters");
    };
    match state.store.delete(&key).await {
        Ok(()) => json_response(
            StatusCode::OK,
            &json!({
                "success": true,
                "message": "cache entry purged",
                "key": key.as_str(),
            }),
        ),
        Err(error) => {
            warn!(key = %key, error = %error, "purge failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "purge failed")
        }
    }
}

#[derive(Debug, Deserialize)]
struct PurgePrefixBody {
    #[serde(default)]
    prefix: String,
}

async fn handle_purge_prefix(state: &AdminState, body: PurgePrefixBody) -> Response<Full<Bytes>> {
    if body.prefix.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "prefix is required");
    }
    match state.store.purge_prefix(&body.prefix).await {
        Ok(()) => json_response(
            StatusCode::OK,
            &json!({
                "success": true,
                "message": "cache entries purged",
                "prefix": body.prefix,
            }),
        ),
        Err(error) => {
            warn!(prefix = %body.prefix, error = %error, "purge-prefix failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "purge failed")
        }
    }
}

#[derive(Debug, Deserialize)]
struct BanBody {
    #[serde(default)]
    expression: String,
    #[serde(default)]
    prefix: String,
}

async fn handle_ban(state: &AdminState, body: BanBody) -> Response<Full<Bytes>> {
    if !state.store.supports_ban() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "ban is only supported by the HTTP-purge backend",
        );
    }

    let result = if !body.expression.is_empty() {
        state.store.ban(&body.expression).await
    } else if !body.prefix.is_empty() {
        state.store.purge_prefix(&body.prefix).await
    } else {
        return error_response(StatusCode::BAD_REQUEST, "either expression or prefix is required");
    };

    match result {
        Ok(()) => json_response(
            StatusCode::OK,
            &json!({
                "success": true,
                "message": "ban executed",
                "expression": body.expression,
                "prefix": body.prefix,
            }),
        ),
        Err(error) => {
            warn!(error = %error, "ban failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "ban failed")
        }
    }
}

fn json_response(status: StatusCode, value: &serde_json::Value) -> Response<Full<Bytes>> {
    let body = serde_json::to_vec(value).unwrap_or_default();
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    response
}

fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &json!({ "error": message }))
}

fn empty_response(status: StatusCode) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = status;
    response
}
