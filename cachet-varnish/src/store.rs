use std::time::Duration;

use async_trait::async_trait;
use cachet_core::{BodyReader, CacheKey, CacheMeta, CacheStore, StoreError, StoreResult};
use http::Method;
use thiserror::Error;
use tracing::debug;

/// Timeout applied to every purge/ban request.
const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

const BAN_URL_HEADER: &str = "X-Ban-Url";
const BAN_EXPRESSION_HEADER: &str = "X-Ban-Expression";

/// Error type for the HTTP-purge backend.
#[derive(Debug, Error)]
pub enum Error {
    /// The store was configured without endpoints.
    #[error("at least one purge endpoint is required")]
    NoEndpoints,

    /// The HTTP client failed to send a request.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// An endpoint answered with something other than 200 or 204.
    #[error("{method} to {endpoint} returned {status}")]
    UnexpectedStatus {
        method: &'static str,
        endpoint: String,
        status: u16,
    },
}

impl From<Error> for StoreError {
    fn from(error: Error) -> Self {
        StoreError::Backend(Box::new(error))
    }
}

/// Cache management interface for a fleet of upstream HTTP caches.
///
/// `delete` issues a `PURGE` per key and `purge_prefix`/`ban` issue
/// `BAN` requests with the fleet's ban headers. Regex escaping of ban
/// expressions is the operator's responsibility.
pub struct VarnishStore {
    endpoints: Vec<String>,
    client: reqwest::Client,
    purge: Method,
    ban: Method,
}

impl VarnishStore {
    /// Creates a store targeting the given management endpoints.
    pub fn new<I, S>(endpoints: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let endpoints: Vec<String> = endpoints
            .into_iter()
            .map(|endpoint| endpoint.into().trim_end_matches('/').to_string())
            .collect();
        if endpoints.is_empty() {
            return Err(Error::NoEndpoints);
        }

        let client = reqwest::Client::builder().timeout(HTTP_TIMEOUT).build()?;
        Ok(VarnishStore {
            endpoints,
            client,
            // Infallible: both verbs are valid method tokens.
            purge: Method::from_bytes(b"PURGE").expect("valid method"),
            ban: Method::from_bytes(b"BAN").expect("valid method"),
        })
    }

    /// Sends `method` to every endpoint, requiring 200 or 204 from
    /// each.
    async fn fan_out(
        &self,
        method: &Method,
        path: Option<&str>,
        header: Option<(&'static str, &str)>,
    ) -> Result<(), Error> {
        let method_name = if *method == self.purge { "PURGE" } else { "BAN" };
        for endpoint in &self.endpoints {
            let url = match path {
                Some(path) => format!("{endpoint}/{path}"),
                None => endpoint.clone(),
            };
            let mut request = self.client.request(method.clone(), &url);
            if let Some((name, value)) = header {
                request = request.header(name, value);
            }
            let response = request.send().await?;
            let status = response.status();
            if status != reqwest::StatusCode::OK && status != reqwest::StatusCode::NO_CONTENT {
                return Err(Error::UnexpectedStatus {
                    method: method_name,
                    endpoint: endpoint.clone(),
                    status: status.as_u16(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for VarnishStore {
    /// The fleet serves hits before requests reach the application, so
    /// lookups here always miss.
    async fn get(&self, _key: &CacheKey) -> StoreResult<Option<(BodyReader, CacheMeta)>> {
        Ok(None)
    }

    /// The fleet captures responses on its own; storing is a no-op.
    async fn put(&self, key: &CacheKey, _body: BodyReader, _meta: CacheMeta) -> StoreResult<()> {
        debug!(key = %key, "external cache stores entries itself, ignoring put");
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> StoreResult<()> {
        self.fan_out(&self.purge, Some(key.as_str()), None)
            .await
            .map_err(StoreError::from)
    }

    async fn purge_prefix(&self, prefix: &str) -> StoreResult<()> {
        let expression = format!("^{prefix}.*");
        self.fan_out(&self.ban, None, Some((BAN_URL_HEADER, &expression)))
            .await
            .map_err(StoreError::from)
    }

    async fn ban(&self, expression: &str) -> StoreResult<()> {
        self.fan_out(&self.ban, None, Some((BAN_EXPRESSION_HEADER, expression)))
            .await
            .map_err(StoreError::from)
    }

    fn supports_ban(&self) -> bool {
        true
    }

    async fn close(&self) -> StoreResult<()> {
        // Idle connections are released when the client drops.
        Ok(())
    }

    fn name(&self) -> &'static str {
        "varnish"
    }
}
