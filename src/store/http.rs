//! HTTP store client
//!
//! Reference `ObjectStore` implementation for HTTP object stores that
//! expose JSON listings (`GET /bucket?format=json&prefix=&marker=`).
//! Objects live at `/bucket/key`; copies use an `x-copy-source` header.
//!
//! This client owns everything the scanner core refuses to own:
//! - a shared keep-alive connection pool, constructed once per run
//! - per-request timeouts
//! - retry with exponential backoff for transient failures (throttling,
//!   timeouts, 5xx). Non-transient failures are classified and returned
//!   on the first attempt.

use crate::error::{OpKind, RequestContext, StoreError, StoreResult};
use crate::store::{ListPage, ObjectStore};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Listing page size requested from the store.
const LIST_LIMIT: usize = 1000;

/// Shared transport settings for one run.
///
/// Sockets scale with host parallelism; idle connections are reused
/// for 60s.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum idle pooled connections per host
    pub max_sockets: usize,
    /// How long idle connections are kept alive
    pub keep_alive: Duration,
    /// Per-request timeout
    pub request_timeout: Duration,
    /// Maximum attempts per request (first try + retries)
    pub max_attempts: u32,
    /// Initial retry backoff (doubles per retry)
    pub initial_backoff: Duration,
    /// Backoff ceiling
    pub max_backoff: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_sockets: num_cpus::get() * 16,
            keep_alive: Duration::from_secs(60),
            request_timeout: Duration::from_secs(3),
            max_attempts: 10,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

/// One listing entry in the store's JSON listing format.
#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
}

/// HTTP `ObjectStore` implementation.
pub struct HttpStore {
    client: reqwest::Client,
    endpoint: String,
    config: TransportConfig,
}

impl HttpStore {
    /// Build a store client against `endpoint`, constructing the shared
    /// keep-alive transport for this run.
    pub fn new(endpoint: impl Into<String>, config: TransportConfig) -> StoreResult<Self> {
        let endpoint = endpoint.into();
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.max_sockets)
            .pool_idle_timeout(config.keep_alive)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| StoreError::Other {
                ctx: RequestContext::list(endpoint.clone()),
                reason: format!("failed to build http client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            config,
        })
    }

    fn object_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, bucket, key)
    }

    fn bucket_url(&self, bucket: &str) -> String {
        format!("{}/{}", self.endpoint, bucket)
    }

    /// Issue a request, retrying transient failures with exponential
    /// backoff. Returns the first non-transient outcome.
    async fn send_with_retry(
        &self,
        build: impl Fn() -> reqwest::RequestBuilder,
        ctx: &RequestContext,
    ) -> StoreResult<reqwest::Response> {
        let mut backoff = self.config.initial_backoff;
        let max_attempts = self.config.max_attempts.max(1);

        for attempt in 1..=max_attempts {
            let err: StoreError = match build().send().await {
                Ok(response) => match classify_status(response.status(), ctx) {
                    Some(err) => err,
                    None => return Ok(response),
                },
                Err(e) => classify_transport(&e, ctx),
            };

            if !err.is_transient() || attempt == max_attempts {
                return Err(err);
            }

            warn!(
                attempt,
                max_attempts = self.config.max_attempts,
                error = %err,
                "transient store error, backing off"
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(self.config.max_backoff);
        }

        unreachable!("retry loop always returns")
    }
}

/// Map an HTTP status to a classified error; `None` means success.
fn classify_status(status: StatusCode, ctx: &RequestContext) -> Option<StoreError> {
    if status.is_success() {
        return None;
    }
    let ctx = ctx.clone();
    Some(match status {
        StatusCode::NOT_FOUND => StoreError::NotFound { ctx },
        StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => StoreError::AccessDenied { ctx },
        StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => {
            StoreError::Throttled { ctx }
        }
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => StoreError::Timeout { ctx },
        status if status.is_server_error() => StoreError::Throttled { ctx },
        status => StoreError::Other {
            ctx,
            reason: format!("unexpected status {}", status),
        },
    })
}

/// Map a transport-level failure to a classified error.
fn classify_transport(err: &reqwest::Error, ctx: &RequestContext) -> StoreError {
    let ctx = ctx.clone();
    if err.is_timeout() {
        StoreError::Timeout { ctx }
    } else if err.is_decode() || err.is_body() {
        StoreError::MalformedResponse {
            ctx,
            reason: err.to_string(),
        }
    } else {
        StoreError::Other {
            ctx,
            reason: err.to_string(),
        }
    }
}

#[async_trait]
impl ObjectStore for HttpStore {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        cursor: Option<&str>,
    ) -> StoreResult<ListPage> {
        let ctx = RequestContext::list(bucket);
        let url = self.bucket_url(bucket);
        let limit = LIST_LIMIT.to_string();

        let response = self
            .send_with_retry(
                || {
                    let mut query: Vec<(&str, &str)> = vec![
                        ("format", "json"),
                        ("prefix", prefix),
                        ("limit", &limit),
                    ];
                    if let Some(marker) = cursor {
                        query.push(("marker", marker));
                    }
                    self.client.get(&url).query(&query)
                },
                &ctx,
            )
            .await?;

        // A payload that is not a JSON array of named entries is a
        // protocol error; callers never retry it.
        let entries: Vec<ListEntry> =
            response.json().await.map_err(|e| StoreError::MalformedResponse {
                ctx: ctx.clone(),
                reason: format!("listing response missing expected structure: {}", e),
            })?;

        let keys: Vec<String> = entries.into_iter().map(|e| e.name).collect();
        let truncated = keys.len() >= LIST_LIMIT;

        debug!(bucket, prefix, keys = keys.len(), truncated, "listed page");

        Ok(ListPage {
            keys,
            next_cursor: None,
            truncated,
        })
    }

    async fn fetch_object(&self, bucket: &str, key: &str) -> StoreResult<Vec<u8>> {
        let ctx = RequestContext::object(bucket, key, OpKind::Fetch);
        let url = self.object_url(bucket, key);

        let response = self.send_with_retry(|| self.client.get(&url), &ctx).await?;

        let body = response.bytes().await.map_err(|e| classify_transport(&e, &ctx))?;
        Ok(body.to_vec())
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StoreResult<()> {
        let ctx = RequestContext::object(bucket, key, OpKind::Delete);
        let url = self.object_url(bucket, key);

        self.send_with_retry(|| self.client.delete(&url), &ctx).await?;
        Ok(())
    }

    async fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> StoreResult<()> {
        let ctx = RequestContext::object(dst_bucket, dst_key, OpKind::Copy);
        let url = self.object_url(dst_bucket, dst_key);
        let source = format!("/{}/{}", src_bucket, src_key);

        self.send_with_retry(
            || self.client.put(&url).header("x-copy-source", &source),
            &ctx,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RequestContext {
        RequestContext::object("bucket", "key", OpKind::Fetch)
    }

    #[test]
    fn test_status_classification() {
        assert!(classify_status(StatusCode::OK, &ctx()).is_none());
        assert!(matches!(
            classify_status(StatusCode::NOT_FOUND, &ctx()),
            Some(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::FORBIDDEN, &ctx()),
            Some(StoreError::AccessDenied { .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::TOO_MANY_REQUESTS, &ctx()),
            Some(StoreError::Throttled { .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::INTERNAL_SERVER_ERROR, &ctx()),
            Some(StoreError::Throttled { .. })
        ));
        assert!(matches!(
            classify_status(StatusCode::GATEWAY_TIMEOUT, &ctx()),
            Some(StoreError::Timeout { .. })
        ));
    }

    #[test]
    fn test_transport_defaults_scale_with_host() {
        let config = TransportConfig::default();
        assert_eq!(config.max_sockets, num_cpus::get() * 16);
        assert_eq!(config.keep_alive, Duration::from_secs(60));
        assert_eq!(config.max_attempts, 10);
    }
}
