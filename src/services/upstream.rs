//! Paginated, rate-limited, retrying client for one upstream job source.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::core::normalizer::SourceSchema;
use crate::models::{FailureKind, SearchQuery, Source};
use crate::services::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::services::rate_limiter::{RateLimitConfig, RateLimiter};

/// Errors surfaced by [`UpstreamClient::fetch`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpstreamError {
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("credentials rejected by upstream")]
    Unauthorized,

    #[error("upstream unavailable after {attempts} attempts")]
    UpstreamUnavailable { attempts: u32 },

    #[error("malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("circuit breaker open")]
    CircuitOpen,

    #[error("source halted for this run")]
    Halted,

    #[error("cancelled")]
    Cancelled,
}

impl UpstreamError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            UpstreamError::RateLimited { .. } => FailureKind::RateLimited,
            UpstreamError::Unauthorized => FailureKind::Unauthorized,
            UpstreamError::UpstreamUnavailable { .. } => FailureKind::UpstreamUnavailable,
            UpstreamError::MalformedResponse(_) => FailureKind::MalformedResponse,
            UpstreamError::CircuitOpen => FailureKind::CircuitOpen,
            UpstreamError::Halted => FailureKind::SourceHalted,
            UpstreamError::Cancelled => FailureKind::Cancelled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    /// Parsed `Retry-After`, if the response carried one
    pub retry_after: Option<Duration>,
    pub body: String,
}

/// HTTP GET seam; lets the retry loop run against scripted responses
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<TransportResponse, TransportError>;
}

/// reqwest-backed transport
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, url: &str, headers: &[(String, String)]) -> Result<TransportResponse, TransportError> {
        let mut request = self.client.get(url);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send().await.map_err(classify_reqwest_error)?;
        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| parse_retry_after(v, Utc::now()));
        let body = response.text().await.map_err(classify_reqwest_error)?;

        Ok(TransportResponse {
            status,
            retry_after,
            body,
        })
    }
}

fn classify_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// Parse a `Retry-After` value: delta seconds or an HTTP date
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
    /// Fractional jitter applied to each backoff (0.3 = ±30%)
    pub jitter: f64,
    /// A `Retry-After` longer than this defers the call instead of sleeping
    pub max_retry_after: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(16),
            multiplier: 2.0,
            jitter: 0.3,
            max_retry_after: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    fn jittered(&self, base: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64(factor.max(0.0))
    }

    fn next_backoff(&self, current: Duration) -> Duration {
        current.mul_f64(self.multiplier).min(self.max_backoff)
    }
}

/// Per-source client settings
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub source: Source,
    /// Search endpoint; a `{page}` placeholder puts the page number in the path
    pub base_url: String,
    pub api_key: Option<String>,
    pub api_key_header: String,
    /// Prepended to the key in the header value, e.g. `Bearer `
    pub api_key_prefix: String,
    /// Send the key as this query parameter instead of a header
    pub api_key_param: Option<String>,
    /// Static query parameters (account ids, content type)
    pub extra_params: Vec<(String, String)>,
    pub page_size: u32,
    pub max_pages_per_run: u32,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitConfig,
    pub breaker: CircuitBreakerConfig,
}

/// One fetched page, records still in the source's raw shape
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub number: u32,
    pub records: Vec<Value>,
    pub has_more: bool,
}

/// Client for one source
///
/// Owns the source's rate limiter and circuit breaker, so every partition of
/// the source shares one quota and one health view.
pub struct UpstreamClient {
    config: UpstreamConfig,
    schema: &'static SourceSchema,
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    halted: AtomicBool,
}

impl UpstreamClient {
    pub fn new(config: UpstreamConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            schema: SourceSchema::for_source(config.source),
            limiter: RateLimiter::new(config.rate_limit.clone()),
            breaker: CircuitBreaker::new(config.breaker.clone()),
            halted: AtomicBool::new(false),
            transport,
            config,
        }
    }

    pub fn source(&self) -> Source {
        self.config.source
    }

    pub fn page_size(&self) -> u32 {
        self.config.page_size
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
    }

    /// Stop every partition of this source for the rest of the run
    pub fn halt(&self) {
        if !self.halted.swap(true, Ordering::SeqCst) {
            tracing::warn!(source = %self.config.source, "Source halted for this run");
        }
    }

    /// Clear a halt left over from a previous run
    pub fn begin_run(&self) {
        self.halted.store(false, Ordering::SeqCst);
    }

    pub fn breaker_exhausted(&self) -> bool {
        self.breaker.exhausted()
    }

    pub fn build_url(&self, query: &SearchQuery, page: u32) -> String {
        let schema = self.schema;
        let page_in_path = self.config.base_url.contains("{page}");
        let base = self.config.base_url.replace("{page}", &page.to_string());

        let mut params: Vec<(String, String)> = self.config.extra_params.clone();
        params.push((schema.keywords_param.to_string(), query.keywords.clone()));
        if let (Some(param), Some(location)) = (schema.location_param, &query.location) {
            params.push((param.to_string(), location.clone()));
        }
        if !page_in_path {
            params.push((schema.page_param.to_string(), page.to_string()));
        }
        params.push((schema.page_size_param.to_string(), self.config.page_size.to_string()));
        if let (Some(param), Some(after)) = (schema.posted_after_param, query.posted_after) {
            params.push((param.to_string(), after.to_rfc3339()));
        }
        if let (Some(param), Some(key)) = (&self.config.api_key_param, &self.config.api_key) {
            params.push((param.clone(), key.clone()));
        }

        let query_string = params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let separator = if base.contains('?') { '&' } else { '?' };
        format!("{}{}{}", base, separator, query_string)
    }

    fn headers(&self) -> Vec<(String, String)> {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if self.config.api_key_param.is_none() {
            if let Some(key) = &self.config.api_key {
                headers.push((
                    self.config.api_key_header.clone(),
                    format!("{}{}", self.config.api_key_prefix, key),
                ));
            }
        }
        headers
    }

    /// Fetch one page, retrying transient failures with backoff
    pub async fn fetch(
        &self,
        query: &SearchQuery,
        page: u32,
        cancel: &CancellationToken,
    ) -> Result<Page, UpstreamError> {
        let source = self.config.source;
        let policy = &self.config.retry;
        let url = self.build_url(query, page);
        let headers = self.headers();
        let mut backoff = policy.initial_backoff;

        for attempt in 1..=policy.max_attempts.max(1) {
            if self.is_halted() {
                return Err(UpstreamError::Halted);
            }
            if cancel.is_cancelled() {
                return Err(UpstreamError::Cancelled);
            }
            if !self.breaker.allow() {
                return Err(UpstreamError::CircuitOpen);
            }

            let wait = match self.limiter.reserve() {
                Ok(wait) => wait,
                Err(too_long) => {
                    self.breaker.record_neutral();
                    return Err(UpstreamError::RateLimited {
                        retry_after: too_long.0,
                    });
                }
            };
            if !wait.is_zero() && !sleep_or_cancel(wait, cancel).await {
                self.breaker.record_neutral();
                return Err(UpstreamError::Cancelled);
            }

            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    self.breaker.record_neutral();
                    return Err(UpstreamError::Cancelled);
                }
                result = self.transport.get(&url, &headers) => result,
            };

            let delay = match result {
                Ok(response) if (200..300).contains(&response.status) => {
                    self.breaker.record_success();
                    return self.parse_page(&response.body, page);
                }
                Ok(response) if response.status == 401 || response.status == 403 => {
                    self.breaker.record_neutral();
                    self.halt();
                    return Err(UpstreamError::Unauthorized);
                }
                Ok(response) if response.status == 429 => {
                    // Quota pressure says nothing about upstream health
                    self.breaker.record_neutral();
                    match response.retry_after {
                        Some(after) if after > policy.max_retry_after => {
                            return Err(UpstreamError::RateLimited { retry_after: after });
                        }
                        Some(after) => after,
                        None => policy.jittered(backoff),
                    }
                }
                Ok(response) if response.status >= 500 || response.status == 408 => {
                    self.breaker.record_failure();
                    policy.jittered(backoff)
                }
                Ok(response) => {
                    self.breaker.record_neutral();
                    return Err(UpstreamError::MalformedResponse(format!(
                        "unexpected status {}",
                        response.status
                    )));
                }
                Err(err) => {
                    self.breaker.record_failure();
                    tracing::debug!(%source, page, error = %err, "Upstream transport error");
                    policy.jittered(backoff)
                }
            };

            if attempt == policy.max_attempts {
                break;
            }

            tracing::warn!(
                %source,
                partition = %query.partition,
                page,
                attempt,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Upstream request failed, backing off"
            );

            if !sleep_or_cancel(delay, cancel).await {
                return Err(UpstreamError::Cancelled);
            }
            backoff = policy.next_backoff(backoff);
        }

        Err(UpstreamError::UpstreamUnavailable {
            attempts: policy.max_attempts,
        })
    }

    fn parse_page(&self, body: &str, page: u32) -> Result<Page, UpstreamError> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| UpstreamError::MalformedResponse(format!("invalid JSON: {}", e)))?;
        let (records, has_more) = self
            .schema
            .extract_page(&value, page, self.config.page_size)
            .map_err(UpstreamError::MalformedResponse)?;

        Ok(Page {
            number: page,
            records,
            has_more,
        })
    }

    /// Lazy stream of pages ascending from `start_page`
    ///
    /// Ends after the last page, after `max_pages_per_run` pages, or after the
    /// first error (which is yielded). Restart by calling again with the
    /// cursor's next page.
    pub fn pages<'a>(
        &'a self,
        query: SearchQuery,
        start_page: u32,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Page, UpstreamError>> + 'a {
        let limit = self.config.max_pages_per_run.max(1);
        stream::unfold(
            Some((start_page.max(1), 0u32)),
            move |state| {
                let query = query.clone();
                let cancel = cancel.clone();
                async move {
                    let (page, fetched) = state?;
                    if fetched >= limit {
                        return None;
                    }
                    match self.fetch(&query, page, &cancel).await {
                        Ok(p) => {
                            let next = p.has_more.then_some((page + 1, fetched + 1));
                            Some((Ok(p), next))
                        }
                        Err(e) => Some((Err(e), None)),
                    }
                }
            },
        )
    }
}

/// Sleep unless cancelled first; returns false on cancellation
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
