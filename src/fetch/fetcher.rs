//! HTTP fetcher with retries
//!
//! Performs a single logical HTTP operation per task: header merge, body
//! content-type autodetection, cookie attach/capture (via the client's
//! jar), per-request timeout, and a retry schedule. Retries apply only to
//! network and timeout errors, never to HTTP status failures; backoff is
//! exponential with factor 2 over the configured base delay.

use crate::middleware::{CrawlRequest, CrawlResponse};
use crate::stats::CrawlStats;
use crate::CrawlError;
use chrono::Utc;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub struct Fetcher {
    client: Client,
    timeout: Duration,
    retries: u32,
    retry_delay: Duration,
    stats: Arc<CrawlStats>,
}

impl Fetcher {
    pub fn new(
        client: Client,
        timeout: Duration,
        retries: u32,
        retry_delay: Duration,
        stats: Arc<CrawlStats>,
    ) -> Self {
        Self {
            client,
            timeout,
            retries,
            retry_delay,
            stats,
        }
    }

    /// Delay before retry `attempt` (0-indexed): base * 2^attempt
    fn backoff_delay(&self, attempt: u32) -> Duration {
        self.retry_delay * 2u32.saturating_pow(attempt)
    }

    /// Only transport-level failures are retryable; HTTP status failures
    /// (including 4xx) never are.
    fn is_retryable(error: &CrawlError) -> bool {
        matches!(
            error,
            CrawlError::Network { .. } | CrawlError::Timeout { .. }
        )
    }

    /// Performs the HTTP call for a request, honoring cancellation at
    /// every suspension point
    pub async fn fetch(
        &self,
        request: &CrawlRequest,
        cancel: &CancellationToken,
    ) -> Result<CrawlResponse, CrawlError> {
        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(CrawlError::Cancelled);
            }

            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                outcome = self.send_once(request) => outcome,
            };

            match outcome {
                Ok(response) => return Ok(response),
                Err(error) => {
                    if !Self::is_retryable(&error) || attempt >= self.retries {
                        return Err(error);
                    }
                    let delay = self.backoff_delay(attempt);
                    attempt += 1;
                    self.stats.record_retry();
                    tracing::debug!(
                        "Retry {}/{} for {} after {:?}: {}",
                        attempt,
                        self.retries,
                        request.url,
                        delay,
                        error
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(CrawlError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn send_once(&self, request: &CrawlRequest) -> Result<CrawlResponse, CrawlError> {
        let mut builder = self
            .client
            .request(request.method.as_reqwest(), request.url.clone())
            .timeout(self.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }

        if let Some(body) = &request.body {
            if !request
                .headers
                .keys()
                .any(|k| k.eq_ignore_ascii_case("content-type"))
            {
                builder = builder.header("content-type", detect_content_type(body));
            }
            builder = builder.body(body.clone());
        }

        let started = Instant::now();
        let response = builder
            .send()
            .await
            .map_err(|e| classify_error(e, &request.url))?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();
        let headers = header_map(&response);

        let body = response
            .text()
            .await
            .map_err(|e| classify_error(e, &request.url))?;

        Ok(CrawlResponse {
            url: final_url,
            status,
            headers,
            body,
            fetched_at: Utc::now(),
            elapsed: started.elapsed(),
        })
    }
}

/// Autodetects a body's Content-Type: JSON if it parses as JSON, form
/// encoding otherwise
fn detect_content_type(body: &str) -> &'static str {
    if serde_json::from_str::<serde_json::Value>(body).is_ok() {
        "application/json"
    } else {
        "application/x-www-form-urlencoded"
    }
}

fn classify_error(error: reqwest::Error, url: &url::Url) -> CrawlError {
    if error.is_timeout() {
        CrawlError::Timeout {
            url: url.to_string(),
        }
    } else {
        CrawlError::Network {
            url: url.to_string(),
            message: error.to_string(),
        }
    }
}

fn header_map(response: &reqwest::Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}
