//! Request/response/exception middleware pipeline
//!
//! Middlewares run strictly sequentially for a request: request hooks in
//! configured order, response hooks in reverse order, exception hooks in
//! configured order until one synthesizes a response.

use crate::limiter::RateLimiter;
use crate::stats::CrawlStats;
use crate::url::origin_of;
use crate::{CrawlError, ErrorCategory};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use url::Url;

/// HTTP method for a crawl request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

impl Method {
    pub fn as_reqwest(&self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Put => reqwest::Method::PUT,
            Self::Delete => reqwest::Method::DELETE,
            Self::Patch => reqwest::Method::PATCH,
        }
    }
}

/// A request flowing through the pipeline
#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub url: Url,
    pub method: Method,
    pub headers: HashMap<String, String>,
    pub body: Option<String>,
    pub depth: u32,
    pub metadata: Option<serde_json::Value>,
}

impl CrawlRequest {
    pub fn get(url: Url, depth: u32) -> Self {
        Self {
            url,
            method: Method::Get,
            headers: HashMap::new(),
            body: None,
            depth,
            metadata: None,
        }
    }
}

/// A response flowing back through the pipeline
#[derive(Debug, Clone)]
pub struct CrawlResponse {
    /// Final URL after redirects
    pub url: Url,
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl CrawlResponse {
    /// Synthesizes a response, for middleware short-circuits and tests
    pub fn synthetic(url: Url, status: u16, body: impl Into<String>) -> Self {
        Self {
            url,
            status,
            headers: HashMap::new(),
            body: body.into(),
            fetched_at: Utc::now(),
            elapsed: Duration::ZERO,
        }
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(String::as_str)
    }

    pub fn is_html(&self) -> bool {
        // Absent Content-Type is treated as HTML, matching tolerant servers.
        self.content_type()
            .map_or(true, |ct| ct.contains("text/html") || ct.contains("application/xhtml"))
    }
}

/// What a request hook decided
#[derive(Debug)]
pub enum RequestFlow {
    /// Continue with the (possibly modified) request
    Continue(CrawlRequest),
    /// Skip the fetch, using this synthesized response
    ShortCircuit(CrawlResponse),
    /// Drop the request; the task fails with MiddlewareAbort
    Abort,
}

/// What a response hook decided
#[derive(Debug)]
pub enum ResponseFlow {
    Continue(CrawlResponse),
    /// Drop the response; the task fails with MiddlewareAbort
    Drop,
}

/// An interceptor in the per-request pipeline
///
/// All hooks have no-op defaults, so implementors override only what they
/// need.
#[async_trait]
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    async fn process_request(&self, request: CrawlRequest) -> RequestFlow {
        RequestFlow::Continue(request)
    }

    async fn process_response(
        &self,
        response: CrawlResponse,
        _request: &CrawlRequest,
    ) -> ResponseFlow {
        ResponseFlow::Continue(response)
    }

    /// Returning a response resumes processing at the response stage;
    /// None propagates the error.
    async fn process_exception(
        &self,
        _error: &CrawlError,
        _request: &CrawlRequest,
    ) -> Option<CrawlResponse> {
        None
    }
}

/// Ordered middleware chain
#[derive(Clone, Default)]
pub struct MiddlewarePipeline {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewarePipeline {
    pub fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self { middlewares }
    }

    pub fn push(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Runs request hooks in configured order
    pub async fn run_request(&self, mut request: CrawlRequest) -> Result<RequestFlow, CrawlError> {
        for middleware in &self.middlewares {
            match middleware.process_request(request).await {
                RequestFlow::Continue(next) => request = next,
                RequestFlow::ShortCircuit(response) => {
                    tracing::debug!(
                        "Middleware {} short-circuited {}",
                        middleware.name(),
                        response.url
                    );
                    return Ok(RequestFlow::ShortCircuit(response));
                }
                RequestFlow::Abort => {
                    return Err(CrawlError::MiddlewareAbort {
                        name: middleware.name().to_string(),
                    });
                }
            }
        }
        Ok(RequestFlow::Continue(request))
    }

    /// Runs response hooks in reverse order
    pub async fn run_response(
        &self,
        mut response: CrawlResponse,
        request: &CrawlRequest,
    ) -> Result<CrawlResponse, CrawlError> {
        for middleware in self.middlewares.iter().rev() {
            match middleware.process_response(response, request).await {
                ResponseFlow::Continue(next) => response = next,
                ResponseFlow::Drop => {
                    return Err(CrawlError::MiddlewareAbort {
                        name: middleware.name().to_string(),
                    });
                }
            }
        }
        Ok(response)
    }

    /// Runs exception hooks in configured order; the first synthesized
    /// response wins
    pub async fn run_exception(
        &self,
        error: &CrawlError,
        request: &CrawlRequest,
    ) -> Option<CrawlResponse> {
        for middleware in &self.middlewares {
            if let Some(response) = middleware.process_exception(error, request).await {
                tracing::debug!(
                    "Middleware {} recovered {} from {}",
                    middleware.name(),
                    request.url,
                    error
                );
                return Some(response);
            }
        }
        None
    }
}

/// Built-in: waits on the per-origin rate limiter before every fetch,
/// optionally adding a fixed per-worker delay
///
/// Cancellation interrupts the wait; the request then continues into the
/// fetcher, which observes the cancellation before sending anything.
pub struct RateLimitMiddleware {
    limiter: Arc<RateLimiter>,
    request_delay: Duration,
    cancel: CancellationToken,
}

impl RateLimitMiddleware {
    pub fn new(
        limiter: Arc<RateLimiter>,
        request_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            limiter,
            request_delay,
            cancel,
        }
    }
}

#[async_trait]
impl Middleware for RateLimitMiddleware {
    fn name(&self) -> &str {
        "rate-limit"
    }

    async fn process_request(&self, request: CrawlRequest) -> RequestFlow {
        let wait = async {
            if !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
            if let Some(origin) = origin_of(&request.url) {
                self.limiter.acquire(&origin).await;
            }
        };
        tokio::select! {
            _ = self.cancel.cancelled() => {}
            _ = wait => {}
        }
        RequestFlow::Continue(request)
    }
}

/// Built-in: injects the User-Agent header when the caller has not set one
pub struct UserAgentMiddleware {
    header_value: String,
}

impl UserAgentMiddleware {
    pub fn new(header_value: String) -> Self {
        Self { header_value }
    }
}

#[async_trait]
impl Middleware for UserAgentMiddleware {
    fn name(&self) -> &str {
        "user-agent"
    }

    async fn process_request(&self, mut request: CrawlRequest) -> RequestFlow {
        request
            .headers
            .entry("user-agent".to_string())
            .or_insert_with(|| self.header_value.clone());
        RequestFlow::Continue(request)
    }
}

/// Built-in: logs the request/response flow
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn process_request(&self, request: CrawlRequest) -> RequestFlow {
        tracing::debug!("Fetching {} (depth {})", request.url, request.depth);
        RequestFlow::Continue(request)
    }

    async fn process_response(
        &self,
        response: CrawlResponse,
        request: &CrawlRequest,
    ) -> ResponseFlow {
        tracing::debug!(
            "Fetched {} -> {} in {:?}",
            request.url,
            response.status,
            response.elapsed
        );
        ResponseFlow::Continue(response)
    }

    async fn process_exception(
        &self,
        error: &CrawlError,
        request: &CrawlRequest,
    ) -> Option<CrawlResponse> {
        tracing::warn!("Request to {} failed: {}", request.url, error);
        None
    }
}

/// Built-in: feeds the shared crawl statistics
pub struct StatsMiddleware {
    stats: Arc<CrawlStats>,
}

impl StatsMiddleware {
    pub fn new(stats: Arc<CrawlStats>) -> Self {
        Self { stats }
    }
}

#[async_trait]
impl Middleware for StatsMiddleware {
    fn name(&self) -> &str {
        "stats"
    }

    async fn process_request(&self, request: CrawlRequest) -> RequestFlow {
        self.stats.record_request();
        RequestFlow::Continue(request)
    }

    async fn process_response(
        &self,
        response: CrawlResponse,
        _request: &CrawlRequest,
    ) -> ResponseFlow {
        self.stats
            .record_response(response.status, response.body.len() as u64);
        ResponseFlow::Continue(response)
    }

    async fn process_exception(
        &self,
        error: &CrawlError,
        _request: &CrawlRequest,
    ) -> Option<CrawlResponse> {
        self.stats
            .record_exception(error.category().unwrap_or(ErrorCategory::Network));
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request() -> CrawlRequest {
        CrawlRequest::get(Url::parse("https://example.com/").unwrap(), 0)
    }

    struct HeaderTagger {
        name: &'static str,
        order: Arc<std::sync::Mutex<Vec<&'static str>>>,
    }

    #[async_trait]
    impl Middleware for HeaderTagger {
        fn name(&self) -> &str {
            self.name
        }

        async fn process_request(&self, mut request: CrawlRequest) -> RequestFlow {
            self.order.lock().unwrap().push(self.name);
            request
                .headers
                .insert(format!("x-{}", self.name), "1".to_string());
            RequestFlow::Continue(request)
        }

        async fn process_response(
            &self,
            response: CrawlResponse,
            _request: &CrawlRequest,
        ) -> ResponseFlow {
            self.order.lock().unwrap().push(self.name);
            ResponseFlow::Continue(response)
        }
    }

    #[tokio::test]
    async fn test_request_order_and_response_reversal() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let pipeline = MiddlewarePipeline::new(vec![
            Arc::new(HeaderTagger {
                name: "first",
                order: Arc::clone(&order),
            }),
            Arc::new(HeaderTagger {
                name: "second",
                order: Arc::clone(&order),
            }),
        ]);

        let flow = pipeline.run_request(request()).await.unwrap();
        let RequestFlow::Continue(req) = flow else {
            panic!("expected continue");
        };
        assert!(req.headers.contains_key("x-first"));
        assert!(req.headers.contains_key("x-second"));

        let response = CrawlResponse::synthetic(req.url.clone(), 200, "");
        pipeline.run_response(response, &req).await.unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec!["first", "second", "second", "first"]
        );
    }

    struct ShortCircuiter;

    #[async_trait]
    impl Middleware for ShortCircuiter {
        fn name(&self) -> &str {
            "short-circuit"
        }

        async fn process_request(&self, request: CrawlRequest) -> RequestFlow {
            RequestFlow::ShortCircuit(CrawlResponse::synthetic(request.url, 200, "cached"))
        }
    }

    struct Counter(AtomicUsize);

    #[async_trait]
    impl Middleware for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn process_request(&self, request: CrawlRequest) -> RequestFlow {
            self.0.fetch_add(1, Ordering::SeqCst);
            RequestFlow::Continue(request)
        }
    }

    #[tokio::test]
    async fn test_short_circuit_skips_later_middleware() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let pipeline = MiddlewarePipeline::new(vec![
            Arc::new(ShortCircuiter),
            Arc::clone(&counter) as Arc<dyn Middleware>,
        ]);

        let flow = pipeline.run_request(request()).await.unwrap();
        assert!(matches!(flow, RequestFlow::ShortCircuit(_)));
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    struct Aborter;

    #[async_trait]
    impl Middleware for Aborter {
        fn name(&self) -> &str {
            "aborter"
        }

        async fn process_request(&self, _request: CrawlRequest) -> RequestFlow {
            RequestFlow::Abort
        }
    }

    #[tokio::test]
    async fn test_abort_surfaces_as_error() {
        let pipeline = MiddlewarePipeline::new(vec![Arc::new(Aborter)]);
        let err = pipeline.run_request(request()).await.unwrap_err();
        assert!(matches!(err, CrawlError::MiddlewareAbort { .. }));
    }

    struct Recoverer;

    #[async_trait]
    impl Middleware for Recoverer {
        fn name(&self) -> &str {
            "recoverer"
        }

        async fn process_exception(
            &self,
            _error: &CrawlError,
            request: &CrawlRequest,
        ) -> Option<CrawlResponse> {
            Some(CrawlResponse::synthetic(request.url.clone(), 200, "saved"))
        }
    }

    #[tokio::test]
    async fn test_exception_recovery() {
        let pipeline = MiddlewarePipeline::new(vec![Arc::new(LoggingMiddleware), Arc::new(Recoverer)]);
        let req = request();
        let err = CrawlError::Timeout {
            url: req.url.to_string(),
        };
        let recovered = pipeline.run_exception(&err, &req).await;
        assert_eq!(recovered.unwrap().body, "saved");
    }

    #[tokio::test]
    async fn test_exception_without_recovery_propagates() {
        let pipeline = MiddlewarePipeline::new(vec![Arc::new(LoggingMiddleware)]);
        let req = request();
        let err = CrawlError::Timeout {
            url: req.url.to_string(),
        };
        assert!(pipeline.run_exception(&err, &req).await.is_none());
    }

    #[tokio::test]
    async fn test_user_agent_injection_respects_existing() {
        let middleware = UserAgentMiddleware::new("Bot/1.0".to_string());

        let flow = middleware.process_request(request()).await;
        let RequestFlow::Continue(req) = flow else {
            panic!("expected continue");
        };
        assert_eq!(req.headers["user-agent"], "Bot/1.0");

        let mut custom = request();
        custom
            .headers
            .insert("user-agent".to_string(), "Caller/2.0".to_string());
        let RequestFlow::Continue(req) = middleware.process_request(custom).await else {
            panic!("expected continue");
        };
        assert_eq!(req.headers["user-agent"], "Caller/2.0");
    }

    #[tokio::test]
    async fn test_is_html_detection() {
        let mut response = CrawlResponse::synthetic(
            Url::parse("https://example.com/").unwrap(),
            200,
            "",
        );
        assert!(response.is_html());

        response
            .headers
            .insert("content-type".to_string(), "text/html; charset=utf-8".to_string());
        assert!(response.is_html());

        response
            .headers
            .insert("content-type".to_string(), "application/pdf".to_string());
        assert!(!response.is_html());
    }
}
