//! Crawl statistics
//!
//! Counters are lock-free atomics; reads are eventually consistent, which
//! is fine for reporting.

use crate::ErrorCategory;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct CrawlStats {
    requests: AtomicU64,
    responses_2xx: AtomicU64,
    responses_3xx: AtomicU64,
    responses_4xx: AtomicU64,
    responses_5xx: AtomicU64,
    bytes_fetched: AtomicU64,
    pages_emitted: AtomicU64,
    pages_failed: AtomicU64,
    links_discovered: AtomicU64,
    offers_accepted: AtomicU64,
    offers_duplicate: AtomicU64,
    offers_filtered: AtomicU64,
    robots_denied: AtomicU64,
    retries: AtomicU64,
    network_errors: AtomicU64,
    timeout_errors: AtomicU64,
    response_errors: AtomicU64,
    parse_errors: AtomicU64,
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub requests: u64,
    pub responses_2xx: u64,
    pub responses_3xx: u64,
    pub responses_4xx: u64,
    pub responses_5xx: u64,
    pub bytes_fetched: u64,
    pub pages_emitted: u64,
    pub pages_failed: u64,
    pub links_discovered: u64,
    pub offers_accepted: u64,
    pub offers_duplicate: u64,
    pub offers_filtered: u64,
    pub robots_denied: u64,
    pub retries: u64,
    pub network_errors: u64,
    pub timeout_errors: u64,
    pub response_errors: u64,
    pub parse_errors: u64,
}

impl CrawlStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_response(&self, status: u16, bytes: u64) {
        match status {
            200..=299 => &self.responses_2xx,
            300..=399 => &self.responses_3xx,
            400..=499 => &self.responses_4xx,
            _ => &self.responses_5xx,
        }
        .fetch_add(1, Ordering::Relaxed);
        self.bytes_fetched.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_exception(&self, category: ErrorCategory) {
        match category {
            ErrorCategory::Network => &self.network_errors,
            ErrorCategory::Timeout => &self.timeout_errors,
            ErrorCategory::Response => &self.response_errors,
            ErrorCategory::Parse => &self.parse_errors,
        }
        .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_page(&self, failed: bool) {
        if failed {
            self.pages_failed.fetch_add(1, Ordering::Relaxed);
        }
        self.pages_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_links(&self, discovered: u64, accepted: u64, duplicate: u64, filtered: u64) {
        self.links_discovered.fetch_add(discovered, Ordering::Relaxed);
        self.offers_accepted.fetch_add(accepted, Ordering::Relaxed);
        self.offers_duplicate.fetch_add(duplicate, Ordering::Relaxed);
        self.offers_filtered.fetch_add(filtered, Ordering::Relaxed);
    }

    pub fn record_robots_denied(&self) {
        self.robots_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            requests: self.requests.load(Ordering::Relaxed),
            responses_2xx: self.responses_2xx.load(Ordering::Relaxed),
            responses_3xx: self.responses_3xx.load(Ordering::Relaxed),
            responses_4xx: self.responses_4xx.load(Ordering::Relaxed),
            responses_5xx: self.responses_5xx.load(Ordering::Relaxed),
            bytes_fetched: self.bytes_fetched.load(Ordering::Relaxed),
            pages_emitted: self.pages_emitted.load(Ordering::Relaxed),
            pages_failed: self.pages_failed.load(Ordering::Relaxed),
            links_discovered: self.links_discovered.load(Ordering::Relaxed),
            offers_accepted: self.offers_accepted.load(Ordering::Relaxed),
            offers_duplicate: self.offers_duplicate.load(Ordering::Relaxed),
            offers_filtered: self.offers_filtered.load(Ordering::Relaxed),
            robots_denied: self.robots_denied.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            network_errors: self.network_errors.load(Ordering::Relaxed),
            timeout_errors: self.timeout_errors.load(Ordering::Relaxed),
            response_errors: self.response_errors.load(Ordering::Relaxed),
            parse_errors: self.parse_errors.load(Ordering::Relaxed),
        }
    }

    /// Logs a one-line completion summary
    pub fn log_summary(&self) {
        let s = self.snapshot();
        tracing::info!(
            "Crawl summary: {} pages ({} failed), {} requests, {} bytes, \
             {} links found ({} accepted, {} duplicate, {} filtered), \
             {} robots denials, {} retries",
            s.pages_emitted,
            s.pages_failed,
            s.requests,
            s.bytes_fetched,
            s.links_discovered,
            s.offers_accepted,
            s.offers_duplicate,
            s.offers_filtered,
            s.robots_denied,
            s.retries,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_classes() {
        let stats = CrawlStats::new();
        stats.record_response(200, 10);
        stats.record_response(301, 0);
        stats.record_response(404, 5);
        stats.record_response(503, 0);

        let s = stats.snapshot();
        assert_eq!(s.responses_2xx, 1);
        assert_eq!(s.responses_3xx, 1);
        assert_eq!(s.responses_4xx, 1);
        assert_eq!(s.responses_5xx, 1);
        assert_eq!(s.bytes_fetched, 15);
    }

    #[test]
    fn test_page_and_link_counters() {
        let stats = CrawlStats::new();
        stats.record_page(false);
        stats.record_page(true);
        stats.record_links(10, 6, 3, 1);

        let s = stats.snapshot();
        assert_eq!(s.pages_emitted, 2);
        assert_eq!(s.pages_failed, 1);
        assert_eq!(s.links_discovered, 10);
        assert_eq!(s.offers_accepted, 6);
    }

    #[test]
    fn test_exception_categories() {
        let stats = CrawlStats::new();
        stats.record_exception(ErrorCategory::Timeout);
        stats.record_exception(ErrorCategory::Timeout);
        stats.record_exception(ErrorCategory::Parse);

        let s = stats.snapshot();
        assert_eq!(s.timeout_errors, 2);
        assert_eq!(s.parse_errors, 1);
        assert_eq!(s.network_errors, 0);
    }
}
