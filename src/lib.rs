//! Rivulet: a polite, resumable, multi-domain web crawler
//!
//! This crate crawls reachable pages from a set of seed URLs up to
//! configurable depth and page limits, respecting robots.txt and per-domain
//! rate limits, and streams discovered page records to a consumer. Crawl
//! progress can be persisted so an interrupted run resumes without
//! re-fetching already-processed URLs.

pub mod config;
pub mod crawler;
pub mod extract;
pub mod fetch;
pub mod frontier;
pub mod limiter;
pub mod middleware;
pub mod robots;
pub mod scheduler;
pub mod session;
pub mod sink;
pub mod stats;
pub mod url;
pub mod worker;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for rivulet operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Network error for {url}: {message}")]
    Network { url: String, message: String },

    #[error("Request timeout for {url}")]
    Timeout { url: String },

    #[error("HTTP {status} for {url}")]
    Response { url: String, status: u16 },

    #[error("Parse error for {url}: {message}")]
    Parse { url: String, message: String },

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Cookie error: {0}")]
    Cookie(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("URL error: {0}")]
    Url(#[from] UrlError),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("Request dropped by middleware {name}")]
    MiddlewareAbort { name: String },

    #[error("Crawl cancelled")]
    Cancelled,
}

impl CrawlError {
    /// Derives the consumer-facing error category, when the error is
    /// page-local. Fatal errors (configuration, cancellation) return None.
    pub fn category(&self) -> Option<ErrorCategory> {
        match self {
            Self::Network { .. } | Self::Reqwest(_) => Some(ErrorCategory::Network),
            Self::Timeout { .. } => Some(ErrorCategory::Timeout),
            Self::Response { .. } | Self::MiddlewareAbort { .. } => Some(ErrorCategory::Response),
            Self::Parse { .. } => Some(ErrorCategory::Parse),
            _ => None,
        }
    }
}

/// Category attached to failed crawl results delivered to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Network,
    Timeout,
    Response,
    Parse,
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid filter regex: {0}")]
    InvalidFilter(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing host in URL")]
    MissingHost,
}

/// Errors raised by persistence backends
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type alias for rivulet operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for persistence operations
pub type PersistenceResult<T> = std::result::Result<T, PersistenceError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Crawler, CrawlerBuilder};
pub use extract::PageData;
pub use frontier::{CrawlTask, Frontier};
pub use scheduler::CrawlReport;
pub use sink::{CrawlResult, Sink};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_for_page_local_errors() {
        let err = CrawlError::Timeout {
            url: "https://example.com/".into(),
        };
        assert_eq!(err.category(), Some(ErrorCategory::Timeout));

        let err = CrawlError::Network {
            url: "https://example.com/".into(),
            message: "connection reset".into(),
        };
        assert_eq!(err.category(), Some(ErrorCategory::Network));

        let err = CrawlError::Response {
            url: "https://example.com/missing".into(),
            status: 404,
        };
        assert_eq!(err.category(), Some(ErrorCategory::Response));
    }

    #[test]
    fn test_fatal_errors_have_no_category() {
        let err = CrawlError::Config(ConfigError::Validation("bad".into()));
        assert!(err.category().is_none());
        assert!(CrawlError::Cancelled.category().is_none());
    }
}
