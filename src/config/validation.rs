//! Configuration validation
//!
//! Invalid configurations are fatal at startup, before any fetch happens.

use crate::config::types::Config;
use crate::ConfigError;
use url::Url;

/// Validates a parsed configuration
///
/// Checks performed:
/// - Worker counts are non-zero and per-domain does not exceed global
/// - Rate limit and timeout values are positive
/// - Seed URLs parse and use http(s)
/// - Custom URL filter regexes compile
/// - Persistence cadence values are non-zero when persistence is enabled
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let crawler = &config.crawler;

    if crawler.max_concurrent_workers == 0 {
        return Err(ConfigError::Validation(
            "max-concurrent-workers must be at least 1".to_string(),
        ));
    }

    if crawler.max_concurrent_per_domain == 0 {
        return Err(ConfigError::Validation(
            "max-concurrent-per-domain must be at least 1".to_string(),
        ));
    }

    if crawler.max_concurrent_per_domain > crawler.max_concurrent_workers {
        return Err(ConfigError::Validation(format!(
            "max-concurrent-per-domain ({}) exceeds max-concurrent-workers ({})",
            crawler.max_concurrent_per_domain, crawler.max_concurrent_workers
        )));
    }

    if crawler.max_requests_per_second_per_domain <= 0.0 {
        return Err(ConfigError::Validation(
            "max-requests-per-second-per-domain must be positive".to_string(),
        ));
    }

    if crawler.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "timeout-ms must be positive".to_string(),
        ));
    }

    if crawler.max_pages == 0 {
        return Err(ConfigError::Validation(
            "max-pages must be at least 1".to_string(),
        ));
    }

    for seed in &config.seeds {
        let url = Url::parse(seed)
            .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", seed, e)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::InvalidUrl(format!(
                "{}: only http and https seeds are supported",
                seed
            )));
        }
    }

    for pattern in &config.filters.custom_url_filters {
        regex::Regex::new(pattern)
            .map_err(|e| ConfigError::InvalidFilter(format!("{}: {}", pattern, e)))?;
    }

    if config.persistence.enabled {
        if config.persistence.snapshot_every_events == 0 {
            return Err(ConfigError::Validation(
                "snapshot-every-events must be at least 1".to_string(),
            ));
        }
        if config.persistence.snapshot_every_secs == 0 {
            return Err(ConfigError::Validation(
                "snapshot-every-secs must be at least 1".to_string(),
            ));
        }
    }

    Ok(())
}
