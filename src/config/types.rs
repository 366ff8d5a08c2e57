use serde::Deserialize;

/// Main configuration structure for rivulet
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub crawler: CrawlerConfig,
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    pub filters: FilterConfig,
    pub persistence: PersistenceConfig,
    /// Seed URLs to start crawling from
    pub seeds: Vec<String>,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Global cap on emitted pages
    #[serde(rename = "max-pages")]
    pub max_pages: u64,

    /// Maximum depth to crawl from seed URLs (0 means seeds only)
    #[serde(rename = "max-depth")]
    pub max_depth: u32,

    /// Per-domain cap on emitted pages (0 means unlimited)
    #[serde(rename = "max-pages-per-domain")]
    pub max_pages_per_domain: u64,

    /// Minimum wait before each request issued by a worker (milliseconds)
    #[serde(rename = "request-delay-ms")]
    pub request_delay_ms: u64,

    /// Token refill rate for the per-domain rate limiter
    #[serde(rename = "max-requests-per-second-per-domain")]
    pub max_requests_per_second_per_domain: f64,

    /// Token bucket capacity; defaults to the refill rate when unset
    #[serde(rename = "burst-size")]
    pub burst_size: Option<u32>,

    /// Global cap on concurrently running workers
    #[serde(rename = "max-concurrent-workers")]
    pub max_concurrent_workers: usize,

    /// Per-domain cap on concurrently running workers
    #[serde(rename = "max-concurrent-per-domain")]
    pub max_concurrent_per_domain: usize,

    /// Skip robots.txt checks entirely
    #[serde(rename = "ignore-robots-txt")]
    pub ignore_robots_txt: bool,

    /// Cap applied to robots.txt Crawl-delay values (milliseconds)
    #[serde(rename = "max-robots-crawl-delay-ms")]
    pub max_robots_crawl_delay_ms: u64,

    /// Cache lifetime for fetched robots.txt files (seconds)
    #[serde(rename = "robots-cache-ttl-secs")]
    pub robots_cache_ttl_secs: u64,

    /// Follow HTTP redirects automatically (manual when false)
    #[serde(rename = "follow-redirects")]
    pub follow_redirects: bool,

    /// Canonicalize URLs before dedup
    #[serde(rename = "normalize-urls-for-deduplication")]
    pub normalize_urls_for_deduplication: bool,

    /// Drop trailing slash on non-root paths during normalization
    #[serde(rename = "normalize-trailing-slash")]
    pub normalize_trailing_slash: bool,

    /// Per-request deadline (milliseconds)
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Retry attempts on network/timeout errors
    pub retries: u32,

    /// Base delay of the exponential retry backoff (milliseconds)
    #[serde(rename = "retry-delay-ms")]
    pub retry_delay_ms: u64,

    /// How long cancellation waits for in-flight workers (milliseconds)
    #[serde(rename = "shutdown-grace-ms")]
    pub shutdown_grace_ms: u64,

    /// Consecutive page failures after which a domain is drained
    /// (0 means unlimited)
    #[serde(rename = "max-domain-errors")]
    pub max_domain_errors: u32,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_pages: 1000,
            max_depth: 2,
            max_pages_per_domain: 0,
            request_delay_ms: 0,
            max_requests_per_second_per_domain: 2.0,
            burst_size: None,
            max_concurrent_workers: 10,
            max_concurrent_per_domain: 1,
            ignore_robots_txt: false,
            max_robots_crawl_delay_ms: 30_000,
            robots_cache_ttl_secs: 3600,
            follow_redirects: true,
            normalize_urls_for_deduplication: true,
            normalize_trailing_slash: false,
            timeout_ms: 30_000,
            retries: 3,
            retry_delay_ms: 500,
            shutdown_grace_ms: 5_000,
            max_domain_errors: 0,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Name of the crawler
    pub name: String,

    /// Version of the crawler
    pub version: String,

    /// Optional URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: Option<String>,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            name: "rivulet".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: None,
        }
    }
}

impl UserAgentConfig {
    /// Composes the User-Agent header value.
    ///
    /// Format: `Name/Version (+contact-url)` when a contact URL is set,
    /// otherwise `Name/Version`.
    pub fn header_value(&self) -> String {
        match &self.contact_url {
            Some(contact) => format!("{}/{} (+{})", self.name, self.version, contact),
            None => format!("{}/{}", self.name, self.version),
        }
    }
}

/// URL admission configuration
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FilterConfig {
    /// Host allowlist; empty means all hosts admitted. Entries cover their
    /// subdomains.
    #[serde(rename = "allowed-domains")]
    pub allowed_domains: Vec<String>,

    /// Host blocklist; entries cover their subdomains
    #[serde(rename = "blocked-domains")]
    pub blocked_domains: Vec<String>,

    /// Regex patterns; any match rejects the URL
    #[serde(rename = "custom-url-filters")]
    pub custom_url_filters: Vec<String>,

    /// Per-category file extension filtering
    #[serde(rename = "file-extension-filters")]
    pub file_extension_filters: FileExtensionFilters,

    /// Flat list of additional extensions to skip (legacy)
    #[serde(rename = "skip-file-extensions")]
    pub skip_file_extensions: Vec<String>,

    /// Structural URL checks
    #[serde(rename = "technical-filters")]
    pub technical_filters: TechnicalFilters,
}

/// Extension category toggles; a true value rejects URLs in that category
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct FileExtensionFilters {
    pub archives: bool,
    pub images: bool,
    pub audio: bool,
    pub video: bool,
    pub office: bool,
    pub other: bool,
}

/// Structural URL checks
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TechnicalFilters {
    /// Reject non-http(s) schemes (javascript:, mailto:, ...)
    #[serde(rename = "filter-unsupported-schemes")]
    pub filter_unsupported_schemes: bool,

    /// Reject URLs that fail to parse
    #[serde(rename = "filter-malformed-urls")]
    pub filter_malformed_urls: bool,

    /// Reject URLs longer than `max-url-length`
    #[serde(rename = "filter-long-urls")]
    pub filter_long_urls: bool,

    #[serde(rename = "max-url-length")]
    pub max_url_length: usize,
}

impl Default for TechnicalFilters {
    fn default() -> Self {
        Self {
            filter_unsupported_schemes: true,
            filter_malformed_urls: true,
            filter_long_urls: true,
            max_url_length: 2048,
        }
    }
}

/// Crawl-state persistence configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Enable resumable sessions
    pub enabled: bool,

    /// Persistence strategy
    pub strategy: StrategyKind,

    /// Which backend stores the session
    pub backend: BackendKind,

    /// Base directory for the filesystem backend
    #[serde(rename = "base-dir")]
    pub base_dir: String,

    /// Database path for the sqlite backend
    #[serde(rename = "db-path")]
    pub db_path: String,

    /// Key prefix for the kv backend
    #[serde(rename = "key-prefix")]
    pub key_prefix: String,

    /// Hybrid strategy: snapshot after this many deltas
    #[serde(rename = "snapshot-every-events")]
    pub snapshot_every_events: u64,

    /// Hybrid strategy: snapshot at least this often (seconds)
    #[serde(rename = "snapshot-every-secs")]
    pub snapshot_every_secs: u64,

    /// Human-readable session name
    #[serde(rename = "session-name")]
    pub session_name: Option<String>,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: StrategyKind::Hybrid,
            backend: BackendKind::Filesystem,
            base_dir: "./rivulet-state".to_string(),
            db_path: "./rivulet-state.db".to_string(),
            key_prefix: "rivulet".to_string(),
            snapshot_every_events: 100,
            snapshot_every_secs: 30,
            session_name: None,
        }
    }
}

/// Persistence strategy selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Complete snapshot on every checkpoint
    FullState,
    /// Delta log only, compacted on completion
    Delta,
    /// Deltas plus periodic snapshots with compaction
    #[default]
    Hybrid,
}

/// Persistence backend selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Filesystem,
    Kv,
    Sqlite,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.crawler.max_depth, 2);
        assert_eq!(config.crawler.max_concurrent_per_domain, 1);
        assert!(config.crawler.normalize_urls_for_deduplication);
        assert!(!config.persistence.enabled);
        assert_eq!(config.persistence.strategy, StrategyKind::Hybrid);
        assert!(config.filters.technical_filters.filter_malformed_urls);
    }

    #[test]
    fn test_user_agent_header_value() {
        let ua = UserAgentConfig {
            name: "TestBot".to_string(),
            version: "1.0".to_string(),
            contact_url: Some("https://example.com/bot".to_string()),
        };
        assert_eq!(ua.header_value(), "TestBot/1.0 (+https://example.com/bot)");

        let plain = UserAgentConfig {
            name: "TestBot".to_string(),
            version: "1.0".to_string(),
            contact_url: None,
        };
        assert_eq!(plain.header_value(), "TestBot/1.0");
    }

    #[test]
    fn test_minimal_toml() {
        let config: Config = toml::from_str(
            r#"
seeds = ["https://example.com/"]

[crawler]
max-pages = 50
max-depth = 1
"#,
        )
        .unwrap();
        assert_eq!(config.seeds.len(), 1);
        assert_eq!(config.crawler.max_pages, 50);
        assert_eq!(config.crawler.max_depth, 1);
        // Unspecified fields fall back to defaults
        assert_eq!(config.crawler.retries, 3);
    }

    #[test]
    fn test_strategy_and_backend_parsing() {
        let config: Config = toml::from_str(
            r#"
[persistence]
enabled = true
strategy = "full-state"
backend = "sqlite"
"#,
        )
        .unwrap();
        assert_eq!(config.persistence.strategy, StrategyKind::FullState);
        assert_eq!(config.persistence.backend, BackendKind::Sqlite);
    }
}
