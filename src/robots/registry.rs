//! Per-origin robots.txt registry
//!
//! Fetches and caches robots.txt per origin with TTL expiry. Concurrent
//! misses for the same origin are collapsed into a single fetch by holding
//! the per-origin entry lock across the fetch. Fetch failures fail open:
//! everything is allowed and a short-lived negative entry is cached.

use crate::robots::parser::ParsedRobots;
use crate::url::origin_of;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use url::Url;

const NEGATIVE_TTL: Duration = Duration::from_secs(300);

/// Answer to a robots query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotsVerdict {
    pub allowed: bool,
    pub crawl_delay: Option<Duration>,
}

impl RobotsVerdict {
    fn allow_unlimited() -> Self {
        Self {
            allowed: true,
            crawl_delay: None,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    robots: ParsedRobots,
    fetched_at: Instant,
    ttl: Duration,
}

impl CacheEntry {
    fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() <= self.ttl
    }
}

/// Caching robots.txt registry
pub struct RobotsRegistry {
    client: Client,
    user_agent: String,
    ignore: bool,
    ttl: Duration,
    max_crawl_delay: Duration,
    origins: StdMutex<HashMap<String, Arc<Mutex<Option<CacheEntry>>>>>,
}

impl RobotsRegistry {
    pub fn new(
        client: Client,
        user_agent: String,
        ignore: bool,
        ttl: Duration,
        max_crawl_delay: Duration,
    ) -> Self {
        Self {
            client,
            user_agent,
            ignore,
            ttl,
            max_crawl_delay,
            origins: StdMutex::new(HashMap::new()),
        }
    }

    /// Checks whether a URL may be fetched and returns the effective
    /// crawl delay for its origin (already capped)
    ///
    /// Never errors: a robots.txt that cannot be fetched allows everything.
    pub async fn check(&self, url: &Url) -> RobotsVerdict {
        if self.ignore {
            return RobotsVerdict::allow_unlimited();
        }

        let Some(origin) = origin_of(url) else {
            return RobotsVerdict::allow_unlimited();
        };

        let slot = {
            let mut origins = self.origins.lock().expect("robots registry lock poisoned");
            Arc::clone(
                origins
                    .entry(origin.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(None))),
            )
        };

        // Holding the entry lock across the fetch gives single-flight per
        // origin: latecomers wait here and then read the cache.
        let mut entry = slot.lock().await;
        let needs_fetch = match entry.as_ref() {
            Some(cached) => !cached.is_fresh(),
            None => true,
        };

        if needs_fetch {
            *entry = Some(self.fetch_origin(&origin).await);
        }

        let cached = entry.as_ref().expect("entry populated above");
        let allowed = cached.robots.is_allowed(url.as_str(), &self.user_agent);
        let crawl_delay = cached
            .robots
            .crawl_delay(&self.user_agent)
            .map(|d| d.min(self.max_crawl_delay));

        RobotsVerdict {
            allowed,
            crawl_delay,
        }
    }

    async fn fetch_origin(&self, origin: &str) -> CacheEntry {
        let robots_url = format!("{}/robots.txt", origin);
        tracing::debug!("Fetching robots.txt from {}", robots_url);

        let response = self
            .client
            .get(&robots_url)
            .timeout(Duration::from_secs(10))
            .send()
            .await;
        match response {
            Ok(resp) if resp.status().is_success() => match resp.text().await {
                Ok(body) => CacheEntry {
                    robots: ParsedRobots::from_content(&body),
                    fetched_at: Instant::now(),
                    ttl: self.ttl,
                },
                Err(e) => {
                    tracing::warn!("Failed to read robots.txt body from {}: {}", origin, e);
                    self.negative_entry()
                }
            },
            Ok(resp) if resp.status().is_client_error() => {
                // Missing robots.txt means no restrictions; cache for the
                // full TTL.
                CacheEntry {
                    robots: ParsedRobots::allow_all(),
                    fetched_at: Instant::now(),
                    ttl: self.ttl,
                }
            }
            Ok(resp) => {
                tracing::warn!(
                    "robots.txt fetch for {} returned {}; failing open",
                    origin,
                    resp.status()
                );
                self.negative_entry()
            }
            Err(e) => {
                tracing::warn!("robots.txt fetch for {} failed: {}; failing open", origin, e);
                self.negative_entry()
            }
        }
    }

    fn negative_entry(&self) -> CacheEntry {
        CacheEntry {
            robots: ParsedRobots::allow_all(),
            fetched_at: Instant::now(),
            ttl: NEGATIVE_TTL.min(self.ttl),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn registry_for(ignore: bool) -> RobotsRegistry {
        RobotsRegistry::new(
            Client::new(),
            "TestBot/1.0".to_string(),
            ignore,
            Duration::from_secs(3600),
            Duration::from_secs(30),
        )
    }

    #[tokio::test]
    async fn test_ignore_skips_fetching() {
        let registry = registry_for(true);
        // No server exists at this address; ignoring robots never fetches.
        let url = Url::parse("http://127.0.0.1:1/page").unwrap();
        let verdict = registry.check(&url).await;
        assert!(verdict.allowed);
        assert_eq!(verdict.crawl_delay, None);
    }

    #[tokio::test]
    async fn test_disallow_honored() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("User-agent: *\nDisallow: /private"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let registry = registry_for(false);
        let blocked = Url::parse(&format!("{}/private/x", server.uri())).unwrap();
        let open = Url::parse(&format!("{}/public", server.uri())).unwrap();

        assert!(!registry.check(&blocked).await.allowed);
        // Second check hits the cache; the mock expects exactly one fetch.
        assert!(registry.check(&open).await.allowed);
    }

    #[tokio::test]
    async fn test_crawl_delay_capped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("User-agent: *\nCrawl-delay: 120"),
            )
            .mount(&server)
            .await;

        let registry = registry_for(false);
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        let verdict = registry.check(&url).await;
        assert!(verdict.allowed);
        assert_eq!(verdict.crawl_delay, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_missing_robots_allows() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let registry = registry_for(false);
        let url = Url::parse(&format!("{}/anything", server.uri())).unwrap();
        assert!(registry.check(&url).await.allowed);
    }

    #[tokio::test]
    async fn test_server_error_fails_open() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let registry = registry_for(false);
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();
        let verdict = registry.check(&url).await;
        assert!(verdict.allowed);
        assert_eq!(verdict.crawl_delay, None);
    }

    #[tokio::test]
    async fn test_concurrent_misses_single_fetch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("User-agent: *\nAllow: /"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let registry = Arc::new(registry_for(false));
        let url = Url::parse(&format!("{}/page", server.uri())).unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let url = url.clone();
            handles.push(tokio::spawn(async move { registry.check(&url).await }));
        }
        for handle in handles {
            assert!(handle.await.unwrap().allowed);
        }
    }
}
