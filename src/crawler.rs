//! Crawler facade: builder, component wiring, run/resume entry points

use crate::config::{BackendKind, Config};
use crate::extract::{ExtractionRule, Extractor, LinkExtractionConfig};
use crate::fetch::{build_http_client, Fetcher, SessionCookieJar};
use crate::frontier::{Frontier, OfferOutcome};
use crate::limiter::RateLimiter;
use crate::middleware::{
    LoggingMiddleware, Middleware, MiddlewarePipeline, RateLimitMiddleware, StatsMiddleware,
    UserAgentMiddleware,
};
use crate::robots::RobotsRegistry;
use crate::scheduler::{CrawlReport, Scheduler};
use crate::session::{
    FilesystemBackend, MemoryBackend, ResumabilityService, SqliteBackend, StorageBackend,
};
use crate::sink::{CrawlResult, Sink};
use crate::stats::CrawlStats;
use crate::url::UrlFilter;
use crate::worker::WorkerContext;
use crate::{CrawlError, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Builds the storage backend selected by the configuration
pub fn backend_from_config(config: &Config) -> Result<Arc<dyn StorageBackend>> {
    let p = &config.persistence;
    Ok(match p.backend {
        BackendKind::Filesystem => Arc::new(FilesystemBackend::new(p.base_dir.clone())),
        BackendKind::Kv => Arc::new(MemoryBackend::new(p.key_prefix.clone())),
        BackendKind::Sqlite => Arc::new(SqliteBackend::open(std::path::Path::new(&p.db_path))?),
    })
}

/// Configurable construction of a [`Crawler`]
pub struct CrawlerBuilder {
    config: Config,
    config_hash: Option<String>,
    link_config: LinkExtractionConfig,
    extraction_rules: HashMap<String, ExtractionRule>,
    middlewares: Vec<Arc<dyn Middleware>>,
    sink: Option<Arc<dyn Sink>>,
    backend: Option<Arc<dyn StorageBackend>>,
}

impl CrawlerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            config_hash: None,
            link_config: LinkExtractionConfig::default(),
            extraction_rules: HashMap::new(),
            middlewares: Vec::new(),
            sink: None,
            backend: None,
        }
    }

    /// Hash recorded in persisted sessions for config-drift detection
    pub fn with_config_hash(mut self, hash: String) -> Self {
        self.config_hash = Some(hash);
        self
    }

    /// Where results are delivered; defaults to logging each page
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Appends a middleware after the built-in ones
    pub fn with_middleware(mut self, middleware: Arc<dyn Middleware>) -> Self {
        self.middlewares.push(middleware);
        self
    }

    pub fn with_link_extraction(mut self, config: LinkExtractionConfig) -> Self {
        self.link_config = config;
        self
    }

    /// Opt-in selector-driven data extraction
    pub fn with_extraction_rules(mut self, rules: HashMap<String, ExtractionRule>) -> Self {
        self.extraction_rules = rules;
        self
    }

    /// Overrides the backend chosen by the configuration
    pub fn with_backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<Crawler> {
        crate::config::validate(&self.config)?;
        let crawler_cfg = &self.config.crawler;

        let filter = UrlFilter::new(&self.config.filters)?;
        let frontier = Arc::new(Frontier::new(crawler_cfg, filter));

        let jar = Arc::new(SessionCookieJar::new());
        let user_agent = self.config.user_agent.header_value();
        let client = build_http_client(&user_agent, crawler_cfg.follow_redirects, jar)?;

        let stats = Arc::new(CrawlStats::new());
        let limiter = Arc::new(RateLimiter::new(
            crawler_cfg.max_requests_per_second_per_domain,
            crawler_cfg.burst_size,
        ));
        let robots = Arc::new(RobotsRegistry::new(
            client.clone(),
            user_agent.clone(),
            crawler_cfg.ignore_robots_txt,
            Duration::from_secs(crawler_cfg.robots_cache_ttl_secs),
            Duration::from_millis(crawler_cfg.max_robots_crawl_delay_ms),
        ));
        let fetcher = Arc::new(Fetcher::new(
            client,
            Duration::from_millis(crawler_cfg.timeout_ms),
            crawler_cfg.retries,
            Duration::from_millis(crawler_cfg.retry_delay_ms),
            Arc::clone(&stats),
        ));

        let cancel = CancellationToken::new();
        let mut pipeline = MiddlewarePipeline::new(vec![
            Arc::new(RateLimitMiddleware::new(
                Arc::clone(&limiter),
                Duration::from_millis(crawler_cfg.request_delay_ms),
                cancel.clone(),
            )),
            Arc::new(UserAgentMiddleware::new(user_agent)),
            Arc::new(LoggingMiddleware),
            Arc::new(StatsMiddleware::new(Arc::clone(&stats))),
        ]);
        for middleware in self.middlewares {
            pipeline.push(middleware);
        }

        let extractor = Arc::new(Extractor::new(&self.link_config, &self.extraction_rules)?);

        let sink: Arc<dyn Sink> = self.sink.unwrap_or_else(|| {
            Arc::new(|result: CrawlResult| {
                tracing::info!(
                    "Crawled {} ({}, depth {})",
                    result.page.url,
                    result.page.status,
                    result.depth
                );
            })
        });

        let backend = match (self.backend, self.config.persistence.enabled) {
            (Some(backend), _) => Some(backend),
            (None, true) => Some(backend_from_config(&self.config)?),
            (None, false) => None,
        };

        let ctx = Arc::new(WorkerContext {
            frontier: Arc::clone(&frontier),
            pipeline,
            fetcher,
            robots,
            limiter,
            extractor,
            sink,
            stats: Arc::clone(&stats),
            cancel: cancel.clone(),
            robots_recorded: std::sync::Mutex::new(std::collections::HashSet::new()),
        });

        let scheduler = Scheduler::new(
            Arc::clone(&frontier),
            Arc::clone(&ctx),
            crawler_cfg.max_concurrent_workers,
            crawler_cfg.max_concurrent_per_domain,
            Duration::from_millis(crawler_cfg.shutdown_grace_ms),
        );

        Ok(Crawler {
            config: self.config,
            config_hash: self.config_hash.unwrap_or_default(),
            frontier,
            scheduler,
            backend,
            stats,
            cancel,
        })
    }
}

/// A configured crawl, ready to run or resume
pub struct Crawler {
    config: Config,
    config_hash: String,
    frontier: Arc<Frontier>,
    scheduler: Scheduler,
    backend: Option<Arc<dyn StorageBackend>>,
    stats: Arc<CrawlStats>,
    cancel: CancellationToken,
}

impl Crawler {
    /// Starts a fresh crawl from the configured seeds
    pub async fn run(&self) -> Result<CrawlReport> {
        self.start(None).await
    }

    /// Resumes a persisted session; already-processed URLs are not
    /// fetched again
    pub async fn resume(&self, session_id: &str) -> Result<CrawlReport> {
        self.start(Some(session_id)).await
    }

    /// Token that cancels the crawl cooperatively; cancelling twice is a
    /// no-op
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn stats(&self) -> &CrawlStats {
        &self.stats
    }

    async fn start(&self, resume_id: Option<&str>) -> Result<CrawlReport> {
        let service = self.attach_session(resume_id).await?;

        for seed in &self.config.seeds {
            match self.frontier.offer(seed, 0, None, None) {
                OfferOutcome::Accepted => tracing::debug!("Seeded {}", seed),
                OfferOutcome::Duplicate => {
                    tracing::debug!("Seed {} already processed in this session", seed)
                }
                OfferOutcome::TooDeep | OfferOutcome::Draining => {}
                OfferOutcome::Filtered(reason) => {
                    tracing::warn!("Seed {} rejected by filters ({})", seed, reason)
                }
            }
        }

        let mut report = self.scheduler.run().await;

        if let Some(service) = service {
            report.session_id = Some(service.session().id.clone());
            if let Err(e) = service.finish().await {
                tracing::warn!("Failed to settle session state: {}", e);
            }
            if service.is_degraded() {
                tracing::warn!(
                    "Persistence was degraded during the run; the session may not be resumable"
                );
            }
        }

        self.stats.log_summary();
        Ok(report)
    }

    /// Wires resumability when enabled: creates or resumes the session and
    /// installs its observer on the frontier
    async fn attach_session(
        &self,
        resume_id: Option<&str>,
    ) -> Result<Option<ResumabilityService>> {
        let Some(backend) = &self.backend else {
            if resume_id.is_some() {
                return Err(CrawlError::Session(
                    "cannot resume: resumability is not enabled".to_string(),
                ));
            }
            return Ok(None);
        };

        let service = match resume_id {
            None => {
                ResumabilityService::create(
                    Arc::clone(backend),
                    &self.config.persistence,
                    self.config_hash.clone(),
                )
                .await?
            }
            Some(id) => {
                let (service, state) = ResumabilityService::resume(
                    Arc::clone(backend),
                    &self.config.persistence,
                    id,
                    self.config_hash.clone(),
                )
                .await?;
                self.frontier.restore(&state.domains, state.totals);
                service
            }
        };

        self.frontier.set_observer(service.observer());
        Ok(Some(service))
    }
}
