//! Crawl frontier: per-domain FIFO queues plus seen-sets
//!
//! All queue and seen-set mutation goes through `offer` and `claim`, which
//! take the frontier lock, so concurrent offers of the same URL admit
//! exactly one task. Counters for quota enforcement live behind the same
//! lock: a claim reserves a page slot, a completion converts it into an
//! emitted page (or releases it for skipped tasks).

use crate::config::CrawlerConfig;
use crate::session::{
    DeltaObserver, DeltaOp, DomainSnapshot, DomainStatus, NoopObserver, Totals,
};
use crate::url::{dedup_key, extract_domain, UrlFilter};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use url::Url;

/// One unit of crawl work, consumed by exactly one worker
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CrawlTask {
    pub url: Url,
    /// Canonical form used as the dedup key
    pub normalized: String,
    pub domain: String,
    /// 0 for seeds
    pub depth: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Result of offering a candidate URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OfferOutcome {
    /// Admitted and enqueued
    Accepted,
    /// Already in the seen-set for its domain
    Duplicate,
    /// Rejected by the URL filter
    Filtered(&'static str),
    /// Beyond the depth limit
    TooDeep,
    /// The domain is draining or done
    Draining,
}

#[derive(Debug, Default)]
struct DomainQueue {
    queue: VecDeque<CrawlTask>,
    seen: HashSet<String>,
    pages_emitted: u64,
    errors: u64,
    consecutive_errors: u32,
    active: usize,
    status: DomainStatus,
}

#[derive(Debug, Default)]
struct FrontierInner {
    domains: HashMap<String, DomainQueue>,
    pages_total: u64,
    errors_total: u64,
    inflight: usize,
}

/// How a claimed task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskDisposition {
    /// A successful CrawlResult was delivered
    Emitted,
    /// A failed CrawlResult was delivered
    Failed,
    /// No result was delivered (robots denial, middleware drop, cancel)
    Skipped,
}

/// Dedup-and-queue fabric of to-be-fetched tasks
pub struct Frontier {
    inner: Mutex<FrontierInner>,
    filter: UrlFilter,
    normalize: bool,
    drop_trailing_slash: bool,
    max_depth: u32,
    max_pages: u64,
    max_pages_per_domain: u64,
    max_domain_errors: u32,
    observer: RwLock<Arc<dyn DeltaObserver>>,
}

impl Frontier {
    pub fn new(config: &CrawlerConfig, filter: UrlFilter) -> Self {
        Self {
            inner: Mutex::new(FrontierInner::default()),
            filter,
            normalize: config.normalize_urls_for_deduplication,
            drop_trailing_slash: config.normalize_trailing_slash,
            max_depth: config.max_depth,
            max_pages: config.max_pages,
            max_pages_per_domain: config.max_pages_per_domain,
            max_domain_errors: config.max_domain_errors,
            observer: RwLock::new(Arc::new(NoopObserver)),
        }
    }

    /// Installs the delta observer; a no-op observer is used until then
    pub fn set_observer(&self, observer: Arc<dyn DeltaObserver>) {
        *self.observer.write().expect("observer lock poisoned") = observer;
    }

    fn observer(&self) -> Arc<dyn DeltaObserver> {
        Arc::clone(&self.observer.read().expect("observer lock poisoned"))
    }

    /// Offers a candidate URL to the frontier
    ///
    /// Accepts iff the URL passes the filter, its depth is within bounds,
    /// and its canonical form has not been seen for its domain. Exactly one
    /// of N concurrent offers of the same URL is accepted.
    pub fn offer(
        &self,
        raw: &str,
        depth: u32,
        parent: Option<String>,
        metadata: Option<serde_json::Value>,
    ) -> OfferOutcome {
        let url = match self.filter.admit(raw) {
            Ok(url) => url,
            Err(verdict) => return OfferOutcome::Filtered(verdict.reason),
        };

        if depth > self.max_depth {
            return OfferOutcome::TooDeep;
        }

        let Some(domain) = extract_domain(&url) else {
            return OfferOutcome::Filtered("missing-host");
        };
        let normalized = dedup_key(&url, self.normalize, self.drop_trailing_slash);

        let task = CrawlTask {
            url,
            normalized,
            domain,
            depth,
            parent,
            metadata,
        };

        {
            let mut inner = self.inner.lock().expect("frontier lock poisoned");
            let entry = inner.domains.entry(task.domain.clone()).or_default();

            if entry.status != DomainStatus::Running {
                return OfferOutcome::Draining;
            }
            if !entry.seen.insert(task.normalized.clone()) {
                return OfferOutcome::Duplicate;
            }
            entry.queue.push_back(task.clone());
        }

        self.observer().record(DeltaOp::Enqueue { task });
        OfferOutcome::Accepted
    }

    /// Claims the next task for a domain, reserving a worker slot and a
    /// page slot
    ///
    /// Returns None when the domain has nothing claimable: empty queue,
    /// per-domain concurrency at `max_active`, domain not running, or a
    /// page quota would be exceeded.
    pub fn claim(&self, domain: &str, max_active: usize) -> Option<CrawlTask> {
        let (task, quota_hit) = {
            let mut inner = self.inner.lock().expect("frontier lock poisoned");

            if inner.pages_total + inner.inflight as u64 >= self.max_pages {
                return None;
            }

            let entry = inner.domains.get_mut(domain)?;
            if entry.status != DomainStatus::Running
                || entry.active >= max_active
                || entry.queue.is_empty()
            {
                return None;
            }

            let domain_budget_spent = entry.pages_emitted + entry.active as u64;
            if self.max_pages_per_domain > 0 && domain_budget_spent >= self.max_pages_per_domain
            {
                entry.status = DomainStatus::Draining;
                (None, true)
            } else {
                let task = entry.queue.pop_front()?;
                entry.active += 1;
                inner.inflight += 1;
                (Some(task), false)
            }
        };

        if quota_hit {
            tracing::info!("Domain {} reached its page quota, draining", domain);
            self.observer().record(DeltaOp::QuotaReached {
                domain: domain.to_string(),
            });
            return None;
        }

        let task = task?;
        self.observer().record(DeltaOp::DequeueStart {
            domain: task.domain.clone(),
            normalized: task.normalized.clone(),
        });
        Some(task)
    }

    /// Finishes a claimed task, releasing its worker slot and settling the
    /// page-slot reservation
    pub fn complete(&self, task: &CrawlTask, disposition: TaskDisposition) {
        let drained = {
            let mut inner = self.inner.lock().expect("frontier lock poisoned");
            inner.inflight = inner.inflight.saturating_sub(1);

            match disposition {
                TaskDisposition::Emitted => {
                    inner.pages_total += 1;
                }
                TaskDisposition::Failed => {
                    inner.pages_total += 1;
                    inner.errors_total += 1;
                }
                TaskDisposition::Skipped => {}
            }

            let entry = inner.domains.entry(task.domain.clone()).or_default();
            entry.active = entry.active.saturating_sub(1);

            match disposition {
                TaskDisposition::Emitted => {
                    entry.pages_emitted += 1;
                    entry.consecutive_errors = 0;
                }
                TaskDisposition::Failed => {
                    entry.pages_emitted += 1;
                    entry.errors += 1;
                    entry.consecutive_errors += 1;
                }
                TaskDisposition::Skipped => {}
            }

            let error_budget_spent = self.max_domain_errors > 0
                && entry.consecutive_errors >= self.max_domain_errors
                && entry.status == DomainStatus::Running;
            if error_budget_spent {
                entry.status = DomainStatus::Draining;
            }
            error_budget_spent
        };

        if drained {
            tracing::warn!(
                "Domain {} exceeded its error budget, draining",
                task.domain
            );
        }

        match disposition {
            TaskDisposition::Emitted => self.observer().record(DeltaOp::PageComplete {
                domain: task.domain.clone(),
                normalized: task.normalized.clone(),
            }),
            TaskDisposition::Failed => self.observer().record(DeltaOp::PageFailed {
                domain: task.domain.clone(),
                normalized: task.normalized.clone(),
            }),
            TaskDisposition::Skipped => {}
        }
    }

    /// Forwards a robots observation to the delta observer
    pub fn record_robots(&self, origin: String, crawl_delay_ms: Option<u64>) {
        self.observer().record(DeltaOp::RobotsUpdated {
            origin,
            crawl_delay_ms,
        });
    }

    /// Domains that currently have claimable work
    pub fn claimable_domains(&self, max_active: usize) -> Vec<String> {
        let inner = self.inner.lock().expect("frontier lock poisoned");
        inner
            .domains
            .iter()
            .filter(|(_, q)| {
                q.status == DomainStatus::Running
                    && !q.queue.is_empty()
                    && q.active < max_active
            })
            .map(|(d, _)| d.clone())
            .collect()
    }

    /// Total queued and in-flight work, for quiescence checks
    pub fn load_snapshot(&self) -> (usize, usize) {
        let inner = self.inner.lock().expect("frontier lock poisoned");
        let queued = inner.domains.values().map(|q| q.queue.len()).sum();
        (queued, inner.inflight)
    }

    /// True once the global page cap has been consumed
    pub fn global_quota_reached(&self) -> bool {
        let inner = self.inner.lock().expect("frontier lock poisoned");
        inner.pages_total >= self.max_pages
    }

    pub fn queue_size(&self, domain: &str) -> usize {
        let inner = self.inner.lock().expect("frontier lock poisoned");
        inner.domains.get(domain).map_or(0, |q| q.queue.len())
    }

    pub fn active_workers(&self, domain: &str) -> usize {
        let inner = self.inner.lock().expect("frontier lock poisoned");
        inner.domains.get(domain).map_or(0, |q| q.active)
    }

    pub fn pages_emitted(&self, domain: &str) -> u64 {
        let inner = self.inner.lock().expect("frontier lock poisoned");
        inner.domains.get(domain).map_or(0, |q| q.pages_emitted)
    }

    pub fn totals(&self) -> Totals {
        let inner = self.inner.lock().expect("frontier lock poisoned");
        Totals {
            pages: inner.pages_total,
            errors: inner.errors_total,
        }
    }

    /// Marks every domain Done; used at crawl completion
    pub fn finish_all(&self) {
        let mut inner = self.inner.lock().expect("frontier lock poisoned");
        for queue in inner.domains.values_mut() {
            queue.status = DomainStatus::Done;
        }
    }

    /// Per-domain status for the completion report
    pub fn domain_report(&self) -> Vec<(String, u64, u64, DomainStatus)> {
        let inner = self.inner.lock().expect("frontier lock poisoned");
        let mut report: Vec<_> = inner
            .domains
            .iter()
            .map(|(d, q)| (d.clone(), q.pages_emitted, q.errors, q.status))
            .collect();
        report.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }

    /// Exports the frontier for a snapshot
    pub fn export(&self) -> (HashMap<String, DomainSnapshot>, Totals) {
        let inner = self.inner.lock().expect("frontier lock poisoned");
        let domains = inner
            .domains
            .iter()
            .map(|(name, q)| {
                let mut seen: Vec<String> = q.seen.iter().cloned().collect();
                seen.sort();
                (
                    name.clone(),
                    DomainSnapshot {
                        queue: q.queue.iter().cloned().collect(),
                        seen,
                        pages_emitted: q.pages_emitted,
                        errors: q.errors,
                        status: q.status,
                    },
                )
            })
            .collect();
        (
            domains,
            Totals {
                pages: inner.pages_total,
                errors: inner.errors_total,
            },
        )
    }

    /// Restores the frontier from persisted state
    ///
    /// Draining domains resume as running: their quota standing is
    /// re-evaluated against the current configuration on the next claim.
    pub fn restore(&self, domains: &HashMap<String, DomainSnapshot>, totals: Totals) {
        let mut inner = self.inner.lock().expect("frontier lock poisoned");
        inner.domains.clear();
        for (name, snapshot) in domains {
            inner.domains.insert(
                name.clone(),
                DomainQueue {
                    queue: snapshot.queue.iter().cloned().collect(),
                    seen: snapshot.seen.iter().cloned().collect(),
                    pages_emitted: snapshot.pages_emitted,
                    errors: snapshot.errors,
                    consecutive_errors: 0,
                    active: 0,
                    status: DomainStatus::Running,
                },
            );
        }
        inner.pages_total = totals.pages;
        inner.errors_total = totals.errors;
        inner.inflight = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FilterConfig;

    fn frontier_with(mut tweak: impl FnMut(&mut CrawlerConfig)) -> Frontier {
        let mut config = CrawlerConfig::default();
        tweak(&mut config);
        let filter = UrlFilter::new(&FilterConfig::default()).unwrap();
        Frontier::new(&config, filter)
    }

    fn frontier() -> Frontier {
        frontier_with(|_| {})
    }

    #[test]
    fn test_offer_accepts_and_dedups() {
        let frontier = frontier();
        assert_eq!(
            frontier.offer("https://example.com/a", 0, None, None),
            OfferOutcome::Accepted
        );
        assert_eq!(
            frontier.offer("https://example.com/a", 0, None, None),
            OfferOutcome::Duplicate
        );
        assert_eq!(frontier.queue_size("example.com"), 1);
    }

    #[test]
    fn test_offer_normalizes_for_dedup() {
        let frontier = frontier();
        assert_eq!(
            frontier.offer("http://h/?b=2&a=1", 0, None, None),
            OfferOutcome::Accepted
        );
        assert_eq!(
            frontier.offer("http://h/?a=1&b=2", 0, None, None),
            OfferOutcome::Duplicate
        );
    }

    #[test]
    fn test_offer_rejects_beyond_depth() {
        let frontier = frontier_with(|c| c.max_depth = 1);
        assert_eq!(
            frontier.offer("https://example.com/a", 2, None, None),
            OfferOutcome::TooDeep
        );
    }

    #[test]
    fn test_offer_filters_bad_urls() {
        let frontier = frontier();
        assert!(matches!(
            frontier.offer("javascript:void(0)", 0, None, None),
            OfferOutcome::Filtered(_)
        ));
    }

    #[test]
    fn test_fifo_order_within_domain() {
        let frontier = frontier();
        frontier.offer("https://example.com/1", 0, None, None);
        frontier.offer("https://example.com/2", 0, None, None);
        frontier.offer("https://example.com/3", 0, None, None);

        let first = frontier.claim("example.com", 8).unwrap();
        let second = frontier.claim("example.com", 8).unwrap();
        assert_eq!(first.url.path(), "/1");
        assert_eq!(second.url.path(), "/2");
    }

    #[test]
    fn test_claim_respects_per_domain_cap() {
        let frontier = frontier();
        frontier.offer("https://example.com/1", 0, None, None);
        frontier.offer("https://example.com/2", 0, None, None);

        let task = frontier.claim("example.com", 1).unwrap();
        assert!(frontier.claim("example.com", 1).is_none());

        frontier.complete(&task, TaskDisposition::Emitted);
        assert!(frontier.claim("example.com", 1).is_some());
    }

    #[test]
    fn test_claim_reserves_global_pages() {
        let frontier = frontier_with(|c| c.max_pages = 2);
        for i in 0..3 {
            frontier.offer(&format!("https://example.com/{}", i), 0, None, None);
        }

        let a = frontier.claim("example.com", 8).unwrap();
        let b = frontier.claim("example.com", 8).unwrap();
        // Two reservations exhaust max-pages=2.
        assert!(frontier.claim("example.com", 8).is_none());

        frontier.complete(&a, TaskDisposition::Emitted);
        frontier.complete(&b, TaskDisposition::Skipped);
        // The skipped task released its slot.
        assert!(frontier.claim("example.com", 8).is_some());
    }

    #[test]
    fn test_domain_quota_drains_domain() {
        let frontier = frontier_with(|c| c.max_pages_per_domain = 1);
        frontier.offer("https://example.com/1", 0, None, None);
        frontier.offer("https://example.com/2", 0, None, None);

        let task = frontier.claim("example.com", 8).unwrap();
        frontier.complete(&task, TaskDisposition::Emitted);

        assert!(frontier.claim("example.com", 8).is_none());
        // The drained domain refuses new offers too.
        assert_eq!(
            frontier.offer("https://example.com/3", 0, None, None),
            OfferOutcome::Draining
        );
    }

    #[test]
    fn test_error_budget_drains_domain() {
        let frontier = frontier_with(|c| c.max_domain_errors = 2);
        for i in 0..4 {
            frontier.offer(&format!("https://example.com/{}", i), 0, None, None);
        }

        for _ in 0..2 {
            let task = frontier.claim("example.com", 8).unwrap();
            frontier.complete(&task, TaskDisposition::Failed);
        }
        assert!(frontier.claim("example.com", 8).is_none());
    }

    #[test]
    fn test_success_resets_consecutive_errors() {
        let frontier = frontier_with(|c| c.max_domain_errors = 2);
        for i in 0..4 {
            frontier.offer(&format!("https://example.com/{}", i), 0, None, None);
        }

        let t1 = frontier.claim("example.com", 8).unwrap();
        frontier.complete(&t1, TaskDisposition::Failed);
        let t2 = frontier.claim("example.com", 8).unwrap();
        frontier.complete(&t2, TaskDisposition::Emitted);
        let t3 = frontier.claim("example.com", 8).unwrap();
        frontier.complete(&t3, TaskDisposition::Failed);

        // Only one consecutive failure; domain still running.
        assert!(frontier.claim("example.com", 8).is_some());
    }

    #[test]
    fn test_concurrent_offers_accept_exactly_once() {
        let frontier = Arc::new(frontier());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let frontier = Arc::clone(&frontier);
            handles.push(std::thread::spawn(move || {
                frontier.offer("https://example.com/same", 1, None, None)
            }));
        }
        let accepted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| *o == OfferOutcome::Accepted)
            .count();
        assert_eq!(accepted, 1);
        assert_eq!(frontier.queue_size("example.com"), 1);
    }

    #[test]
    fn test_export_restore_roundtrip() {
        let source = frontier();
        source.offer("https://a.com/1", 0, None, None);
        source.offer("https://a.com/2", 0, None, None);
        source.offer("https://b.com/1", 1, None, None);
        let task = source.claim("a.com", 8).unwrap();
        source.complete(&task, TaskDisposition::Emitted);

        let (domains, totals) = source.export();

        let restored = frontier();
        restored.restore(&domains, totals);

        assert_eq!(restored.queue_size("a.com"), 1);
        assert_eq!(restored.queue_size("b.com"), 1);
        assert_eq!(restored.pages_emitted("a.com"), 1);
        assert_eq!(restored.totals().pages, 1);
        // Restored seen-set still dedups.
        assert_eq!(
            restored.offer("https://a.com/1", 0, None, None),
            OfferOutcome::Duplicate
        );
    }

    #[test]
    fn test_load_snapshot_tracks_inflight() {
        let frontier = frontier();
        frontier.offer("https://example.com/1", 0, None, None);
        assert_eq!(frontier.load_snapshot(), (1, 0));

        let task = frontier.claim("example.com", 8).unwrap();
        assert_eq!(frontier.load_snapshot(), (0, 1));

        frontier.complete(&task, TaskDisposition::Emitted);
        assert_eq!(frontier.load_snapshot(), (0, 0));
    }
}
