//! Crawl scheduler
//!
//! Orchestrates per-domain worker sets under global and per-domain
//! concurrency caps, detects completion and reports the outcome.
//!
//! Quiescence uses a two-phase check: the frontier's (queued, in-flight)
//! snapshot must read zero K consecutive times separated by a small
//! backoff, then stay zero across two further ticks. The in-flight counter
//! is incremented inside the same lock that dequeues a task, so a worker
//! can never hold a task invisible to this check, but the repeated
//! snapshots also cover offers racing in from finishing workers.

use crate::frontier::Frontier;
use crate::session::DomainStatus;
use crate::worker::{self, WorkerContext};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

const QUIESCENCE_CHECKS: u32 = 3;
const QUIESCENCE_BACKOFF: Duration = Duration::from_millis(25);
const IDLE_TICK: Duration = Duration::from_millis(20);

/// Per-domain slice of the completion report
#[derive(Debug, Clone)]
pub struct DomainReport {
    pub domain: String,
    pub pages: u64,
    pub errors: u64,
    pub status: DomainStatus,
}

/// What a finished crawl reports
#[derive(Debug, Clone)]
pub struct CrawlReport {
    pub session_id: Option<String>,
    pub pages: u64,
    pub errors: u64,
    pub cancelled: bool,
    pub elapsed: Duration,
    pub domains: Vec<DomainReport>,
}

pub struct Scheduler {
    frontier: Arc<Frontier>,
    ctx: Arc<WorkerContext>,
    max_workers: usize,
    per_domain: usize,
    shutdown_grace: Duration,
}

impl Scheduler {
    pub fn new(
        frontier: Arc<Frontier>,
        ctx: Arc<WorkerContext>,
        max_workers: usize,
        per_domain: usize,
        shutdown_grace: Duration,
    ) -> Self {
        Self {
            frontier,
            ctx,
            max_workers,
            per_domain,
            shutdown_grace,
        }
    }

    /// Runs the crawl to completion, cancellation, or quota exhaustion
    pub async fn run(&self) -> CrawlReport {
        let started = Instant::now();
        let slots = Arc::new(Semaphore::new(self.max_workers));
        let mut workers: JoinSet<()> = JoinSet::new();

        loop {
            if self.ctx.cancel.is_cancelled() {
                tracing::info!("Cancellation requested, stopping admission");
                break;
            }
            if self.frontier.global_quota_reached() {
                tracing::info!("Global page quota reached, stopping admission");
                break;
            }

            // Reap finished workers so the join set stays small.
            while workers.try_join_next().is_some() {}

            if !self.admit(&slots, &mut workers) {
                if self.is_quiescent().await {
                    break;
                }
                tokio::select! {
                    _ = self.ctx.cancel.cancelled() => {}
                    _ = tokio::time::sleep(IDLE_TICK) => {}
                }
            }
        }

        let cancelled = self.ctx.cancel.is_cancelled();
        self.unwind(workers, cancelled).await;

        if !cancelled {
            self.frontier.finish_all();
        }

        let totals = self.frontier.totals();
        let domains = self
            .frontier
            .domain_report()
            .into_iter()
            .map(|(domain, pages, errors, status)| DomainReport {
                domain,
                pages,
                errors,
                status,
            })
            .collect();

        CrawlReport {
            session_id: None,
            pages: totals.pages,
            errors: totals.errors,
            cancelled,
            elapsed: started.elapsed(),
            domains,
        }
    }

    /// Spawns workers for every domain with claimable work, bounded by the
    /// global worker budget. Returns whether anything was spawned.
    fn admit(&self, slots: &Arc<Semaphore>, workers: &mut JoinSet<()>) -> bool {
        let mut spawned = false;
        for domain in self.frontier.claimable_domains(self.per_domain) {
            let Ok(permit) = Arc::clone(slots).try_acquire_owned() else {
                // Global budget saturated; tasks stay queued.
                break;
            };
            let Some(task) = self.frontier.claim(&domain, self.per_domain) else {
                continue;
            };
            tracing::trace!(
                "Dispatching {} (depth {}, domain {})",
                task.url,
                task.depth,
                domain
            );
            let ctx = Arc::clone(&self.ctx);
            workers.spawn(async move {
                let _permit = permit;
                worker::run_task(ctx, task).await;
            });
            spawned = true;
        }
        spawned
    }

    /// Two-phase quiescence detection
    async fn is_quiescent(&self) -> bool {
        for check in 0..QUIESCENCE_CHECKS {
            let (queued, active) = self.frontier.load_snapshot();
            if queued != 0 || active != 0 {
                return false;
            }
            if check + 1 < QUIESCENCE_CHECKS {
                tokio::time::sleep(QUIESCENCE_BACKOFF).await;
            }
        }

        // Draining verification: nothing may reappear across two ticks.
        for _ in 0..2 {
            tokio::time::sleep(IDLE_TICK).await;
            let (queued, active) = self.frontier.load_snapshot();
            if queued != 0 || active != 0 {
                return false;
            }
        }
        tracing::debug!("Frontier quiescent, finishing crawl");
        true
    }

    /// Waits for in-flight workers to unwind; a cancelled crawl waits at
    /// most the shutdown grace period before aborting stragglers
    async fn unwind(&self, mut workers: JoinSet<()>, cancelled: bool) {
        if cancelled {
            let drained = tokio::time::timeout(self.shutdown_grace, async {
                while workers.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                tracing::warn!(
                    "Workers did not unwind within {:?}; aborting",
                    self.shutdown_grace
                );
                workers.abort_all();
                while workers.join_next().await.is_some() {}
            }
        } else {
            while workers.join_next().await.is_some() {}
        }
    }
}
