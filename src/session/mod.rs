//! Resumable session model
//!
//! A session is the persisted identity of one crawl: metadata, a full
//! crawl-state snapshot, and an ordered delta log. Replaying deltas newer
//! than the latest snapshot reconstructs the frontier and counters exactly.

mod backend;
mod fs_backend;
mod memory_backend;
mod service;
mod sqlite_backend;

pub use backend::{BackendCapabilities, BackendLatency, StorageBackend};
pub use fs_backend::FilesystemBackend;
pub use memory_backend::MemoryBackend;
pub use service::{DeltaObserver, NoopObserver, ResumabilityService};
pub use sqlite_backend::SqliteBackend;

use crate::frontier::CrawlTask;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Session identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SessionMeta {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl SessionMeta {
    /// Creates a session with a freshly generated id
    pub fn new(name: Option<String>) -> Self {
        Self {
            id: generate_session_id(),
            name,
            created_at: Utc::now(),
        }
    }
}

/// Generates a collision-resistant session id: UTC timestamp plus a random
/// suffix. Persisted ordering uses delta sequence numbers, never the id.
pub fn generate_session_id() -> String {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let suffix: u32 = rand::thread_rng().gen_range(0..0x1_0000);
    format!("{}-{:04x}", stamp, suffix)
}

/// One persisted mutation of the crawl state
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateDelta {
    pub session_id: String,
    /// Strictly increasing per session
    pub sequence: u64,
    #[serde(flatten)]
    pub op: DeltaOp,
}

/// The operation a delta records
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum DeltaOp {
    Enqueue {
        task: CrawlTask,
    },
    DequeueStart {
        domain: String,
        normalized: String,
    },
    PageComplete {
        domain: String,
        normalized: String,
    },
    PageFailed {
        domain: String,
        normalized: String,
    },
    QuotaReached {
        domain: String,
    },
    RobotsUpdated {
        origin: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        crawl_delay_ms: Option<u64>,
    },
}

/// Lifecycle of a domain inside the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DomainStatus {
    #[default]
    Running,
    Draining,
    Done,
}

/// Aggregate counters for a crawl
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Totals {
    pub pages: u64,
    pub errors: u64,
}

/// Persisted per-domain frontier state
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DomainSnapshot {
    pub queue: Vec<CrawlTask>,
    pub seen: Vec<String>,
    pub pages_emitted: u64,
    pub errors: u64,
    pub status: DomainStatus,
}

/// Complete persisted crawl state
///
/// Unknown fields are rejected on load so a corrupted or foreign payload
/// fails loudly instead of resuming a half-understood crawl.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct CrawlState {
    pub session: SessionMeta,
    pub config_hash: String,
    pub started_at: DateTime<Utc>,
    /// Sequence of the last delta folded into this state
    pub last_sequence: u64,
    pub totals: Totals,
    pub domains: HashMap<String, DomainSnapshot>,
}

impl CrawlState {
    pub fn new(session: SessionMeta, config_hash: String) -> Self {
        Self {
            session,
            config_hash,
            started_at: Utc::now(),
            last_sequence: 0,
            totals: Totals::default(),
            domains: HashMap::new(),
        }
    }

    /// Folds one delta into the state
    ///
    /// Deltas at or below `last_sequence` are skipped, which makes replay
    /// idempotent: applying the same log any number of times up to the same
    /// sequence yields the same state.
    pub fn apply(&mut self, delta: &StateDelta) {
        if delta.sequence <= self.last_sequence {
            return;
        }
        self.last_sequence = delta.sequence;

        match &delta.op {
            DeltaOp::Enqueue { task } => {
                let domain = self.domains.entry(task.domain.clone()).or_default();
                if !domain.seen.contains(&task.normalized) {
                    domain.seen.push(task.normalized.clone());
                    domain.queue.push(task.clone());
                }
            }
            // Dequeue-start is an audit record: a task claimed but never
            // completed stays queued so a resumed crawl retries it.
            DeltaOp::DequeueStart { .. } => {}
            DeltaOp::PageComplete { domain, normalized } => {
                self.totals.pages += 1;
                let entry = self.domains.entry(domain.clone()).or_default();
                entry.pages_emitted += 1;
                entry.queue.retain(|t| t.normalized != *normalized);
            }
            DeltaOp::PageFailed { domain, normalized } => {
                self.totals.pages += 1;
                self.totals.errors += 1;
                let entry = self.domains.entry(domain.clone()).or_default();
                entry.pages_emitted += 1;
                entry.errors += 1;
                entry.queue.retain(|t| t.normalized != *normalized);
            }
            DeltaOp::QuotaReached { domain } => {
                let entry = self.domains.entry(domain.clone()).or_default();
                entry.status = DomainStatus::Draining;
            }
            DeltaOp::RobotsUpdated { .. } => {}
        }
    }

    /// Folds an ordered batch of deltas
    pub fn apply_all<'a>(&mut self, deltas: impl IntoIterator<Item = &'a StateDelta>) {
        for delta in deltas {
            self.apply(delta);
        }
    }
}
