//! Storage backend contract for session persistence

use crate::session::{CrawlState, SessionMeta, StateDelta};
use crate::PersistenceResult;
use async_trait::async_trait;

/// Relative latency class of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendLatency {
    Low,
    Medium,
    High,
}

/// What a backend supports
#[derive(Debug, Clone, Copy)]
pub struct BackendCapabilities {
    pub supports_delta: bool,
    pub supports_snapshot: bool,
    pub supports_streaming: bool,
    pub supports_concurrency: bool,
    pub latency: BackendLatency,
}

/// Pluggable persistence backend
///
/// `key` is always the session id. Implementations must keep deltas
/// retrievable in sequence order; callers guarantee writes for one session
/// are serialized.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn initialize(&self) -> PersistenceResult<()>;

    /// Releases backend resources; does not delete persisted sessions
    async fn cleanup(&self) -> PersistenceResult<()>;

    async fn save_state(&self, key: &str, state: &CrawlState) -> PersistenceResult<()>;

    async fn load_state(&self, key: &str) -> PersistenceResult<Option<CrawlState>>;

    /// Deletes the session: state, snapshot and deltas
    async fn delete_state(&self, key: &str) -> PersistenceResult<()>;

    async fn save_delta(&self, delta: &StateDelta) -> PersistenceResult<()>;

    async fn save_deltas(&self, deltas: &[StateDelta]) -> PersistenceResult<()> {
        for delta in deltas {
            self.save_delta(delta).await?;
        }
        Ok(())
    }

    /// Loads deltas with sequence strictly greater than `from_seq`,
    /// ordered by sequence
    async fn load_deltas(&self, key: &str, from_seq: u64) -> PersistenceResult<Vec<StateDelta>>;

    async fn save_snapshot(&self, key: &str, state: &CrawlState, seq: u64)
        -> PersistenceResult<()>;

    async fn load_latest_snapshot(&self, key: &str)
        -> PersistenceResult<Option<(CrawlState, u64)>>;

    /// Removes deltas with sequence strictly below `before_seq`
    async fn compact_deltas(&self, key: &str, before_seq: u64) -> PersistenceResult<()>;

    async fn list_sessions(&self) -> PersistenceResult<Vec<SessionMeta>>;

    fn capabilities(&self) -> BackendCapabilities;
}
