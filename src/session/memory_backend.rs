//! In-memory KV/sorted-set persistence backend
//!
//! Models a Redis-style layout without a server: plain string keys for
//! state and snapshot payloads, an ordered set per session scored by delta
//! sequence, and a `<prefix>:sessions` ordered set of session ids scored by
//! last-update epoch milliseconds. Values are JSON strings, so swapping in
//! a networked KV store changes only the map operations. Doubles as the
//! backend for tests.

use crate::session::backend::{BackendCapabilities, BackendLatency, StorageBackend};
use crate::session::{CrawlState, SessionMeta, StateDelta};
use crate::{PersistenceError, PersistenceResult};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct KvStore {
    /// Plain string keys: `<prefix>:state:<id>`, `<prefix>:snapshot:<id>`
    strings: HashMap<String, String>,
    /// Ordered sets: `<prefix>:deltas:<id>` -> score(sequence) -> JSON
    zsets: HashMap<String, BTreeMap<u64, String>>,
    /// `<prefix>:sessions` -> session id -> last-update epoch ms
    sessions: BTreeMap<String, i64>,
}

pub struct MemoryBackend {
    prefix: String,
    store: Mutex<KvStore>,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
struct SnapshotValue {
    sequence: u64,
    state: CrawlState,
}

impl MemoryBackend {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            store: Mutex::new(KvStore::default()),
        }
    }

    fn state_key(&self, id: &str) -> String {
        format!("{}:state:{}", self.prefix, id)
    }

    fn snapshot_key(&self, id: &str) -> String {
        format!("{}:snapshot:{}", self.prefix, id)
    }

    fn deltas_key(&self, id: &str) -> String {
        format!("{}:deltas:{}", self.prefix, id)
    }

    fn touch(store: &mut KvStore, id: &str) {
        store
            .sessions
            .insert(id.to_string(), Utc::now().timestamp_millis());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, KvStore> {
        self.store.lock().expect("memory backend poisoned")
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn initialize(&self) -> PersistenceResult<()> {
        Ok(())
    }

    async fn cleanup(&self) -> PersistenceResult<()> {
        Ok(())
    }

    async fn save_state(&self, key: &str, state: &CrawlState) -> PersistenceResult<()> {
        let payload = serde_json::to_string(state)?;
        let mut store = self.lock();
        store.strings.insert(self.state_key(key), payload);
        Self::touch(&mut store, key);
        Ok(())
    }

    async fn load_state(&self, key: &str) -> PersistenceResult<Option<CrawlState>> {
        let store = self.lock();
        store
            .strings
            .get(&self.state_key(key))
            .map(|payload| serde_json::from_str(payload).map_err(PersistenceError::from))
            .transpose()
    }

    async fn delete_state(&self, key: &str) -> PersistenceResult<()> {
        let mut store = self.lock();
        store.strings.remove(&self.state_key(key));
        store.strings.remove(&self.snapshot_key(key));
        store.zsets.remove(&self.deltas_key(key));
        store.sessions.remove(key);
        Ok(())
    }

    async fn save_delta(&self, delta: &StateDelta) -> PersistenceResult<()> {
        let payload = serde_json::to_string(delta)?;
        let mut store = self.lock();
        store
            .zsets
            .entry(self.deltas_key(&delta.session_id))
            .or_default()
            .insert(delta.sequence, payload);
        Self::touch(&mut store, &delta.session_id);
        Ok(())
    }

    async fn load_deltas(&self, key: &str, from_seq: u64) -> PersistenceResult<Vec<StateDelta>> {
        let store = self.lock();
        let Some(zset) = store.zsets.get(&self.deltas_key(key)) else {
            return Ok(Vec::new());
        };
        zset.range(from_seq + 1..)
            .map(|(_, payload)| serde_json::from_str(payload).map_err(PersistenceError::from))
            .collect()
    }

    async fn save_snapshot(
        &self,
        key: &str,
        state: &CrawlState,
        seq: u64,
    ) -> PersistenceResult<()> {
        let payload = serde_json::to_string(&SnapshotValue {
            sequence: seq,
            state: state.clone(),
        })?;
        let mut store = self.lock();
        store.strings.insert(self.snapshot_key(key), payload);
        Self::touch(&mut store, key);
        Ok(())
    }

    async fn load_latest_snapshot(
        &self,
        key: &str,
    ) -> PersistenceResult<Option<(CrawlState, u64)>> {
        let store = self.lock();
        store
            .strings
            .get(&self.snapshot_key(key))
            .map(|payload| {
                serde_json::from_str::<SnapshotValue>(payload)
                    .map(|v| (v.state, v.sequence))
                    .map_err(PersistenceError::from)
            })
            .transpose()
    }

    async fn compact_deltas(&self, key: &str, before_seq: u64) -> PersistenceResult<()> {
        let mut store = self.lock();
        if let Some(zset) = store.zsets.get_mut(&self.deltas_key(key)) {
            let kept = zset.split_off(&before_seq);
            *zset = kept;
        }
        Ok(())
    }

    async fn list_sessions(&self) -> PersistenceResult<Vec<SessionMeta>> {
        let store = self.lock();
        let mut scored: Vec<(i64, SessionMeta)> = Vec::new();
        for (id, score) in &store.sessions {
            if let Some(payload) = store.strings.get(&self.state_key(id)) {
                let state: CrawlState = serde_json::from_str(payload)?;
                scored.push((*score, state.session));
            }
        }
        scored.sort_by_key(|(score, _)| *score);
        Ok(scored.into_iter().map(|(_, meta)| meta).collect())
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_delta: true,
            supports_snapshot: true,
            supports_streaming: true,
            supports_concurrency: true,
            latency: BackendLatency::Low,
        }
    }
}
