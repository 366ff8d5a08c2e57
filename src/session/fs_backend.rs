//! Filesystem persistence backend
//!
//! Layout: `<base>/sessions/<id>/state.json`, `snapshot.json`, and
//! `deltas/NNNNNN.json` with the sequence zero-padded to six digits.
//! Payloads are UTF-8 JSON.

use crate::session::backend::{BackendCapabilities, BackendLatency, StorageBackend};
use crate::session::{CrawlState, SessionMeta, StateDelta};
use crate::PersistenceResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct SnapshotFile {
    sequence: u64,
    state: CrawlState,
}

pub struct FilesystemBackend {
    base_dir: PathBuf,
}

impl FilesystemBackend {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn session_dir(&self, key: &str) -> PathBuf {
        self.base_dir.join("sessions").join(key)
    }

    fn deltas_dir(&self, key: &str) -> PathBuf {
        self.session_dir(key).join("deltas")
    }

    fn delta_path(&self, key: &str, seq: u64) -> PathBuf {
        self.deltas_dir(key).join(format!("{:06}.json", seq))
    }

    async fn write_json<T: Serialize>(path: &Path, value: &T) -> PersistenceResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(value)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }

    async fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> PersistenceResult<Option<T>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Parses `NNNNNN.json` into a sequence number
    fn seq_of(file_name: &str) -> Option<u64> {
        file_name.strip_suffix(".json")?.parse().ok()
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    async fn initialize(&self) -> PersistenceResult<()> {
        tokio::fs::create_dir_all(self.base_dir.join("sessions")).await?;
        Ok(())
    }

    async fn cleanup(&self) -> PersistenceResult<()> {
        Ok(())
    }

    async fn save_state(&self, key: &str, state: &CrawlState) -> PersistenceResult<()> {
        Self::write_json(&self.session_dir(key).join("state.json"), state).await
    }

    async fn load_state(&self, key: &str) -> PersistenceResult<Option<CrawlState>> {
        Self::read_json(&self.session_dir(key).join("state.json")).await
    }

    async fn delete_state(&self, key: &str) -> PersistenceResult<()> {
        let dir = self.session_dir(key);
        match tokio::fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_delta(&self, delta: &StateDelta) -> PersistenceResult<()> {
        Self::write_json(&self.delta_path(&delta.session_id, delta.sequence), delta).await
    }

    async fn load_deltas(&self, key: &str, from_seq: u64) -> PersistenceResult<Vec<StateDelta>> {
        let dir = self.deltas_dir(key);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sequences = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(seq) = Self::seq_of(name) {
                if seq > from_seq {
                    sequences.push(seq);
                }
            }
        }
        sequences.sort_unstable();

        let mut deltas = Vec::with_capacity(sequences.len());
        for seq in sequences {
            if let Some(delta) = Self::read_json(&self.delta_path(key, seq)).await? {
                deltas.push(delta);
            }
        }
        Ok(deltas)
    }

    async fn save_snapshot(
        &self,
        key: &str,
        state: &CrawlState,
        seq: u64,
    ) -> PersistenceResult<()> {
        let file = SnapshotFile {
            sequence: seq,
            state: state.clone(),
        };
        Self::write_json(&self.session_dir(key).join("snapshot.json"), &file).await
    }

    async fn load_latest_snapshot(
        &self,
        key: &str,
    ) -> PersistenceResult<Option<(CrawlState, u64)>> {
        let file: Option<SnapshotFile> =
            Self::read_json(&self.session_dir(key).join("snapshot.json")).await?;
        Ok(file.map(|f| (f.state, f.sequence)))
    }

    async fn compact_deltas(&self, key: &str, before_seq: u64) -> PersistenceResult<()> {
        let dir = self.deltas_dir(key);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if Self::seq_of(name).is_some_and(|seq| seq < before_seq) {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        Ok(())
    }

    async fn list_sessions(&self) -> PersistenceResult<Vec<SessionMeta>> {
        let sessions_dir = self.base_dir.join("sessions");
        let mut entries = match tokio::fs::read_dir(&sessions_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let state: Option<CrawlState> =
                Self::read_json(&entry.path().join("state.json")).await.ok().flatten();
            if let Some(state) = state {
                sessions.push(state.session);
            }
        }
        sessions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sessions)
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_delta: true,
            supports_snapshot: true,
            supports_streaming: false,
            supports_concurrency: false,
            latency: BackendLatency::Medium,
        }
    }
}
