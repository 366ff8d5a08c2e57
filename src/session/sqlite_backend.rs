//! SQLite persistence backend
//!
//! Three tables: `sessions` (id, metadata, full state JSON), `deltas`
//! (session_id, sequence, payload) and `snapshots` (session_id, sequence,
//! payload). Session deletion runs in one transaction across all three.

use crate::session::backend::{BackendCapabilities, BackendLatency, StorageBackend};
use crate::session::{CrawlState, SessionMeta, StateDelta};
use crate::{PersistenceError, PersistenceResult};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS sessions (
    id          TEXT PRIMARY KEY,
    name        TEXT,
    created_at  TEXT NOT NULL,
    updated_at  INTEGER NOT NULL,
    state       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS deltas (
    session_id  TEXT NOT NULL,
    sequence    INTEGER NOT NULL,
    payload     TEXT NOT NULL,
    PRIMARY KEY (session_id, sequence)
);

CREATE TABLE IF NOT EXISTS snapshots (
    session_id  TEXT NOT NULL,
    sequence    INTEGER NOT NULL,
    payload     TEXT NOT NULL,
    PRIMARY KEY (session_id, sequence)
);
";

pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Opens (or creates) the database file
    pub fn open(path: &Path) -> PersistenceResult<Self> {
        let conn = Connection::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory database, for tests
    pub fn open_in_memory() -> PersistenceResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().expect("sqlite backend poisoned")
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn initialize(&self) -> PersistenceResult<()> {
        self.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    async fn cleanup(&self) -> PersistenceResult<()> {
        Ok(())
    }

    async fn save_state(&self, key: &str, state: &CrawlState) -> PersistenceResult<()> {
        let payload = serde_json::to_string(state)?;
        self.lock().execute(
            "INSERT INTO sessions (id, name, created_at, updated_at, state)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 updated_at = excluded.updated_at,
                 state = excluded.state",
            params![
                key,
                state.session.name,
                state.session.created_at.to_rfc3339(),
                Utc::now().timestamp_millis(),
                payload,
            ],
        )?;
        Ok(())
    }

    async fn load_state(&self, key: &str) -> PersistenceResult<Option<CrawlState>> {
        let payload: Option<String> = self
            .lock()
            .query_row(
                "SELECT state FROM sessions WHERE id = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(PersistenceError::from))
            .transpose()
    }

    async fn delete_state(&self, key: &str) -> PersistenceResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM snapshots WHERE session_id = ?1", params![key])?;
        tx.execute("DELETE FROM deltas WHERE session_id = ?1", params![key])?;
        tx.execute("DELETE FROM sessions WHERE id = ?1", params![key])?;
        tx.commit()?;
        Ok(())
    }

    async fn save_delta(&self, delta: &StateDelta) -> PersistenceResult<()> {
        let payload = serde_json::to_string(delta)?;
        self.lock().execute(
            "INSERT OR REPLACE INTO deltas (session_id, sequence, payload)
             VALUES (?1, ?2, ?3)",
            params![delta.session_id, delta.sequence as i64, payload],
        )?;
        Ok(())
    }

    async fn save_deltas(&self, deltas: &[StateDelta]) -> PersistenceResult<()> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT OR REPLACE INTO deltas (session_id, sequence, payload)
                 VALUES (?1, ?2, ?3)",
            )?;
            for delta in deltas {
                let payload = serde_json::to_string(delta)?;
                stmt.execute(params![delta.session_id, delta.sequence as i64, payload])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    async fn load_deltas(&self, key: &str, from_seq: u64) -> PersistenceResult<Vec<StateDelta>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT payload FROM deltas
             WHERE session_id = ?1 AND sequence > ?2
             ORDER BY sequence ASC",
        )?;
        let rows = stmt.query_map(params![key, from_seq as i64], |row| {
            row.get::<_, String>(0)
        })?;

        let mut deltas = Vec::new();
        for payload in rows {
            deltas.push(serde_json::from_str(&payload?)?);
        }
        Ok(deltas)
    }

    async fn save_snapshot(
        &self,
        key: &str,
        state: &CrawlState,
        seq: u64,
    ) -> PersistenceResult<()> {
        let payload = serde_json::to_string(state)?;
        self.lock().execute(
            "INSERT OR REPLACE INTO snapshots (session_id, sequence, payload)
             VALUES (?1, ?2, ?3)",
            params![key, seq as i64, payload],
        )?;
        Ok(())
    }

    async fn load_latest_snapshot(
        &self,
        key: &str,
    ) -> PersistenceResult<Option<(CrawlState, u64)>> {
        let row: Option<(String, i64)> = self
            .lock()
            .query_row(
                "SELECT payload, sequence FROM snapshots
                 WHERE session_id = ?1
                 ORDER BY sequence DESC LIMIT 1",
                params![key],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        row.map(|(payload, seq)| {
            serde_json::from_str(&payload)
                .map(|state| (state, seq as u64))
                .map_err(PersistenceError::from)
        })
        .transpose()
    }

    async fn compact_deltas(&self, key: &str, before_seq: u64) -> PersistenceResult<()> {
        self.lock().execute(
            "DELETE FROM deltas WHERE session_id = ?1 AND sequence < ?2",
            params![key, before_seq as i64],
        )?;
        Ok(())
    }

    async fn list_sessions(&self) -> PersistenceResult<Vec<SessionMeta>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT state FROM sessions ORDER BY updated_at ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

        let mut sessions = Vec::new();
        for payload in rows {
            let state: CrawlState = serde_json::from_str(&payload?)?;
            sessions.push(state.session);
        }
        Ok(sessions)
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_delta: true,
            supports_snapshot: true,
            supports_streaming: false,
            supports_concurrency: true,
            latency: BackendLatency::Low,
        }
    }
}
