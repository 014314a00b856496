//! Conversational history and distilled-memory persistence (§9.2).
//! Append-only history plus a vector-indexed fact store, backed by a single
//! SQLite database -- DDL-in-const-string and idempotent-schema, the same
//! shape as the teacher's `memory::schema`/`memory::sqlite` pair.
//!
//! Unlike every other output adapter, construction here is deliberately
//! non-fatal: a database that fails to open or migrate drops the adapter
//! into a degraded mode (every write silently becomes a no-op, logged once
//! at startup) rather than aborting the whole process, since losing the
//! conversation log is recoverable but an assistant that cannot boot is
//! not (§9.2, the exception to the fail-fast construction rule).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::{Connection, params};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::buddy::adapters::traits::OutputAdapter;
use crate::buddy::event::{Event, OutputKind};
use crate::buddy::queue::PriorityQueue;
use crate::buddy::router::RouteTarget;

const DB_FILENAME: &str = "buddy.db";
const EMBEDDING_DIM: usize = 64;

const SCHEMA_SQL: &str = r#"
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS conversation_history (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    role       TEXT NOT NULL,
    text       TEXT NOT NULL,
    processed  INTEGER NOT NULL DEFAULT 0,
    created_at REAL NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_processed ON conversation_history(processed);

CREATE TABLE IF NOT EXISTS memory_facts (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    category   TEXT NOT NULL DEFAULT 'generale',
    notes      TEXT NOT NULL DEFAULT '',
    importance INTEGER NOT NULL DEFAULT 1,
    text       TEXT NOT NULL,
    created_at REAL NOT NULL
);
"#;

fn ensure_sqlite_vec_loaded() {
    use std::sync::Once;
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        // SAFETY: sqlite3_vec_init is a valid SQLite extension entry point
        // statically linked by the sqlite-vec crate; registering it as an
        // auto-extension is its documented activation path.
        unsafe {
            type ExtEntryPoint = unsafe extern "C" fn(
                *mut rusqlite::ffi::sqlite3,
                *mut *const i8,
                *const rusqlite::ffi::sqlite3_api_routines,
            ) -> i32;
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<
                *const (),
                ExtEntryPoint,
            >(sqlite_vec::sqlite3_vec_init as *const ())));
        }
    });
}

fn apply_vec_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS vec_facts USING vec0(fact_id INTEGER PRIMARY KEY, embedding FLOAT[{EMBEDDING_DIM}]);"
    ))
}

/// A cheap, deterministic bag-of-words hashing embedding. Stands in for a
/// learned sentence embedding model -- this crate carries no ML inference
/// stack, so fact retrieval trades semantic nuance for zero extra runtime
/// dependencies; see DESIGN.md.
fn hash_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0f32; EMBEDDING_DIM];
    for token in text.split_whitespace() {
        let mut hash: u64 = 1469598103934665603;
        for byte in token.as_bytes() {
            hash ^= *byte as u64;
            hash = hash.wrapping_mul(1099511628211);
        }
        let bucket = (hash as usize) % EMBEDDING_DIM;
        v[bucket] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

#[derive(Debug, Clone)]
pub struct HistoryRow {
    pub id: i64,
    pub role: String,
    pub text: String,
}

/// The database handle, usable directly by the distiller adapter without
/// going through the event/queue machinery.
pub struct PersistenceStore {
    conn: Option<Mutex<Connection>>,
}

impl PersistenceStore {
    pub fn open(root_dir: &Path) -> Self {
        match Self::try_open(root_dir) {
            Ok(conn) => PersistenceStore { conn: Some(Mutex::new(conn)) },
            Err(e) => {
                error!(error = %e, "persistence store failed to open; running in degraded (no-op) mode");
                PersistenceStore { conn: None }
            }
        }
    }

    fn try_open(root_dir: &Path) -> anyhow::Result<Connection> {
        ensure_sqlite_vec_loaded();
        std::fs::create_dir_all(root_dir)?;
        let db_path: PathBuf = root_dir.join(DB_FILENAME);
        let conn = Connection::open(&db_path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        apply_vec_schema(&conn)?;
        Ok(conn)
    }

    pub fn is_degraded(&self) -> bool {
        self.conn.is_none()
    }

    pub fn save_history(&self, role: &str, text: &str, created_at: f64) -> anyhow::Result<()> {
        let Some(conn) = &self.conn else { return Ok(()) };
        let conn = conn.lock().expect("persistence connection poisoned");
        conn.execute(
            "INSERT INTO conversation_history (role, text, created_at) VALUES (?1, ?2, ?3)",
            params![role, text, created_at],
        )?;
        Ok(())
    }

    pub fn save_fact(&self, category: Option<&str>, notes: Option<&str>, importance: Option<i64>, text: &str, created_at: f64) -> anyhow::Result<()> {
        let Some(conn) = &self.conn else { return Ok(()) };
        let category = category.unwrap_or("generale");
        let notes = notes.unwrap_or("");
        let importance = importance.unwrap_or(1);
        let conn = conn.lock().expect("persistence connection poisoned");
        conn.execute(
            "INSERT INTO memory_facts (category, notes, importance, text, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![category, notes, importance, text, created_at],
        )?;
        let fact_id = conn.last_insert_rowid();
        let embedding = hash_embedding(text);
        conn.execute(
            "INSERT OR REPLACE INTO vec_facts (fact_id, embedding) VALUES (?1, ?2)",
            params![fact_id, bytemuck_cast(&embedding)],
        )?;
        Ok(())
    }

    /// Fetch up to one unarchived conversation's worth of history -- in
    /// practice, all unprocessed rows oldest-first, matching the
    /// distiller's "one session at a time" draining loop (§9.2).
    pub fn fetch_unprocessed_history(&self, limit: usize) -> anyhow::Result<Vec<HistoryRow>> {
        let Some(conn) = &self.conn else { return Ok(Vec::new()) };
        let conn = conn.lock().expect("persistence connection poisoned");
        let mut stmt = conn.prepare(
            "SELECT id, role, text FROM conversation_history WHERE processed = 0 ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok(HistoryRow {
                    id: row.get(0)?,
                    role: row.get(1)?,
                    text: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn mark_history_processed(&self, ids: &[i64]) -> anyhow::Result<()> {
        let Some(conn) = &self.conn else { return Ok(()) };
        let conn = conn.lock().expect("persistence connection poisoned");
        for id in ids {
            conn.execute("UPDATE conversation_history SET processed = 1 WHERE id = ?1", params![id])?;
        }
        Ok(())
    }
}

/// Byte-cast a `&[f32]` into the raw little-endian blob sqlite-vec expects
/// for a `FLOAT[N]` column.
fn bytemuck_cast(values: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(values.len() * 4);
    for v in values {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

const HANDLED: &[OutputKind] = &[OutputKind::SaveHistory, OutputKind::SaveMemory];

pub struct PersistenceAdapter {
    id: &'static str,
    queue: Arc<PriorityQueue>,
    store: Arc<PersistenceStore>,
    cancel: Mutex<Option<CancellationToken>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl PersistenceAdapter {
    pub fn new(store: Arc<PersistenceStore>) -> Self {
        PersistenceAdapter {
            id: "persistence",
            queue: Arc::new(PriorityQueue::new(256)),
            store,
            cancel: Mutex::new(None),
            task: Mutex::new(None),
        }
    }
}

impl RouteTarget for PersistenceAdapter {
    fn name(&self) -> &str {
        self.id
    }

    fn offer(&self, event: Event) -> bool {
        self.queue.offer(event)
    }
}

#[async_trait]
impl OutputAdapter for PersistenceAdapter {
    fn id(&self) -> &'static str {
        self.id
    }

    fn handled_kinds(&self) -> &'static [OutputKind] {
        HANDLED
    }

    async fn start(&self) -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        *self.cancel.lock().expect("cancel mutex poisoned") = Some(cancel.clone());

        let queue = self.queue.clone();
        let store = self.store.clone();

        let handle = tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    () = cancel.cancelled() => break,
                    event = queue.dequeue() => event,
                };
                let result = match event.output_kind() {
                    Some(OutputKind::SaveHistory) => {
                        let role = event.meta_str("role").unwrap_or("user");
                        let text = event.content.as_text().unwrap_or_default();
                        store.save_history(role, text, event.timestamp)
                    }
                    Some(OutputKind::SaveMemory) => {
                        let category = event.meta_str("category");
                        let notes = event.meta_str("notes");
                        let importance = event.meta_f64("importance").map(|v| v as i64);
                        let text = event.content.as_text().unwrap_or_default();
                        store.save_fact(category, notes, importance, text, event.timestamp)
                    }
                    _ => Ok(()),
                };
                if let Err(e) = result {
                    warn!(error = %e, "persistence write failed, record dropped");
                }
            }
            debug!("persistence worker stopped");
        });

        *self.task.lock().expect("task mutex poisoned") = Some(handle);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        if let Some(cancel) = self.cancel.lock().expect("cancel mutex poisoned").take() {
            cancel.cancel();
        }
        if let Some(handle) = self.task.lock().expect("task mutex poisoned").take() {
            handle.await.ok();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buddy::event::EventContent;

    #[test]
    fn degraded_store_is_a_no_op_not_an_error() {
        let store = PersistenceStore { conn: None };
        assert!(store.is_degraded());
        assert!(store.save_history("user", "ciao", 0.0).is_ok());
        assert!(store.fetch_unprocessed_history(10).unwrap().is_empty());
    }

    #[test]
    fn save_and_fetch_history_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::open(dir.path());
        assert!(!store.is_degraded());
        store.save_history("user", "ciao buddy", 100.0).unwrap();
        store.save_history("assistant", "ciao!", 100.5).unwrap();

        let rows = store.fetch_unprocessed_history(10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].role, "user");

        store.mark_history_processed(&[rows[0].id]).unwrap();
        let remaining = store.fetch_unprocessed_history(10).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].role, "assistant");
    }

    #[test]
    fn save_fact_defaults_category_notes_and_importance() {
        let dir = tempfile::tempdir().unwrap();
        let store = PersistenceStore::open(dir.path());
        store.save_fact(None, None, None, "likes jazz", 10.0).unwrap();
    }

    #[tokio::test]
    async fn adapter_persists_save_history_events() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(PersistenceStore::open(dir.path()));
        let adapter = PersistenceAdapter::new(store.clone());
        adapter.start().await.unwrap();

        let event = Event::output(OutputKind::SaveHistory, EventContent::Text("ciao".into())).with_meta("role", "user");
        assert!(adapter.offer(event));
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let rows = store.fetch_unprocessed_history(10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].text, "ciao");

        adapter.stop().await.unwrap();
    }
}
