use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Collection every finished session is appended to.
pub const SESSIONS_COLLECTION: &str = "experiment_sessions";

/// Identifier handed back by a sink for an appended document.
pub type DocumentId = String;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Stored document is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to create store directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only document store: one document in, one id out.
pub trait DocumentSink: Send + Sync {
    fn append(
        &self,
        collection: &str,
        document: &Value,
    ) -> std::result::Result<DocumentId, StoreError>;
}

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS documents (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        collection TEXT NOT NULL,
        body TEXT NOT NULL,
        created_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_documents_collection ON documents(collection);
"#;

/// SQLite-backed document store.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the store at `path`, creating parent directories.
    pub fn open(path: &Path) -> std::result::Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::with_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> std::result::Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> std::result::Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// All documents of a collection, oldest first.
    pub fn documents(&self, collection: &str) -> std::result::Result<Vec<Value>, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        let mut stmt =
            conn.prepare("SELECT body FROM documents WHERE collection = ?1 ORDER BY id")?;
        let bodies = stmt
            .query_map([collection], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        bodies
            .iter()
            .map(|body| serde_json::from_str(body).map_err(StoreError::from))
            .collect()
    }
}

impl DocumentSink for SqliteStore {
    fn append(
        &self,
        collection: &str,
        document: &Value,
    ) -> std::result::Result<DocumentId, StoreError> {
        let body = serde_json::to_string(document)?;
        let conn = self.conn.lock().map_err(|_| StoreError::Poisoned)?;
        conn.execute(
            "INSERT INTO documents (collection, body, created_at) VALUES (?1, ?2, ?3)",
            params![collection, body, Utc::now().to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid().to_string())
    }
}

/// In-process sink, used by tests and `--dry-run`.
#[derive(Debug, Default)]
pub struct MemorySink {
    documents: Mutex<Vec<(String, Value)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn documents(&self) -> Vec<(String, Value)> {
        self.documents
            .lock()
            .map(|docs| docs.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().map(|docs| docs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentSink for MemorySink {
    fn append(
        &self,
        collection: &str,
        document: &Value,
    ) -> std::result::Result<DocumentId, StoreError> {
        let mut docs = self.documents.lock().map_err(|_| StoreError::Poisoned)?;
        docs.push((collection.to_string(), document.clone()));
        Ok(format!("mem-{}", docs.len()))
    }
}

type AppendResult = std::result::Result<DocumentId, StoreError>;

/// An append running on a worker thread.
///
/// A worker that misses a deadline is not cancelled. Keep the handle and
/// [`wait`](Self::wait) on it again to learn whether its write landed.
#[derive(Debug)]
pub struct PendingAppend {
    rx: Receiver<AppendResult>,
}

impl PendingAppend {
    pub fn spawn(sink: Arc<dyn DocumentSink>, collection: &str, document: Value) -> Self {
        let (tx, rx) = mpsc::channel();
        let collection = collection.to_string();

        std::thread::spawn(move || {
            let result = sink.append(&collection, &document);
            // The handle may have been dropped after a timeout.
            let _ = tx.send(result);
        });

        Self { rx }
    }

    /// Block for at most `timeout`. A [`Error::PersistenceTimeout`] leaves the
    /// append in flight; any other outcome is final.
    pub fn wait(&self, timeout: Duration) -> Result<DocumentId> {
        match self.rx.recv_timeout(timeout) {
            Ok(Ok(id)) => {
                debug!(%id, "document appended");
                Ok(id)
            }
            Ok(Err(e)) => {
                warn!(error = %e, "document append failed");
                Err(Error::Store(e))
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(?timeout, "document append timed out");
                Err(Error::PersistenceTimeout(timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(Error::PersistenceWorker),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;
    use tempfile::tempdir;

    struct SlowSink(Duration);

    impl DocumentSink for SlowSink {
        fn append(&self, _: &str, _: &Value) -> std::result::Result<DocumentId, StoreError> {
            std::thread::sleep(self.0);
            Ok("late".into())
        }
    }

    struct BrokenSink;

    impl DocumentSink for BrokenSink {
        fn append(&self, _: &str, _: &Value) -> std::result::Result<DocumentId, StoreError> {
            Err(StoreError::Unavailable("offline".into()))
        }
    }

    #[test]
    fn sqlite_appends_and_reads_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let a = store.append("sessions", &json!({"n": 1})).unwrap();
        let b = store.append("sessions", &json!({"n": 2})).unwrap();
        store.append("other", &json!({"n": 3})).unwrap();
        assert_ne!(a, b);

        let docs = store.documents("sessions").unwrap();
        assert_eq!(docs, vec![json!({"n": 1}), json!({"n": 2})]);
        assert_eq!(store.documents("other").unwrap().len(), 1);
        assert!(store.documents("missing").unwrap().is_empty());
    }

    #[test]
    fn sqlite_file_store_creates_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("sessions.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.append("s", &json!("kept")).unwrap();
        }
        let reopened = SqliteStore::open(&path).unwrap();
        assert_eq!(reopened.documents("s").unwrap(), vec![json!("kept")]);
    }

    #[test]
    fn pending_append_passes_ids_through() {
        let sink = Arc::new(MemorySink::new());
        let pending = PendingAppend::spawn(sink.clone(), SESSIONS_COLLECTION, json!({"ok": true}));
        assert_eq!(pending.wait(Duration::from_secs(5)).unwrap(), "mem-1");
        assert_eq!(sink.documents()[0].0, SESSIONS_COLLECTION);
    }

    #[test]
    fn timed_out_append_can_be_awaited_again() {
        let sink = Arc::new(SlowSink(Duration::from_millis(150)));
        let pending = PendingAppend::spawn(sink, "s", json!({}));

        let err = pending.wait(Duration::from_millis(20)).unwrap_err();
        assert_matches!(err, Error::PersistenceTimeout(d) if d == Duration::from_millis(20));

        assert_eq!(pending.wait(Duration::from_secs(5)).unwrap(), "late");
    }

    #[test]
    fn sink_errors_surface() {
        let pending = PendingAppend::spawn(Arc::new(BrokenSink), "s", json!({}));
        let err = pending.wait(Duration::from_secs(1)).unwrap_err();
        assert_matches!(err, Error::Store(StoreError::Unavailable(_)));
        assert_matches!(
            pending.wait(Duration::from_millis(10)),
            Err(Error::PersistenceWorker)
        );
    }
}
