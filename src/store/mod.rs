//! Session & Memory Store: a single-process, concurrent persistent store
//! for sessions, messages, memory entries, opaque LLM history blobs, and
//! resumable tasks, backed by embedded SQLite with full-text search.
//!
//! Concurrency model follows the `Arc<Mutex<Connection>>` +
//! `spawn_blocking` pattern used for synchronous database handles in async
//! Rust: the mutex is only ever held for the duration of a single blocking
//! closure, never across an `.await`, so holding it serializes exactly the
//! operations the spec requires serialized (writes, and reads that
//! participate in a read-modify-write) without blocking the async runtime
//! on disk I/O.

pub mod error;
pub mod memory;
pub mod schema;
pub mod session;
pub mod tasks;

pub use error::{StoreError, StoreResult};
pub use memory::{MemoryCategory, MemoryEntry};
pub use session::{Message, MessageRole, Session, SessionStats, SCOPE_MAIN};
pub use tasks::{ResumableTask, TaskStatus};

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Opens (creating if necessary) the database at `path`, enables WAL
    /// mode with a 5 second busy timeout, turns on foreign-key
    /// enforcement, and ensures the schema exists. Migration strategy is
    /// additive-only: `CREATE TABLE/INDEX/TRIGGER IF NOT EXISTS` so
    /// reopening an existing database never loses data.
    pub async fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let conn = tokio::task::spawn_blocking(move || -> StoreResult<Connection> {
            let conn = Connection::open(&path)?;
            conn.execute_batch(
                "PRAGMA journal_mode=WAL;\n\
                 PRAGMA busy_timeout=5000;\n\
                 PRAGMA foreign_keys=ON;",
            )?;
            conn.execute_batch(schema::CREATE_TABLES)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::TaskJoin(e.to_string()))??;

        tracing::info!("session store opened");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory database, used by tests that don't need a file on disk.
    #[cfg(any(test, feature = "test-util"))]
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = tokio::task::spawn_blocking(|| -> StoreResult<Connection> {
            let conn = Connection::open_in_memory()?;
            conn.execute_batch("PRAGMA foreign_keys=ON;")?;
            conn.execute_batch(schema::CREATE_TABLES)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::TaskJoin(e.to_string()))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Runs `f` against the connection on a blocking thread, holding the
    /// mutex only for the closure's duration. Every store operation funnels
    /// through this so the serialization guarantee lives in one place.
    pub(crate) async fn run_blocking<F, R>(&self, f: F) -> StoreResult<R>
    where
        F: FnOnce(&Connection) -> StoreResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            f(&guard)
        })
        .await
        .map_err(|e| StoreError::TaskJoin(e.to_string()))?
    }

    /// Commits any pending WAL checkpoint and drops the handle. The store
    /// is the sole owner of the connection, so once this returns no other
    /// task can touch the database through this `Store` instance.
    pub async fn close(self) -> StoreResult<()> {
        self.run_blocking(|conn| {
            conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
            Ok(())
        })
        .await
    }
}
