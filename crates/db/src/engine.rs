//! The SQLite connection shared by a database and its collections.

use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::{Connection, InterruptHandle, OpenFlags};

use crate::error::StoreError;

/// Table recording declared indexes per collection.
pub(crate) const INDEX_TABLE: &str = "_bookstore_indexes";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const DONE: u8 = 2;
const CANCELLED: u8 = 3;

pub(crate) struct Engine {
    connection: Mutex<Connection>,
    interrupt: InterruptHandle,
    closed: AtomicBool,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}

impl Engine {
    pub(crate) fn in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory()?;
        Self::prepare(connection)
    }

    pub(crate) fn open_file(path: &Path) -> Result<Self, StoreError> {
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        let connection = Connection::open_with_flags(path, flags).map_err(|e| {
            StoreError::unavailable(format!("cannot open '{}': {e}", path.display()))
        })?;
        connection.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;
        Self::prepare(connection)
    }

    fn prepare(connection: Connection) -> Result<Self, StoreError> {
        connection.busy_timeout(BUSY_TIMEOUT)?;
        connection.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {INDEX_TABLE} (
                collection TEXT NOT NULL,
                name TEXT NOT NULL,
                keys TEXT NOT NULL,
                PRIMARY KEY (collection, name)
            );"
        ))?;
        Ok(Self {
            interrupt: connection.get_interrupt_handle(),
            connection: Mutex::new(connection),
            closed: AtomicBool::new(false),
        })
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run `operation` on the blocking pool with exclusive use of the connection.
    ///
    /// Dropping the returned future abandons the operation: one still queued
    /// for the connection never starts, and a running statement is interrupted.
    pub(crate) async fn run<T, F>(self: &Arc<Self>, operation: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
    {
        if self.is_closed() {
            return Err(StoreError::unavailable("database connection is closed"));
        }

        let state = Arc::new(AtomicU8::new(PENDING));
        let _abandon = AbandonOnDrop {
            engine: Arc::clone(self),
            state: Arc::clone(&state),
        };
        let engine = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || {
            let mut connection = engine
                .connection
                .lock()
                .map_err(|_| StoreError::unavailable("connection lock poisoned"))?;
            if state
                .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return Err(StoreError::Interrupted);
            }
            let result = operation(&mut connection);
            state.store(DONE, Ordering::Release);
            result
        });

        task.await
            .map_err(|e| StoreError::unavailable(format!("store task failed: {e}")))?
    }
}

struct AbandonOnDrop {
    engine: Arc<Engine>,
    state: Arc<AtomicU8>,
}

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        let previous =
            self.state
                .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire);
        if previous == Err(RUNNING) {
            tracing::debug!(target: "bookstore-db", "interrupting abandoned statement");
            self.engine.interrupt.interrupt();
        }
    }
}
