//! Call detail records and their persistence
//!
//! Evicted calls are summarized into [`CallRecord`]s on the handoff queue;
//! a dedicated writer thread drains the queue into SQLite. The queue's
//! mutex is the only synchronization shared between the dispatch path and
//! this worker.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::DateTime;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::call::{Call, HandoffQueue};

/// Finalized summary of one call, handed to persistence after eviction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    pub call_id: String,
    pub caller: String,
    pub called: String,
    /// Capture time of the first packet, seconds since the epoch
    pub start_time: u64,
    /// Seconds between first and last packet
    pub duration: u64,
    pub answered: bool,
    pub finished: bool,
    pub endpoints: usize,
    pub streams: usize,
}

impl CallRecord {
    pub fn from_call(call: &Call) -> Self {
        Self {
            call_id: call.call_id.clone(),
            caller: call.caller.clone(),
            called: call.called.clone(),
            start_time: call.first_packet,
            duration: call.duration(),
            answered: call.answered(),
            finished: call.finished(),
            endpoints: call.endpoints().len(),
            streams: call.streams().len(),
        }
    }
}

/// Thread-safe CDR store backed by SQLite.
#[derive(Clone)]
pub struct CdrStore {
    conn: Arc<Mutex<Connection>>,
}

impl CdrStore {
    /// Open or create the CDR database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open CDR database: {}", path.as_ref().display()))?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS cdr (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                call_id TEXT NOT NULL,
                caller TEXT NOT NULL,
                called TEXT NOT NULL,
                start_time TEXT NOT NULL,
                duration INTEGER NOT NULL,
                answered INTEGER NOT NULL,
                finished INTEGER NOT NULL,
                endpoints INTEGER NOT NULL,
                streams INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_cdr_call_id ON cdr(call_id);
            CREATE INDEX IF NOT EXISTS idx_cdr_start ON cdr(start_time);
            "#,
        )?;

        Ok(())
    }

    /// Insert one record.
    pub fn insert(&self, record: &CallRecord) -> Result<()> {
        let start = DateTime::from_timestamp(record.start_time as i64, 0)
            .map(|t| t.to_rfc3339())
            .unwrap_or_else(|| record.start_time.to_string());

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO cdr (call_id, caller, called, start_time, duration,
                              answered, finished, endpoints, streams)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.call_id,
                record.caller,
                record.called,
                start,
                record.duration as i64,
                record.answered,
                record.finished,
                record.endpoints as i64,
                record.streams as i64,
            ],
        )?;

        Ok(())
    }

    /// Number of stored records.
    pub fn count(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM cdr", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

/// Spawn the writer thread. It drains the handoff queue until `stop` is
/// set *and* the queue is empty, so records pushed during shutdown are
/// never lost.
pub fn spawn_writer(
    queue: HandoffQueue,
    store: CdrStore,
    stop: Arc<AtomicBool>,
) -> JoinHandle<u64> {
    thread::Builder::new()
        .name("cdr-writer".to_string())
        .spawn(move || {
            let mut written = 0u64;
            loop {
                let record = queue.lock().pop_front();
                match record {
                    Some(record) => {
                        debug!(call_id = %record.call_id, "storing cdr");
                        match store.insert(&record) {
                            Ok(()) => written += 1,
                            Err(e) => error!(call_id = %record.call_id, "cdr insert failed: {e:#}"),
                        }
                    }
                    None => {
                        if stop.load(Ordering::Relaxed) {
                            break;
                        }
                        thread::sleep(Duration::from_millis(100));
                    }
                }
            }
            info!(written, "cdr writer finished");
            written
        })
        .expect("failed to spawn cdr writer thread")
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;
    use std::collections::VecDeque;

    fn record(call_id: &str) -> CallRecord {
        CallRecord {
            call_id: call_id.to_string(),
            caller: "alice".to_string(),
            called: "bob".to_string(),
            start_time: 1_700_000_000,
            duration: 42,
            answered: true,
            finished: true,
            endpoints: 2,
            streams: 2,
        }
    }

    #[test]
    fn test_insert_and_count() {
        let store = CdrStore::open_memory().unwrap();
        store.insert(&record("a")).unwrap();
        store.insert(&record("b")).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_writer_drains_queue_before_stopping() {
        let store = CdrStore::open_memory().unwrap();
        let queue: HandoffQueue = Arc::new(PlMutex::new(VecDeque::new()));
        let stop = Arc::new(AtomicBool::new(false));

        {
            let mut q = queue.lock();
            q.push_back(record("one"));
            q.push_back(record("two"));
        }
        // stop is already requested; the queued records must still land
        stop.store(true, Ordering::Relaxed);

        let handle = spawn_writer(queue, store.clone(), stop);
        let written = handle.join().unwrap();
        assert_eq!(written, 2);
        assert_eq!(store.count().unwrap(), 2);
    }
}
