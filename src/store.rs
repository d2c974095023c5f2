//! SQLite event store
//!
//! One `events` table, one row per completed pair. The schema is created
//! once by `EventStore::open`; every worker then gets its own connection
//! through `PairStore::connect`, and each pair is written in its own
//! `BEGIN IMMEDIATE` transaction.

use rusqlite::{params, Connection, TransactionBehavior};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{ConnectionError, SchemaError, StoreWriteError};
use crate::record::PairedEvent;

/// How long a connection waits for another worker's write lock
pub const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const CREATE_EVENTS_TABLE: &str = r#"
    CREATE TABLE IF NOT EXISTS events (
        id TEXT NOT NULL,
        duration INTEGER NOT NULL,
        type TEXT,
        host TEXT,
        alert INTEGER NOT NULL
    );
"#;

const INSERT_EVENT: &str =
    "INSERT INTO events (id, duration, type, host, alert) VALUES (?1, ?2, ?3, ?4, ?5)";

/// Persists completed pairs. Owned by exactly one worker.
pub trait PairWriter: Send {
    fn write_pair(&mut self, pair: &PairedEvent) -> Result<(), StoreWriteError>;
}

/// Hands out one writer per worker
pub trait PairStore: Send + Sync {
    type Writer: PairWriter + 'static;

    fn connect(&self) -> Result<Self::Writer, ConnectionError>;
}

#[derive(Debug, Clone)]
pub struct EventStore {
    path: PathBuf,
}

impl EventStore {
    /// Create the database file (and its parent directory) and the schema
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SchemaError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| SchemaError::Directory {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = open_connection(&path)?;
        conn.execute_batch(CREATE_EVENTS_TABLE).map_err(SchemaError::Create)?;

        tracing::info!(path = %path.display(), "created events table");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every stored pair, ordered by id
    pub fn events(&self) -> rusqlite::Result<Vec<PairedEvent>> {
        let conn = self.read_connection()?;
        let mut stmt =
            conn.prepare("SELECT id, duration, type, host, alert FROM events ORDER BY id, rowid")?;
        let rows = stmt.query_map([], |row| {
            let duration: i64 = row.get(1)?;
            Ok(PairedEvent {
                id: row.get(0)?,
                duration: duration.max(0) as u64,
                kind: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                host: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                alert: row.get(4)?,
            })
        })?;

        let mut events = Vec::new();
        for row in rows {
            events.push(row?);
        }
        Ok(events)
    }

    pub fn count(&self) -> rusqlite::Result<u64> {
        let conn = self.read_connection()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Readers may run while workers are still writing
    fn read_connection(&self) -> rusqlite::Result<Connection> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(conn)
    }
}

impl PairStore for EventStore {
    type Writer = SqliteWriter;

    fn connect(&self) -> Result<SqliteWriter, ConnectionError> {
        Ok(SqliteWriter {
            conn: open_connection(&self.path)?,
        })
    }
}

fn open_connection(path: &Path) -> Result<Connection, ConnectionError> {
    let wrap = |source| ConnectionError {
        path: path.to_path_buf(),
        source,
    };

    let conn = Connection::open(path).map_err(wrap)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(wrap)?;
    // WAL lets readers run while one of the workers holds the write lock.
    let _mode: String = conn
        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
        .map_err(wrap)?;
    conn.execute_batch("PRAGMA synchronous = NORMAL;").map_err(wrap)?;
    Ok(conn)
}

/// A worker-private SQLite connection
#[derive(Debug)]
pub struct SqliteWriter {
    conn: Connection,
}

impl SqliteWriter {
    fn insert(&mut self, pair: &PairedEvent) -> rusqlite::Result<()> {
        let duration = i64::try_from(pair.duration)
            .map_err(|e| rusqlite::Error::ToSqlConversionFailure(Box::new(e)))?;

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.prepare_cached(INSERT_EVENT)?.execute(params![
            pair.id,
            duration,
            pair.kind,
            pair.host,
            pair.alert
        ])?;
        tx.commit()
    }
}

impl PairWriter for SqliteWriter {
    fn write_pair(&mut self, pair: &PairedEvent) -> Result<(), StoreWriteError> {
        self.insert(pair).map_err(|source| StoreWriteError {
            id: pair.id.clone(),
            source,
        })
    }
}
