// tests/common/mod.rs
// Shared test utilities for integration tests
#![allow(dead_code)]

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

use pairlog::error::{ConnectionError, StoreWriteError};
use pairlog::record::PairedEvent;
use pairlog::store::{EventStore, PairStore, PairWriter};

/// Path of the pairlog binary built for this test run
pub fn pairlog_binary() -> &'static str {
    env!("CARGO_BIN_EXE_pairlog")
}

/// A command isolated from the user's config files: cwd and home both point
/// into `workdir`.
pub fn pairlog_command(workdir: &Path) -> Command {
    let mut cmd = Command::new(pairlog_binary());
    cmd.current_dir(workdir)
        .env("HOME", workdir)
        .env("XDG_CONFIG_HOME", workdir.join(".config"))
        .env_remove("RUST_LOG")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    cmd
}

/// Run pairlog in `workdir` and collect (stdout, stderr, exit code)
pub fn run_pairlog(workdir: &Path, args: &[&str]) -> (String, String, i32) {
    let output = pairlog_command(workdir)
        .args(args)
        .output()
        .expect("Failed to execute pairlog");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}

/// One JSON log line
pub fn log_line(id: &str, kind: &str, host: &str, timestamp: i64) -> String {
    format!(
        r#"{{"id":"{}","type":"{}","host":"{}","timestamp":{}}}"#,
        id, kind, host, timestamp
    )
}

/// Write `lines` to `<dir>/logfile.txt` and return the path
pub fn write_log_file(dir: &Path, lines: &[String]) -> PathBuf {
    let path = dir.join("logfile.txt");
    let mut content = lines.join("\n");
    content.push('\n');
    std::fs::write(&path, content).expect("Failed to write log file");
    path
}

/// All events stored in the database at `path`, ordered by id
pub fn read_events(path: &Path) -> Vec<PairedEvent> {
    EventStore::open(path)
        .expect("Failed to open database")
        .events()
        .expect("Failed to read events")
}

/// In-memory store shared by every writer it hands out
#[derive(Clone, Default)]
pub struct MemoryStore {
    pub events: Arc<Mutex<Vec<PairedEvent>>>,
    /// Writes for these ids panic inside the writer
    pub panic_on: Arc<HashSet<String>>,
    /// Writes for these ids fail with a store error
    pub fail_on: Arc<HashSet<String>>,
    /// When set, `connect` fails
    pub refuse_connections: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn panicking_on(ids: &[&str]) -> Self {
        Self {
            panic_on: Arc::new(ids.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }

    pub fn failing_on(ids: &[&str]) -> Self {
        Self {
            fail_on: Arc::new(ids.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }

    /// Stored events sorted by id
    pub fn sorted_events(&self) -> Vec<PairedEvent> {
        let mut events = self.events.lock().unwrap().clone();
        events.sort_by(|a, b| a.id.cmp(&b.id));
        events
    }

    pub fn stored_ids(&self) -> Vec<String> {
        self.sorted_events().into_iter().map(|e| e.id).collect()
    }
}

pub struct MemoryWriter {
    store: MemoryStore,
}

impl PairWriter for MemoryWriter {
    fn write_pair(&mut self, pair: &PairedEvent) -> Result<(), StoreWriteError> {
        if self.store.panic_on.contains(&pair.id) {
            panic!("writer exploded on {}", pair.id);
        }
        if self.store.fail_on.contains(&pair.id) {
            return Err(StoreWriteError {
                id: pair.id.clone(),
                source: rusqlite::Error::QueryReturnedNoRows,
            });
        }
        self.store.events.lock().unwrap().push(pair.clone());
        Ok(())
    }
}

impl PairStore for MemoryStore {
    type Writer = MemoryWriter;

    fn connect(&self) -> Result<MemoryWriter, ConnectionError> {
        if self.refuse_connections {
            return Err(ConnectionError {
                path: PathBuf::from(":memory:"),
                source: rusqlite::Error::InvalidQuery,
            });
        }
        Ok(MemoryWriter {
            store: self.clone(),
        })
    }
}
