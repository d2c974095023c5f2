use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::{Cli, LogLevel, PolicyArg};
use crate::parallel::{
    default_worker_count, EngineConfig, IndexBounds, TerminationPolicy, DEFAULT_AWAIT_GRACE,
};
use crate::source::resolve_input_path;

/// Main configuration struct for pairlog
#[derive(Debug, Clone)]
pub struct PairlogConfig {
    pub input: InputConfig,
    pub engine: EngineConfig,
    pub store: StoreConfig,
    pub output: OutputConfig,
}

/// Input configuration
#[derive(Debug, Clone)]
pub struct InputConfig {
    pub path: PathBuf,
}

/// Store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub path: PathBuf,
}

/// Output configuration
#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub dump_orphans: bool,
    pub stats: bool,
    pub log_level: LogLevel,
}

/// `db/db-<epoch millis>.sqlite`, a fresh database per run
pub fn default_database_path() -> PathBuf {
    PathBuf::from("db").join(format!("db-{}.sqlite", chrono::Utc::now().timestamp_millis()))
}

impl PairlogConfig {
    /// Create configuration from CLI arguments
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let num_workers = cli.workers.unwrap_or_else(default_worker_count);
        if num_workers == 0 {
            bail!("--workers must be at least 1");
        }
        if cli.idle_ms == 0 {
            bail!("--idle-ms must be at least 1");
        }
        if cli.max_pending == Some(0) {
            bail!("--max-pending must be at least 1");
        }
        if cli.max_pending_age == Some(Duration::ZERO) {
            bail!("--max-pending-age must be greater than zero");
        }
        if cli.await_grace.is_some() && cli.policy != PolicyArg::AwaitPairs {
            bail!("--await-grace requires --policy await-pairs");
        }

        let policy = match cli.policy {
            PolicyArg::Drain => TerminationPolicy::Drain,
            PolicyArg::AwaitPairs => TerminationPolicy::AwaitPairs {
                grace: cli.await_grace.unwrap_or(DEFAULT_AWAIT_GRACE),
            },
        };

        let engine = EngineConfig::default()
            .with_workers(num_workers)
            .with_threshold(cli.threshold)
            .with_idle_backoff(Duration::from_millis(cli.idle_ms))
            .with_policy(policy)
            .with_bounds(IndexBounds {
                max_entries: cli.max_pending,
                max_age: cli.max_pending_age,
            });

        Ok(Self {
            input: InputConfig {
                path: resolve_input_path(&cli.input, &cli.input_file),
            },
            engine,
            store: StoreConfig {
                path: cli.database.clone().unwrap_or_else(default_database_path),
            },
            output: OutputConfig {
                dump_orphans: cli.dump_orphans,
                stats: cli.stats,
                log_level: cli.effective_log_level(),
            },
        })
    }
}
