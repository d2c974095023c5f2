// CLI-specific types and structures
// This module contains the command-line interface definitions

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PolicyArg {
    /// Stop once the input is read and the queue is drained; orphans stay reported
    #[default]
    Drain,
    /// Wait for unmatched ids to pair up, at most --await-grace after the input ends
    AwaitPairs,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

// CLI structure - contains all command-line arguments and options
#[derive(Parser, Debug)]
#[command(name = "pairlog")]
#[command(about = "Pair start/end log records by id and store their durations")]
#[command(
    long_about = "Pair start/end log records by id and store their durations\n\nEach input line is a JSON object with string fields id, type, host and an integer timestamp.\nThe two records sharing an id become one row (id, duration, type, host, alert) in an SQLite\ntable named events. Records whose id never shows up twice are reported as orphans.\n\nCOMMON EXAMPLES:\n  pairlog ./logs/                       reads ./logs/logfile.txt into db/db-<millis>.sqlite\n  pairlog ./logs/ events.sqlite --threshold 10 --stats\n  pairlog app.jsonl out.sqlite --dump-orphans > orphans.jsonl"
)]
#[command(author)]
#[command(version)]
#[command(args_override_self = true)]
pub struct Cli {
    /// Directory containing the input file, or the input file itself
    pub input: PathBuf,

    /// SQLite database to write pairs to (default: db/db-<epoch millis>.sqlite)
    pub database: Option<PathBuf>,

    /// Input file name looked up when INPUT is a directory
    #[arg(
        long = "input-file",
        default_value = crate::source::DEFAULT_INPUT_FILE,
        help_heading = "Input Options"
    )]
    pub input_file: String,

    /// Number of worker threads (default: available CPUs minus one, at least one)
    #[arg(short = 'w', long = "workers", help_heading = "Processing Options")]
    pub workers: Option<usize>,

    /// Pairs lasting longer than this are stored with alert set
    #[arg(
        short = 't',
        long = "threshold",
        default_value_t = crate::record::DEFAULT_ALERT_THRESHOLD,
        help_heading = "Processing Options"
    )]
    pub threshold: u64,

    /// How long an idle worker waits on an empty queue, in milliseconds
    #[arg(
        long = "idle-ms",
        default_value_t = crate::parallel::DEFAULT_IDLE_BACKOFF_MS,
        help_heading = "Processing Options"
    )]
    pub idle_ms: u64,

    /// Termination policy once the input is exhausted
    #[arg(
        long = "policy",
        value_enum,
        default_value = "drain",
        help_heading = "Processing Options"
    )]
    pub policy: PolicyArg,

    /// Longest wait for late counterparts under --policy await-pairs (e.g. 5s, 1m)
    #[arg(
        long = "await-grace",
        value_parser = humantime::parse_duration,
        help_heading = "Processing Options"
    )]
    pub await_grace: Option<Duration>,

    /// Keep at most this many unmatched records; the oldest is evicted beyond it
    #[arg(long = "max-pending", help_heading = "Index Options")]
    pub max_pending: Option<usize>,

    /// Evict unmatched records older than this (e.g. 30s, 10m)
    #[arg(
        long = "max-pending-age",
        value_parser = humantime::parse_duration,
        help_heading = "Index Options"
    )]
    pub max_pending_age: Option<Duration>,

    /// Print records left without a counterpart as JSON lines on stdout
    #[arg(long = "dump-orphans", help_heading = "Output Options")]
    pub dump_orphans: bool,

    /// Print a processing summary to stderr when done
    #[arg(short = 's', long = "stats", help_heading = "Output Options")]
    pub stats: bool,

    /// Log verbosity (RUST_LOG overrides it)
    #[arg(
        long = "log-level",
        value_enum,
        default_value = "info",
        help_heading = "Output Options"
    )]
    pub log_level: LogLevel,

    /// Only log errors
    #[arg(
        short = 'q',
        long = "quiet",
        conflicts_with = "log_level",
        help_heading = "Output Options"
    )]
    pub quiet: bool,

    /// Read defaults from this config file instead of the search locations
    #[arg(long = "config-file", help_heading = "Configuration Options")]
    pub config_file: Option<String>,

    /// Ignore all config files
    #[arg(long = "ignore-config", help_heading = "Configuration Options")]
    pub ignore_config: bool,

    /// Show config file locations and active defaults, then exit
    #[arg(long = "show-config", help_heading = "Configuration Options")]
    pub show_config: bool,
}

impl Cli {
    pub fn effective_log_level(&self) -> LogLevel {
        if self.quiet {
            LogLevel::Error
        } else {
            self.log_level
        }
    }
}
