//! Type definitions for the pairing engine
//!
//! Contains the engine configuration and the report produced at shutdown.

use std::time::Duration;

use super::index::IndexBounds;
use super::lifecycle::{StopReason, TerminationPolicy};
use crate::record::{Record, DEFAULT_ALERT_THRESHOLD};
use crate::stats::ProcessingStats;

/// Default bounded wait of an idle worker on an empty queue
pub const DEFAULT_IDLE_BACKOFF_MS: u64 = 500;

/// How often the supervisor re-evaluates the termination policy
pub const DEFAULT_SUPERVISOR_POLL_MS: u64 = 50;

/// One worker per core, minus one for the line source, never below one
pub fn default_worker_count() -> usize {
    num_cpus::get().saturating_sub(1).max(1)
}

/// Configuration for the pairing engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub num_workers: usize,
    pub alert_threshold: u64,
    pub idle_backoff: Duration,
    pub policy: TerminationPolicy,
    pub bounds: IndexBounds,
    pub supervisor_poll: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            num_workers: default_worker_count(),
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            idle_backoff: Duration::from_millis(DEFAULT_IDLE_BACKOFF_MS),
            policy: TerminationPolicy::Drain,
            bounds: IndexBounds::unbounded(),
            supervisor_poll: Duration::from_millis(DEFAULT_SUPERVISOR_POLL_MS),
        }
    }
}

impl EngineConfig {
    pub fn with_workers(mut self, num_workers: usize) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_threshold(mut self, alert_threshold: u64) -> Self {
        self.alert_threshold = alert_threshold;
        self
    }

    pub fn with_idle_backoff(mut self, idle_backoff: Duration) -> Self {
        self.idle_backoff = idle_backoff;
        self
    }

    pub fn with_policy(mut self, policy: TerminationPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_bounds(mut self, bounds: IndexBounds) -> Self {
        self.bounds = bounds;
        self
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stats: ProcessingStats,
    pub lines_enqueued: u64,
    /// Lines left in the queue when the pool stopped (non-zero only for a
    /// degraded run)
    pub unprocessed_lines: usize,
    /// Records still waiting for a counterpart, sorted by id
    pub orphans: Vec<Record>,
    pub evicted: u64,
    pub stop_reason: Option<StopReason>,
    pub workers_started: usize,
    /// Workers whose thread ended by panic
    pub workers_failed: usize,
    pub degraded: bool,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn orphan_ids(&self) -> Vec<&str> {
        self.orphans.iter().map(|r| r.id.as_str()).collect()
    }
}
