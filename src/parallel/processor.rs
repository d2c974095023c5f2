//! Main pairing engine
//!
//! Contains `PairingEngine`, which opens one store connection per worker and
//! starts the pool, and `RunningEngine`, which feeds and supervises it.

use crossbeam_channel::{never, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::index::PendingIndex;
use super::lifecycle::{LifecycleCoordinator, LifecycleState, StopReason};
use super::queue::WorkQueue;
use super::types::{EngineConfig, RunReport};
use super::worker::{worker_thread, WorkerContext};
use crate::error::{panic_message, EngineError};
use crate::platform::Ctrl;
use crate::record::Record;
use crate::stats::ProcessingStats;
use crate::store::PairStore;

/// Configured but not yet started engine
pub struct PairingEngine<S: PairStore> {
    config: EngineConfig,
    store: S,
}

impl<S: PairStore> PairingEngine<S> {
    pub fn new(config: EngineConfig, store: S) -> Self {
        Self { config, store }
    }

    /// Open every worker's connection, then spawn the pool. A connection
    /// failure aborts startup before any thread runs.
    pub fn start(self) -> Result<RunningEngine, EngineError> {
        if self.config.num_workers == 0 {
            return Err(EngineError::NoWorkers);
        }

        let mut writers = Vec::with_capacity(self.config.num_workers);
        for _ in 0..self.config.num_workers {
            writers.push(self.store.connect()?);
        }

        let queue = Arc::new(WorkQueue::new());
        let index = Arc::new(PendingIndex::with_bounds(self.config.bounds));
        let coordinator = Arc::new(LifecycleCoordinator::new(self.config.policy));

        let mut worker_handles = Vec::with_capacity(self.config.num_workers);
        for (worker_id, writer) in writers.into_iter().enumerate() {
            let ctx = WorkerContext {
                worker_id,
                queue: Arc::clone(&queue),
                index: Arc::clone(&index),
                coordinator: Arc::clone(&coordinator),
                writer,
                alert_threshold: self.config.alert_threshold,
                idle_backoff: self.config.idle_backoff,
            };

            let spawned = thread::Builder::new()
                .name(format!("pairlog-worker-{}", worker_id))
                .spawn(move || worker_thread(ctx));

            match spawned {
                Ok(handle) => worker_handles.push(handle),
                Err(source) => {
                    // Let the workers already running wind down before bailing out.
                    coordinator.request_stop();
                    for handle in worker_handles {
                        let _ = handle.join();
                    }
                    coordinator.mark_stopped();
                    return Err(EngineError::Spawn {
                        worker: worker_id,
                        source,
                    });
                }
            }
        }

        tracing::info!(
            workers = worker_handles.len(),
            policy = %self.config.policy,
            threshold = self.config.alert_threshold,
            "started workers"
        );

        Ok(RunningEngine {
            config: self.config,
            queue,
            index,
            coordinator,
            worker_handles,
            started_at: Instant::now(),
        })
    }
}

/// Cloneable handle used by a line source to feed the queue
#[derive(Debug, Clone)]
pub struct LineFeeder {
    queue: Arc<WorkQueue>,
    coordinator: Arc<LifecycleCoordinator>,
}

impl LineFeeder {
    /// Enqueue a line. Returns `false`, dropping the line, once the engine
    /// has stopped accepting input. An accepted line is always processed.
    pub fn enqueue(&self, line: impl Into<String>) -> bool {
        self.coordinator.admit(|| self.queue.enqueue(line)).is_some()
    }

    pub fn is_accepting(&self) -> bool {
        self.coordinator.is_running()
    }

    /// Signal that the source has no more lines
    pub fn finish(&self) {
        self.coordinator.mark_source_exhausted();
    }
}

/// A started pool of workers
pub struct RunningEngine {
    config: EngineConfig,
    queue: Arc<WorkQueue>,
    index: Arc<PendingIndex>,
    coordinator: Arc<LifecycleCoordinator>,
    worker_handles: Vec<JoinHandle<ProcessingStats>>,
    started_at: Instant,
}

impl RunningEngine {
    pub fn feeder(&self) -> LineFeeder {
        LineFeeder {
            queue: Arc::clone(&self.queue),
            coordinator: Arc::clone(&self.coordinator),
        }
    }

    pub fn enqueue(&self, line: impl Into<String>) -> bool {
        self.feeder().enqueue(line)
    }

    pub fn finish_input(&self) {
        self.coordinator.mark_source_exhausted();
    }

    /// External stop; idempotent
    pub fn request_stop(&self) -> bool {
        self.coordinator.request_stop()
    }

    pub fn coordinator(&self) -> &Arc<LifecycleCoordinator> {
        &self.coordinator
    }

    /// Records currently waiting for a counterpart
    pub fn pending_snapshot(&self) -> Vec<Record> {
        self.index.dump()
    }

    /// Supervise the pool until the termination policy, an external stop or
    /// a control message ends the run, then join every worker.
    pub fn wait(self, ctrl_rx: &Receiver<Ctrl>) -> RunReport {
        let poll = self.config.supervisor_poll;

        while self.coordinator.is_running() {
            if self.coordinator.evaluate(&self.queue, &self.index).is_some() {
                break;
            }

            if self.coordinator.live_workers() == 0
                && self.coordinator.started_workers() >= self.worker_handles.len()
            {
                tracing::error!(queued = self.queue.len(), "all workers exited; stopping");
                self.coordinator.stop_with(StopReason::PoolExhausted);
                break;
            }

            match ctrl_rx.recv_timeout(poll) {
                Ok(Ctrl::Shutdown) => {
                    self.coordinator.request_stop();
                }
                Ok(Ctrl::DumpPending) => self.log_progress(),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => thread::sleep(poll),
            }
        }

        self.join()
    }

    /// Supervise without any control channel
    pub fn run_to_completion(self) -> RunReport {
        self.wait(&never())
    }

    /// Stop accepting input, drain the queue and join the workers
    pub fn shutdown(self) -> RunReport {
        self.coordinator.request_stop();
        self.join()
    }

    fn log_progress(&self) {
        tracing::info!(
            state = ?self.coordinator.state(),
            queued = self.queue.len(),
            in_flight = self.queue.in_flight(),
            pending = self.index.len(),
            live_workers = self.coordinator.live_workers(),
            "pending index dump"
        );
        self.index.log_pending();
    }

    fn join(self) -> RunReport {
        let mut stats = ProcessingStats::default();
        let mut workers_failed = 0usize;

        for (worker_id, handle) in self.worker_handles.into_iter().enumerate() {
            match handle.join() {
                Ok(worker_stats) => stats.merge(&worker_stats),
                Err(payload) => {
                    workers_failed += 1;
                    let failure = EngineError::WorkerFailure {
                        worker: worker_id,
                        message: panic_message(payload.as_ref()),
                    };
                    tracing::error!(error = %failure, "worker thread panicked");
                }
            }
        }

        debug_assert_ne!(self.coordinator.state(), LifecycleState::Running);
        self.coordinator.mark_stopped();

        let orphans = self.index.dump();
        if !orphans.is_empty() {
            tracing::info!(count = orphans.len(), "records left without a counterpart");
            self.index.log_pending();
        }

        let unprocessed_lines = self.queue.len();
        let degraded = self.coordinator.is_degraded()
            || workers_failed > 0
            || stats.worker_failures > 0
            || unprocessed_lines > 0;

        let report = RunReport {
            lines_enqueued: self.queue.total_enqueued(),
            unprocessed_lines,
            orphans,
            evicted: self.index.evicted(),
            stop_reason: self.coordinator.stop_reason(),
            workers_started: self.coordinator.started_workers(),
            workers_failed: workers_failed.max(self.coordinator.failed_workers()),
            degraded,
            elapsed: self.started_at.elapsed(),
            stats,
        };

        if report.degraded {
            tracing::warn!(
                worker_failures = report.stats.worker_failures,
                workers_failed = report.workers_failed,
                unprocessed = report.unprocessed_lines,
                "run finished degraded"
            );
        }
        tracing::info!(
            pairs = report.stats.pairs_written,
            orphans = report.orphans.len(),
            elapsed_ms = report.elapsed.as_millis() as u64,
            "stopped all workers"
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// An engine whose workers register and then die immediately
    fn engine_with_dying_workers(count: usize) -> RunningEngine {
        let config = EngineConfig::default().with_workers(count);
        let queue = Arc::new(WorkQueue::new());
        let index = Arc::new(PendingIndex::new());
        let coordinator = Arc::new(LifecycleCoordinator::new(config.policy));
        queue.enqueue("never processed");

        let worker_handles = (0..count)
            .map(|worker_id| {
                let coordinator = Arc::clone(&coordinator);
                thread::spawn(move || -> ProcessingStats {
                    let _registration = coordinator.register_worker(worker_id);
                    panic!("worker {} lost its connection", worker_id);
                })
            })
            .collect();

        RunningEngine {
            config,
            queue,
            index,
            coordinator,
            worker_handles,
            started_at: Instant::now(),
        }
    }

    #[test]
    fn test_pool_exhaustion_stops_the_run() {
        let engine = engine_with_dying_workers(2);
        let coordinator = Arc::clone(engine.coordinator());

        let report = engine.run_to_completion();

        assert_eq!(report.stop_reason, Some(StopReason::PoolExhausted));
        assert_eq!(report.workers_started, 2);
        assert_eq!(report.workers_failed, 2);
        assert_eq!(report.unprocessed_lines, 1);
        assert!(report.degraded);
        assert_eq!(coordinator.live_workers(), 0);
        assert_eq!(coordinator.state(), LifecycleState::Stopped);
    }

    #[test]
    fn test_feeder_refuses_lines_after_pool_exhaustion() {
        let engine = engine_with_dying_workers(1);
        let feeder = engine.feeder();
        assert!(feeder.is_accepting());

        let report = engine.run_to_completion();

        assert!(!feeder.enqueue("too late"));
        assert_eq!(report.lines_enqueued, 1);
    }
}
