//! Lifecycle coordination for the worker pool
//!
//! State moves strictly forward: `Running -> Draining -> Stopped`. Workers
//! exit once the coordinator has left `Running` and the work queue is empty.
//! The coordinator also keeps the pool-health counters used to detect
//! workers that died.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::thread;
use std::time::{Duration, Instant};

use super::index::PendingIndex;
use super::queue::WorkQueue;

/// Default time `AwaitPairs` keeps waiting for late counterparts
pub const DEFAULT_AWAIT_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Running,
    Draining,
    Stopped,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::Running,
            1 => LifecycleState::Draining,
            _ => LifecycleState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LifecycleState::Running => 0,
            LifecycleState::Draining => 1,
            LifecycleState::Stopped => 2,
        }
    }
}

/// When a run with exhausted input is allowed to stop on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminationPolicy {
    /// Stop as soon as the queue is drained, leaving orphans in the index
    #[default]
    Drain,
    /// Keep workers alive until the index is empty or `grace` has passed
    /// since the input was exhausted
    AwaitPairs { grace: Duration },
}

impl fmt::Display for TerminationPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerminationPolicy::Drain => write!(f, "drain"),
            TerminationPolicy::AwaitPairs { grace } => {
                write!(f, "await-pairs ({})", humantime::format_duration(*grace))
            }
        }
    }
}

/// Why the run left `Running`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Signal or explicit `request_stop` call
    External,
    /// Input exhausted and queue drained
    InputDrained,
    /// Input exhausted, queue drained and no orphans left
    AllPaired,
    /// `AwaitPairs` grace elapsed with orphans still indexed
    GraceExpired,
    /// Every worker exited before the queue was drained
    PoolExhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            StopReason::External => "stop requested",
            StopReason::InputDrained => "input drained",
            StopReason::AllPaired => "all records paired",
            StopReason::GraceExpired => "grace period expired",
            StopReason::PoolExhausted => "no live workers",
        };
        f.write_str(text)
    }
}

#[derive(Debug)]
pub struct LifecycleCoordinator {
    state: AtomicU8,
    /// Readers are producers inside `admit`; the writer is the
    /// `Running -> Draining` transition.
    admission: RwLock<()>,
    policy: TerminationPolicy,
    stop_reason: Mutex<Option<StopReason>>,
    source_exhausted: AtomicBool,
    exhausted_at: OnceLock<Instant>,
    live_workers: AtomicUsize,
    started_workers: AtomicUsize,
    failed_workers: AtomicUsize,
}

impl Default for LifecycleCoordinator {
    fn default() -> Self {
        Self::new(TerminationPolicy::default())
    }
}

impl LifecycleCoordinator {
    pub fn new(policy: TerminationPolicy) -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::Running.as_u8()),
            admission: RwLock::new(()),
            policy,
            stop_reason: Mutex::new(None),
            source_exhausted: AtomicBool::new(false),
            exhausted_at: OnceLock::new(),
            live_workers: AtomicUsize::new(0),
            started_workers: AtomicUsize::new(0),
            failed_workers: AtomicUsize::new(0),
        }
    }

    pub fn policy(&self) -> TerminationPolicy {
        self.policy
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_running(&self) -> bool {
        self.state() == LifecycleState::Running
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self
            .stop_reason
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// External stop: no more input will ever arrive. Safe to call any
    /// number of times; only the first call returns `true`.
    pub fn request_stop(&self) -> bool {
        self.stop_with(StopReason::External)
    }

    /// Run `produce` only while the coordinator is `Running`. The state
    /// cannot leave `Running` until `produce` returns, so anything it
    /// enqueues is visible to workers before they may exit.
    pub(crate) fn admit<T>(&self, produce: impl FnOnce() -> T) -> Option<T> {
        let _admitted = self
            .admission
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.is_running().then(produce)
    }

    pub(crate) fn stop_with(&self, reason: StopReason) -> bool {
        self.stop_if(reason, || true)
    }

    /// Leave `Running` if `still_holds` is true once producers are shut out
    fn stop_if(&self, reason: StopReason, still_holds: impl FnOnce() -> bool) -> bool {
        let _exclusive = self
            .admission
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if !self.is_running() || !still_holds() {
            return false;
        }

        let transitioned = self
            .state
            .compare_exchange(
                LifecycleState::Running.as_u8(),
                LifecycleState::Draining.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();

        if transitioned {
            *self
                .stop_reason
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(reason);
            tracing::info!(%reason, "draining work queue");
        }
        transitioned
    }

    /// The line source will not produce any more lines
    pub fn mark_source_exhausted(&self) {
        if !self.source_exhausted.swap(true, Ordering::SeqCst) {
            let _ = self.exhausted_at.set(Instant::now());
            tracing::debug!("line source exhausted");
        }
    }

    pub fn source_exhausted(&self) -> bool {
        self.source_exhausted.load(Ordering::SeqCst)
    }

    /// Whether a worker may leave its loop: not running and nothing left
    /// to dequeue. Lines already taken by a worker are always finished.
    pub fn should_exit(&self, queue: &WorkQueue) -> bool {
        !self.is_running() && queue.is_empty()
    }

    /// Apply the termination policy. Moves to `Draining` and returns the
    /// reason when the run may stop on its own.
    pub fn evaluate(&self, queue: &WorkQueue, index: &PendingIndex) -> Option<StopReason> {
        if !self.is_running() || !self.source_exhausted() || !queue.is_drained() {
            return None;
        }

        let reason = match self.policy {
            TerminationPolicy::Drain => StopReason::InputDrained,
            TerminationPolicy::AwaitPairs { grace } => {
                if index.is_empty() {
                    StopReason::AllPaired
                } else if self.exhausted_for() >= grace {
                    StopReason::GraceExpired
                } else {
                    return None;
                }
            }
        };

        // A late line may have been admitted since the checks above.
        let still_holds =
            || queue.is_drained() && (reason != StopReason::AllPaired || index.is_empty());
        self.stop_if(reason, still_holds).then_some(reason)
    }

    fn exhausted_for(&self) -> Duration {
        self.exhausted_at
            .get()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    /// All workers have been joined
    pub fn mark_stopped(&self) {
        self.stop_with(StopReason::External);
        self.state.store(LifecycleState::Stopped.as_u8(), Ordering::SeqCst);
    }

    /// Register a worker; the returned guard deregisters it when the worker
    /// exits, recording whether it exited by panic.
    pub fn register_worker(self: &Arc<Self>, worker_id: usize) -> WorkerRegistration {
        self.started_workers.fetch_add(1, Ordering::SeqCst);
        self.live_workers.fetch_add(1, Ordering::SeqCst);
        WorkerRegistration {
            coordinator: Arc::clone(self),
            worker_id,
        }
    }

    fn worker_exited(&self, worker_id: usize, panicked: bool) {
        self.live_workers.fetch_sub(1, Ordering::SeqCst);
        if panicked {
            self.failed_workers.fetch_add(1, Ordering::SeqCst);
            tracing::error!(worker = worker_id, "worker exited by panic");
        } else {
            tracing::debug!(worker = worker_id, "worker exited");
        }
    }

    pub fn live_workers(&self) -> usize {
        self.live_workers.load(Ordering::SeqCst)
    }

    pub fn started_workers(&self) -> usize {
        self.started_workers.load(Ordering::SeqCst)
    }

    pub fn failed_workers(&self) -> usize {
        self.failed_workers.load(Ordering::SeqCst)
    }

    /// A worker died, or the pool emptied before the queue drained
    pub fn is_degraded(&self) -> bool {
        self.failed_workers() > 0 || self.stop_reason() == Some(StopReason::PoolExhausted)
    }
}

/// Held by a worker thread for its whole lifetime
#[derive(Debug)]
pub struct WorkerRegistration {
    coordinator: Arc<LifecycleCoordinator>,
    worker_id: usize,
}

impl Drop for WorkerRegistration {
    fn drop(&mut self) {
        self.coordinator.worker_exited(self.worker_id, thread::panicking());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    #[test]
    fn test_request_stop_is_idempotent() {
        let coordinator = LifecycleCoordinator::default();
        assert_eq!(coordinator.state(), LifecycleState::Running);

        assert!(coordinator.request_stop());
        assert!(!coordinator.request_stop());
        assert!(!coordinator.request_stop());

        assert_eq!(coordinator.state(), LifecycleState::Draining);
        assert_eq!(coordinator.stop_reason(), Some(StopReason::External));
    }

    #[test]
    fn test_should_exit_waits_for_empty_queue() {
        let coordinator = LifecycleCoordinator::default();
        let queue = WorkQueue::new();
        queue.enqueue("pending");

        assert!(!coordinator.should_exit(&queue));
        coordinator.request_stop();
        assert!(!coordinator.should_exit(&queue));

        let item = queue.try_dequeue().unwrap();
        assert!(coordinator.should_exit(&queue));
        drop(item);
    }

    #[test]
    fn test_drain_policy_ignores_orphans() {
        let coordinator = LifecycleCoordinator::new(TerminationPolicy::Drain);
        let queue = WorkQueue::new();
        let index = PendingIndex::new();
        index.check_and_insert_or_remove(Record::new("orphan", "t", "h", 1));

        assert_eq!(coordinator.evaluate(&queue, &index), None);
        coordinator.mark_source_exhausted();
        assert_eq!(
            coordinator.evaluate(&queue, &index),
            Some(StopReason::InputDrained)
        );
        assert_eq!(coordinator.state(), LifecycleState::Draining);
        assert_eq!(coordinator.evaluate(&queue, &index), None);
    }

    #[test]
    fn test_drain_policy_waits_for_queue() {
        let coordinator = LifecycleCoordinator::new(TerminationPolicy::Drain);
        let queue = WorkQueue::new();
        let index = PendingIndex::new();
        coordinator.mark_source_exhausted();

        queue.enqueue("line");
        assert_eq!(coordinator.evaluate(&queue, &index), None);
        let item = queue.try_dequeue().unwrap();
        assert_eq!(coordinator.evaluate(&queue, &index), None);
        drop(item);
        assert!(coordinator.evaluate(&queue, &index).is_some());
    }

    #[test]
    fn test_await_pairs_stops_when_index_empty() {
        let coordinator = LifecycleCoordinator::new(TerminationPolicy::AwaitPairs {
            grace: Duration::from_secs(60),
        });
        let queue = WorkQueue::new();
        let index = PendingIndex::new();
        coordinator.mark_source_exhausted();

        assert_eq!(
            coordinator.evaluate(&queue, &index),
            Some(StopReason::AllPaired)
        );
    }

    #[test]
    fn test_await_pairs_grace_expires() {
        let coordinator = LifecycleCoordinator::new(TerminationPolicy::AwaitPairs {
            grace: Duration::from_millis(30),
        });
        let queue = WorkQueue::new();
        let index = PendingIndex::new();
        index.check_and_insert_or_remove(Record::new("late", "t", "h", 1));
        coordinator.mark_source_exhausted();

        assert_eq!(coordinator.evaluate(&queue, &index), None);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(
            coordinator.evaluate(&queue, &index),
            Some(StopReason::GraceExpired)
        );
    }

    #[test]
    fn test_admit_holds_off_stop_until_line_is_queued() {
        let coordinator = Arc::new(LifecycleCoordinator::default());
        let queue = Arc::new(WorkQueue::new());
        let (entered_tx, entered_rx) = crossbeam_channel::bounded(0);

        let producer = {
            let coordinator = Arc::clone(&coordinator);
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                coordinator.admit(|| {
                    entered_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(50));
                    queue.enqueue("late")
                })
            })
        };

        entered_rx.recv().unwrap();
        assert!(coordinator.request_stop());
        assert_eq!(queue.len(), 1, "stop waits for the admitted line");
        assert!(!coordinator.should_exit(&queue));

        assert_eq!(producer.join().unwrap(), Some(1));
        assert_eq!(coordinator.admit(|| queue.enqueue("rejected")), None);
        assert_eq!(queue.total_enqueued(), 1);
    }

    #[test]
    fn test_mark_stopped() {
        let coordinator = LifecycleCoordinator::default();
        coordinator.request_stop();
        coordinator.mark_stopped();
        assert_eq!(coordinator.state(), LifecycleState::Stopped);
        assert!(!coordinator.request_stop());
    }

    #[test]
    fn test_worker_registration_tracks_panics() {
        let coordinator = Arc::new(LifecycleCoordinator::default());

        let clean = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                let _registration = coordinator.register_worker(0);
            })
        };
        clean.join().unwrap();
        assert_eq!(coordinator.live_workers(), 0);
        assert_eq!(coordinator.failed_workers(), 0);
        assert!(!coordinator.is_degraded());

        let failing = {
            let coordinator = Arc::clone(&coordinator);
            thread::spawn(move || {
                let _registration = coordinator.register_worker(1);
                panic!("worker blew up");
            })
        };
        assert!(failing.join().is_err());

        assert_eq!(coordinator.started_workers(), 2);
        assert_eq!(coordinator.live_workers(), 0);
        assert_eq!(coordinator.failed_workers(), 1);
        assert!(coordinator.is_degraded());
    }
}
