//! Concurrent pairing engine
//!
//! Workers pull raw lines from a shared queue, decode them and correlate
//! them by id against a shared pending index; completed pairs go to each
//! worker's own store connection.
//!
//! # Module Structure
//!
//! - `types`: Engine configuration and run report
//! - `queue`: Unbounded work queue with in-flight tracking
//! - `index`: Pending-match index with atomic per-id check-and-act
//! - `lifecycle`: Running/Draining/Stopped state, termination policy, pool health
//! - `worker`: Worker thread loop and per-line processing
//! - `processor`: `PairingEngine` startup and `RunningEngine` supervision

mod index;
mod lifecycle;
mod processor;
mod queue;
mod types;
mod worker;

pub use index::{IndexBounds, MatchedPair, PendingEntry, PendingIndex};
pub use lifecycle::{
    LifecycleCoordinator, LifecycleState, StopReason, TerminationPolicy, WorkerRegistration,
    DEFAULT_AWAIT_GRACE,
};
pub use processor::{LineFeeder, PairingEngine, RunningEngine};
pub use queue::{InFlightLine, WorkQueue};
pub use types::{
    default_worker_count, EngineConfig, RunReport, DEFAULT_IDLE_BACKOFF_MS,
    DEFAULT_SUPERVISOR_POLL_MS,
};
