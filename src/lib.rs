// Core library for the pairlog record pairing tool

pub mod cli;
pub mod config;
pub mod config_file;
pub mod decoder;
pub mod error;
pub mod parallel;
pub mod platform;
pub mod record;
pub mod source;
pub mod stats;
pub mod store;

pub use config::PairlogConfig;
pub use decoder::{JsonDecoder, LineDecoder};
pub use error::{ConnectionError, DecodeError, EngineError, SchemaError, StoreWriteError};
pub use parallel::{
    EngineConfig, IndexBounds, LifecycleCoordinator, LifecycleState, LineFeeder, PairingEngine,
    PendingIndex, RunReport, RunningEngine, StopReason, TerminationPolicy, WorkQueue,
};
pub use record::{PairedEvent, Record, DEFAULT_ALERT_THRESHOLD};
pub use stats::ProcessingStats;
pub use store::{EventStore, PairStore, PairWriter, SqliteWriter};
