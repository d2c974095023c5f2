//! Worker thread for the pairing engine
//!
//! Each worker pulls raw lines from the shared queue, decodes them,
//! correlates them against the pending index and writes completed pairs
//! through its own store connection.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::index::PendingIndex;
use super::lifecycle::LifecycleCoordinator;
use super::queue::{InFlightLine, WorkQueue};
use crate::decoder::{JsonDecoder, LineDecoder};
use crate::error::panic_message;
use crate::record::PairedEvent;
use crate::stats::{
    get_thread_stats, stats_add_blank_line, stats_add_decode_error, stats_add_line_processed,
    stats_add_pair_matched, stats_add_pair_written, stats_add_record_decoded,
    stats_add_worker_failure, stats_add_write_failure, stats_finish_processing,
    stats_start_timer, ProcessingStats,
};
use crate::store::PairWriter;

/// Everything a worker needs; shared structures come in as `Arc`s, the
/// writer is owned outright.
pub(crate) struct WorkerContext<W> {
    pub worker_id: usize,
    pub queue: Arc<WorkQueue>,
    pub index: Arc<PendingIndex>,
    pub coordinator: Arc<LifecycleCoordinator>,
    pub writer: W,
    pub alert_threshold: u64,
    pub idle_backoff: Duration,
}

/// Worker thread: runs until the coordinator allows it to exit
pub(crate) fn worker_thread<W: PairWriter>(ctx: WorkerContext<W>) -> ProcessingStats {
    let WorkerContext {
        worker_id,
        queue,
        index,
        coordinator,
        mut writer,
        alert_threshold,
        idle_backoff,
    } = ctx;

    let _registration = coordinator.register_worker(worker_id);
    let span = tracing::info_span!("worker", worker = worker_id);
    let _enter = span.enter();

    stats_start_timer();
    tracing::debug!("worker started");

    let decoder = JsonDecoder::new();
    let sweep_every = index.bounds().max_age.map(sweep_interval);
    let mut last_sweep = Instant::now();

    loop {
        match queue.dequeue_timeout(idle_backoff) {
            Some(item) => {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    process_line(&item, &decoder, &index, &mut writer, alert_threshold)
                }));

                if let Err(payload) = outcome {
                    stats_add_worker_failure();
                    tracing::error!(
                        line_num = item.line_num(),
                        line = %item.line(),
                        error = %panic_message(payload.as_ref()),
                        "processing failed; line discarded"
                    );
                }
                drop(item);

                if coordinator.should_exit(&queue) {
                    break;
                }
            }
            None => {
                if coordinator.should_exit(&queue) {
                    break;
                }
            }
        }

        if let Some(every) = sweep_every {
            if last_sweep.elapsed() >= every {
                index.evict_expired();
                last_sweep = Instant::now();
            }
        }
    }

    stats_finish_processing();
    tracing::debug!("worker finished");
    get_thread_stats()
}

fn sweep_interval(max_age: Duration) -> Duration {
    (max_age / 4).clamp(Duration::from_millis(10), Duration::from_secs(1))
}

/// Decode one line and correlate it. Per-line failures are logged here
/// and never leave the worker.
pub(crate) fn process_line<W: PairWriter>(
    item: &InFlightLine<'_>,
    decoder: &dyn LineDecoder,
    index: &PendingIndex,
    writer: &mut W,
    alert_threshold: u64,
) {
    stats_add_line_processed();

    let line = item.line();
    if line.trim().is_empty() {
        stats_add_blank_line();
        return;
    }

    let record = match decoder.decode(line) {
        Ok(record) => record,
        Err(e) => {
            stats_add_decode_error();
            tracing::warn!(
                line_num = item.line_num(),
                error = %e,
                "skipping malformed line"
            );
            return;
        }
    };
    stats_add_record_decoded();

    let Some(matched) = index.check_and_insert_or_remove(record) else {
        return;
    };

    stats_add_pair_matched();
    let pair = PairedEvent::from_pair(&matched.first, &matched.second, alert_threshold);

    match writer.write_pair(&pair) {
        Ok(()) => {
            stats_add_pair_written();
            tracing::debug!(
                id = %pair.id,
                duration = pair.duration,
                alert = pair.alert,
                "stored pair"
            );
        }
        Err(e) => {
            stats_add_write_failure();
            tracing::error!(error = %e, "dropping pair");
        }
    }
}
