use std::cell::RefCell;
use std::time::{Duration, Instant};

/// Counters collected by one worker, merged into the run total at shutdown
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessingStats {
    pub lines_processed: u64,
    pub blank_lines: u64,
    pub records_decoded: u64,
    pub decode_errors: u64,
    pub pairs_matched: u64,
    pub pairs_written: u64,
    pub write_failures: u64,
    pub worker_failures: u64,
    pub processing_time: Duration,
    pub start_time: Option<Instant>,
}

// Each worker thread owns its counters; nothing is shared on the hot path.
thread_local! {
    static THREAD_STATS: RefCell<ProcessingStats> = RefCell::new(ProcessingStats::new());
}

pub fn stats_add_line_processed() {
    THREAD_STATS.with(|stats| {
        stats.borrow_mut().lines_processed += 1;
    });
}

pub fn stats_add_blank_line() {
    THREAD_STATS.with(|stats| {
        stats.borrow_mut().blank_lines += 1;
    });
}

pub fn stats_add_record_decoded() {
    THREAD_STATS.with(|stats| {
        stats.borrow_mut().records_decoded += 1;
    });
}

pub fn stats_add_decode_error() {
    THREAD_STATS.with(|stats| {
        stats.borrow_mut().decode_errors += 1;
    });
}

pub fn stats_add_pair_matched() {
    THREAD_STATS.with(|stats| {
        stats.borrow_mut().pairs_matched += 1;
    });
}

pub fn stats_add_pair_written() {
    THREAD_STATS.with(|stats| {
        stats.borrow_mut().pairs_written += 1;
    });
}

pub fn stats_add_write_failure() {
    THREAD_STATS.with(|stats| {
        stats.borrow_mut().write_failures += 1;
    });
}

pub fn stats_add_worker_failure() {
    THREAD_STATS.with(|stats| {
        stats.borrow_mut().worker_failures += 1;
    });
}

pub fn stats_start_timer() {
    THREAD_STATS.with(|stats| {
        stats.borrow_mut().start_time = Some(Instant::now());
    });
}

pub fn stats_finish_processing() {
    THREAD_STATS.with(|stats| {
        let mut stats = stats.borrow_mut();
        if let Some(start) = stats.start_time {
            stats.processing_time = start.elapsed();
        }
    });
}

pub fn get_thread_stats() -> ProcessingStats {
    THREAD_STATS.with(|stats| stats.borrow().clone())
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    /// Fold another worker's counters into this one. Processing time is the
    /// longest of the two, since workers run concurrently.
    pub fn merge(&mut self, other: &ProcessingStats) {
        self.lines_processed += other.lines_processed;
        self.blank_lines += other.blank_lines;
        self.records_decoded += other.records_decoded;
        self.decode_errors += other.decode_errors;
        self.pairs_matched += other.pairs_matched;
        self.pairs_written += other.pairs_written;
        self.write_failures += other.write_failures;
        self.worker_failures += other.worker_failures;
        self.processing_time = self.processing_time.max(other.processing_time);
    }

    pub fn format_stats(&self) -> String {
        let mut output = format!(
            "Lines processed: {} total, {} blank, {} malformed; Pairs: {} matched, {} stored",
            self.lines_processed,
            self.blank_lines,
            self.decode_errors,
            self.pairs_matched,
            self.pairs_written
        );

        if self.write_failures > 0 {
            output.push_str(&format!(", {} dropped", self.write_failures));
        }

        if self.worker_failures > 0 {
            output.push_str(&format!("; {} worker failures", self.worker_failures));
        }

        let processing_time_ms = self.processing_time.as_millis();
        output.push_str(&format!("; Time: {}ms", processing_time_ms));

        if processing_time_ms > 0 && self.lines_processed > 0 {
            let lines_per_sec = (self.lines_processed as f64 * 1000.0) / processing_time_ms as f64;
            output.push_str(&format!(" ({:.0} lines/s)", lines_per_sec));
        }

        output
    }
}
