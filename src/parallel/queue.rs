//! Work queue shared by the line source and the worker pool
//!
//! An unbounded multi-producer multi-consumer channel. Every line is handed
//! to exactly one worker. A line counts as outstanding from `enqueue` until
//! its `InFlightLine` guard is dropped, so `is_drained` never sees a gap
//! between the channel handing a line over and the worker tracking it.

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// A raw line together with its 1-based position in the input
#[derive(Debug, Clone)]
pub(crate) struct QueuedLine {
    pub line_num: u64,
    pub line: String,
}

#[derive(Debug)]
pub struct WorkQueue {
    sender: Sender<QueuedLine>,
    receiver: Receiver<QueuedLine>,
    in_flight: AtomicUsize,
    outstanding: AtomicUsize,
    enqueued: AtomicU64,
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            sender,
            receiver,
            in_flight: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            enqueued: AtomicU64::new(0),
        }
    }

    /// Append a raw line. Returns the line number assigned to it.
    pub fn enqueue(&self, line: impl Into<String>) -> u64 {
        let line_num = self.enqueued.fetch_add(1, Ordering::SeqCst) + 1;
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        // The queue owns both ends of the channel, so it cannot be disconnected.
        let _ = self.sender.send(QueuedLine {
            line_num,
            line: line.into(),
        });
        line_num
    }

    /// Take a line if one is immediately available
    pub fn try_dequeue(&self) -> Option<InFlightLine<'_>> {
        match self.receiver.try_recv() {
            Ok(queued) => Some(self.track(queued)),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Wait at most `idle` for a line
    pub fn dequeue_timeout(&self, idle: Duration) -> Option<InFlightLine<'_>> {
        match self.receiver.recv_timeout(idle) {
            Ok(queued) => Some(self.track(queued)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    fn track(&self, queued: QueuedLine) -> InFlightLine<'_> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightLine {
            queue: self,
            queued,
        }
    }

    /// Lines waiting to be dequeued
    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Lines dequeued but not yet fully processed
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Total number of lines ever enqueued
    pub fn total_enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::SeqCst)
    }

    /// Lines enqueued whose processing has not finished yet
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    /// Nothing waiting and nothing being processed
    pub fn is_drained(&self) -> bool {
        self.outstanding() == 0
    }
}

/// A line owned by one worker. Dropping it marks the line as processed,
/// including when the worker unwinds from a panic.
#[derive(Debug)]
pub struct InFlightLine<'q> {
    queue: &'q WorkQueue,
    queued: QueuedLine,
}

impl InFlightLine<'_> {
    pub fn line(&self) -> &str {
        &self.queued.line
    }

    pub fn line_num(&self) -> u64 {
        self.queued.line_num
    }
}

impl Drop for InFlightLine<'_> {
    fn drop(&mut self) {
        self.queue.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.queue.outstanding.fetch_sub(1, Ordering::SeqCst);
    }
}
