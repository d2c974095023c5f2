//! Pending-match index
//!
//! Maps a correlation id to the first record seen for it. The only mutation
//! used on the hot path is `check_and_insert_or_remove`, which runs under the
//! shard write lock of its key, so two occurrences of one id can never both
//! observe "absent".

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::record::Record;

/// Optional retention limits. Both unset means orphans are kept for the
/// whole run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexBounds {
    pub max_entries: Option<usize>,
    pub max_age: Option<Duration>,
}

impl IndexBounds {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn is_bounded(&self) -> bool {
        self.max_entries.is_some() || self.max_age.is_some()
    }
}

/// Both halves of a completed pair: `first` was waiting in the index,
/// `second` is the record that found it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPair {
    pub first: Record,
    pub second: Record,
}

#[derive(Debug, Clone)]
pub struct PendingEntry {
    pub record: Record,
    pub indexed_at: Instant,
}

#[derive(Debug, Default)]
pub struct PendingIndex {
    entries: DashMap<String, PendingEntry>,
    bounds: IndexBounds,
    evicted: AtomicU64,
}

impl PendingIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bounds(bounds: IndexBounds) -> Self {
        Self {
            entries: DashMap::new(),
            bounds,
            evicted: AtomicU64::new(0),
        }
    }

    pub fn bounds(&self) -> IndexBounds {
        self.bounds
    }

    /// Index `record` if its id is unseen, otherwise remove the record
    /// already waiting for it and hand back both halves.
    pub fn check_and_insert_or_remove(&self, record: Record) -> Option<MatchedPair> {
        let matched = match self.entries.entry(record.id.clone()) {
            Entry::Occupied(occupied) => Some(MatchedPair {
                first: occupied.remove().record,
                second: record,
            }),
            Entry::Vacant(vacant) => {
                vacant.insert(PendingEntry {
                    record,
                    indexed_at: Instant::now(),
                });
                None
            }
        };

        // Evict outside the entry guard: the oldest key may share its shard.
        if matched.is_none() {
            self.enforce_capacity();
        }

        matched
    }

    fn enforce_capacity(&self) {
        let Some(max_entries) = self.bounds.max_entries else {
            return;
        };

        while self.entries.len() > max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.value().indexed_at)
                .map(|entry| entry.key().clone());

            let Some(id) = oldest else {
                break;
            };

            if let Some((id, entry)) = self.entries.remove(&id) {
                self.evicted.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    id = %id,
                    host = %entry.record.host,
                    max_entries,
                    "evicted oldest pending record: index is full"
                );
            }
        }
    }

    /// Drop entries older than the configured `max_age`. Returns how many
    /// were removed.
    pub fn evict_expired(&self) -> usize {
        let Some(max_age) = self.bounds.max_age else {
            return 0;
        };

        let now = Instant::now();
        let mut removed = 0usize;
        self.entries.retain(|id, entry| {
            let age = now.saturating_duration_since(entry.indexed_at);
            if age < max_age {
                return true;
            }
            removed += 1;
            tracing::warn!(
                id = %id,
                host = %entry.record.host,
                age = %humantime::format_duration(truncate_to_millis(age)),
                "evicted pending record: no counterpart within max age"
            );
            false
        });

        self.evicted.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    /// Records dropped by the retention bounds so far
    pub fn evicted(&self) -> u64 {
        self.evicted.load(Ordering::Relaxed)
    }

    /// Snapshot of every record still waiting for its counterpart, sorted by id
    pub fn dump(&self) -> Vec<Record> {
        let mut records: Vec<Record> = self
            .entries
            .iter()
            .map(|entry| entry.value().record.clone())
            .collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }

    /// Log every pending record at info level and return how many there are
    pub fn log_pending(&self) -> usize {
        let pending = self.dump();
        for record in &pending {
            tracing::info!(
                id = %record.id,
                kind = %record.kind,
                host = %record.host,
                timestamp = record.timestamp,
                "unmatched record"
            );
        }
        pending.len()
    }
}

fn truncate_to_millis(d: Duration) -> Duration {
    Duration::from_millis(d.as_millis() as u64)
}
