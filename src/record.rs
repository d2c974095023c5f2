use serde::{Deserialize, Serialize};

/// Default alert threshold: pairs lasting longer than this are flagged
pub const DEFAULT_ALERT_THRESHOLD: u64 = 4;

/// One decoded log line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub timestamp: i64,
}

impl Record {
    pub fn new(
        id: impl Into<String>,
        kind: impl Into<String>,
        host: impl Into<String>,
        timestamp: i64,
    ) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            host: host.into(),
            timestamp,
        }
    }
}

/// A completed pair, ready to be written to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairedEvent {
    pub id: String,
    pub duration: u64,
    #[serde(rename = "type")]
    pub kind: String,
    pub host: String,
    pub alert: bool,
}

impl PairedEvent {
    /// Build the derived event from the indexed record and its counterpart.
    ///
    /// `type` and `host` are taken from `first`, the record that was sitting
    /// in the pending index. The duration is the absolute timestamp
    /// difference, so the arrival order of the two halves does not matter.
    pub fn from_pair(first: &Record, second: &Record, threshold: u64) -> Self {
        let duration = first.timestamp.abs_diff(second.timestamp);
        Self {
            id: first.id.clone(),
            duration,
            kind: first.kind.clone(),
            host: first.host.clone(),
            alert: duration > threshold,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_is_absolute_difference() {
        let start = Record::new("a", "req", "h1", 100);
        let end = Record::new("a", "req", "h1", 105);

        let forward = PairedEvent::from_pair(&start, &end, DEFAULT_ALERT_THRESHOLD);
        let backward = PairedEvent::from_pair(&end, &start, DEFAULT_ALERT_THRESHOLD);

        assert_eq!(forward.duration, 5);
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_alert_is_strictly_greater_than_threshold() {
        let start = Record::new("x", "job", "h2", 10);
        let at_threshold = Record::new("x", "job", "h2", 14);
        let over = Record::new("x", "job", "h2", 15);

        assert!(!PairedEvent::from_pair(&start, &at_threshold, 4).alert);
        assert!(PairedEvent::from_pair(&start, &over, 4).alert);
    }

    #[test]
    fn test_metadata_comes_from_first_record() {
        let first = Record::new("m", "start", "alpha", 0);
        let second = Record::new("m", "end", "beta", 2);

        let pair = PairedEvent::from_pair(&first, &second, 4);
        assert_eq!(pair.kind, "start");
        assert_eq!(pair.host, "alpha");
    }

    #[test]
    fn test_extreme_timestamps_do_not_overflow() {
        let low = Record::new("z", "t", "h", i64::MIN);
        let high = Record::new("z", "t", "h", i64::MAX);

        let pair = PairedEvent::from_pair(&low, &high, 4);
        assert_eq!(pair.duration, u64::MAX);
        assert!(pair.alert);
    }

    #[test]
    fn test_record_serializes_type_field() {
        let record = Record::new("a", "req", "h1", 1);
        let json = serde_json::to_string(&record).unwrap();
        assert_eq!(json, r#"{"id":"a","type":"req","host":"h1","timestamp":1}"#);
    }
}
