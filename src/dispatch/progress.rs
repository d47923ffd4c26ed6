//! Progress Aggregation
//!
//! Per-recipient outcome records, live progress snapshots, and the terminal
//! run summary. Counts in the summary are derived from the ordered record log
//! rather than from anything callers can touch.

use super::pacing::PacingConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

/// Outcome of one send attempt. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchRecord {
    /// Position in the recipient plan
    pub index: usize,
    pub destination: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub variant_index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_index: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

/// Live counters published after every recorded item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub current: usize,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl ProgressSnapshot {
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.current as f64 * 100.0 / self.total as f64
        }
    }
}

/// Callback for progress snapshots (UI progress bar, CLI status line).
pub type ProgressObserver = Arc<dyn Fn(ProgressSnapshot) + Send + Sync>;

/// Configuration snapshot carried into the summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RunMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub pacing: PacingConfig,
    pub text_variants: usize,
    pub media_variants: usize,
    pub use_variations: bool,
    pub use_media: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_consecutive_failures: Option<u32>,
    /// Free-form caller metadata (campaign id, tenant, …)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// Terminal aggregate of one run, created exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Size of the recipient plan
    pub planned: usize,
    /// Items actually attempted
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub duration_seconds: f64,
    pub auto_pause_count: u32,
    pub aborted: bool,
    /// Stopped by the consecutive-failure limit rather than a user abort
    #[serde(default)]
    pub halted_by_failures: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub metadata: RunMetadata,
    #[serde(default)]
    pub records: Vec<DispatchRecord>,
}

impl RunSummary {
    pub fn failures(&self) -> impl Iterator<Item = &DispatchRecord> {
        self.records.iter().filter(|r| !r.success)
    }
}

pub struct ProgressAggregator {
    run_id: Uuid,
    planned: usize,
    records: Vec<DispatchRecord>,
    succeeded: usize,
    failed: usize,
    consecutive_failures: u32,
    halted_by_failures: bool,
    started: Instant,
    started_at: DateTime<Utc>,
    metadata: RunMetadata,
    observer: Option<ProgressObserver>,
}

impl ProgressAggregator {
    pub fn new(run_id: Uuid, planned: usize, metadata: RunMetadata) -> Self {
        Self {
            run_id,
            planned,
            records: Vec::with_capacity(planned),
            succeeded: 0,
            failed: 0,
            consecutive_failures: 0,
            halted_by_failures: false,
            started: Instant::now(),
            started_at: Utc::now(),
            metadata,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Option<ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Append a record, update counters, and publish a snapshot.
    pub fn record(&mut self, record: DispatchRecord) -> ProgressSnapshot {
        if record.success {
            self.succeeded += 1;
            self.consecutive_failures = 0;
        } else {
            self.failed += 1;
            self.consecutive_failures += 1;
        }
        self.records.push(record);

        let snapshot = self.snapshot();
        if let Some(observer) = &self.observer {
            observer(snapshot);
        }
        snapshot
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            current: self.records.len(),
            total: self.planned,
            succeeded: self.succeeded,
            failed: self.failed,
        }
    }

    /// Failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    pub fn mark_halted_by_failures(&mut self) {
        self.halted_by_failures = true;
    }

    pub fn finalize(self, aborted: bool, auto_pause_count: u32) -> RunSummary {
        let succeeded = self.records.iter().filter(|r| r.success).count();
        let total = self.records.len();
        RunSummary {
            run_id: self.run_id,
            planned: self.planned,
            total,
            succeeded,
            failed: total - succeeded,
            duration_seconds: self.started.elapsed().as_secs_f64(),
            auto_pause_count,
            aborted,
            halted_by_failures: self.halted_by_failures,
            started_at: self.started_at,
            finished_at: Utc::now(),
            metadata: self.metadata,
            records: self.records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    fn record(index: usize, success: bool) -> DispatchRecord {
        DispatchRecord {
            index,
            destination: format!("55119999900{index:02}"),
            success,
            error: (!success).then(|| "rejected".to_string()),
            variant_index: 0,
            media_index: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_record_publishes_snapshots() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let observer: ProgressObserver = Arc::new(move |s| sink.lock().unwrap().push(s));

        let mut aggregator =
            ProgressAggregator::new(Uuid::new_v4(), 3, RunMetadata::default()).with_observer(Some(observer));
        aggregator.record(record(0, true));
        aggregator.record(record(1, false));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(
            seen[1],
            ProgressSnapshot {
                current: 2,
                total: 3,
                succeeded: 1,
                failed: 1
            }
        );
    }

    #[test]
    fn test_consecutive_failures_reset_on_success() {
        let mut aggregator = ProgressAggregator::new(Uuid::new_v4(), 4, RunMetadata::default());
        aggregator.record(record(0, false));
        aggregator.record(record(1, false));
        assert_eq!(aggregator.consecutive_failures(), 2);
        aggregator.record(record(2, true));
        assert_eq!(aggregator.consecutive_failures(), 0);
    }

    #[test]
    fn test_finalize_counts_attempted_items() {
        let mut aggregator = ProgressAggregator::new(Uuid::new_v4(), 10, RunMetadata::default());
        for i in 0..4 {
            aggregator.record(record(i, i != 2));
        }
        let summary = aggregator.finalize(true, 0);
        assert_eq!(summary.planned, 10);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 1);
        assert!(summary.aborted);
        assert_eq!(summary.failures().count(), 1);
    }

    #[test]
    fn test_snapshot_percent() {
        let s = ProgressSnapshot {
            current: 1,
            total: 4,
            succeeded: 1,
            failed: 0,
        };
        assert_eq!(s.percent(), 25.0);
        let empty = ProgressSnapshot {
            current: 0,
            total: 0,
            succeeded: 0,
            failed: 0,
        };
        assert_eq!(empty.percent(), 100.0);
    }

    #[test]
    fn test_summary_json_round_trip_keeps_records() {
        let mut aggregator = ProgressAggregator::new(Uuid::new_v4(), 1, RunMetadata::default());
        aggregator.record(record(0, false));
        let summary = aggregator.finalize(false, 0);

        let json = serde_json::to_string(&summary).unwrap();
        let parsed: RunSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.records[0].error.as_deref(), Some("rejected"));
        assert_eq!(parsed.run_id, summary.run_id);
    }

    proptest! {
        #[test]
        fn prop_succeeded_plus_failed_equals_total(outcomes in proptest::collection::vec(any::<bool>(), 0..64)) {
            let mut aggregator = ProgressAggregator::new(Uuid::new_v4(), outcomes.len(), RunMetadata::default());
            for (i, ok) in outcomes.iter().enumerate() {
                let snapshot = aggregator.record(record(i, *ok));
                prop_assert_eq!(snapshot.succeeded + snapshot.failed, snapshot.current);
            }
            let summary = aggregator.finalize(false, 0);
            prop_assert_eq!(summary.succeeded + summary.failed, summary.total);
            prop_assert_eq!(summary.total, outcomes.len());
            prop_assert_eq!(summary.succeeded, outcomes.iter().filter(|o| **o).count());
        }
    }
}
