use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::merge::{Direction, MergeSummary};

/// Metrics collection and management
///
/// Only the `metrics` facade is used here; nothing is exported unless the
/// embedding application installs a recorder.
#[derive(Debug, Clone, Copy)]
pub struct MetricsCollector {
    // Scan metrics
    pub scans_total: &'static str,
    pub conversations_scanned_total: &'static str,
    pub scan_duration: &'static str,

    // Merge metrics
    pub merges_total: &'static str,
    pub records_merged_total: &'static str,
    pub merge_duration: &'static str,
    pub pending_differences: &'static str,

    // Error metrics
    pub errors_total: &'static str,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self {
            scans_total: "history_merge_scans_total",
            conversations_scanned_total: "history_merge_conversations_scanned_total",
            scan_duration: "history_merge_scan_duration_seconds",

            merges_total: "history_merge_merges_total",
            records_merged_total: "history_merge_records_merged_total",
            merge_duration: "history_merge_merge_duration_seconds",
            pending_differences: "history_merge_pending_differences",

            errors_total: "history_merge_errors_total",
        }
    }
}

impl MetricsCollector {
    /// Record a finished or cancelled scan
    pub fn record_scan(&self, conversations: usize, duration: Duration, complete: bool) {
        let status = if complete { "complete" } else { "cancelled" };
        counter!(self.scans_total, "status" => status).increment(1);
        counter!(self.conversations_scanned_total).increment(conversations as u64);
        histogram!(self.scan_duration, "status" => status).record(duration.as_secs_f64());
    }

    /// Record the outcome of a merge job
    pub fn record_merge(&self, direction: Direction, summary: &MergeSummary, duration: Duration) {
        let direction = direction.label();
        let status = if summary.cancelled {
            "cancelled"
        } else if summary.first_error.is_some() {
            "partial"
        } else {
            "success"
        };
        counter!(self.merges_total, "direction" => direction, "status" => status).increment(1);
        histogram!(self.merge_duration, "direction" => direction).record(duration.as_secs_f64());

        for (kind, count) in [
            ("chat", summary.conversations),
            ("message", summary.messages),
            ("participant", summary.participants),
            ("contact", summary.contacts),
            ("contact_group", summary.contact_groups),
        ] {
            counter!(self.records_merged_total, "direction" => direction, "kind" => kind).increment(count as u64);
        }
    }

    /// Publish how many conversations still differ on one side
    pub fn set_pending_differences(&self, side: &'static str, count: usize) {
        gauge!(self.pending_differences, "side" => side).set(count as f64);
    }

    /// Record error metrics
    pub fn record_error(&self, error_type: &'static str, operation: &'static str) {
        counter!(self.errors_total, "type" => error_type, "operation" => operation).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::default();
        assert_eq!(collector.scans_total, "history_merge_scans_total");
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let collector = MetricsCollector::default();
        collector.record_scan(3, Duration::from_millis(5), true);
        collector.record_merge(Direction::AToB, &MergeSummary::default(), Duration::from_millis(1));
        collector.record_error("access", "scan");
    }
}
