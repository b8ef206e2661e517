//! Per-supervisor counters
//!
//! Atomic counters owned by one supervisor and shared with its handle. There
//! is no process-wide instance; two supervisors never share counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct SessionMetrics {
    attempts_started: AtomicU64,
    reconnects_scheduled: AtomicU64,
    pairing_requests: AtomicU64,
    pairing_failures: AtomicU64,
    pairing_codes_delivered: AtomicU64,
    credential_saves: AtomicU64,
    messages_delivered: AtomicU64,
    messages_skipped: AtomicU64,
    stale_events_ignored: AtomicU64,
}

/// Point-in-time copy of [`SessionMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub attempts_started: u64,
    pub reconnects_scheduled: u64,
    pub pairing_requests: u64,
    pub pairing_failures: u64,
    pub pairing_codes_delivered: u64,
    pub credential_saves: u64,
    pub messages_delivered: u64,
    pub messages_skipped: u64,
    pub stale_events_ignored: u64,
}

impl SessionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_attempt_started(&self) {
        self.attempts_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect_scheduled(&self) {
        self.reconnects_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pairing_request(&self) {
        self.pairing_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pairing_failure(&self) {
        self.pairing_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_pairing_code_delivered(&self) {
        self.pairing_codes_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_credential_save(&self) {
        self.credential_saves.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_message_delivered(&self) {
        self.messages_delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_messages_skipped(&self, count: usize) {
        self.messages_skipped
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_stale_event(&self) {
        self.stale_events_ignored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            attempts_started: self.attempts_started.load(Ordering::Relaxed),
            reconnects_scheduled: self.reconnects_scheduled.load(Ordering::Relaxed),
            pairing_requests: self.pairing_requests.load(Ordering::Relaxed),
            pairing_failures: self.pairing_failures.load(Ordering::Relaxed),
            pairing_codes_delivered: self.pairing_codes_delivered.load(Ordering::Relaxed),
            credential_saves: self.credential_saves.load(Ordering::Relaxed),
            messages_delivered: self.messages_delivered.load(Ordering::Relaxed),
            messages_skipped: self.messages_skipped.load(Ordering::Relaxed),
            stale_events_ignored: self.stale_events_ignored.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_metrics_are_zero() {
        assert_eq!(SessionMetrics::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters_accumulate() {
        let metrics = SessionMetrics::new();
        metrics.record_attempt_started();
        metrics.record_attempt_started();
        metrics.record_pairing_request();
        metrics.record_messages_skipped(3);
        metrics.record_stale_event();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.attempts_started, 2);
        assert_eq!(snapshot.pairing_requests, 1);
        assert_eq!(snapshot.messages_skipped, 3);
        assert_eq!(snapshot.stale_events_ignored, 1);
        assert_eq!(snapshot.credential_saves, 0);
    }

    #[test]
    fn test_snapshot_serializes() {
        let metrics = SessionMetrics::new();
        metrics.record_credential_save();
        let json = serde_json::to_value(metrics.snapshot()).unwrap();
        assert_eq!(json["credential_saves"], 1);
    }
}
