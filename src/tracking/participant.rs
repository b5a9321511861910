//! Tracking participant contract and the in-memory sink used by tests and
//! local diagnostics.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use crate::tracking::record::TrackingRecord;

/// Failure surfaced by a participant's `track` call.
///
/// Participants classify their own failures; the engine only distinguishes
/// timed-out deliveries (the participant detected it overran its advisory
/// budget) from other failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackingError {
    /// Participant that failed.
    pub participant: String,
    /// Human-readable error message.
    pub message: String,
    /// Whether the participant failed because it exceeded the advisory
    /// timeout.
    pub timed_out: bool,
}

impl TrackingError {
    pub fn failure(participant: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            participant: participant.into(),
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(participant: impl Into<String>, budget: Duration) -> Self {
        Self {
            participant: participant.into(),
            message: format!("track call exceeded {}ms budget", budget.as_millis()),
            timed_out: true,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.timed_out
    }
}

impl fmt::Display for TrackingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.participant, self.message)
    }
}

impl std::error::Error for TrackingError {}

/// Consumer of matched tracking records.
///
/// Registered with the host before a workflow instance starts and lives for
/// the life of the engine, not per instance. `track` is synchronous; the
/// engine schedules it off the emitting thread and captures failures, so an
/// implementation may block (within reason) but must never assume it runs on
/// the scheduler thread.
///
/// The timeout is advisory: a slow durable sink should abort within it and
/// return [`TrackingError::timeout`]; the engine does not forcibly cancel a
/// running `track` call.
pub trait TrackingParticipant: Send + Sync {
    /// Stable name used in logs and error reports.
    fn name(&self) -> &str;

    /// Deliver one record. The record is this participant's own prepared
    /// copy; downstream mutation cannot leak into other participants' views.
    fn track(&self, record: &TrackingRecord, timeout: Duration) -> Result<(), TrackingError>;
}

/// Collecting sink for tests and local diagnostics. Optionally fails every
/// delivery to exercise the fault-isolation path.
pub struct InMemoryParticipant {
    name: String,
    records: Mutex<VecDeque<TrackingRecord>>,
    fail_with: Option<String>,
}

impl InMemoryParticipant {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(VecDeque::new()),
            fail_with: None,
        }
    }

    /// Build a participant whose every `track` call fails with `message`.
    pub fn failing(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Mutex::new(VecDeque::new()),
            fail_with: Some(message.into()),
        }
    }

    /// Snapshot of everything delivered so far, in delivery order.
    pub fn records(&self) -> Vec<TrackingRecord> {
        // Mutex lock should never fail in normal operation - if poisoned, it indicates a serious bug
        self.records
            .lock()
            .expect("Mutex should not be poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        // Mutex lock should never fail in normal operation - if poisoned, it indicates a serious bug
        self.records.lock().expect("Mutex should not be poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl TrackingParticipant for InMemoryParticipant {
    fn name(&self) -> &str {
        &self.name
    }

    fn track(&self, record: &TrackingRecord, _timeout: Duration) -> Result<(), TrackingError> {
        if let Some(message) = &self.fail_with {
            return Err(TrackingError::failure(&self.name, message.clone()));
        }
        // Mutex lock should never fail in normal operation - if poisoned, it indicates a serious bug
        self.records
            .lock()
            .expect("Mutex should not be poisoned")
            .push_back(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn in_memory_participant_collects_in_order() {
        let sink = InMemoryParticipant::new("sink");
        let id = Uuid::new_v4();
        for n in 1..=3 {
            let r = TrackingRecord::workflow_instance(id, n, "Main", "Started", None);
            sink.track(&r, Duration::from_secs(30)).expect("track should succeed");
        }
        let records: Vec<u64> = sink.records().iter().map(|r| r.record_number()).collect();
        assert_eq!(records, vec![1, 2, 3]);
    }

    #[test]
    fn failing_participant_reports_a_tracking_error() {
        let sink = InMemoryParticipant::failing("flaky", "disk full");
        let r = TrackingRecord::workflow_instance(Uuid::new_v4(), 1, "Main", "Started", None);
        let err = sink.track(&r, Duration::from_secs(30)).expect_err("should fail");
        assert_eq!(err.participant, "flaky");
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn timeout_error_classification() {
        let err = TrackingError::timeout("slow-sink", Duration::from_millis(250));
        assert!(err.is_timeout());
        assert!(err.message.contains("250ms"));
    }
}
