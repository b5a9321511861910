//! Scheduler-side tracking glue.
//!
//! The execution engine owns activity-instance lifecycle and is the sole
//! writer of record numbers; [`InstanceTracker`] is the piece of it this crate
//! implements. One tracker exists per workflow instance. For every state
//! transition the scheduler calls the matching `track_*` operation, which
//! checks the merged pre-filter before constructing anything, builds the
//! record from live objects, matches it against each participant's compiled
//! profile, and schedules delivery off the emitting thread.
//!
//! Delivery is fire-and-forget with fault capture: participant failures and
//! panics surface only through [`InstanceTracker::flush`] and a `warn!` log,
//! never as an error on the emission path. Tracking is a side channel; a
//! broken sink must not fault the workflow it observes.
//!
//! `track_*` calls made inside a tokio runtime hand delivery to
//! `spawn_blocking`; calls made outside one deliver inline on the emitting
//! thread (failures are then logged at the call site instead of being
//! collected by `flush`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::activity::{Activity, ActivityInfo, ActivityInstance, Bookmark, FaultInfo};
use crate::tracking::record::{RecordKind, TrackingRecord};
use crate::tracking::runtime_profile::{
    default_profile_cache, RuntimeTrackingProfile, RuntimeTrackingProfileCache, TrackingRecordPreFilter,
};
use crate::tracking::{TrackingError, TrackingParticipant, TrackingProfile};
use crate::{workflow_instance_states, WorkflowIdentity};

/// Configuration options for an [`InstanceTracker`].
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    /// Advisory budget passed to every participant `track` call. The engine
    /// does not forcibly cancel an overrunning call; well-behaved
    /// participants abort themselves and return a timeout-classified error.
    pub participant_track_timeout: Duration,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            participant_track_timeout: Duration::from_secs(30),
        }
    }
}

struct ParticipantEntry {
    participant: Arc<dyn TrackingParticipant>,
    profile: Arc<RuntimeTrackingProfile>,
}

/// Per-workflow-instance tracking front end for the scheduler.
pub struct InstanceTracker {
    instance_id: Uuid,
    activity_definition_id: String,
    identity: Option<WorkflowIdentity>,
    options: TrackerOptions,
    participants: Vec<ParticipantEntry>,
    /// Union of every participant profile's pre-filter.
    pre_filter: TrackingRecordPreFilter,
    next_record_number: AtomicU64,
    next_activity_instance_id: AtomicU64,
    /// In-flight deliveries: (participant name, join handle). Drained by
    /// `flush`.
    pending: Mutex<Vec<(String, JoinHandle<Result<(), TrackingError>>)>>,
}

/// Builder for [`InstanceTracker`]. Participants register before the instance
/// starts; each brings its own profile, compiled through the (shared or
/// default) cache.
pub struct InstanceTrackerBuilder {
    root: Arc<Activity>,
    instance_id: Uuid,
    identity: Option<WorkflowIdentity>,
    options: TrackerOptions,
    cache: Option<Arc<RuntimeTrackingProfileCache>>,
    participants: Vec<(Arc<dyn TrackingParticipant>, TrackingProfile)>,
}

impl InstanceTrackerBuilder {
    pub fn with_instance_id(mut self, instance_id: Uuid) -> Self {
        self.instance_id = instance_id;
        self
    }

    pub fn with_identity(mut self, identity: WorkflowIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_options(mut self, options: TrackerOptions) -> Self {
        self.options = options;
        self
    }

    /// Compile profiles through a caller-owned cache instead of the
    /// process-wide default.
    pub fn with_profile_cache(mut self, cache: Arc<RuntimeTrackingProfileCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_participant(mut self, participant: Arc<dyn TrackingParticipant>, profile: TrackingProfile) -> Self {
        self.participants.push((participant, profile));
        self
    }

    pub fn build(self) -> InstanceTracker {
        // Install a default subscriber if none set (ok to call many times)
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
            .try_init();

        let mut pre_filter = TrackingRecordPreFilter::default();
        let participants: Vec<ParticipantEntry> = self
            .participants
            .into_iter()
            .map(|(participant, profile)| {
                let compiled = match &self.cache {
                    Some(cache) => cache.get(&profile, &self.root),
                    None => default_profile_cache().get(&profile, &self.root),
                };
                pre_filter.merge(compiled.pre_filter());
                ParticipantEntry {
                    participant,
                    profile: compiled,
                }
            })
            .collect();

        debug!(
            instance_id = %self.instance_id,
            root = %self.root.display_name(),
            participants = participants.len(),
            "instance tracker ready"
        );

        InstanceTracker {
            instance_id: self.instance_id,
            activity_definition_id: self.root.display_name().to_string(),
            identity: self.identity,
            options: self.options,
            participants,
            pre_filter,
            next_record_number: AtomicU64::new(1),
            next_activity_instance_id: AtomicU64::new(1),
            pending: Mutex::new(Vec::new()),
        }
    }
}

impl InstanceTracker {
    pub fn builder(root: Arc<Activity>) -> InstanceTrackerBuilder {
        InstanceTrackerBuilder {
            root,
            instance_id: Uuid::new_v4(),
            identity: None,
            options: TrackerOptions::default(),
            cache: None,
            participants: Vec::new(),
        }
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn pre_filter(&self) -> &TrackingRecordPreFilter {
        &self.pre_filter
    }

    /// Pre-filter check the scheduler runs before even constructing a record
    /// of `kind`.
    pub fn should_track(&self, kind: RecordKind) -> bool {
        !self.participants.is_empty() && self.pre_filter.wants(kind)
    }

    /// Whether any participant wants argument/variable capture for instances
    /// of the named activity.
    pub fn captures_activity_data(&self, activity_name: &str) -> bool {
        self.participants.iter().any(|e| e.profile.tracks_activity(activity_name))
    }

    /// Create a live activity instance with the next scheduler-assigned
    /// numeric id.
    pub fn create_instance(&self, activity: &Arc<Activity>) -> ActivityInstance {
        let id = self.next_activity_instance_id.fetch_add(1, Ordering::Relaxed);
        ActivityInstance::new(Arc::clone(activity), id)
    }

    fn next_record_number(&self) -> u64 {
        self.next_record_number.fetch_add(1, Ordering::Relaxed)
    }

    /// Emit a workflow-instance transition (open state vocabulary, see
    /// [`crate::workflow_instance_states`]).
    pub fn track_workflow_state(&self, state: &str) {
        if !self.should_track(RecordKind::WorkflowInstance) {
            return;
        }
        let record = TrackingRecord::workflow_instance(
            self.instance_id,
            self.next_record_number(),
            &self.activity_definition_id,
            state,
            self.identity.clone(),
        );
        self.dispatch(record);
    }

    pub fn track_workflow_started(&self) {
        self.track_workflow_state(workflow_instance_states::STARTED);
    }

    pub fn track_workflow_terminated(&self, reason: &str) {
        if !self.should_track(RecordKind::WorkflowInstance) {
            return;
        }
        let record = TrackingRecord::workflow_instance_terminated(
            self.instance_id,
            self.next_record_number(),
            &self.activity_definition_id,
            self.identity.clone(),
            reason,
        );
        self.dispatch(record);
    }

    pub fn track_workflow_aborted(&self, reason: &str) {
        if !self.should_track(RecordKind::WorkflowInstance) {
            return;
        }
        let record = TrackingRecord::workflow_instance_aborted(
            self.instance_id,
            self.next_record_number(),
            &self.activity_definition_id,
            self.identity.clone(),
            reason,
        );
        self.dispatch(record);
    }

    pub fn track_workflow_suspended(&self, reason: &str) {
        if !self.should_track(RecordKind::WorkflowInstance) {
            return;
        }
        let record = TrackingRecord::workflow_instance_suspended(
            self.instance_id,
            self.next_record_number(),
            &self.activity_definition_id,
            self.identity.clone(),
            reason,
        );
        self.dispatch(record);
    }

    /// Emit the unhandled-exception transition for a fault that reached the
    /// root without a handler.
    pub fn track_unhandled_exception(&self, source: &Arc<ActivityInstance>, fault: FaultInfo) {
        if !self.should_track(RecordKind::WorkflowInstance) {
            return;
        }
        let record = TrackingRecord::workflow_instance_unhandled_exception(
            self.instance_id,
            self.next_record_number(),
            &self.activity_definition_id,
            self.identity.clone(),
            ActivityInfo::from_instance(source),
            fault,
        );
        self.dispatch(record);
    }

    /// Emit an activity-instance transition. Argument/variable snapshots are
    /// captured only when some subscription asked for this activity's data.
    pub fn track_activity_state(&self, instance: &Arc<ActivityInstance>, state: &str) {
        if self.participants.is_empty() || !self.pre_filter.wants_activity_state(state) {
            return;
        }
        let mut record = TrackingRecord::activity_state(
            self.instance_id,
            self.next_record_number(),
            ActivityInfo::from_instance(instance),
            state,
        );
        if self.captures_activity_data(instance.activity().display_name()) {
            record = record.with_captured(instance.arguments().clone(), instance.variables().clone());
        }
        self.dispatch(record);
    }

    /// Emit a scheduled record; `None` parent means the root itself is being
    /// scheduled.
    pub fn track_activity_scheduled(&self, parent: Option<&Arc<ActivityInstance>>, child: &Arc<ActivityInstance>) {
        if !self.should_track(RecordKind::ActivityScheduled) {
            return;
        }
        let record = TrackingRecord::activity_scheduled(
            self.instance_id,
            self.next_record_number(),
            parent.map(ActivityInfo::from_instance),
            ActivityInfo::from_instance(child),
        );
        self.dispatch(record);
    }

    pub fn track_cancel_requested(&self, parent: Option<&Arc<ActivityInstance>>, child: &Arc<ActivityInstance>) {
        if !self.should_track(RecordKind::CancelRequested) {
            return;
        }
        let record = TrackingRecord::cancel_requested(
            self.instance_id,
            self.next_record_number(),
            parent.map(ActivityInfo::from_instance),
            ActivityInfo::from_instance(child),
        );
        self.dispatch(record);
    }

    /// Emit one fault-propagation step. `handler` is `None` while the fault
    /// is still unhandled; `is_fault_source` marks the first step.
    pub fn track_fault_propagation(
        &self,
        source: &Arc<ActivityInstance>,
        handler: Option<&Arc<ActivityInstance>>,
        is_fault_source: bool,
        fault: FaultInfo,
    ) {
        if !self.should_track(RecordKind::FaultPropagation) {
            return;
        }
        let record = TrackingRecord::fault_propagation(
            self.instance_id,
            self.next_record_number(),
            ActivityInfo::from_instance(source),
            handler.map(ActivityInfo::from_instance),
            is_fault_source,
            fault,
        );
        self.dispatch(record);
    }

    pub fn track_bookmark_resumption(
        &self,
        bookmark: &Bookmark,
        owner: &Arc<ActivityInstance>,
        payload: serde_json::Value,
    ) {
        if !self.should_track(RecordKind::BookmarkResumption) {
            return;
        }
        let record = TrackingRecord::bookmark_resumption(
            self.instance_id,
            self.next_record_number(),
            bookmark.scope().map(|s| s.id()).unwrap_or_else(Uuid::nil),
            bookmark.name().map(str::to_string),
            ActivityInfo::from_instance(owner),
            payload,
        );
        self.dispatch(record);
    }

    /// Emit a user-defined record. Custom records have no pre-filter flag:
    /// the caller controls their cost, so they are always constructed and go
    /// straight to matching.
    pub fn track_custom(
        &self,
        name: &str,
        activity: Option<&Arc<ActivityInstance>>,
        data: HashMap<String, serde_json::Value>,
    ) {
        if self.participants.is_empty() {
            return;
        }
        let mut record = TrackingRecord::custom(
            self.instance_id,
            self.next_record_number(),
            name,
            activity.map(ActivityInfo::from_instance),
        );
        for (key, value) in data {
            record = record.with_data(key, value);
        }
        self.dispatch(record);
    }

    /// Match against every participant's compiled profile and deliver each
    /// prepared copy.
    ///
    /// Inside a tokio runtime, delivery runs off the emitting thread via
    /// `spawn_blocking` and outcomes are collected by `flush`. Without a
    /// runtime, delivery runs inline on the emitting thread and failures are
    /// logged immediately (`flush` has nothing to report for them).
    fn dispatch(&self, record: TrackingRecord) {
        let mut deliveries = Vec::new();
        for entry in &self.participants {
            if let Some(prepared) = entry.profile.match_record(&record) {
                deliveries.push((entry.participant.name().to_string(), Arc::clone(&entry.participant), prepared));
            }
        }
        if deliveries.is_empty() {
            debug!(
                instance_id = %self.instance_id,
                record_number = record.record_number(),
                kind = ?record.kind(),
                "no subscription matched; record dropped"
            );
            return;
        }

        let timeout = self.options.participant_track_timeout;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                // Mutex lock should never fail in normal operation - if poisoned, it indicates a serious bug
                let mut pending = self.pending.lock().expect("Mutex should not be poisoned");
                for (name, participant, prepared) in deliveries {
                    let handle = runtime.spawn_blocking(move || participant.track(&prepared, timeout));
                    pending.push((name, handle));
                }
            }
            Err(_) => {
                for (name, participant, prepared) in deliveries {
                    if let Err(err) = participant.track(&prepared, timeout) {
                        warn!(
                            instance_id = %self.instance_id,
                            participant = %name,
                            timed_out = err.is_timeout(),
                            error = %err,
                            "tracking participant failed; record not re-delivered"
                        );
                    }
                }
            }
        }
    }

    /// Await every in-flight delivery, returning captured failures.
    ///
    /// Participant errors and panics end up here and in a `warn!` log; the
    /// emission path never observes them.
    pub async fn flush(&self) -> Vec<TrackingError> {
        let drained: Vec<(String, JoinHandle<Result<(), TrackingError>>)> = {
            // Mutex lock should never fail in normal operation - if poisoned, it indicates a serious bug
            let mut pending = self.pending.lock().expect("Mutex should not be poisoned");
            pending.drain(..).collect()
        };
        let (names, handles): (Vec<String>, Vec<JoinHandle<Result<(), TrackingError>>>) =
            drained.into_iter().unzip();

        let mut failures = Vec::new();
        for (name, result) in names.into_iter().zip(futures::future::join_all(handles).await) {
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    warn!(
                        instance_id = %self.instance_id,
                        participant = %name,
                        timed_out = err.is_timeout(),
                        error = %err,
                        "tracking participant failed; record not re-delivered"
                    );
                    failures.push(err);
                }
                Err(join_err) => {
                    let err = TrackingError::failure(&name, format!("tracking delivery panicked: {join_err}"));
                    warn!(instance_id = %self.instance_id, participant = %name, error = %err, "tracking delivery panicked");
                    failures.push(err);
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity_states;
    use crate::tracking::query::{ActivityStateQuery, TrackingProfile, WorkflowInstanceQuery};
    use crate::tracking::InMemoryParticipant;
    use crate::WILDCARD;

    fn everything_profile(name: &str) -> TrackingProfile {
        TrackingProfile::new(name)
            .with_query(ActivityStateQuery::default().with_state(WILDCARD))
            .with_query(WorkflowInstanceQuery::default())
    }

    #[tokio::test]
    async fn record_numbers_are_monotonic_and_not_burned_by_prefiltered_kinds() {
        let root = Activity::root("Main", "workflow.Sequence");
        let sink = Arc::new(InMemoryParticipant::new("sink"));
        let tracker = InstanceTracker::builder(Arc::clone(&root))
            .with_participant(sink.clone(), everything_profile("p"))
            .build();

        // No bookmark subscription exists, so this emission is pre-filtered
        // away before a record number is assigned.
        assert!(!tracker.should_track(RecordKind::BookmarkResumption));
        let owner = Arc::new(tracker.create_instance(&root));
        tracker.track_bookmark_resumption(&Bookmark::named("Approve"), &owner, serde_json::Value::Null);

        tracker.track_workflow_started();
        tracker.track_activity_state(&owner, activity_states::EXECUTING);
        let failures = tracker.flush().await;
        assert!(failures.is_empty());

        let mut numbers: Vec<u64> = sink.records().iter().map(|r| r.record_number()).collect();
        numbers.sort_unstable();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn participant_failure_is_isolated_and_reported_via_flush() {
        let root = Activity::root("Main", "workflow.Sequence");
        let good = Arc::new(InMemoryParticipant::new("good"));
        let bad = Arc::new(InMemoryParticipant::failing("bad", "sink offline"));
        let tracker = InstanceTracker::builder(Arc::clone(&root))
            .with_participant(good.clone(), everything_profile("p1"))
            .with_participant(bad, everything_profile("p2"))
            .build();

        tracker.track_workflow_started();
        let failures = tracker.flush().await;
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].participant, "bad");
        assert_eq!(good.len(), 1, "healthy participant still gets its copy");
    }

    #[test]
    fn delivers_inline_without_a_tokio_runtime() {
        let root = Activity::root("Main", "workflow.Sequence");
        let sink = Arc::new(InMemoryParticipant::new("sink"));
        let tracker = InstanceTracker::builder(Arc::clone(&root))
            .with_participant(sink.clone(), everything_profile("p"))
            .build();

        tracker.track_workflow_started();
        assert_eq!(sink.len(), 1, "no runtime available, so delivery is synchronous");
    }

    #[tokio::test]
    async fn create_instance_assigns_sequential_ids() {
        let root = Activity::root("Main", "workflow.Sequence");
        let tracker = InstanceTracker::builder(Arc::clone(&root)).build();
        let a = tracker.create_instance(&root);
        let b = tracker.create_instance(&root);
        assert_eq!(a.instance_id(), 1);
        assert_eq!(b.instance_id(), 2);
    }
}
