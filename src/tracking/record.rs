//! Tracking record model: one immutable fact about workflow execution.
//!
//! Every record shares an envelope (instance id, per-instance record number,
//! UTC event time, severity, annotations) around a closed set of variant
//! payloads. Records are write-once: the scheduler populates variant fields at
//! construction, and the only post-construction mutation is the match phase
//! stamping query annotations and reducing captured activity data onto an
//! independent copy.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::activity::{ActivityInfo, FaultInfo};
use crate::{TraceLevel, WorkflowIdentity};

/// Shared empty annotation view so records without annotations never allocate
/// a map of their own.
fn empty_annotations() -> Arc<HashMap<String, String>> {
    static EMPTY: OnceLock<Arc<HashMap<String, String>>> = OnceLock::new();
    Arc::clone(EMPTY.get_or_init(|| Arc::new(HashMap::new())))
}

/// Discriminant of the record variants, used by the pre-filter and by
/// per-kind dispatch without touching variant payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    WorkflowInstance,
    ActivityState,
    ActivityScheduled,
    CancelRequested,
    FaultPropagation,
    BookmarkResumption,
    Custom,
}

/// Variant payload of a tracking record.
///
/// The workflow-instance family is several variants rather than one because
/// terminal transitions carry extra fields (reason, fault); all of them key
/// into the same workflow-instance subscription table by state string.
#[derive(Debug, Clone)]
pub enum RecordData {
    /// The workflow instance transitioned to `state` (open vocabulary, see
    /// [`crate::workflow_instance_states`]).
    WorkflowInstance {
        activity_definition_id: String,
        state: String,
        identity: Option<WorkflowIdentity>,
    },
    /// The workflow instance was terminated by the host, with a reason.
    WorkflowInstanceTerminated {
        activity_definition_id: String,
        identity: Option<WorkflowIdentity>,
        reason: String,
    },
    /// The workflow instance was aborted, with a reason.
    WorkflowInstanceAborted {
        activity_definition_id: String,
        identity: Option<WorkflowIdentity>,
        reason: String,
    },
    /// The workflow instance was suspended, with a reason.
    WorkflowInstanceSuspended {
        activity_definition_id: String,
        identity: Option<WorkflowIdentity>,
        reason: String,
    },
    /// A fault reached the root of the instance unhandled.
    WorkflowInstanceUnhandledException {
        activity_definition_id: String,
        identity: Option<WorkflowIdentity>,
        fault_source: ActivityInfo,
        fault: FaultInfo,
    },
    /// An activity instance transitioned to `state`
    /// (see [`crate::activity_states`]).
    ActivityState {
        activity: ActivityInfo,
        state: String,
        /// Captured argument snapshot; reduced to the matched query's
        /// requested subset during record preparation.
        arguments: HashMap<String, serde_json::Value>,
        /// Captured variable snapshot; reduced like `arguments`.
        variables: HashMap<String, serde_json::Value>,
    },
    /// `activity` scheduled `child`. A `None` activity means the root itself
    /// is being scheduled.
    ActivityScheduled {
        activity: Option<ActivityInfo>,
        child: ActivityInfo,
    },
    /// `activity` requested cancellation of `child`.
    CancelRequested {
        activity: Option<ActivityInfo>,
        child: ActivityInfo,
    },
    /// A fault is travelling from `fault_source` toward a handler. One record
    /// is emitted per propagation step; `is_fault_source` marks the first.
    FaultPropagation {
        fault_source: ActivityInfo,
        /// `None` while the fault is still unhandled.
        fault_handler: Option<ActivityInfo>,
        is_fault_source: bool,
        fault: FaultInfo,
    },
    /// A bookmark was resumed with a payload.
    BookmarkResumption {
        /// Nil UUID for unscoped bookmarks.
        bookmark_scope: Uuid,
        /// `None` for anonymous bookmarks.
        bookmark_name: Option<String>,
        owner: ActivityInfo,
        payload: serde_json::Value,
    },
    /// User-emitted record with an open data mapping.
    Custom {
        name: String,
        activity: Option<ActivityInfo>,
        data: HashMap<String, serde_json::Value>,
    },
}

impl RecordData {
    pub fn kind(&self) -> RecordKind {
        match self {
            RecordData::WorkflowInstance { .. }
            | RecordData::WorkflowInstanceTerminated { .. }
            | RecordData::WorkflowInstanceAborted { .. }
            | RecordData::WorkflowInstanceSuspended { .. }
            | RecordData::WorkflowInstanceUnhandledException { .. } => RecordKind::WorkflowInstance,
            RecordData::ActivityState { .. } => RecordKind::ActivityState,
            RecordData::ActivityScheduled { .. } => RecordKind::ActivityScheduled,
            RecordData::CancelRequested { .. } => RecordKind::CancelRequested,
            RecordData::FaultPropagation { .. } => RecordKind::FaultPropagation,
            RecordData::BookmarkResumption { .. } => RecordKind::BookmarkResumption,
            RecordData::Custom { .. } => RecordKind::Custom,
        }
    }

    /// State string a workflow-instance record keys into the subscription
    /// table with; `None` for non-workflow kinds.
    pub fn workflow_state(&self) -> Option<&str> {
        match self {
            RecordData::WorkflowInstance { state, .. } => Some(state),
            RecordData::WorkflowInstanceTerminated { .. } => Some(crate::workflow_instance_states::TERMINATED),
            RecordData::WorkflowInstanceAborted { .. } => Some(crate::workflow_instance_states::ABORTED),
            RecordData::WorkflowInstanceSuspended { .. } => Some(crate::workflow_instance_states::SUSPENDED),
            RecordData::WorkflowInstanceUnhandledException { .. } => {
                Some(crate::workflow_instance_states::UNHANDLED_EXCEPTION)
            }
            _ => None,
        }
    }
}

/// One immutable fact about workflow execution.
#[derive(Debug, Clone)]
pub struct TrackingRecord {
    instance_id: Uuid,
    record_number: u64,
    event_time: DateTime<Utc>,
    level: TraceLevel,
    annotations: Arc<HashMap<String, String>>,
    data: RecordData,
}

impl TrackingRecord {
    /// Record number reserved for "not yet assigned", accepted by the
    /// reconstruction constructors.
    pub const UNASSIGNED_RECORD_NUMBER: u64 = 0;

    fn new(instance_id: Uuid, record_number: u64, level: TraceLevel, data: RecordData) -> Self {
        Self {
            instance_id,
            record_number,
            event_time: Utc::now(),
            level,
            annotations: empty_annotations(),
            data,
        }
    }

    pub fn workflow_instance(
        instance_id: Uuid,
        record_number: u64,
        activity_definition_id: impl Into<String>,
        state: impl Into<String>,
        identity: Option<WorkflowIdentity>,
    ) -> Self {
        Self::new(
            instance_id,
            record_number,
            TraceLevel::Informational,
            RecordData::WorkflowInstance {
                activity_definition_id: activity_definition_id.into(),
                state: state.into(),
                identity,
            },
        )
    }

    pub fn workflow_instance_terminated(
        instance_id: Uuid,
        record_number: u64,
        activity_definition_id: impl Into<String>,
        identity: Option<WorkflowIdentity>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            instance_id,
            record_number,
            TraceLevel::Error,
            RecordData::WorkflowInstanceTerminated {
                activity_definition_id: activity_definition_id.into(),
                identity,
                reason: reason.into(),
            },
        )
    }

    pub fn workflow_instance_aborted(
        instance_id: Uuid,
        record_number: u64,
        activity_definition_id: impl Into<String>,
        identity: Option<WorkflowIdentity>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            instance_id,
            record_number,
            TraceLevel::Warning,
            RecordData::WorkflowInstanceAborted {
                activity_definition_id: activity_definition_id.into(),
                identity,
                reason: reason.into(),
            },
        )
    }

    pub fn workflow_instance_suspended(
        instance_id: Uuid,
        record_number: u64,
        activity_definition_id: impl Into<String>,
        identity: Option<WorkflowIdentity>,
        reason: impl Into<String>,
    ) -> Self {
        Self::new(
            instance_id,
            record_number,
            TraceLevel::Informational,
            RecordData::WorkflowInstanceSuspended {
                activity_definition_id: activity_definition_id.into(),
                identity,
                reason: reason.into(),
            },
        )
    }

    pub fn workflow_instance_unhandled_exception(
        instance_id: Uuid,
        record_number: u64,
        activity_definition_id: impl Into<String>,
        identity: Option<WorkflowIdentity>,
        fault_source: ActivityInfo,
        fault: FaultInfo,
    ) -> Self {
        Self::new(
            instance_id,
            record_number,
            TraceLevel::Error,
            RecordData::WorkflowInstanceUnhandledException {
                activity_definition_id: activity_definition_id.into(),
                identity,
                fault_source,
                fault,
            },
        )
    }

    pub fn activity_state(
        instance_id: Uuid,
        record_number: u64,
        activity: ActivityInfo,
        state: impl Into<String>,
    ) -> Self {
        Self::new(
            instance_id,
            record_number,
            TraceLevel::Informational,
            RecordData::ActivityState {
                activity,
                state: state.into(),
                arguments: HashMap::new(),
                variables: HashMap::new(),
            },
        )
    }

    pub fn activity_scheduled(
        instance_id: Uuid,
        record_number: u64,
        activity: Option<ActivityInfo>,
        child: ActivityInfo,
    ) -> Self {
        Self::new(
            instance_id,
            record_number,
            TraceLevel::Informational,
            RecordData::ActivityScheduled { activity, child },
        )
    }

    pub fn cancel_requested(
        instance_id: Uuid,
        record_number: u64,
        activity: Option<ActivityInfo>,
        child: ActivityInfo,
    ) -> Self {
        Self::new(
            instance_id,
            record_number,
            TraceLevel::Informational,
            RecordData::CancelRequested { activity, child },
        )
    }

    pub fn fault_propagation(
        instance_id: Uuid,
        record_number: u64,
        fault_source: ActivityInfo,
        fault_handler: Option<ActivityInfo>,
        is_fault_source: bool,
        fault: FaultInfo,
    ) -> Self {
        Self::new(
            instance_id,
            record_number,
            TraceLevel::Warning,
            RecordData::FaultPropagation {
                fault_source,
                fault_handler,
                is_fault_source,
                fault,
            },
        )
    }

    pub fn bookmark_resumption(
        instance_id: Uuid,
        record_number: u64,
        bookmark_scope: Uuid,
        bookmark_name: Option<String>,
        owner: ActivityInfo,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(
            instance_id,
            record_number,
            TraceLevel::Informational,
            RecordData::BookmarkResumption {
                bookmark_scope,
                bookmark_name,
                owner,
                payload,
            },
        )
    }

    pub fn custom(instance_id: Uuid, record_number: u64, name: impl Into<String>, activity: Option<ActivityInfo>) -> Self {
        Self::new(
            instance_id,
            record_number,
            TraceLevel::Informational,
            RecordData::Custom {
                name: name.into(),
                activity,
                data: HashMap::new(),
            },
        )
    }

    /// Override the default severity (hosts layering custom states may need
    /// a non-default level).
    pub fn with_level(mut self, level: TraceLevel) -> Self {
        self.level = level;
        self
    }

    /// Override the event time, e.g. when reconstructing a persisted record.
    pub fn with_event_time(mut self, event_time: DateTime<Utc>) -> Self {
        self.event_time = event_time;
        self
    }

    /// Attach an annotation view, e.g. when reconstructing a persisted record
    /// that had query annotations stamped on delivery.
    pub fn with_annotations(mut self, annotations: HashMap<String, String>) -> Self {
        self.annotations = Arc::new(annotations);
        self
    }

    /// Attach captured argument/variable snapshots to an activity-state
    /// record, e.g. when the scheduler enables data capture for a subscribed
    /// activity or when reconstructing a persisted record.
    ///
    /// # Panics
    ///
    /// Panics if the record is not an activity-state record.
    pub fn with_captured(
        mut self,
        arguments: HashMap<String, serde_json::Value>,
        variables: HashMap<String, serde_json::Value>,
    ) -> Self {
        match &mut self.data {
            RecordData::ActivityState {
                arguments: a,
                variables: v,
                ..
            } => {
                *a = arguments;
                *v = variables;
            }
            other => panic!(
                "with_captured is only valid on activity-state records, got {:?}",
                other.kind()
            ),
        }
        self
    }

    /// Attach a data entry to a custom record.
    ///
    /// # Panics
    ///
    /// Panics if the record is not a custom record.
    pub fn with_data(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        match &mut self.data {
            RecordData::Custom { data, .. } => {
                data.insert(key.into(), value);
            }
            other => panic!("with_data is only valid on custom records, got {:?}", other.kind()),
        }
        self
    }

    pub fn instance_id(&self) -> Uuid {
        self.instance_id
    }

    pub fn record_number(&self) -> u64 {
        self.record_number
    }

    pub fn event_time(&self) -> DateTime<Utc> {
        self.event_time
    }

    pub fn level(&self) -> TraceLevel {
        self.level
    }

    /// Annotations stamped by the matched query; empty until a record has
    /// been through the match phase against an annotated query.
    pub fn annotations(&self) -> &HashMap<String, String> {
        &self.annotations
    }

    pub fn data(&self) -> &RecordData {
        &self.data
    }

    pub fn kind(&self) -> RecordKind {
        self.data.kind()
    }

    /// Replace the annotation view wholesale. The view is shared and
    /// immutable, so stamping one delivery copy never leaks into another.
    pub(crate) fn set_annotations(&mut self, annotations: Arc<HashMap<String, String>>) {
        self.annotations = annotations;
    }

    pub(crate) fn data_mut(&mut self) -> &mut RecordData {
        &mut self.data
    }
}

impl fmt::Display for TrackingRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] instance={} level={} ",
            self.record_number, self.instance_id, self.level
        )?;
        match &self.data {
            RecordData::WorkflowInstance {
                activity_definition_id,
                state,
                identity,
            } => {
                write!(f, "WorkflowInstance definition={activity_definition_id} state={state}")?;
                if let Some(id) = identity {
                    write!(f, " identity={id}")?;
                }
                Ok(())
            }
            RecordData::WorkflowInstanceTerminated {
                activity_definition_id,
                reason,
                ..
            } => write!(
                f,
                "WorkflowInstanceTerminated definition={activity_definition_id} reason={reason}"
            ),
            RecordData::WorkflowInstanceAborted {
                activity_definition_id,
                reason,
                ..
            } => write!(
                f,
                "WorkflowInstanceAborted definition={activity_definition_id} reason={reason}"
            ),
            RecordData::WorkflowInstanceSuspended {
                activity_definition_id,
                reason,
                ..
            } => write!(
                f,
                "WorkflowInstanceSuspended definition={activity_definition_id} reason={reason}"
            ),
            RecordData::WorkflowInstanceUnhandledException {
                activity_definition_id,
                fault_source,
                fault,
                ..
            } => write!(
                f,
                "WorkflowInstanceUnhandledException definition={activity_definition_id} source=[{fault_source}] fault={fault}"
            ),
            RecordData::ActivityState {
                activity,
                state,
                arguments,
                variables,
            } => write!(
                f,
                "ActivityState activity=[{activity}] state={state} arguments={} variables={}",
                arguments.len(),
                variables.len()
            ),
            RecordData::ActivityScheduled { activity, child } => match activity {
                Some(parent) => write!(f, "ActivityScheduled activity=[{parent}] child=[{child}]"),
                None => write!(f, "ActivityScheduled activity=<root> child=[{child}]"),
            },
            RecordData::CancelRequested { activity, child } => match activity {
                Some(parent) => write!(f, "CancelRequested activity=[{parent}] child=[{child}]"),
                None => write!(f, "CancelRequested activity=<root> child=[{child}]"),
            },
            RecordData::FaultPropagation {
                fault_source,
                fault_handler,
                is_fault_source,
                fault,
            } => {
                write!(f, "FaultPropagation source=[{fault_source}]")?;
                match fault_handler {
                    Some(h) => write!(f, " handler=[{h}]")?,
                    None => write!(f, " handler=<unhandled>")?,
                }
                write!(f, " is_source={is_fault_source} fault={fault}")
            }
            RecordData::BookmarkResumption {
                bookmark_scope,
                bookmark_name,
                owner,
                ..
            } => write!(
                f,
                "BookmarkResumption name={} scope={bookmark_scope} owner=[{owner}]",
                bookmark_name.as_deref().unwrap_or("<anonymous>")
            ),
            RecordData::Custom { name, activity, data } => {
                write!(f, "Custom name={name}")?;
                if let Some(a) = activity {
                    write!(f, " activity=[{a}]")?;
                }
                write!(f, " data={}", data.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow_instance_states;

    #[test]
    fn workflow_variants_share_a_kind_and_expose_their_state() {
        let id = Uuid::new_v4();
        let started = TrackingRecord::workflow_instance(id, 1, "Main", workflow_instance_states::STARTED, None);
        let terminated = TrackingRecord::workflow_instance_terminated(id, 2, "Main", None, "operator request");
        assert_eq!(started.kind(), RecordKind::WorkflowInstance);
        assert_eq!(terminated.kind(), RecordKind::WorkflowInstance);
        assert_eq!(started.data().workflow_state(), Some("Started"));
        assert_eq!(terminated.data().workflow_state(), Some("Terminated"));
        assert_eq!(terminated.level(), TraceLevel::Error);
    }

    #[test]
    fn clone_is_independent_and_display_equal() {
        let info = ActivityInfo::new("A", "1.1", "2", "t.A");
        let mut record = TrackingRecord::activity_state(Uuid::new_v4(), 5, info, crate::activity_states::CLOSED);
        record.set_annotations(Arc::new(HashMap::from([("team".to_string(), "billing".to_string())])));

        let copy = record.clone();
        assert_eq!(copy.to_string(), record.to_string());
        assert_eq!(copy.annotations(), record.annotations());

        // Mutating a copy of the clone's backing store leaves the original alone.
        let mut detached = copy.annotations().clone();
        detached.insert("team".to_string(), "fraud".to_string());
        assert_eq!(record.annotations().get("team").map(String::as_str), Some("billing"));
    }

    #[test]
    fn records_reconstruct_from_persisted_fields() {
        let when = Utc::now() - chrono::Duration::hours(2);
        let record = TrackingRecord::activity_state(
            Uuid::new_v4(),
            12,
            ActivityInfo::new("Approve", "1.4", "9", "t.Approve"),
            "Paused",
        )
        .with_level(TraceLevel::Warning)
        .with_event_time(when)
        .with_annotations(HashMap::from([("team".to_string(), "ops".to_string())]));

        assert_eq!(record.record_number(), 12);
        assert_eq!(record.event_time(), when);
        assert_eq!(record.level(), TraceLevel::Warning);
        assert_eq!(record.annotations().get("team").map(String::as_str), Some("ops"));
    }

    #[test]
    fn unassigned_record_number_sentinel() {
        let r = TrackingRecord::custom(Uuid::new_v4(), TrackingRecord::UNASSIGNED_RECORD_NUMBER, "Checkpoint", None)
            .with_data("step", serde_json::json!(3));
        assert_eq!(r.record_number(), 0);
        match r.data() {
            RecordData::Custom { data, .. } => assert_eq!(data["step"], serde_json::json!(3)),
            _ => panic!("expected custom record"),
        }
    }
}
