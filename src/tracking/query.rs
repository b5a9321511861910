//! Declarative subscription filters and the profile that groups them.
//!
//! Queries are plain data: pattern strings where `"*"` matches any value and
//! anything else must match exactly (ordinal, case-sensitive), plus optional
//! annotations stamped onto matched records. All matching semantics live in
//! [`super::runtime_profile`]; construction is just property assignment.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::WILDCARD;

fn wildcard() -> String {
    WILDCARD.to_string()
}

/// Subscribes to activity-instance state transitions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityStateQuery {
    /// Activity display name to match, `"*"` for any.
    #[serde(default = "wildcard")]
    pub activity_name: String,
    /// States to match; `"*"` entry matches any state. Empty matches nothing.
    #[serde(default)]
    pub states: Vec<String>,
    /// Argument names to extract onto matched records; `"*"` extracts all.
    #[serde(default)]
    pub arguments: Vec<String>,
    /// Variable names to extract onto matched records; `"*"` extracts all.
    #[serde(default)]
    pub variables: Vec<String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl ActivityStateQuery {
    pub fn new(activity_name: impl Into<String>) -> Self {
        Self {
            activity_name: activity_name.into(),
            ..Default::default()
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.states.push(state.into());
        self
    }

    pub fn with_argument(mut self, name: impl Into<String>) -> Self {
        self.arguments.push(name.into());
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>) -> Self {
        self.variables.push(name.into());
        self
    }

    pub(crate) fn has_states(&self) -> bool {
        !self.states.is_empty()
    }

    pub(crate) fn has_arguments(&self) -> bool {
        !self.arguments.is_empty()
    }

    pub(crate) fn has_variables(&self) -> bool {
        !self.variables.is_empty()
    }
}

impl Default for ActivityStateQuery {
    fn default() -> Self {
        Self {
            activity_name: wildcard(),
            states: Vec::new(),
            arguments: Vec::new(),
            variables: Vec::new(),
            annotations: HashMap::new(),
        }
    }
}

/// Subscribes to workflow-instance state transitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowInstanceQuery {
    /// States to match; `"*"` entry matches any state. Empty is treated as
    /// the wildcard (a workflow query with no states wants everything).
    #[serde(default)]
    pub states: Vec<String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl WorkflowInstanceQuery {
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.states.push(state.into());
        self
    }
}

/// Subscribes to bookmark resumptions by bookmark name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookmarkResumptionQuery {
    /// Bookmark name to match, `"*"` for any (including anonymous bookmarks).
    #[serde(default = "wildcard")]
    pub name: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl BookmarkResumptionQuery {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            annotations: HashMap::new(),
        }
    }
}

impl Default for BookmarkResumptionQuery {
    fn default() -> Self {
        Self::new(WILDCARD)
    }
}

/// Subscribes to parent-schedules-child events, matched on both names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityScheduledQuery {
    /// Scheduling activity name; `"*"` also matches root scheduling (no parent).
    #[serde(default = "wildcard")]
    pub activity_name: String,
    #[serde(default = "wildcard")]
    pub child_activity_name: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl Default for ActivityScheduledQuery {
    fn default() -> Self {
        Self {
            activity_name: wildcard(),
            child_activity_name: wildcard(),
            annotations: HashMap::new(),
        }
    }
}

/// Subscribes to cancellation requests, matched on both names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelRequestedQuery {
    #[serde(default = "wildcard")]
    pub activity_name: String,
    #[serde(default = "wildcard")]
    pub child_activity_name: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl Default for CancelRequestedQuery {
    fn default() -> Self {
        Self {
            activity_name: wildcard(),
            child_activity_name: wildcard(),
            annotations: HashMap::new(),
        }
    }
}

/// Subscribes to fault propagation steps, matched on source and handler names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaultPropagationQuery {
    #[serde(default = "wildcard")]
    pub fault_source_activity_name: String,
    /// Handler name; `"*"` also matches steps with no handler yet.
    #[serde(default = "wildcard")]
    pub fault_handler_activity_name: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl Default for FaultPropagationQuery {
    fn default() -> Self {
        Self {
            fault_source_activity_name: wildcard(),
            fault_handler_activity_name: wildcard(),
            annotations: HashMap::new(),
        }
    }
}

/// Subscribes to user-emitted custom records by record name and emitting
/// activity name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomTrackingQuery {
    #[serde(default = "wildcard")]
    pub name: String,
    #[serde(default = "wildcard")]
    pub activity_name: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl Default for CustomTrackingQuery {
    fn default() -> Self {
        Self {
            name: wildcard(),
            activity_name: wildcard(),
            annotations: HashMap::new(),
        }
    }
}

/// Closed set of query kinds; profile compilation dispatches exhaustively
/// over this tag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TrackingQuery {
    ActivityState(ActivityStateQuery),
    WorkflowInstance(WorkflowInstanceQuery),
    BookmarkResumption(BookmarkResumptionQuery),
    ActivityScheduled(ActivityScheduledQuery),
    CancelRequested(CancelRequestedQuery),
    FaultPropagation(FaultPropagationQuery),
    Custom(CustomTrackingQuery),
}

impl From<ActivityStateQuery> for TrackingQuery {
    fn from(q: ActivityStateQuery) -> Self {
        TrackingQuery::ActivityState(q)
    }
}

impl From<WorkflowInstanceQuery> for TrackingQuery {
    fn from(q: WorkflowInstanceQuery) -> Self {
        TrackingQuery::WorkflowInstance(q)
    }
}

impl From<BookmarkResumptionQuery> for TrackingQuery {
    fn from(q: BookmarkResumptionQuery) -> Self {
        TrackingQuery::BookmarkResumption(q)
    }
}

impl From<ActivityScheduledQuery> for TrackingQuery {
    fn from(q: ActivityScheduledQuery) -> Self {
        TrackingQuery::ActivityScheduled(q)
    }
}

impl From<CancelRequestedQuery> for TrackingQuery {
    fn from(q: CancelRequestedQuery) -> Self {
        TrackingQuery::CancelRequested(q)
    }
}

impl From<FaultPropagationQuery> for TrackingQuery {
    fn from(q: FaultPropagationQuery) -> Self {
        TrackingQuery::FaultPropagation(q)
    }
}

impl From<CustomTrackingQuery> for TrackingQuery {
    fn from(q: CustomTrackingQuery) -> Self {
        TrackingQuery::Custom(q)
    }
}

/// Whether wildcard-name subscriptions see the full nested implementation
/// tree or only root-adjacent activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImplementationVisibility {
    /// Wildcard subscriptions see only the root activity itself and, for
    /// non-native roots, its single structural wrapper.
    #[default]
    RootScope,
    /// Wildcard subscriptions see every activity in the tree.
    All,
}

/// Ordered set of queries plus visibility scope: the user-facing subscription
/// unit. Plain storage; all semantics live in the compiled
/// [`super::RuntimeTrackingProfile`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingProfile {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub activity_definition_id: String,
    #[serde(default)]
    pub implementation_visibility: ImplementationVisibility,
    #[serde(default)]
    pub queries: Vec<TrackingQuery>,
}

impl TrackingProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_visibility(mut self, visibility: ImplementationVisibility) -> Self {
        self.implementation_visibility = visibility;
        self
    }

    pub fn with_activity_definition_id(mut self, id: impl Into<String>) -> Self {
        self.activity_definition_id = id.into();
        self
    }

    pub fn with_query(mut self, query: impl Into<TrackingQuery>) -> Self {
        self.queries.push(query.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_defaults_are_wildcards() {
        let q = ActivityScheduledQuery::default();
        assert_eq!(q.activity_name, "*");
        assert_eq!(q.child_activity_name, "*");
        assert!(q.annotations.is_empty());
    }

    #[test]
    fn profile_is_json_authorable() {
        let json = r#"{
            "name": "audit",
            "implementation_visibility": "All",
            "queries": [
                { "ActivityState": { "activity_name": "Approve", "states": ["Closed"] } },
                { "WorkflowInstance": { "states": ["*"] } },
                { "BookmarkResumption": {} }
            ]
        }"#;
        let profile: TrackingProfile = serde_json::from_str(json).expect("profile should deserialize");
        assert_eq!(profile.name, "audit");
        assert_eq!(profile.implementation_visibility, ImplementationVisibility::All);
        assert_eq!(profile.queries.len(), 3);
        match &profile.queries[2] {
            TrackingQuery::BookmarkResumption(q) => assert_eq!(q.name, "*"),
            other => panic!("expected bookmark query, got {other:?}"),
        }
    }

    #[test]
    fn builder_preserves_registration_order() {
        let profile = TrackingProfile::new("p")
            .with_query(ActivityStateQuery::new("A").with_state("Closed"))
            .with_query(WorkflowInstanceQuery::default().with_state("Completed"));
        assert!(matches!(profile.queries[0], TrackingQuery::ActivityState(_)));
        assert!(matches!(profile.queries[1], TrackingQuery::WorkflowInstance(_)));
    }
}
