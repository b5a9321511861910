//! Activity definition metadata and live instance state.
//!
//! The tracking core never owns activity semantics; it only needs enough
//! structure to describe instances in records and to answer the RootScope
//! visibility check: a definition tree with display names, hierarchical ids,
//! and parent links, plus live instances exposing argument/variable snapshots.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use uuid::Uuid;

/// Process-wide counter behind [`Activity::definition_key`]. Assigned once per
/// root definition at construction; the profile cache keys off it instead of
/// object identity so the definition loader controls entry lifetime.
static NEXT_DEFINITION_KEY: AtomicU64 = AtomicU64::new(1);

/// One node of an activity definition tree.
///
/// Immutable once built. Children hold an `Arc` to their parent, so a node
/// keeps its ancestor chain alive; nothing holds children, so subtrees are
/// reclaimed when the host drops them.
#[derive(Debug)]
pub struct Activity {
    display_name: String,
    id: String,
    type_name: String,
    native: bool,
    parent: Option<Arc<Activity>>,
    definition_key: u64,
}

impl Activity {
    /// Create a declarative (non-native) root definition. Root id is `"1"`.
    pub fn root(display_name: impl Into<String>, type_name: impl Into<String>) -> Arc<Self> {
        Self::new_root(display_name, type_name, false)
    }

    /// Create a native (imperative) root definition.
    ///
    /// Native roots execute user logic directly at depth zero, which tightens
    /// the RootScope wildcard visibility rule by one level.
    pub fn native_root(display_name: impl Into<String>, type_name: impl Into<String>) -> Arc<Self> {
        Self::new_root(display_name, type_name, true)
    }

    fn new_root(display_name: impl Into<String>, type_name: impl Into<String>, native: bool) -> Arc<Self> {
        Arc::new(Self {
            display_name: display_name.into(),
            id: "1".to_string(),
            type_name: type_name.into(),
            native,
            parent: None,
            definition_key: NEXT_DEFINITION_KEY.fetch_add(1, Ordering::Relaxed),
        })
    }

    /// Attach a child definition under `self` with an explicit hierarchical id
    /// (e.g. `"1.2"`). The child inherits the root's definition key.
    pub fn child(
        self: &Arc<Self>,
        display_name: impl Into<String>,
        id: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            display_name: display_name.into(),
            id: id.into(),
            type_name: type_name.into(),
            native: self.native,
            parent: Some(Arc::clone(self)),
            definition_key: self.definition_key,
        })
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Whether the root of this definition tree is a native activity.
    pub fn is_native(&self) -> bool {
        self.native
    }

    pub fn parent(&self) -> Option<&Arc<Activity>> {
        self.parent.as_ref()
    }

    /// Stable process-wide key for the definition tree this node belongs to.
    pub fn definition_key(&self) -> u64 {
        self.definition_key
    }

    /// Number of parent hops between this node and its root.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut cur = self;
        while let Some(p) = cur.parent.as_ref() {
            depth += 1;
            cur = p;
        }
        depth
    }
}

/// One running occurrence of an activity within a workflow instance.
///
/// The tracking core treats this as a read-only snapshot handle: the numeric
/// instance id is assigned by the scheduler, and arguments/variables are
/// whatever the scheduler chose to capture for subscribed activities.
#[derive(Debug)]
pub struct ActivityInstance {
    activity: Arc<Activity>,
    instance_id: u64,
    arguments: HashMap<String, serde_json::Value>,
    variables: HashMap<String, serde_json::Value>,
}

impl ActivityInstance {
    pub fn new(activity: Arc<Activity>, instance_id: u64) -> Self {
        Self {
            activity,
            instance_id,
            arguments: HashMap::new(),
            variables: HashMap::new(),
        }
    }

    pub fn with_argument(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.arguments.insert(name.into(), value);
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn activity(&self) -> &Arc<Activity> {
        &self.activity
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn arguments(&self) -> &HashMap<String, serde_json::Value> {
        &self.arguments
    }

    pub fn variables(&self) -> &HashMap<String, serde_json::Value> {
        &self.variables
    }
}

/// Immutable identity snapshot of one activity instance.
///
/// Records carry `ActivityInfo` instead of live instance handles so they can
/// outlive the instance (e.g. in a participant's own store). Two states:
/// a fully materialized snapshot of the four identity strings, or a deferred
/// handle to a live instance whose fields materialize together on first read
/// and are cached from then on.
#[derive(Debug, Clone)]
pub struct ActivityInfo {
    state: InfoState,
}

#[derive(Debug, Clone)]
enum InfoState {
    Snapshot(Arc<InfoFields>),
    Deferred {
        instance: Arc<ActivityInstance>,
        // Shared across clones so materialization happens at most once.
        cell: Arc<OnceLock<InfoFields>>,
    },
}

#[derive(Debug, Clone)]
struct InfoFields {
    name: String,
    id: String,
    instance_id: String,
    type_name: String,
}

impl ActivityInfo {
    /// Construct an eager snapshot, e.g. when reconstructing a record from
    /// persisted field values.
    ///
    /// # Panics
    ///
    /// Panics if any of the four strings is empty; an identity snapshot with a
    /// missing field is a programmer error at the call site.
    pub fn new(
        name: impl Into<String>,
        id: impl Into<String>,
        instance_id: impl Into<String>,
        type_name: impl Into<String>,
    ) -> Self {
        let fields = InfoFields {
            name: name.into(),
            id: id.into(),
            instance_id: instance_id.into(),
            type_name: type_name.into(),
        };
        assert!(!fields.name.is_empty(), "ActivityInfo name must be non-empty");
        assert!(!fields.id.is_empty(), "ActivityInfo id must be non-empty");
        assert!(!fields.instance_id.is_empty(), "ActivityInfo instance id must be non-empty");
        assert!(!fields.type_name.is_empty(), "ActivityInfo type name must be non-empty");
        Self {
            state: InfoState::Snapshot(Arc::new(fields)),
        }
    }

    /// Construct a deferred snapshot backed by a live instance. Fields pull
    /// from the instance on first read.
    pub fn from_instance(instance: &Arc<ActivityInstance>) -> Self {
        Self {
            state: InfoState::Deferred {
                instance: Arc::clone(instance),
                cell: Arc::new(OnceLock::new()),
            },
        }
    }

    fn fields(&self) -> &InfoFields {
        match &self.state {
            InfoState::Snapshot(fields) => fields,
            InfoState::Deferred { instance, cell } => cell.get_or_init(|| InfoFields {
                name: instance.activity().display_name().to_string(),
                id: instance.activity().id().to_string(),
                instance_id: instance.instance_id().to_string(),
                type_name: instance.activity().type_name().to_string(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.fields().name
    }

    pub fn id(&self) -> &str {
        &self.fields().id
    }

    pub fn instance_id(&self) -> &str {
        &self.fields().instance_id
    }

    pub fn type_name(&self) -> &str {
        &self.fields().type_name
    }

    /// Definition node backing this snapshot, available only on the live
    /// (deferred) path. The RootScope depth check uses this; a snapshot
    /// reconstructed from storage has no structure to check against.
    pub(crate) fn definition(&self) -> Option<&Arc<Activity>> {
        match &self.state {
            InfoState::Snapshot(_) => None,
            InfoState::Deferred { instance, .. } => Some(instance.activity()),
        }
    }
}

impl PartialEq for ActivityInfo {
    fn eq(&self, other: &Self) -> bool {
        let (a, b) = (self.fields(), other.fields());
        a.name == b.name && a.id == b.id && a.instance_id == b.instance_id && a.type_name == b.type_name
    }
}

impl fmt::Display for ActivityInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = self.fields();
        write!(
            f,
            "Name={}, ActivityId={}, ActivityInstanceId={}, TypeName={}",
            fields.name, fields.id, fields.instance_id, fields.type_name
        )
    }
}

/// A named (or anonymous) suspension point an activity creates to await
/// external input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bookmark {
    name: Option<String>,
    scope: Option<BookmarkScope>,
}

impl Bookmark {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            scope: None,
        }
    }

    pub fn anonymous() -> Self {
        Self { name: None, scope: None }
    }

    pub fn with_scope(mut self, scope: BookmarkScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_named(&self) -> bool {
        self.name.is_some()
    }

    pub fn scope(&self) -> Option<&BookmarkScope> {
        self.scope.as_ref()
    }
}

/// Isolation scope for a set of bookmarks. Unscoped bookmarks report the nil
/// UUID in resumption records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BookmarkScope {
    id: Uuid,
}

impl BookmarkScope {
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Default for BookmarkScope {
    fn default() -> Self {
        Self::new()
    }
}

/// Fault description carried by fault-propagation and unhandled-exception
/// records. A flattened view of the source error: records must round-trip
/// through process boundaries, so no live error object is retained.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct FaultInfo {
    pub type_name: String,
    pub message: String,
}

impl FaultInfo {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FaultInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_instance() -> Arc<ActivityInstance> {
        let root = Activity::root("Main", "workflow.Sequence");
        let child = root.child("SendMail", "1.3", "mail.SendMail");
        Arc::new(ActivityInstance::new(child, 7))
    }

    #[test]
    fn definition_tree_depth_and_key_inheritance() {
        let root = Activity::root("Main", "workflow.Sequence");
        let child = root.child("Step", "1.1", "workflow.Step");
        let grandchild = child.child("Leaf", "1.1.1", "workflow.Leaf");
        assert_eq!(root.depth(), 0);
        assert_eq!(child.depth(), 1);
        assert_eq!(grandchild.depth(), 2);
        assert_eq!(grandchild.definition_key(), root.definition_key());

        let other = Activity::root("Other", "workflow.Sequence");
        assert_ne!(other.definition_key(), root.definition_key());
    }

    #[test]
    fn activity_info_materializes_lazily_from_instance() {
        let info = ActivityInfo::from_instance(&sample_instance());
        assert_eq!(info.name(), "SendMail");
        assert_eq!(info.id(), "1.3");
        assert_eq!(info.instance_id(), "7");
        assert_eq!(info.type_name(), "mail.SendMail");
        assert!(info.definition().is_some());
    }

    #[test]
    fn activity_info_clones_share_materialization() {
        let info = ActivityInfo::from_instance(&sample_instance());
        let copy = info.clone();
        assert_eq!(copy.name(), "SendMail");
        assert_eq!(info, copy);
        assert_eq!(info.to_string(), copy.to_string());
    }

    #[test]
    #[should_panic(expected = "non-empty")]
    fn activity_info_rejects_empty_name() {
        let _ = ActivityInfo::new("", "1", "1", "t");
    }

    #[test]
    fn snapshot_info_has_no_definition() {
        let info = ActivityInfo::new("A", "1.2", "4", "t.A");
        assert!(info.definition().is_none());
        assert_eq!(
            info.to_string(),
            "Name=A, ActivityId=1.2, ActivityInstanceId=4, TypeName=t.A"
        );
    }
}
