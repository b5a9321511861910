//! Compiled form of a tracking profile: the pre-filter, the per-kind lookup
//! tables, and the match/prepare protocol executed at record-emission time.
//!
//! Compilation happens once per distinct (profile, root definition) pair and
//! the result is immutable, so matching takes no locks. The tie-break policy
//! is fixed: a literal match beats a wildcard match, and among wildcards the
//! first-registered query wins. Registration order therefore only matters
//! between wildcard queries competing for the same slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};

use tracing::debug;

use crate::activity::{Activity, ActivityInfo};
use crate::tracking::query::{
    ActivityScheduledQuery, ActivityStateQuery, BookmarkResumptionQuery, CancelRequestedQuery, CustomTrackingQuery,
    FaultPropagationQuery, ImplementationVisibility, TrackingProfile, TrackingQuery, WorkflowInstanceQuery,
};
use crate::tracking::record::{RecordData, RecordKind, TrackingRecord};
use crate::{activity_states, WILDCARD};

/// Cheap upfront flags telling the scheduler whether constructing a given
/// record kind is worth doing at all. Record construction is the expensive
/// half (it materializes `ActivityInfo` and may snapshot variables), so the
/// scheduler consults this before building anything.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TrackingRecordPreFilter {
    pub workflow_instance_records: bool,
    pub activity_state_records: bool,
    /// Sub-flag for the high-volume `Executing` transitions.
    pub activity_state_records_executing: bool,
    /// Sub-flag for the high-volume `Closed` transitions.
    pub activity_state_records_closed: bool,
    pub activity_scheduled_records: bool,
    pub cancel_requested_records: bool,
    pub fault_propagation_records: bool,
    pub bookmark_resumption_records: bool,
}

impl TrackingRecordPreFilter {
    /// Union with another filter; the tracker merges one filter per
    /// participant profile into a single scheduler-facing check.
    pub fn merge(&mut self, other: &TrackingRecordPreFilter) {
        self.workflow_instance_records |= other.workflow_instance_records;
        self.activity_state_records |= other.activity_state_records;
        self.activity_state_records_executing |= other.activity_state_records_executing;
        self.activity_state_records_closed |= other.activity_state_records_closed;
        self.activity_scheduled_records |= other.activity_scheduled_records;
        self.cancel_requested_records |= other.cancel_requested_records;
        self.fault_propagation_records |= other.fault_propagation_records;
        self.bookmark_resumption_records |= other.bookmark_resumption_records;
    }

    /// Whether any subscription exists for `kind`. Custom records are always
    /// constructed; their cost is caller-controlled.
    pub fn wants(&self, kind: RecordKind) -> bool {
        match kind {
            RecordKind::WorkflowInstance => self.workflow_instance_records,
            RecordKind::ActivityState => self.activity_state_records,
            RecordKind::ActivityScheduled => self.activity_scheduled_records,
            RecordKind::CancelRequested => self.cancel_requested_records,
            RecordKind::FaultPropagation => self.fault_propagation_records,
            RecordKind::BookmarkResumption => self.bookmark_resumption_records,
            RecordKind::Custom => true,
        }
    }

    /// Finer-grained check for activity-state records: `Executing` and
    /// `Closed` carry dedicated sub-flags; other states only need the kind
    /// flag.
    pub fn wants_activity_state(&self, state: &str) -> bool {
        if !self.activity_state_records {
            return false;
        }
        match state {
            activity_states::EXECUTING => self.activity_state_records_executing,
            activity_states::CLOSED => self.activity_state_records_closed,
            _ => true,
        }
    }
}

/// The query selected for a record by [`RuntimeTrackingProfile::match_query`].
#[derive(Debug, Clone)]
pub enum MatchedQuery {
    ActivityState(Arc<ActivityStateQuery>),
    WorkflowInstance(Arc<WorkflowInstanceQuery>),
    BookmarkResumption(Arc<BookmarkResumptionQuery>),
    ActivityScheduled(Arc<ActivityScheduledQuery>),
    CancelRequested(Arc<CancelRequestedQuery>),
    FaultPropagation(Arc<FaultPropagationQuery>),
    Custom(Arc<CustomTrackingQuery>),
}

impl MatchedQuery {
    pub fn annotations(&self) -> &HashMap<String, String> {
        match self {
            MatchedQuery::ActivityState(q) => &q.annotations,
            MatchedQuery::WorkflowInstance(q) => &q.annotations,
            MatchedQuery::BookmarkResumption(q) => &q.annotations,
            MatchedQuery::ActivityScheduled(q) => &q.annotations,
            MatchedQuery::CancelRequested(q) => &q.annotations,
            MatchedQuery::FaultPropagation(q) => &q.annotations,
            MatchedQuery::Custom(q) => &q.annotations,
        }
    }
}

/// Compiled, cached form of a [`TrackingProfile`] for one root definition.
///
/// Built once in the constructor and never mutated afterward; reads are
/// lock-free. Activity-state and workflow/bookmark queries compile into
/// dictionaries; the two-name kinds (scheduled, cancel, fault, custom) stay
/// as linear-scan lists because matching compares two names per entry.
#[derive(Debug)]
pub struct RuntimeTrackingProfile {
    profile_name: String,
    activity_definition_id: String,
    visibility: ImplementationVisibility,
    root_is_native: bool,
    pre_filter: TrackingRecordPreFilter,
    /// Activity name -> queries targeting that name. Not unique per name:
    /// multiple queries can target one activity with different state asks.
    activity_subscriptions: HashMap<String, Vec<Arc<ActivityStateQuery>>>,
    /// Every activity name any activity-state query targets (including
    /// `"*"`); drives per-instance argument/variable capture.
    subscribed_activity_names: Vec<String>,
    /// State -> query, `"*"` reserved for the wildcard. First-registered wins.
    workflow_subscriptions: HashMap<String, Arc<WorkflowInstanceQuery>>,
    /// Bookmark name -> query, `"*"` reserved. First-registered wins.
    bookmark_subscriptions: HashMap<String, Arc<BookmarkResumptionQuery>>,
    scheduled_subscriptions: Vec<Arc<ActivityScheduledQuery>>,
    cancel_subscriptions: Vec<Arc<CancelRequestedQuery>>,
    fault_subscriptions: Vec<Arc<FaultPropagationQuery>>,
    custom_subscriptions: Vec<Arc<CustomTrackingQuery>>,
}

impl RuntimeTrackingProfile {
    /// Compile `profile` against `root`. Queries are processed in
    /// registration order, which fixes the wildcard tie-break.
    pub fn new(profile: &TrackingProfile, root: &Arc<Activity>) -> Self {
        let mut compiled = Self {
            profile_name: profile.name.clone(),
            activity_definition_id: profile.activity_definition_id.clone(),
            visibility: profile.implementation_visibility,
            root_is_native: root.is_native(),
            pre_filter: TrackingRecordPreFilter::default(),
            activity_subscriptions: HashMap::new(),
            subscribed_activity_names: Vec::new(),
            workflow_subscriptions: HashMap::new(),
            bookmark_subscriptions: HashMap::new(),
            scheduled_subscriptions: Vec::new(),
            cancel_subscriptions: Vec::new(),
            fault_subscriptions: Vec::new(),
            custom_subscriptions: Vec::new(),
        };

        for query in &profile.queries {
            match query {
                TrackingQuery::ActivityState(q) => compiled.add_activity_state_subscription(q.clone()),
                TrackingQuery::WorkflowInstance(q) => compiled.add_workflow_subscription(q.clone()),
                TrackingQuery::BookmarkResumption(q) => compiled.add_bookmark_subscription(q.clone()),
                TrackingQuery::ActivityScheduled(q) => {
                    compiled.pre_filter.activity_scheduled_records = true;
                    compiled.scheduled_subscriptions.push(Arc::new(q.clone()));
                }
                TrackingQuery::CancelRequested(q) => {
                    compiled.pre_filter.cancel_requested_records = true;
                    compiled.cancel_subscriptions.push(Arc::new(q.clone()));
                }
                TrackingQuery::FaultPropagation(q) => {
                    compiled.pre_filter.fault_propagation_records = true;
                    compiled.fault_subscriptions.push(Arc::new(q.clone()));
                }
                TrackingQuery::Custom(q) => {
                    // No pre-filter flag: custom records are caller-constructed.
                    compiled.custom_subscriptions.push(Arc::new(q.clone()));
                }
            }
        }

        debug!(
            profile = %compiled.profile_name,
            root = %root.display_name(),
            queries = profile.queries.len(),
            pre_filter = ?compiled.pre_filter,
            "compiled tracking profile"
        );
        compiled
    }

    fn add_activity_state_subscription(&mut self, query: ActivityStateQuery) {
        self.pre_filter.activity_state_records = true;
        if query.has_states() {
            for state in &query.states {
                match state.as_str() {
                    WILDCARD => {
                        self.pre_filter.activity_state_records_executing = true;
                        self.pre_filter.activity_state_records_closed = true;
                    }
                    activity_states::EXECUTING => self.pre_filter.activity_state_records_executing = true,
                    activity_states::CLOSED => self.pre_filter.activity_state_records_closed = true,
                    _ => {}
                }
            }
        }
        if !self.subscribed_activity_names.contains(&query.activity_name) {
            self.subscribed_activity_names.push(query.activity_name.clone());
        }
        self.activity_subscriptions
            .entry(query.activity_name.clone())
            .or_default()
            .push(Arc::new(query));
    }

    fn add_workflow_subscription(&mut self, query: WorkflowInstanceQuery) {
        self.pre_filter.workflow_instance_records = true;
        let query = Arc::new(query);
        if query.states.is_empty() {
            // No states means the query wants every instance state.
            self.workflow_subscriptions
                .entry(WILDCARD.to_string())
                .or_insert_with(|| Arc::clone(&query));
        } else {
            for state in &query.states {
                self.workflow_subscriptions
                    .entry(state.clone())
                    .or_insert_with(|| Arc::clone(&query));
            }
        }
    }

    fn add_bookmark_subscription(&mut self, query: BookmarkResumptionQuery) {
        self.pre_filter.bookmark_resumption_records = true;
        let key = if query.name.is_empty() {
            WILDCARD.to_string()
        } else {
            query.name.clone()
        };
        self.bookmark_subscriptions.entry(key).or_insert_with(|| Arc::new(query));
    }

    pub fn profile_name(&self) -> &str {
        &self.profile_name
    }

    pub fn activity_definition_id(&self) -> &str {
        &self.activity_definition_id
    }

    pub fn visibility(&self) -> ImplementationVisibility {
        self.visibility
    }

    pub fn pre_filter(&self) -> &TrackingRecordPreFilter {
        &self.pre_filter
    }

    pub fn subscribed_activity_names(&self) -> &[String] {
        &self.subscribed_activity_names
    }

    /// Whether any activity-state query targets `name` (directly or via the
    /// wildcard); the scheduler uses this to enable argument/variable capture
    /// for an instance at all.
    pub fn tracks_activity(&self, name: &str) -> bool {
        self.subscribed_activity_names
            .iter()
            .any(|n| n == name || n == WILDCARD)
    }

    /// Find the single best-matching query for `record`, or `None` when the
    /// record should be dropped. No match is the expected common case, not an
    /// error.
    pub fn match_query(&self, record: &TrackingRecord) -> Option<MatchedQuery> {
        match record.data() {
            RecordData::ActivityState { activity, state, .. } => self.match_activity_state(activity, state),
            RecordData::WorkflowInstance { .. }
            | RecordData::WorkflowInstanceTerminated { .. }
            | RecordData::WorkflowInstanceAborted { .. }
            | RecordData::WorkflowInstanceSuspended { .. }
            | RecordData::WorkflowInstanceUnhandledException { .. } => {
                // workflow_state is Some for every workflow variant.
                self.match_workflow_instance(record.data().workflow_state()?)
            }
            RecordData::BookmarkResumption { bookmark_name, .. } => self.match_bookmark(bookmark_name.as_deref()),
            RecordData::ActivityScheduled { activity, child } => self.match_scheduled(activity.as_ref(), child),
            RecordData::CancelRequested { activity, child } => self.match_cancel(activity.as_ref(), child),
            RecordData::FaultPropagation {
                fault_source,
                fault_handler,
                ..
            } => self.match_fault(fault_source, fault_handler.as_ref()),
            RecordData::Custom { name, activity, .. } => self.match_custom(name, activity.as_ref()),
        }
    }

    /// Produce the delivery copy for a matched record: an independent clone
    /// with the query's annotations stamped as a fresh immutable view. For
    /// activity-state matches the captured arguments/variables are also
    /// reduced to the requested subset.
    pub fn prepare(&self, record: &TrackingRecord, matched: &MatchedQuery) -> TrackingRecord {
        let mut prepared = record.clone();
        let annotations = matched.annotations();
        if !annotations.is_empty() {
            prepared.set_annotations(Arc::new(annotations.clone()));
        }
        if let MatchedQuery::ActivityState(query) = matched {
            if let RecordData::ActivityState {
                arguments, variables, ..
            } = prepared.data_mut()
            {
                if query.has_arguments() {
                    reduce_captured(arguments, &query.arguments);
                } else {
                    arguments.clear();
                }
                if query.has_variables() {
                    reduce_captured(variables, &query.variables);
                } else {
                    variables.clear();
                }
            }
        }
        prepared
    }

    /// Match and prepare in one call: the delivery path.
    pub fn match_record(&self, record: &TrackingRecord) -> Option<TrackingRecord> {
        let matched = self.match_query(record)?;
        Some(self.prepare(record, &matched))
    }

    fn match_activity_state(&self, activity: &ActivityInfo, state: &str) -> Option<MatchedQuery> {
        if let Some(queries) = self.activity_subscriptions.get(activity.name()) {
            if let Some(q) = scan_states(queries, state) {
                return Some(MatchedQuery::ActivityState(q));
            }
        }
        if let Some(queries) = self.activity_subscriptions.get(WILDCARD) {
            if let Some(q) = scan_states(queries, state) {
                // A generic-name match under RootScope only sees root-adjacent
                // activities.
                if !self.should_track_activity(Some(activity), WILDCARD) {
                    return None;
                }
                return Some(MatchedQuery::ActivityState(q));
            }
        }
        None
    }

    fn match_workflow_instance(&self, state: &str) -> Option<MatchedQuery> {
        self.workflow_subscriptions
            .get(state)
            .or_else(|| self.workflow_subscriptions.get(WILDCARD))
            .map(|q| MatchedQuery::WorkflowInstance(Arc::clone(q)))
    }

    fn match_bookmark(&self, name: Option<&str>) -> Option<MatchedQuery> {
        let literal = name.and_then(|n| self.bookmark_subscriptions.get(n));
        literal
            .or_else(|| self.bookmark_subscriptions.get(WILDCARD))
            .map(|q| MatchedQuery::BookmarkResumption(Arc::clone(q)))
    }

    fn match_scheduled(&self, activity: Option<&ActivityInfo>, child: &ActivityInfo) -> Option<MatchedQuery> {
        for query in &self.scheduled_subscriptions {
            if name_matches(&query.activity_name, activity.map(ActivityInfo::name))
                && name_matches(&query.child_activity_name, Some(child.name()))
            {
                // First satisfying entry decides; a failed depth check on
                // either operand suppresses the record entirely.
                if !self.should_track_activity(activity, &query.activity_name)
                    || !self.should_track_activity(Some(child), &query.child_activity_name)
                {
                    return None;
                }
                return Some(MatchedQuery::ActivityScheduled(Arc::clone(query)));
            }
        }
        None
    }

    fn match_cancel(&self, activity: Option<&ActivityInfo>, child: &ActivityInfo) -> Option<MatchedQuery> {
        for query in &self.cancel_subscriptions {
            if name_matches(&query.activity_name, activity.map(ActivityInfo::name))
                && name_matches(&query.child_activity_name, Some(child.name()))
            {
                if !self.should_track_activity(activity, &query.activity_name)
                    || !self.should_track_activity(Some(child), &query.child_activity_name)
                {
                    return None;
                }
                return Some(MatchedQuery::CancelRequested(Arc::clone(query)));
            }
        }
        None
    }

    fn match_fault(&self, source: &ActivityInfo, handler: Option<&ActivityInfo>) -> Option<MatchedQuery> {
        for query in &self.fault_subscriptions {
            if name_matches(&query.fault_source_activity_name, Some(source.name()))
                && name_matches(&query.fault_handler_activity_name, handler.map(ActivityInfo::name))
            {
                if !self.should_track_activity(Some(source), &query.fault_source_activity_name)
                    || !self.should_track_activity(handler, &query.fault_handler_activity_name)
                {
                    return None;
                }
                return Some(MatchedQuery::FaultPropagation(Arc::clone(query)));
            }
        }
        None
    }

    fn match_custom(&self, name: &str, activity: Option<&ActivityInfo>) -> Option<MatchedQuery> {
        for query in &self.custom_subscriptions {
            if name_matches(&query.name, Some(name)) && name_matches(&query.activity_name, activity.map(ActivityInfo::name)) {
                if !self.should_track_activity(activity, &query.activity_name) {
                    return None;
                }
                return Some(MatchedQuery::Custom(Arc::clone(query)));
            }
        }
        None
    }

    /// RootScope visibility check for a wildcard-matched operand.
    ///
    /// Native roots execute user logic at depth 0, so a wildcard only sees the
    /// root itself; non-native roots carry exactly one synthetic wrapper
    /// layer, so one extra level is allowed. Snapshots reconstructed from
    /// storage carry no structure and pass unconditionally.
    fn should_track_activity(&self, info: Option<&ActivityInfo>, matched_pattern: &str) -> bool {
        if self.visibility == ImplementationVisibility::All || matched_pattern != WILDCARD {
            return true;
        }
        let Some(info) = info else {
            return true;
        };
        let Some(definition) = info.definition() else {
            return true;
        };
        let depth = definition.depth();
        if self.root_is_native {
            depth == 0
        } else {
            depth <= 1
        }
    }
}

/// Two-pass scan of one name bucket: a literal state hit wins immediately;
/// the first wildcard-state query seen is kept as the generic fallback.
fn scan_states(queries: &[Arc<ActivityStateQuery>], state: &str) -> Option<Arc<ActivityStateQuery>> {
    let mut generic: Option<&Arc<ActivityStateQuery>> = None;
    for query in queries {
        if query.states.iter().any(|s| s == state) {
            return Some(Arc::clone(query));
        }
        if generic.is_none() && query.states.iter().any(|s| s == WILDCARD) {
            generic = Some(query);
        }
    }
    generic.cloned()
}

/// Ordinal comparison with `"*"` as the any-value pattern. A `None` operand
/// (e.g. root scheduling has no parent) only matches the wildcard.
fn name_matches(pattern: &str, operand: Option<&str>) -> bool {
    if pattern == WILDCARD {
        return true;
    }
    operand == Some(pattern)
}

/// Reduce a captured value snapshot to the names a query asked for: `"*"`
/// keeps everything, nothing requested drops the capture from the delivered
/// record.
fn reduce_captured(captured: &mut HashMap<String, serde_json::Value>, requested: &[String]) {
    if requested.iter().any(|n| n == WILDCARD) {
        return;
    }
    if requested.is_empty() {
        captured.clear();
        return;
    }
    captured.retain(|name, _| requested.iter().any(|r| r == name));
}

/// Process-wide cache of compiled profiles, keyed on the root definition's
/// stable [`Activity::definition_key`].
///
/// Buckets accumulate distinct profiles for the same root (never replace);
/// a hit is a linear scan comparing (profile name, activity definition id).
/// The definition loader owns entry lifetime and calls [`Self::invalidate`]
/// when a definition is unloaded.
#[derive(Debug, Default)]
pub struct RuntimeTrackingProfileCache {
    buckets: Mutex<HashMap<u64, Vec<Arc<RuntimeTrackingProfile>>>>,
}

impl RuntimeTrackingProfileCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the compiled form of `profile` for `root`, compiling on first
    /// use. Two structurally distinct `TrackingProfile` objects sharing name
    /// and definition id share one compiled instance.
    pub fn get(&self, profile: &TrackingProfile, root: &Arc<Activity>) -> Arc<RuntimeTrackingProfile> {
        // The whole read-or-create sequence holds the lock: compiles for the
        // same root must not race, and compilation is cheap relative to churn.
        // Mutex lock should never fail in normal operation - if poisoned, it indicates a serious bug
        let mut buckets = self.buckets.lock().expect("Mutex should not be poisoned");
        let bucket = buckets.entry(root.definition_key()).or_default();
        if let Some(hit) = bucket
            .iter()
            .find(|c| c.profile_name == profile.name && c.activity_definition_id == profile.activity_definition_id)
        {
            return Arc::clone(hit);
        }
        let compiled = Arc::new(RuntimeTrackingProfile::new(profile, root));
        bucket.push(Arc::clone(&compiled));
        debug!(
            profile = %profile.name,
            definition_key = root.definition_key(),
            cached = bucket.len(),
            "cached compiled tracking profile"
        );
        compiled
    }

    /// Drop every compiled profile for `root`'s definition tree. Returns
    /// whether an entry existed.
    pub fn invalidate(&self, root: &Arc<Activity>) -> bool {
        // Mutex lock should never fail in normal operation - if poisoned, it indicates a serious bug
        self.buckets
            .lock()
            .expect("Mutex should not be poisoned")
            .remove(&root.definition_key())
            .is_some()
    }

    /// Number of compiled profiles cached for `root` (diagnostics).
    pub fn cached_count(&self, root: &Arc<Activity>) -> usize {
        // Mutex lock should never fail in normal operation - if poisoned, it indicates a serious bug
        self.buckets
            .lock()
            .expect("Mutex should not be poisoned")
            .get(&root.definition_key())
            .map(Vec::len)
            .unwrap_or(0)
    }
}

/// Process-wide default cache instance.
pub fn default_profile_cache() -> &'static RuntimeTrackingProfileCache {
    static CACHE: OnceLock<RuntimeTrackingProfileCache> = OnceLock::new();
    CACHE.get_or_init(RuntimeTrackingProfileCache::new)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::query::{ActivityStateQuery, WorkflowInstanceQuery};
    use crate::workflow_instance_states;
    use uuid::Uuid;

    fn root() -> Arc<Activity> {
        Activity::root("Main", "workflow.Sequence")
    }

    #[test]
    fn compile_sets_pre_filter_flags_precisely() {
        let profile = TrackingProfile::new("p")
            .with_query(ActivityStateQuery::new("A").with_state(activity_states::CLOSED))
            .with_query(BookmarkResumptionQuery::default());
        let compiled = RuntimeTrackingProfile::new(&profile, &root());
        let filter = compiled.pre_filter();
        assert!(filter.activity_state_records);
        assert!(filter.activity_state_records_closed);
        assert!(!filter.activity_state_records_executing);
        assert!(filter.bookmark_resumption_records);
        assert!(!filter.workflow_instance_records);
        assert!(!filter.activity_scheduled_records);
        assert!(!filter.cancel_requested_records);
        assert!(!filter.fault_propagation_records);
    }

    #[test]
    fn wildcard_state_sets_both_sub_flags() {
        let profile = TrackingProfile::new("p").with_query(ActivityStateQuery::new("A").with_state(WILDCARD));
        let compiled = RuntimeTrackingProfile::new(&profile, &root());
        assert!(compiled.pre_filter().activity_state_records_executing);
        assert!(compiled.pre_filter().activity_state_records_closed);
        assert!(compiled.pre_filter().wants_activity_state(activity_states::FAULTED));
    }

    #[test]
    fn workflow_duplicate_state_first_registered_wins() {
        let first = WorkflowInstanceQuery::default().with_state(workflow_instance_states::COMPLETED);
        let mut second = WorkflowInstanceQuery::default().with_state(workflow_instance_states::COMPLETED);
        second.annotations.insert("who".into(), "second".into());
        let profile = TrackingProfile::new("p").with_query(first).with_query(second);
        let compiled = RuntimeTrackingProfile::new(&profile, &root());

        let record = TrackingRecord::workflow_instance(
            Uuid::new_v4(),
            1,
            "Main",
            workflow_instance_states::COMPLETED,
            None,
        );
        match compiled.match_query(&record) {
            Some(MatchedQuery::WorkflowInstance(q)) => assert!(q.annotations.is_empty(), "first query should win"),
            other => panic!("expected workflow match, got {other:?}"),
        }
    }

    #[test]
    fn tracks_activity_via_literal_and_wildcard_names() {
        let profile = TrackingProfile::new("p")
            .with_query(ActivityStateQuery::new("OnlyThis").with_state(WILDCARD));
        let compiled = RuntimeTrackingProfile::new(&profile, &root());
        assert!(compiled.tracks_activity("OnlyThis"));
        assert!(!compiled.tracks_activity("Other"));

        let wide = TrackingProfile::new("p2").with_query(ActivityStateQuery::default().with_state(WILDCARD));
        let compiled = RuntimeTrackingProfile::new(&wide, &root());
        assert!(compiled.tracks_activity("Anything"));
    }

    #[test]
    fn cache_reuses_compiled_profiles_and_accumulates_distinct_ones() {
        let cache = RuntimeTrackingProfileCache::new();
        let root = root();
        let a1 = TrackingProfile::new("audit");
        let a2 = TrackingProfile::new("audit");
        let b = TrackingProfile::new("billing");

        let c1 = cache.get(&a1, &root);
        let c2 = cache.get(&a2, &root);
        assert!(Arc::ptr_eq(&c1, &c2), "same name+definition id shares one compile");

        let c3 = cache.get(&b, &root);
        assert!(!Arc::ptr_eq(&c1, &c3));
        assert_eq!(cache.cached_count(&root), 2);

        assert!(cache.invalidate(&root));
        assert_eq!(cache.cached_count(&root), 0);
        assert!(!cache.invalidate(&root));
    }

    #[test]
    fn bookmark_match_falls_back_to_wildcard_only_for_unnamed() {
        let profile = TrackingProfile::new("p").with_query(BookmarkResumptionQuery::new("Approve"));
        let compiled = RuntimeTrackingProfile::new(&profile, &root());
        assert!(compiled.match_bookmark(Some("Approve")).is_some());
        assert!(compiled.match_bookmark(Some("Reject")).is_none());
        assert!(compiled.match_bookmark(None).is_none());

        let wildcard = TrackingProfile::new("p2").with_query(BookmarkResumptionQuery::default());
        let compiled = RuntimeTrackingProfile::new(&wildcard, &root());
        assert!(compiled.match_bookmark(None).is_some());
    }
}
