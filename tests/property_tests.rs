//! Property-based tests using proptest to verify matching invariants.

use std::sync::Arc;

use flowtrack::activity::{Activity, ActivityInfo, ActivityInstance};
use flowtrack::tracking::{
    ActivityStateQuery, MatchedQuery, RuntimeTrackingProfile, TrackingProfile, TrackingRecord, WorkflowInstanceQuery,
};
use flowtrack::{activity_states, WILDCARD};
use proptest::prelude::*;
use uuid::Uuid;

fn arb_state() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(activity_states::EXECUTING.to_string()),
        Just(activity_states::CLOSED.to_string()),
        Just(activity_states::CANCELED.to_string()),
        Just(activity_states::FAULTED.to_string()),
        Just(WILDCARD.to_string()),
    ]
}

fn arb_activity_name() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][a-z]{0,8}").unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Property: the pre-filter is sound. Any activity-state record the
    /// compiled profile matches must have been let through by the pre-filter;
    /// a pre-filter rejection never loses a matchable record.
    #[test]
    fn prop_prefilter_never_rejects_matchable_activity_states(
        subscriptions in prop::collection::vec((arb_activity_name(), prop::collection::vec(arb_state(), 1..3)), 1..5),
        record_name in arb_activity_name(),
        record_state in prop_oneof![
            Just(activity_states::EXECUTING.to_string()),
            Just(activity_states::CLOSED.to_string()),
            Just(activity_states::CANCELED.to_string()),
            Just(activity_states::FAULTED.to_string()),
        ],
    ) {
        let mut profile = TrackingProfile::new("p");
        for (name, states) in &subscriptions {
            let mut query = ActivityStateQuery::new(name.clone());
            for state in states {
                query = query.with_state(state.clone());
            }
            profile = profile.with_query(query);
        }

        let root = Activity::root("Main", "workflow.Sequence");
        let child = root.child(record_name.clone(), "1.1", "t.Generated");
        let compiled = RuntimeTrackingProfile::new(&profile, &root);

        let record = TrackingRecord::activity_state(
            Uuid::new_v4(),
            1,
            ActivityInfo::from_instance(&Arc::new(ActivityInstance::new(child, 1))),
            record_state.clone(),
        );
        if compiled.match_query(&record).is_some() {
            prop_assert!(
                compiled.pre_filter().wants_activity_state(&record_state),
                "pre-filter rejected a record the profile matches: {record_state}"
            );
        }
    }

    /// Property: among wildcard workflow-instance queries competing for the
    /// same state, the first-registered query wins regardless of how many
    /// follow it.
    #[test]
    fn prop_first_registered_wildcard_workflow_query_wins(
        extra_queries in 1usize..6,
        state in prop::string::string_regex("[A-Z][a-z]{0,8}").unwrap(),
    ) {
        let mut profile = TrackingProfile::new("p");
        for i in 0..=extra_queries {
            let mut query = WorkflowInstanceQuery::default();
            query.annotations.insert("index".to_string(), i.to_string());
            profile = profile.with_query(query);
        }
        let root = Activity::root("Main", "workflow.Sequence");
        let compiled = RuntimeTrackingProfile::new(&profile, &root);

        let record = TrackingRecord::workflow_instance(Uuid::new_v4(), 1, "Main", state, None);
        match compiled.match_query(&record) {
            Some(MatchedQuery::WorkflowInstance(q)) => {
                prop_assert_eq!(q.annotations.get("index").map(String::as_str), Some("0"));
            }
            other => prop_assert!(false, "expected workflow match, got {:?}", other),
        }
    }

    /// Property: preparation never invents data. Every argument in the
    /// delivered copy exists in the source record with the same value.
    #[test]
    fn prop_prepared_arguments_are_a_subset_of_captured(
        captured in prop::collection::hash_map("[a-z]{1,6}", 0i64..100, 0..6),
        requested in prop::collection::vec("[a-z]{1,6}", 0..4),
    ) {
        let mut query = ActivityStateQuery::new("Calc").with_state(WILDCARD);
        for name in &requested {
            query = query.with_argument(name.clone());
        }
        let profile = TrackingProfile::new("p").with_query(query);
        let root = Activity::root("Main", "workflow.Sequence");
        let compiled = RuntimeTrackingProfile::new(&profile, &root);

        let calc = root.child("Calc", "1.1", "t.Calc");
        let mut instance = ActivityInstance::new(calc, 1);
        for (name, value) in &captured {
            instance = instance.with_argument(name.clone(), serde_json::json!(value));
        }
        let instance = Arc::new(instance);
        let record = TrackingRecord::activity_state(
            Uuid::new_v4(),
            1,
            ActivityInfo::from_instance(&instance),
            activity_states::CLOSED,
        )
        .with_captured(instance.arguments().clone(), instance.variables().clone());

        let prepared = compiled.match_record(&record).expect("literal name always matches");
        if let flowtrack::tracking::RecordData::ActivityState { arguments, .. } = prepared.data() {
            for (name, value) in arguments {
                let expected = captured.get(name).map(|v| serde_json::json!(v));
                prop_assert_eq!(Some(value.clone()), expected);
                prop_assert!(requested.contains(name));
            }
        } else {
            prop_assert!(false, "expected activity state data");
        }
    }
}
