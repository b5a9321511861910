//! Tracking subsystem: records, queries/profiles, the compiled matcher, and
//! the participant sink contract.
//!
//! Data flow at runtime: the scheduler consults the pre-filter, constructs a
//! [`TrackingRecord`] for the transition, hands it to
//! [`RuntimeTrackingProfile::match_record`] per participant, and delivers the
//! prepared copies to each [`TrackingParticipant`]. A record with no matching
//! query is dropped silently; that is the common case, not an error.

pub mod participant;
pub mod query;
pub mod record;
pub mod runtime_profile;

pub use participant::{InMemoryParticipant, TrackingError, TrackingParticipant};
pub use query::{
    ActivityScheduledQuery, ActivityStateQuery, BookmarkResumptionQuery, CancelRequestedQuery, CustomTrackingQuery,
    FaultPropagationQuery, ImplementationVisibility, TrackingProfile, TrackingQuery, WorkflowInstanceQuery,
};
pub use record::{RecordData, RecordKind, TrackingRecord};
pub use runtime_profile::{
    default_profile_cache, MatchedQuery, RuntimeTrackingProfile, RuntimeTrackingProfileCache, TrackingRecordPreFilter,
};
