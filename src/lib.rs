//! Instance tracking core for a durable workflow engine.
//!
//! A running workflow instance advances its activity tree one state transition
//! at a time; for every transition the scheduler can emit a tracking record
//! describing exactly what happened. This crate implements that side channel:
//! the record family, the declarative query/profile subscription model, the
//! compiled per-root-activity matcher with its process-wide cache, and the
//! participant delivery path with fault isolation.
//!
//! The pieces compose bottom-up:
//!
//! - [`activity`]: definition-tree metadata, live activity instances, and
//!   the decoupled [`ActivityInfo`](activity::ActivityInfo) identity snapshot
//!   records carry.
//! - [`tracking`]: [`TrackingRecord`](tracking::TrackingRecord) variants,
//!   [`TrackingQuery`](tracking::TrackingQuery) filters grouped into a
//!   [`TrackingProfile`](tracking::TrackingProfile), the compiled
//!   [`RuntimeTrackingProfile`](tracking::RuntimeTrackingProfile) matcher,
//!   and the [`TrackingParticipant`](tracking::TrackingParticipant) sink
//!   contract.
//! - [`runtime`]: the scheduler-side glue, covering record-number assignment,
//!   pre-filter checks, record construction from live objects, and async
//!   delivery to every subscribed participant.
//!
//! Tracking is strictly observational. A failing participant never surfaces
//! as a workflow fault; failures are captured and reported through
//! [`InstanceTracker::flush`](runtime::InstanceTracker::flush) only.

use std::fmt;

pub mod activity;
pub mod runtime;
pub mod tracking;

pub use activity::{Activity, ActivityInfo, ActivityInstance, Bookmark, BookmarkScope, FaultInfo};
pub use runtime::{InstanceTracker, TrackerOptions};
pub use tracking::{
    ImplementationVisibility, RuntimeTrackingProfile, TrackingParticipant, TrackingProfile, TrackingQuery,
    TrackingRecord,
};

/// Wildcard pattern accepted by every query field that filters on a name.
pub const WILDCARD: &str = "*";

/// Severity attached to every tracking record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum TraceLevel {
    #[default]
    Informational,
    Warning,
    Error,
}

impl fmt::Display for TraceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TraceLevel::Informational => "Informational",
            TraceLevel::Warning => "Warning",
            TraceLevel::Error => "Error",
        };
        f.write_str(s)
    }
}

/// Version descriptor carried by workflow-instance records.
///
/// Identifies which definition a run was started against so that records can
/// be correlated after side-by-side definition upgrades.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorkflowIdentity {
    pub name: String,
    pub version: Option<semver::Version>,
    pub package: Option<String>,
}

impl WorkflowIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
            package: None,
        }
    }

    pub fn with_version(mut self, version: semver::Version) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_package(mut self, package: impl Into<String>) -> Self {
        self.package = Some(package.into());
        self
    }
}

impl fmt::Display for WorkflowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(v) = &self.version {
            write!(f, "@{v}")?;
        }
        if let Some(p) = &self.package {
            write!(f, " ({p})")?;
        }
        Ok(())
    }
}

/// States an activity instance passes through: `Executing` then exactly one
/// of the terminal states.
///
/// These are open string constants rather than a closed enum so hosts can
/// flow custom states through the same string-keyed subscription tables.
pub mod activity_states {
    pub const EXECUTING: &str = "Executing";
    pub const CLOSED: &str = "Closed";
    pub const CANCELED: &str = "Canceled";
    pub const FAULTED: &str = "Faulted";
}

/// States a workflow instance as a whole passes through.
///
/// Deliberately open (string constants, not an enum): hosts layer custom
/// instance states without engine changes, and the matching tables key on
/// whatever string the record carries.
pub mod workflow_instance_states {
    pub const STARTED: &str = "Started";
    pub const IDLE: &str = "Idle";
    pub const PERSISTED: &str = "Persisted";
    pub const COMPLETED: &str = "Completed";
    pub const CANCELED: &str = "Canceled";
    pub const TERMINATED: &str = "Terminated";
    pub const ABORTED: &str = "Aborted";
    pub const SUSPENDED: &str = "Suspended";
    pub const UNSUSPENDED: &str = "Unsuspended";
    pub const UNLOADED: &str = "Unloaded";
    pub const UNHANDLED_EXCEPTION: &str = "UnhandledException";
    pub const UPDATED: &str = "Updated";
    pub const UPDATE_FAILED: &str = "UpdateFailed";
    pub const DELETED: &str = "Deleted";
    pub const RESUMED: &str = "Resumed";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trace_level_display() {
        assert_eq!(TraceLevel::default().to_string(), "Informational");
        assert_eq!(TraceLevel::Error.to_string(), "Error");
    }

    #[test]
    fn workflow_identity_display() {
        let id = WorkflowIdentity::new("Expenses")
            .with_version(semver::Version::new(2, 1, 0))
            .with_package("payroll");
        assert_eq!(id.to_string(), "Expenses@2.1.0 (payroll)");
        assert_eq!(WorkflowIdentity::new("Expenses").to_string(), "Expenses");
    }
}
