//! Core of the dwell activity tracker.
//!
//! This crate contains:
//! - Domain types: time entries, projects and categorization rules
//! - The tracking state machine that turns window and idle signals into
//!   non-overlapping time entries
//! - The tracker service that serializes signals, persists closed entries and
//!   publishes notifications
//! - The seams to platform detection, storage and project advisors

pub mod advisor;
pub mod clock;
pub mod config;
pub mod emitter;
mod guard;
pub mod machine;
pub mod rules;
pub mod signal;
pub mod store;
pub mod tracker;
pub mod types;

pub use advisor::{AdvisorError, CategorizationAdvisor, resolve_suggestion};
pub use clock::{Clock, ManualClock, NoProbe, SystemClock, WindowProbe};
pub use config::{ResumePolicy, TrackerConfig};
pub use emitter::{EntryEmitter, TrackerEvent};
pub use machine::{ClosedEntry, CloseReason, TrackingMachine, TrackingState};
pub use rules::match_project;
pub use signal::{ManualSource, Signal, SignalKind, SignalSink, SignalSource, SourceError};
pub use store::{Catalog, EntryStore, StoreError};
pub use tracker::{Tracker, TrackerDeps, TrackerError, TrackerSnapshot};
pub use types::{EntryId, Project, ProjectId, Rule, RuleId, TimeEntry, ValidationError, WindowInfo};
