//! Core type definitions with validation.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Validation errors for core types.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// The provided value was empty.
    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    /// A row identifier was zero or negative.
    #[error("{field} must be positive, got {value}")]
    NonPositiveId { field: &'static str, value: i64 },

    /// An interval ended before it started.
    #[error("end time {end} is before start time {start}")]
    InvertedInterval {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
}

/// Generates a validated row ID newtype with common trait implementations.
macro_rules! define_row_id {
    (
        $(#[$meta:meta])*
        $name:ident, $field_name:literal
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "i64", into = "i64")]
        pub struct $name(i64);

        impl $name {
            /// Creates a new ID after validation.
            pub const fn new(id: i64) -> Result<Self, ValidationError> {
                if id <= 0 {
                    return Err(ValidationError::NonPositiveId {
                        field: $field_name,
                        value: id,
                    });
                }
                Ok(Self(id))
            }

            /// Returns the raw row ID.
            pub const fn get(self) -> i64 {
                self.0
            }
        }

        impl TryFrom<i64> for $name {
            type Error = ValidationError;

            fn try_from(value: i64) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$name> for i64 {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

define_row_id!(
    /// Identity of a persisted time entry.
    ///
    /// Assigned by the store on the first durable write.
    EntryId, "entry ID"
);

define_row_id!(
    /// Identity of a user-defined project.
    ProjectId, "project ID"
);

define_row_id!(
    /// Identity of a stored categorization rule.
    RuleId, "rule ID"
);

/// The foreground window as reported by a signal source.
///
/// Both fields are free text and may be empty when the platform cannot
/// resolve them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowInfo {
    pub window_title: String,
    pub application_name: String,
}

impl WindowInfo {
    pub fn new(window_title: impl Into<String>, application_name: impl Into<String>) -> Self {
        Self {
            window_title: window_title.into(),
            application_name: application_name.into(),
        }
    }
}

/// An accounted interval of activity in one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeEntry {
    /// Store-assigned identity; `None` until the entry is persisted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntryId>,
    pub start_time: DateTime<Utc>,
    /// While the entry is open this is the last observed "now".
    pub end_time: DateTime<Utc>,
    pub window_title: String,
    pub application_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<ProjectId>,
}

impl TimeEntry {
    /// Creates an unpersisted, zero-length entry at `at`.
    pub fn open(window: WindowInfo, at: DateTime<Utc>) -> Self {
        Self {
            id: None,
            start_time: at,
            end_time: at,
            window_title: window.window_title,
            application_name: window.application_name,
            project_id: None,
        }
    }

    /// Rebuilds an entry read back from storage.
    pub fn restore(
        id: EntryId,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        window: WindowInfo,
        project_id: Option<ProjectId>,
    ) -> Result<Self, ValidationError> {
        if end_time < start_time {
            return Err(ValidationError::InvertedInterval {
                start: start_time,
                end: end_time,
            });
        }
        Ok(Self {
            id: Some(id),
            start_time,
            end_time,
            window_title: window.window_title,
            application_name: window.application_name,
            project_id,
        })
    }

    pub fn duration(&self) -> Duration {
        self.end_time - self.start_time
    }

    /// Returns true if this entry covers the given window.
    pub fn is_window(&self, window: &WindowInfo) -> bool {
        self.window_title == window.window_title
            && self.application_name == window.application_name
    }

    pub fn window(&self) -> WindowInfo {
        WindowInfo::new(self.window_title.clone(), self.application_name.clone())
    }
}

/// A user-defined label time can be attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub name: String,
}

/// A case-insensitive substring rule mapping activity to a project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rule {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<RuleId>,
    pattern: String,
    pub project_id: ProjectId,
}

impl Rule {
    /// Creates a rule after checking the pattern is non-empty.
    ///
    /// Surrounding whitespace is kept: a pattern of `" - "` is meaningful
    /// for window titles. A whitespace-only pattern is rejected.
    pub fn new(pattern: impl Into<String>, project_id: ProjectId) -> Result<Self, ValidationError> {
        let pattern = pattern.into();
        if pattern.trim().is_empty() {
            return Err(ValidationError::Empty { field: "rule pattern" });
        }
        Ok(Self {
            id: None,
            pattern,
            project_id,
        })
    }

    #[must_use]
    pub fn with_id(mut self, id: RuleId) -> Self {
        self.id = Some(id);
        self
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }
}
