//! Persistence boundary consumed by the tracker.
//!
//! Both traits are synchronous; the tracker calls them from a blocking worker
//! thread so slow storage only delays the next processed signal.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::{EntryId, Project, ProjectId, Rule, TimeEntry};

/// An error reported by a storage implementation.
#[derive(Debug, Error)]
#[error("storage error: {source}")]
pub struct StoreError {
    #[source]
    source: Box<dyn std::error::Error + Send + Sync>,
}

impl StoreError {
    pub fn new(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self {
            source: source.into(),
        }
    }
}

/// Durable store for closed time entries.
pub trait EntryStore: Send + Sync {
    /// Stores a closed entry and returns its assigned identity.
    ///
    /// Entries without a project are valid.
    fn add(&self, entry: &TimeEntry) -> Result<EntryId, StoreError>;

    fn update_project_of_entry(
        &self,
        entry_id: EntryId,
        project_id: Option<ProjectId>,
    ) -> Result<(), StoreError>;

    /// Entries starting in `[start, end)`, ordered by start time ascending.
    fn entries_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>, StoreError>;
}

/// Read side of projects and rules.
///
/// Queried on every use so edits made elsewhere become visible on the next
/// lookup.
pub trait Catalog: Send + Sync {
    /// All rules in evaluation order.
    fn rules(&self) -> Result<Vec<Rule>, StoreError>;

    fn projects(&self) -> Result<Vec<Project>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_error_wraps_message() {
        let err = StoreError::new("disk full");
        assert_eq!(err.to_string(), "storage error: disk full");
        assert!(std::error::Error::source(&err).is_some());
    }
}
