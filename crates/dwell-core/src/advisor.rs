//! Best-effort project suggestions for entries no rule matched.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::Project;

/// Why an advisor produced no answer.
///
/// These never reach the tracking flow; the tracker logs and drops them.
#[derive(Debug, Error)]
pub enum AdvisorError {
    #[error("advisor request failed: {0}")]
    Request(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("advisor timed out after {0:?}")]
    Timeout(Duration),
}

impl AdvisorError {
    pub fn request(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self::Request(source.into())
    }
}

/// Suggests which known project an activity belongs to.
#[async_trait]
pub trait CategorizationAdvisor: Send + Sync {
    /// Returns at most one project name.
    ///
    /// Must return `Ok(None)` when `known_projects` is empty.
    async fn suggest_project(
        &self,
        window_title: &str,
        application_name: &str,
        known_projects: &[String],
    ) -> Result<Option<String>, AdvisorError>;
}

/// Maps a suggested name onto a project by exact, case-insensitive name.
pub fn resolve_suggestion<'a>(suggestion: &str, projects: &'a [Project]) -> Option<&'a Project> {
    let suggestion = suggestion.trim();
    if suggestion.is_empty() {
        return None;
    }
    let wanted = suggestion.to_lowercase();
    projects
        .iter()
        .find(|project| project.name.to_lowercase() == wanted)
}
