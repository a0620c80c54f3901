//! Shared utilities for CLI commands.

use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{Context, bail};
use chrono::{DateTime, Duration, Utc};
use dwell_core::{Project, ProjectId};
use dwell_db::Database;
use regex::Regex;

/// Pre-compiled regex for relative time parsing.
static RELATIVE_TIME_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(\d+)\s+(minute|hour|day|week)s?\s+ago$").ok());

/// Conservative bounds for relative time parsing (~1000 years in minutes).
const MAX_RELATIVE_MINUTES: i64 = 1000 * 365 * 24 * 60;

/// Parse a datetime string as either RFC 3339 or relative time.
///
/// Supports:
/// - RFC 3339: "2026-01-15T10:30:00Z"
/// - Relative: "2 hours ago", "30 minutes ago", "1 day ago", "1 week ago"
pub fn parse_datetime(s: &str) -> anyhow::Result<DateTime<Utc>> {
    parse_datetime_at(s, Utc::now())
}

pub(crate) fn parse_datetime_at(s: &str, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    let Some(caps) = RELATIVE_TIME_RE
        .as_ref()
        .and_then(|re| re.captures(s))
    else {
        bail!(
            "Invalid datetime: {s}. Use RFC 3339 (e.g., 2026-01-15T10:30:00Z) or relative (e.g., '2 hours ago')"
        );
    };

    let n: i64 = caps[1]
        .parse()
        .context("failed to parse number in relative time")?;

    let (max_for_unit, minutes_per_unit) = match &caps[2] {
        "minute" => (MAX_RELATIVE_MINUTES, 1),
        "hour" => (MAX_RELATIVE_MINUTES / 60, 60),
        "day" => (MAX_RELATIVE_MINUTES / (60 * 24), 60 * 24),
        "week" => (MAX_RELATIVE_MINUTES / (60 * 24 * 7), 60 * 24 * 7),
        unit => bail!("Unknown time unit: {unit}"),
    };

    if n > max_for_unit {
        bail!("Relative time value too large: {n} {}", &caps[2]);
    }

    Ok(now - Duration::minutes(n * minutes_per_unit))
}

/// Formats a duration as "Xh Ym", or "Xm" under an hour, or "Xs" under a
/// minute. Negative durations render as "0s".
pub fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;

    if hours >= 1 {
        format!("{hours}h {minutes}m")
    } else if minutes >= 1 {
        format!("{minutes}m")
    } else {
        format!("{total_seconds}s")
    }
}

/// Looks up a project by name, with a hint on how to create it.
pub fn require_project(db: &Database, name: &str) -> anyhow::Result<Project> {
    db.project_by_name(name)?.with_context(|| {
        format!(
            "project not found: {name}. Create it with 'dwell projects add \"{}\"'",
            name.trim()
        )
    })
}

/// Project names keyed by ID.
pub fn project_names(db: &Database) -> anyhow::Result<HashMap<ProjectId, String>> {
    Ok(db
        .list_projects()?
        .into_iter()
        .map(|project| (project.id, project.name))
        .collect())
}
