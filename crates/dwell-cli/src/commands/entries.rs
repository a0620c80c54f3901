//! Listing of recorded time entries.

use std::collections::HashMap;
use std::fmt;
use std::io::Write;

use anyhow::{Result, bail};
use chrono::{Duration, Local, TimeZone, Utc};
use clap::Args;
use serde::Serialize;

use dwell_core::{ProjectId, TimeEntry};
use dwell_db::Database;

use super::util::{format_duration, parse_datetime, project_names};

#[derive(Debug, Args)]
pub struct EntriesArgs {
    /// Only entries starting at or after this time (RFC 3339 or "2 hours ago").
    /// Defaults to 24 hours ago.
    #[arg(long)]
    pub start: Option<String>,

    /// Only entries starting before this time. Defaults to now.
    #[arg(long)]
    pub end: Option<String>,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct EntryRow<'a> {
    #[serde(flatten)]
    entry: &'a TimeEntry,
    project: Option<&'a str>,
    duration_secs: i64,
}

pub fn run<W: Write>(writer: &mut W, db: &Database, args: &EntriesArgs) -> Result<()> {
    let now = Utc::now();
    let start = match &args.start {
        Some(value) => parse_datetime(value)?,
        None => now - Duration::days(1),
    };
    let end = match &args.end {
        Some(value) => parse_datetime(value)?,
        None => now,
    };
    if end < start {
        bail!("--end must not be before --start");
    }

    let entries = db.entries_in_range(start, end)?;
    let names = project_names(db)?;
    if args.json {
        write_json(writer, &entries, &names)
    } else {
        write_table(writer, &entries, &names, &Local)
    }
}

fn write_json<W: Write>(
    writer: &mut W,
    entries: &[TimeEntry],
    names: &HashMap<ProjectId, String>,
) -> Result<()> {
    let rows: Vec<EntryRow<'_>> = entries
        .iter()
        .map(|entry| EntryRow {
            entry,
            project: entry
                .project_id
                .and_then(|id| names.get(&id))
                .map(String::as_str),
            duration_secs: entry.duration().num_seconds(),
        })
        .collect();
    writeln!(writer, "{}", serde_json::to_string_pretty(&rows)?)?;
    Ok(())
}

fn write_table<W, Tz>(
    writer: &mut W,
    entries: &[TimeEntry],
    names: &HashMap<ProjectId, String>,
    tz: &Tz,
) -> Result<()>
where
    W: Write,
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    if entries.is_empty() {
        writeln!(writer, "No entries in range.")?;
        return Ok(());
    }
    for entry in entries {
        let id = entry.id.map_or_else(|| "-".to_string(), |id| format!("#{id}"));
        let start = entry.start_time.with_timezone(tz).format("%Y-%m-%d %H:%M:%S");
        let end = entry.end_time.with_timezone(tz).format("%H:%M:%S");
        let project = entry
            .project_id
            .and_then(|id| names.get(&id))
            .map_or("(unassigned)", String::as_str);
        writeln!(
            writer,
            "{id:<5} {start} - {end} {:>7}  {project:<14} {}: {}",
            format_duration(entry.duration()),
            entry.application_name,
            entry.window_title,
        )?;
    }
    Ok(())
}
