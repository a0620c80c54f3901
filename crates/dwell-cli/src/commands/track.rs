//! The `track` command: runs a tracker fed by JSON signal lines on stdin.
//!
//! Input lines are parsed by [`crate::source`]. Tracking ends at end of input
//! or on Ctrl-C. Either way the open entry is closed and written before the
//! command returns.

use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Local, TimeZone};
use fs2::FileExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};

use dwell_core::{ProjectId, Tracker, TrackerDeps, TrackerEvent};
use dwell_db::{Database, SqliteStore};
use dwell_llm::{Client, ProjectAdvisor};

use super::util::{format_duration, project_names};
use crate::cli::TrackArgs;
use crate::config::Config;
use crate::source::LineSource;

/// Returns the path of the lock file guarding a database against a second tracker.
fn lock_path(database_path: &Path) -> PathBuf {
    let mut name = database_path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".track-lock");
    database_path.with_file_name(name)
}

fn acquire_lock(database_path: &Path) -> Result<File> {
    let path = lock_path(database_path);
    let lock_file = File::create(&path)
        .with_context(|| format!("failed to create lock file {}", path.display()))?;
    lock_file
        .try_lock_exclusive()
        .context("another `dwell track` is already recording into this database")?;
    Ok(lock_file)
}

pub async fn run(db: Database, config: &Config, args: &TrackArgs) -> Result<()> {
    let _lock = acquire_lock(&config.database_path)?;

    let names = project_names(&db)?;
    let store = Arc::new(SqliteStore::new(db));

    let mut tracker_config = config.tracking.tracker_config();
    tracker_config.ai_categorization |= args.ai;

    let source = LineSource::new(tokio::io::stdin());
    let finished = source.finished();
    let mut deps = TrackerDeps::new(Box::new(source), store.clone(), store);

    if tracker_config.ai_categorization {
        match &config.api_key {
            Some(key) => {
                let client = Client::new(key.as_str()).context("invalid API key")?;
                deps = deps.with_advisor(Arc::new(ProjectAdvisor::new(
                    client,
                    config.model.as_str(),
                    config.tracking.suggestion_cache_size,
                )));
            }
            None => {
                warn!("AI categorization requested but no api_key is configured; continuing without it");
                tracker_config.ai_categorization = false;
            }
        }
    }

    let mut tracker = Tracker::new(deps, tracker_config);
    let printer = tokio::spawn(print_events(tracker.subscribe(), names, args.json));

    tracker.start().context("failed to start tracking")?;
    info!(database = %config.database_path.display(), "tracking until end of input or Ctrl-C");

    tokio::select! {
        () = finished.cancelled() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "failed to listen for Ctrl-C");
            }
        }
    }

    let stopped = tracker.stop().await;
    drop(tracker);
    if let Err(err) = printer.await {
        warn!(error = %err, "event printer failed");
    }
    stopped.context("failed to stop tracking cleanly")
}

async fn print_events(
    mut events: broadcast::Receiver<TrackerEvent>,
    names: HashMap<ProjectId, String>,
    json: bool,
) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let mut stdout = std::io::stdout().lock();
                if let Err(err) = print_event(&mut stdout, &event, &names, json, &Local) {
                    warn!(error = %err, "failed to print event");
                    break;
                }
            }
            // Lag only drops lines from this output; entries are already stored.
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "event output fell behind; skipped events are still stored");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

fn print_event<W, Tz>(
    writer: &mut W,
    event: &TrackerEvent,
    names: &HashMap<ProjectId, String>,
    json: bool,
    tz: &Tz,
) -> Result<()>
where
    W: Write,
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    if json {
        writeln!(writer, "{}", serde_json::to_string(event)?)?;
        return Ok(());
    }

    let project = |id: Option<ProjectId>| {
        id.and_then(|id| names.get(&id))
            .map_or("(unassigned)", String::as_str)
    };
    match event {
        TrackerEvent::EntryRecorded { entry } => {
            let id = entry.id.map_or_else(String::new, |id| id.to_string());
            writeln!(
                writer,
                "Recorded #{id} {} - {} ({}) {}: {} [{}]",
                entry.start_time.with_timezone(tz).format("%H:%M:%S"),
                entry.end_time.with_timezone(tz).format("%H:%M:%S"),
                format_duration(entry.duration()),
                entry.application_name,
                entry.window_title,
                project(entry.project_id),
            )?;
        }
        TrackerEvent::EntryUpdated {
            entry_id,
            project_id,
        } => writeln!(writer, "Categorized #{entry_id} as {}", project(*project_id))?,
        TrackerEvent::PersistFailed { entry, reason } => writeln!(
            writer,
            "Failed to save entry started {} ({}: {}): {reason}",
            entry.start_time.with_timezone(tz).format("%H:%M:%S"),
            entry.application_name,
            entry.window_title,
        )?,
        TrackerEvent::StateChanged { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use chrono::{Duration, Utc};
    use dwell_core::{EntryId, TimeEntry, TrackingState, WindowInfo};
    use insta::assert_snapshot;

    fn recorded(project_id: Option<ProjectId>) -> TimeEntry {
        let start = Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap();
        let mut entry = TimeEntry::open(WindowInfo::new("main.rs - vscode", "code"), start);
        entry.end_time = start + Duration::minutes(35);
        entry.id = Some(EntryId::new(3).unwrap());
        entry.project_id = project_id;
        entry
    }

    fn render(events: &[TrackerEvent], json: bool) -> String {
        let acme = ProjectId::new(1).unwrap();
        let names = HashMap::from([(acme, "Acme".to_string())]);
        let mut output = Vec::new();
        for event in events {
            print_event(&mut output, event, &names, json, &Utc).unwrap();
        }
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn human_lines_name_projects() {
        let acme = ProjectId::new(1).unwrap();
        let output = render(
            &[
                TrackerEvent::StateChanged {
                    state: TrackingState::Active,
                },
                TrackerEvent::EntryRecorded {
                    entry: recorded(None),
                },
                TrackerEvent::EntryUpdated {
                    entry_id: EntryId::new(3).unwrap(),
                    project_id: Some(acme),
                },
                TrackerEvent::PersistFailed {
                    entry: recorded(Some(acme)),
                    reason: "disk I/O error".to_string(),
                },
            ],
            false,
        );
        assert_snapshot!(output, @r"
        Recorded #3 09:00:00 - 09:35:00 (35m) code: main.rs - vscode [(unassigned)]
        Categorized #3 as Acme
        Failed to save entry started 09:00:00 (code: main.rs - vscode): disk I/O error
        ");
    }

    #[test]
    fn json_lines_are_tagged_events() {
        let output = render(
            &[TrackerEvent::EntryRecorded {
                entry: recorded(ProjectId::new(1).ok()),
            }],
            true,
        );
        let json: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(json["event"], "entry_recorded");
        assert_eq!(json["entry"]["id"], 3);
        assert_eq!(json["entry"]["project_id"], 1);
        assert_eq!(json["entry"]["window_title"], "main.rs - vscode");
    }

    #[test]
    fn lock_file_sits_next_to_database() {
        assert_eq!(
            lock_path(Path::new("/data/dwell.db")),
            PathBuf::from("/data/dwell.db.track-lock")
        );
    }

    #[test]
    fn second_lock_on_same_database_is_refused() {
        let temp = tempfile::tempdir().unwrap();
        let db_path = temp.path().join("dwell.db");
        let _held = acquire_lock(&db_path).unwrap();
        let err = acquire_lock(&db_path).unwrap_err();
        assert!(err.to_string().contains("already recording"));
    }
}
