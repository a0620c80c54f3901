//! Status command for showing what the database holds.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::{Local, Utc};

use dwell_db::Database;

use super::util::format_duration;

pub fn run<W: Write>(writer: &mut W, db: &Database, database_path: &Path) -> Result<()> {
    write_status(writer, db, database_path, |at| {
        at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
    })
}

fn write_status<W, F>(writer: &mut W, db: &Database, database_path: &Path, show: F) -> Result<()>
where
    W: Write,
    F: Fn(chrono::DateTime<Utc>) -> String,
{
    writeln!(writer, "Dwell status")?;
    writeln!(writer, "Database: {}", database_path.display())?;
    writeln!(writer, "Projects: {}", db.list_projects()?.len())?;
    writeln!(writer, "Rules:    {}", db.list_rules()?.len())?;
    writeln!(writer, "Entries:  {}", db.entry_count()?)?;

    let Some(last) = db.last_entry()? else {
        writeln!(writer, "No entries recorded.")?;
        return Ok(());
    };
    let project = match last.project_id {
        Some(id) => db.project(id)?.map_or_else(|| "(unassigned)".to_string(), |p| p.name),
        None => "(unassigned)".to_string(),
    };
    writeln!(
        writer,
        "Last entry: {} - {} ({}) {}: {} [{project}]",
        show(last.start_time),
        show(last.end_time),
        format_duration(last.duration()),
        last.application_name,
        last.window_title,
    )?;
    Ok(())
}
