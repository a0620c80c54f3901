//! Manual categorization of a recorded entry.

use std::io::Write;

use anyhow::{Context, Result};
use clap::{ArgGroup, Args};

use dwell_core::EntryId;
use dwell_db::Database;

use super::util::require_project;

#[derive(Debug, Args)]
#[command(group(ArgGroup::new("target").required(true).args(["project", "none"])))]
pub struct AssignArgs {
    /// Entry ID, as shown by `dwell entries`.
    pub entry: i64,

    /// Project name.
    pub project: Option<String>,

    /// Clear the entry's project instead.
    #[arg(long)]
    pub none: bool,
}

pub fn run<W: Write>(writer: &mut W, db: &Database, args: &AssignArgs) -> Result<()> {
    let entry_id = EntryId::new(args.entry)?;
    let entry = db
        .entry(entry_id)?
        .with_context(|| format!("time entry not found: {entry_id}"))?;

    let project = match (&args.project, args.none) {
        (Some(name), false) => Some(require_project(db, name)?),
        _ => None,
    };
    db.update_project_of_entry(entry_id, project.as_ref().map(|project| project.id))?;

    match project {
        Some(project) => writeln!(
            writer,
            "Assigned entry #{entry_id} ({}) to {}",
            entry.window_title, project.name
        )?,
        None => writeln!(
            writer,
            "Cleared project of entry #{entry_id} ({})",
            entry.window_title
        )?,
    }
    Ok(())
}
