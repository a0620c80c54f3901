//! Project management commands.

use std::io::Write;

use anyhow::Result;

use dwell_db::Database;

pub fn add<W: Write>(writer: &mut W, db: &Database, name: &str) -> Result<()> {
    let existed = db.project_by_name(name)?.is_some();
    let project = db.add_project(name)?;
    if existed {
        writeln!(writer, "Project already exists: {} (#{})", project.name, project.id)?;
    } else {
        writeln!(writer, "Created project {} (#{})", project.name, project.id)?;
    }
    Ok(())
}

pub fn list<W: Write>(writer: &mut W, db: &Database, json: bool) -> Result<()> {
    let projects = db.list_projects()?;
    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&projects)?)?;
        return Ok(());
    }
    if projects.is_empty() {
        writeln!(writer, "No projects. Create one with 'dwell projects add <name>'.")?;
        return Ok(());
    }
    for project in projects {
        writeln!(writer, "{:<4} {}", project.id, project.name)?;
    }
    Ok(())
}
