//! Categorization rule commands.

use std::io::Write;

use anyhow::{Result, bail};
use serde::Serialize;

use dwell_core::RuleId;
use dwell_db::Database;

use super::util::{project_names, require_project};

pub fn add<W: Write>(writer: &mut W, db: &Database, pattern: &str, project: &str) -> Result<()> {
    let project = require_project(db, project)?;
    let rule = db.add_rule(pattern, project.id)?;
    let id = rule.id.map_or_else(String::new, |id| id.to_string());
    writeln!(
        writer,
        "Added rule #{id}: \"{}\" -> {}",
        rule.pattern(),
        project.name
    )?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct RuleRow {
    id: Option<RuleId>,
    pattern: String,
    project: String,
}

pub fn list<W: Write>(writer: &mut W, db: &Database, json: bool) -> Result<()> {
    let names = project_names(db)?;
    let rows: Vec<RuleRow> = db
        .list_rules()?
        .into_iter()
        .map(|rule| RuleRow {
            id: rule.id,
            pattern: rule.pattern().to_string(),
            project: names.get(&rule.project_id).cloned().unwrap_or_default(),
        })
        .collect();

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&rows)?)?;
        return Ok(());
    }
    if rows.is_empty() {
        writeln!(writer, "No rules. Add one with 'dwell rules add <pattern> <project>'.")?;
        return Ok(());
    }
    for row in rows {
        let id = row.id.map_or_else(String::new, |id| id.to_string());
        writeln!(writer, "{id:<4} {:<24} {}", format!("\"{}\"", row.pattern), row.project)?;
    }
    Ok(())
}

pub fn remove<W: Write>(writer: &mut W, db: &Database, id: i64) -> Result<()> {
    let id = RuleId::new(id)?;
    if !db.delete_rule(id)? {
        bail!("rule not found: {id}");
    }
    writeln!(writer, "Removed rule #{id}")?;
    Ok(())
}
