//! Storage layer for the dwell tracker.
//!
//! Provides persistence for projects, categorization rules and time entries
//! using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! A `Database` can be moved between threads but not shared without external
//! synchronization. [`SqliteStore`] provides that synchronization with a mutex
//! and implements the tracker's storage traits on top of it.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in RFC 3339 format with millisecond precision
//! and a `Z` suffix (e.g., `2024-01-15T10:30:00.000Z`). Because every value has
//! the same shape:
//! - Lexicographic ordering matches chronological ordering
//! - Values are human-readable in the database
//! - Range queries can compare the text directly
//!
//! ## Names
//!
//! Project names are unique without regard to case; `Acme` and `acme` are the
//! same project.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, SecondsFormat, Utc};
use dwell_core::{
    Catalog, EntryId, EntryStore, Project, ProjectId, Rule, RuleId, StoreError, TimeEntry,
    ValidationError, WindowInfo,
};
use rusqlite::{Connection, OptionalExtension, Row, params};
use thiserror::Error;
use tracing::{debug, warn};

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// A stored timestamp could not be parsed.
    #[error("invalid timestamp in {column}: {value}")]
    TimestampParse {
        column: &'static str,
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A value was rejected before reaching the database, or a stored row
    /// violates a domain rule.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("project {0} does not exist")]
    UnknownProject(ProjectId),
    #[error("time entry {0} does not exist")]
    UnknownEntry(EntryId),
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init()?;
        Ok(db)
    }

    /// Initializes the database schema.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    fn init(&self) -> Result<(), DbError> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS projects (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE COLLATE NOCASE
            );

            -- Rules are evaluated in id order; the first match wins.
            CREATE TABLE IF NOT EXISTS rules (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pattern TEXT NOT NULL CHECK (length(trim(pattern)) > 0),
                project_id INTEGER NOT NULL,
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE CASCADE
            );

            CREATE INDEX IF NOT EXISTS idx_rules_project ON rules(project_id);

            -- start_time/end_time: RFC 3339, millisecond precision, UTC
            CREATE TABLE IF NOT EXISTS time_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                start_time TEXT NOT NULL,
                end_time TEXT NOT NULL,
                window_title TEXT NOT NULL,
                application_name TEXT NOT NULL,
                project_id INTEGER,
                FOREIGN KEY (project_id) REFERENCES projects(id) ON DELETE SET NULL
            );

            CREATE INDEX IF NOT EXISTS idx_time_entries_start ON time_entries(start_time);
            CREATE INDEX IF NOT EXISTS idx_time_entries_project ON time_entries(project_id);
            ",
        )?;
        Ok(())
    }

    /// Creates a project, or returns the existing one with the same name.
    ///
    /// The name is trimmed; matching ignores case and the stored spelling wins.
    pub fn add_project(&self, name: &str) -> Result<Project, DbError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ValidationError::Empty {
                field: "project name",
            }
            .into());
        }
        let inserted = self
            .conn
            .execute("INSERT OR IGNORE INTO projects (name) VALUES (?)", [name])?;
        if inserted > 0 {
            debug!(name, "project created");
        }
        self.project_by_name(name)?
            .ok_or_else(|| DbError::Sqlite(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Lists all projects ordered by name.
    pub fn list_projects(&self) -> Result<Vec<Project>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, name FROM projects ORDER BY name COLLATE NOCASE ASC, id ASC")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get(1)?)))?;
        let mut projects = Vec::new();
        for row in rows {
            let (id, name) = row?;
            projects.push(Project {
                id: ProjectId::new(id)?,
                name,
            });
        }
        Ok(projects)
    }

    /// Finds a project by name, ignoring case and surrounding whitespace.
    pub fn project_by_name(&self, name: &str) -> Result<Option<Project>, DbError> {
        let row: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT id, name FROM projects WHERE name = ? COLLATE NOCASE",
                [name.trim()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        match row {
            Some((id, name)) => Ok(Some(Project {
                id: ProjectId::new(id)?,
                name,
            })),
            None => Ok(None),
        }
    }

    pub fn project(&self, id: ProjectId) -> Result<Option<Project>, DbError> {
        let name: Option<String> = self
            .conn
            .query_row(
                "SELECT name FROM projects WHERE id = ?",
                [id.get()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(name.map(|name| Project { id, name }))
    }

    /// Adds a rule for an existing project. Rules are appended to the end of
    /// the evaluation order.
    pub fn add_rule(&self, pattern: &str, project_id: ProjectId) -> Result<Rule, DbError> {
        let rule = Rule::new(pattern, project_id)?;
        self.require_project(project_id)?;
        self.conn.execute(
            "INSERT INTO rules (pattern, project_id) VALUES (?, ?)",
            params![rule.pattern(), project_id.get()],
        )?;
        let id = RuleId::new(self.conn.last_insert_rowid())?;
        debug!(%id, pattern, %project_id, "rule created");
        Ok(rule.with_id(id))
    }

    /// Lists all rules in evaluation (insertion) order.
    pub fn list_rules(&self) -> Result<Vec<Rule>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, pattern, project_id FROM rules ORDER BY id ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;
        let mut rules = Vec::new();
        for row in rows {
            let (id, pattern, project_id) = row?;
            rules.push(Rule::new(pattern, ProjectId::new(project_id)?)?.with_id(RuleId::new(id)?));
        }
        Ok(rules)
    }

    /// Deletes a rule. Returns false if no such rule existed.
    pub fn delete_rule(&self, id: RuleId) -> Result<bool, DbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM rules WHERE id = ?", [id.get()])?;
        Ok(deleted > 0)
    }

    /// Stores a closed entry and returns its new identity.
    ///
    /// Any `id` already set on `entry` is ignored. A `project_id` that no
    /// longer names a project is stored as unassigned.
    pub fn add_entry(&self, entry: &TimeEntry) -> Result<EntryId, DbError> {
        if entry.end_time < entry.start_time {
            return Err(ValidationError::InvertedInterval {
                start: entry.start_time,
                end: entry.end_time,
            }
            .into());
        }
        // A project deleted while the entry was open leaves the entry unassigned.
        let project_id = match entry.project_id {
            Some(id) if self.project(id)?.is_none() => {
                warn!(project_id = %id, "project no longer exists; storing entry unassigned");
                None
            }
            project_id => project_id,
        };
        self.conn.execute(
            "
            INSERT INTO time_entries
            (start_time, end_time, window_title, application_name, project_id)
            VALUES (?, ?, ?, ?, ?)
            ",
            params![
                format_timestamp(entry.start_time),
                format_timestamp(entry.end_time),
                entry.window_title,
                entry.application_name,
                project_id.map(ProjectId::get),
            ],
        )?;
        Ok(EntryId::new(self.conn.last_insert_rowid())?)
    }

    /// Sets or clears the project of a stored entry.
    pub fn update_project_of_entry(
        &self,
        entry_id: EntryId,
        project_id: Option<ProjectId>,
    ) -> Result<(), DbError> {
        if let Some(project_id) = project_id {
            self.require_project(project_id)?;
        }
        let updated = self.conn.execute(
            "UPDATE time_entries SET project_id = ? WHERE id = ?",
            params![project_id.map(ProjectId::get), entry_id.get()],
        )?;
        if updated == 0 {
            return Err(DbError::UnknownEntry(entry_id));
        }
        Ok(())
    }

    pub fn entry(&self, id: EntryId) -> Result<Option<TimeEntry>, DbError> {
        let row = self
            .conn
            .query_row(
                &format!("{ENTRY_COLUMNS} WHERE id = ?"),
                [id.get()],
                EntryRow::from_row,
            )
            .optional()?;
        row.map(EntryRow::into_entry).transpose()
    }

    /// Lists entries whose start time falls in `[start, end)`, oldest first.
    pub fn entries_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>, DbError> {
        let mut stmt = self.conn.prepare(&format!(
            "{ENTRY_COLUMNS} WHERE start_time >= ? AND start_time < ? ORDER BY start_time ASC, id ASC"
        ))?;
        let rows = stmt.query_map(
            params![format_timestamp(start), format_timestamp(end)],
            EntryRow::from_row,
        )?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    pub fn entry_count(&self) -> Result<u64, DbError> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM time_entries", [], |row| row.get(0))?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// The entry with the latest start time, if any.
    pub fn last_entry(&self) -> Result<Option<TimeEntry>, DbError> {
        let row = self
            .conn
            .query_row(
                &format!("{ENTRY_COLUMNS} ORDER BY start_time DESC, id DESC LIMIT 1"),
                [],
                EntryRow::from_row,
            )
            .optional()?;
        row.map(EntryRow::into_entry).transpose()
    }

    fn require_project(&self, id: ProjectId) -> Result<(), DbError> {
        if self.project(id)?.is_none() {
            return Err(DbError::UnknownProject(id));
        }
        Ok(())
    }
}

const ENTRY_COLUMNS: &str = "
    SELECT id, start_time, end_time, window_title, application_name, project_id
    FROM time_entries
";

struct EntryRow {
    id: i64,
    start_time: String,
    end_time: String,
    window_title: String,
    application_name: String,
    project_id: Option<i64>,
}

impl EntryRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            start_time: row.get(1)?,
            end_time: row.get(2)?,
            window_title: row.get(3)?,
            application_name: row.get(4)?,
            project_id: row.get(5)?,
        })
    }

    fn into_entry(self) -> Result<TimeEntry, DbError> {
        let project_id = self.project_id.map(ProjectId::new).transpose()?;
        Ok(TimeEntry::restore(
            EntryId::new(self.id)?,
            parse_timestamp(&self.start_time, "start_time")?,
            parse_timestamp(&self.end_time, "end_time")?,
            WindowInfo::new(self.window_title, self.application_name),
            project_id,
        )?)
    }
}

fn parse_timestamp(value: &str, column: &'static str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            column,
            value: value.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// A [`Database`] shared behind a mutex, usable as the tracker's entry store
/// and catalog.
pub struct SqliteStore {
    db: Mutex<Database>,
}

impl SqliteStore {
    pub const fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    pub fn open(path: &Path) -> Result<Self, DbError> {
        Database::open(path).map(Self::new)
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EntryStore for SqliteStore {
    fn add(&self, entry: &TimeEntry) -> Result<EntryId, StoreError> {
        self.lock().add_entry(entry).map_err(StoreError::new)
    }

    fn update_project_of_entry(
        &self,
        entry_id: EntryId,
        project_id: Option<ProjectId>,
    ) -> Result<(), StoreError> {
        self.lock()
            .update_project_of_entry(entry_id, project_id)
            .map_err(StoreError::new)
    }

    fn entries_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<TimeEntry>, StoreError> {
        self.lock()
            .entries_in_range(start, end)
            .map_err(StoreError::new)
    }
}

impl Catalog for SqliteStore {
    fn rules(&self) -> Result<Vec<Rule>, StoreError> {
        self.lock().list_rules().map_err(StoreError::new)
    }

    fn projects(&self) -> Result<Vec<Project>, StoreError> {
        self.lock().list_projects().map_err(StoreError::new)
    }
}
