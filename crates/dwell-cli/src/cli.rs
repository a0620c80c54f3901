//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::commands::assign::AssignArgs;
use crate::commands::entries::EntriesArgs;
use crate::commands::report::ReportArgs;

/// Passive time tracker.
///
/// Turns foreground-window and idle signals into time entries and attributes
/// them to projects through keyword rules or, optionally, Claude suggestions.
#[derive(Debug, Parser)]
#[command(name = "dwell", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Track activity from JSON signals on stdin until EOF or Ctrl-C.
    Track(TrackArgs),

    /// Manage projects.
    #[command(subcommand)]
    Projects(ProjectsAction),

    /// Manage categorization rules.
    #[command(subcommand)]
    Rules(RulesAction),

    /// List recorded time entries.
    Entries(EntriesArgs),

    /// Assign a time entry to a project, or clear its project.
    Assign(AssignArgs),

    /// Show time per project for a period.
    Report(ReportArgs),

    /// Show database location and recent activity.
    Status,
}

#[derive(Debug, Args)]
pub struct TrackArgs {
    /// Ask Claude to categorize entries no rule matched.
    ///
    /// Overrides `tracking.ai_categorization`. Requires `api_key`.
    #[arg(long)]
    pub ai: bool,

    /// Print each recorded entry as a JSON line on stdout.
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Subcommand)]
pub enum ProjectsAction {
    /// Create a project. Does nothing if it already exists.
    Add {
        /// Project name.
        name: String,
    },
    /// List projects.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Subcommand)]
pub enum RulesAction {
    /// Add a rule. Rules are checked in the order they were added.
    Add {
        /// Case-insensitive text to find in the window title or application.
        pattern: String,
        /// Project the matching activity belongs to.
        project: String,
    },
    /// List rules in evaluation order.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Remove a rule by ID.
    Remove {
        /// Rule ID.
        id: i64,
    },
}
