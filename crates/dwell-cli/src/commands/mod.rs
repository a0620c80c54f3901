//! CLI subcommand implementations.

pub mod assign;
pub mod entries;
pub mod projects;
pub mod report;
pub mod rules;
pub mod status;
pub mod track;
pub mod util;
