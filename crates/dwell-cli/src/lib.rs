//! Dwell CLI library.
//!
//! This crate provides the `dwell` command-line interface: configuration,
//! subcommands and the stdin signal source used by `dwell track`.

mod cli;
pub mod commands;
mod config;
pub mod source;

pub use cli::{Cli, Commands, ProjectsAction, RulesAction, TrackArgs};
pub use config::{Config, TrackingSettings};
