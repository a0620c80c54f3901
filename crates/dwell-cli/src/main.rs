use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use dwell_cli::commands::{assign, entries, projects, report, rules, status, track};
use dwell_cli::{Cli, Commands, Config, ProjectsAction, RulesAction};
use dwell_db::Database;

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))?;
    Ok((db, config))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    // Logs go to stderr so stdout stays parseable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    let Some(command) = &cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let (db, config) = open_database(cli.config.as_deref())?;
    let mut stdout = std::io::stdout().lock();

    match command {
        Commands::Track(args) => {
            drop(stdout);
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .context("failed to start async runtime")?;
            let result = runtime.block_on(track::run(db, &config, args));
            // A stdin read may still be blocked after Ctrl-C.
            runtime.shutdown_timeout(Duration::from_secs(1));
            return result;
        }
        Commands::Projects(ProjectsAction::Add { name }) => projects::add(&mut stdout, &db, name)?,
        Commands::Projects(ProjectsAction::List { json }) => {
            projects::list(&mut stdout, &db, *json)?;
        }
        Commands::Rules(RulesAction::Add { pattern, project }) => {
            rules::add(&mut stdout, &db, pattern, project)?;
        }
        Commands::Rules(RulesAction::List { json }) => rules::list(&mut stdout, &db, *json)?,
        Commands::Rules(RulesAction::Remove { id }) => rules::remove(&mut stdout, &db, *id)?,
        Commands::Entries(args) => entries::run(&mut stdout, &db, args)?,
        Commands::Assign(args) => assign::run(&mut stdout, &db, args)?,
        Commands::Report(args) => report::run(&mut stdout, &db, args)?,
        Commands::Status => status::run(&mut stdout, &db, &config.database_path)?,
    }

    stdout.flush()?;
    Ok(())
}
