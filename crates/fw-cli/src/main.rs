use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use fw_cli::commands::{history, ppd, status, sync};
use fw_cli::{Cli, Commands, Config};

fn load_config(config_path: Option<&Path>) -> Result<Config> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");
    Ok(config)
}

/// Open the history database, ensuring the parent directory exists.
fn open_database(config: &Config) -> Result<fw_db::Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    fw_db::Database::open(&config.database_path).with_context(|| {
        format!("failed to open {}", config.database_path.display())
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    // Use try_init to avoid panic if tracing is already initialized (e.g., in tests)
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let mut stdout = io::stdout().lock();
    match &cli.command {
        Some(Commands::Status { client, json }) => {
            let config = load_config(cli.config.as_deref())?;
            status::run(&mut stdout, &config, client.as_deref(), *json, Utc::now())?;
        }
        Some(Commands::Sync) => {
            let config = load_config(cli.config.as_deref())?;
            let mut db = open_database(&config)?;
            sync::run(&mut stdout, &mut db, &config, Utc::now())?;
        }
        Some(Commands::History { client, json }) => {
            let config = load_config(cli.config.as_deref())?;
            let db = open_database(&config)?;
            history::run(&mut stdout, &db, client.as_deref(), *json)?;
        }
        Some(Commands::Ppd(args)) => {
            let config = load_config(cli.config.as_deref())?;
            ppd::run(&mut stdout, args, config.decimal_places)?;
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            println!();
        }
    }

    Ok(())
}
