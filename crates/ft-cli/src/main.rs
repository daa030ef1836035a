use std::io::{self, Write};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use ft_cli::commands::check::CheckRequest;
use ft_cli::commands::{add, check, fields, timeline, util};
use ft_cli::{Cli, Commands, Config};
use ft_core::CheckOptions;
use ft_db::Database;

/// Open the configured database, ensuring the parent directory exists.
fn open_database(config: &Config) -> Result<Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env()
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let config = Config::load_from(cli.config.as_deref()).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    let mut stdout = io::stdout().lock();
    let ok = match &cli.command {
        Some(Commands::Add {
            field,
            at,
            id,
            state,
            last_state,
            duration,
        }) => {
            let mut db = open_database(&config)?;
            let args = add::AddArgs {
                field,
                at,
                id: id.as_deref(),
                state: state.as_deref(),
                last_state: last_state.as_deref(),
                duration: duration.as_deref(),
            };
            add::run(&mut stdout, &mut db, args)?;
            true
        }
        Some(Commands::Check {
            field,
            all: _,
            start,
            end,
            fix,
            fail_on_error,
            accumulate,
            json,
        }) => {
            let fail_on_error = if *accumulate {
                false
            } else {
                *fail_on_error || config.fail_on_error
            };
            let request = CheckRequest {
                start: util::parse_optional_time(start.as_deref(), "start")?,
                end: util::parse_optional_time(end.as_deref(), "end")?,
                options: CheckOptions {
                    fail_on_error,
                    fix: *fix || config.fix,
                },
            };
            if let Some(field) = field {
                let field = util::parse_field(field)?;
                let mut db = open_database(&config)?;
                check::run(&mut stdout, &mut db, &field, request, *json)?
            } else {
                // Workers open their own connections; make sure the file exists first
                drop(open_database(&config)?);
                check::run_all(&mut stdout, &config.database_path, request, *json)?
            }
        }
        Some(Commands::Timeline {
            field,
            start,
            end,
            json,
        }) => {
            let db = open_database(&config)?;
            let field = util::parse_field(field)?;
            let start = util::parse_optional_time(start.as_deref(), "start")?;
            let end = util::parse_optional_time(end.as_deref(), "end")?;
            timeline::run(&mut stdout, &db, &field, start, end, *json)?;
            true
        }
        Some(Commands::Fields) => {
            let db = open_database(&config)?;
            fields::run(&mut stdout, &db)?;
            true
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            writeln!(stdout)?;
            true
        }
    };

    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
