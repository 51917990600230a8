//! Command-line runner for versioned SQL migration files.
//!
//! Connection settings come from `migrator.toml`, the environment (`DATABASE_URL`,
//! `DATABASE_USER`, `DATABASE_PASSWORD`) and flags, in increasing order of precedence.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use config::GlobalArgs;
use migrator::{BackendRegistry, Migrator, MigratorConfig};
use std::io;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "migrator")]
#[command(about = "Apply and roll back versioned SQL migration files")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new migration file
    #[command(alias = "n")]
    New {
        /// Name of the migration, e.g. create_users
        name: String,
    },
    /// Apply all pending migrations
    Migrate,
    /// Apply pending migrations one step at a time
    Up {
        /// Number of migrations to apply (0 applies all)
        #[arg(long, default_value_t = 1)]
        step: usize,
    },
    /// Show applied and pending migrations
    Status {
        /// Print nothing
        #[arg(short, long)]
        quiet: bool,
        /// Exit with status 1 if any migration is pending
        #[arg(long)]
        exit_code: bool,
        /// Output format
        #[arg(long, value_enum, default_value_t = StatusFormat::Text)]
        format: StatusFormat,
    },
    /// Roll back the most recently applied migration
    Rollback,
    /// Roll back several migrations, newest first
    Down {
        /// Number of migrations to roll back
        #[arg(long, default_value_t = 1)]
        step: usize,
    },
    /// Write the database schema to the schema file
    Dump,
    /// Create the database
    Create,
    /// Drop the database
    Drop,
    /// Check the database server is reachable
    Ping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum StatusFormat {
    Text,
    Json,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose);

    match run(cli) {
        Ok(code) => code,
        Err(error) => {
            eprintln!("Error: {:#}", error);
            ExitCode::FAILURE
        }
    }
}

/// Logs go to stderr so they never mix with status output.
fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<ExitCode> {
    let config = config::load(&cli.global)?;
    tracing::debug!(?config.migrations_dir, ?config.schema_file, "Loaded configuration");

    match cli.command {
        Commands::New { name } => {
            migrator::new_migration_file(&config.migrations_dir, &name, &mut io::stdout())?;
        }
        Commands::Migrate => {
            connect(&config)?.migrate()?;
        }
        Commands::Up { step } => {
            connect(&config)?.up(step)?;
        }
        Commands::Status {
            quiet,
            exit_code,
            format,
        } => {
            let mut migrator = connect(&config)?;
            let pending = match format {
                StatusFormat::Text => migrator.status(quiet)?,
                StatusFormat::Json => {
                    let results = migrator.check_status()?;
                    if !quiet {
                        println!("{}", serde_json::to_string_pretty(&results)?);
                    }
                    results.iter().filter(|r| !r.applied).count()
                }
            };
            if exit_code && pending > 0 {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Rollback => {
            connect(&config)?.rollback()?;
        }
        Commands::Down { step } => {
            connect(&config)?.down(step)?;
        }
        Commands::Dump => {
            connect(&config)?.dump_schema()?;
        }
        Commands::Create => {
            connect(&config)?
                .backend()
                .create_database()
                .context("unable to create database")?;
        }
        Commands::Drop => {
            connect(&config)?
                .backend()
                .drop_database()
                .context("unable to drop database")?;
        }
        Commands::Ping => {
            connect(&config)?.ping()?;
            println!("OK");
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn connect(config: &MigratorConfig) -> Result<Migrator> {
    let registry = BackendRegistry::with_default_drivers();
    let migrator = Migrator::new(config, &registry).with_context(|| {
        format!(
            "unable to set up a driver (supported schemes: {})",
            registry.schemes().join(", ")
        )
    })?;
    tracing::debug!(driver = migrator.backend().name(), "Resolved database driver");
    Ok(migrator)
}
