//! Keel Command-Line Client
//!
//! Plans and applies schema migrations against an SQLite database file.

mod config;
mod formatter;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use formatter::OutputFormat;
use keel_core::{
    HistoryLedger, Inspector, MigrationConfig, MigrationError, Migrator, SchemaDescriptor,
    SledLedger, SqliteConnection, SqliteDialect, SqliteInspector, TableLedger,
};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Keel Command-Line Client
#[derive(Parser, Debug)]
#[command(name = "keel")]
#[command(version, about = "Keel schema migrations")]
pub struct Args {
    /// SQLite database file
    #[arg(short = 'd', long, default_value = "keel.db")]
    pub database: PathBuf,

    /// Keep migration history in a sled directory instead of the database
    #[arg(long)]
    pub ledger: Option<PathBuf>,

    /// Plan changes that can lose data
    #[arg(long, global = true)]
    pub allow_destructive: bool,

    /// Plan only, never apply
    #[arg(long, global = true)]
    pub dry_run: bool,

    /// Time budget of each step in seconds, 0 for none
    #[arg(long, default_value_t = 0, global = true)]
    pub timeout_secs: u64,

    /// Name recorded as the migration lock holder
    #[arg(long, global = true)]
    pub lock_owner: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", value_enum, global = true)]
    pub format: OutputFormat,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the steps that bring the database to a schema
    Plan {
        /// Desired schema as JSON
        schema: PathBuf,
    },
    /// Bring the database to a schema
    Apply {
        /// Desired schema as JSON
        schema: PathBuf,
    },
    /// Print the current schema as JSON
    Inspect,
    /// Show the migration history
    History,
    /// Clear a migration lock left behind by a run that died
    Unlock,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("keel=info,keel_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    run(&args)
}

fn run(args: &Args) -> anyhow::Result<()> {
    let mut conn = SqliteConnection::open(&args.database)
        .with_context(|| format!("failed to open {}", args.database.display()))?;
    let ledger = open_ledger(args)?;
    let migrator = Migrator::new(&SqliteDialect, &SqliteInspector, MigrationConfig::from(args));
    let formatter = formatter::create_formatter(args.format);

    match &args.command {
        Command::Plan { schema } => {
            let desired = read_schema(schema)?;
            let plan = migrator.plan(&mut conn, &desired)?;
            println!("{}", formatter.format_plan(&plan));
        }
        Command::Apply { schema } => {
            let desired = read_schema(schema)?;
            let outcome = match migrator.run(&mut conn, &desired, ledger.as_ref()) {
                Ok(outcome) => outcome,
                Err(MigrationError::Execution(failure)) => {
                    eprintln!("{}", formatter.format_history(&failure.ledger));
                    bail!("{}", failure);
                }
                Err(e) => return Err(e.into()),
            };
            match &outcome.applied {
                Some(result) => println!("{}", formatter.format_result(result)),
                None => println!("{}", formatter.format_plan(&outcome.plan)),
            }
        }
        Command::Inspect => {
            let current = SqliteInspector.inspect(&mut conn)?;
            println!("{}", current.to_json()?);
        }
        Command::History => {
            let entries = ledger.entries(&mut conn)?;
            println!("{}", formatter.format_history(&entries));
        }
        Command::Unlock => {
            ledger.prepare(&mut conn)?;
            match ledger.force_release_lock(&mut conn)? {
                Some(holder) => println!("released migration lock held by {}", holder),
                None => println!("migration lock is not held"),
            }
        }
    }
    Ok(())
}

fn open_ledger(args: &Args) -> anyhow::Result<Box<dyn HistoryLedger>> {
    match &args.ledger {
        Some(path) => {
            info!(path = %path.display(), "using sled ledger");
            let ledger = SledLedger::open(path)
                .with_context(|| format!("failed to open ledger at {}", path.display()))?;
            Ok(Box::new(ledger))
        }
        None => Ok(Box::new(TableLedger::for_dialect("sqlite"))),
    }
}

fn read_schema(path: &Path) -> anyhow::Result<SchemaDescriptor> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let schema = SchemaDescriptor::from_json(&json)
        .with_context(|| format!("invalid schema in {}", path.display()))?;
    Ok(schema)
}
