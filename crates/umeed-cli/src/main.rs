//! # umeed CLI entry point
//!
//! Parses command-line arguments, loads the stores from PostgreSQL, and
//! dispatches to subcommand handlers.

use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use umeed_api::state::{AppConfig, AppState};
use umeed_cli::accounts::{run_create_admin, run_set_role, CreateAdminArgs, SetRoleArgs};
use umeed_cli::audit::{run_verify_audit, VerifyAuditArgs};
use umeed_cli::catalog::{run_seed_devices, run_sync_listings, SeedDevicesArgs, SyncListingsArgs};
use umeed_cli::export::{run_export, ExportArgs};

/// Nayi Umeed operator CLI.
///
/// Administrative chores against a deployment's database: bootstrap an
/// admin, change roles, seed the demo catalog, repair listings, export
/// data, and verify the audit chain.
#[derive(Parser, Debug)]
#[command(name = "umeed", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// PostgreSQL connection string.
    #[arg(long, env = "DATABASE_URL", global = true, hide_env_values = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a verified staff admin, or promote an existing user.
    CreateAdmin(CreateAdminArgs),

    /// Change a user's role or active flag.
    SetRole(SetRoleArgs),

    /// Load the demo device catalog into the marketplace.
    SeedDevices(SeedDevicesArgs),

    /// Create missing listings for approved devices.
    SyncListings(SyncListingsArgs),

    /// Export every store as one JSON document.
    Export(ExportArgs),

    /// Verify the audit event hash chain.
    VerifyAudit(VerifyAuditArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!("umeed CLI starting");

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("failed to start async runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<u8> {
    let database_url = cli
        .database_url
        .as_deref()
        .context("--database-url (or DATABASE_URL) is required")?;
    let pool = umeed_api::db::init_pool(Some(database_url))
        .await
        .context("connecting to the database")?;

    let config = AppConfig {
        database_url: Some(database_url.to_string()),
        ..AppConfig::default()
    };
    let state = AppState::with_config(config, pool);
    state
        .hydrate_from_db()
        .await
        .context("loading stores from the database")?;

    match cli.command {
        Commands::CreateAdmin(args) => run_create_admin(&args, &state).await,
        Commands::SetRole(args) => run_set_role(&args, &state).await,
        Commands::SeedDevices(args) => run_seed_devices(&args, &state).await,
        Commands::SyncListings(args) => run_sync_listings(&args, &state).await,
        Commands::Export(args) => run_export(&args, &state).await,
        Commands::VerifyAudit(args) => run_verify_audit(&args, &state).await,
    }
}
