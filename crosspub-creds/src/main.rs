//! crosspub-creds - Channel credential tooling
//!
//! Inspect credential expiry and run the manual refresh-all path, which is
//! the only way an already-expired credential gets renewed (the hourly
//! refresh loop deliberately skips expired ones).

use clap::{Parser, Subcommand};
use libcrosspub::adapters::mock::MockAdapter;
use libcrosspub::adapters::AdapterRegistry;
use libcrosspub::refresh::TokenRefreshScheduler;
use libcrosspub::{Config, CredentialVault, Database, Result};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "crosspub-creds")]
#[command(version)]
#[command(about = "Channel credential tooling", long_about = "\
crosspub-creds - Channel credential tooling

DESCRIPTION:
    Operator commands for the credential lifecycle: list channels with
    expiring credentials, or force a renewal of every one of them, expired
    credentials included.

USAGE:
    crosspub-creds status
    crosspub-creds refresh-all

EXIT CODES:
    0 - Success
    1 - Runtime error
    2 - Credential vault error
")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Register mock adapters for these platforms (for rehearsal runs)
    #[arg(long, hide = true, global = true, value_name = "PLATFORMS", value_delimiter = ',')]
    mock: Vec<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List channels with expiring credentials
    Status,
    /// Refresh every active channel with an expiry set, expired ones included
    RefreshAll,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libcrosspub::logging::init(cli.verbose, "warn");

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;

    match cli.command {
        Command::Status => {
            let now = chrono::Utc::now().timestamp();
            let channels = db.channels_with_expiry().await?;

            if channels.is_empty() {
                println!("No channels with expiring credentials");
                return Ok(());
            }

            for channel in channels {
                let expiry = channel.credential_expiry.unwrap_or(0);
                let days_left = (expiry - now) / 86_400;
                let state = if expiry <= now { "EXPIRED" } else { "ok" };
                println!(
                    "{}  {}  expires {} ({} day(s))  [{}]",
                    channel.id,
                    channel.platform,
                    chrono::DateTime::from_timestamp(expiry, 0)
                        .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| expiry.to_string()),
                    days_left,
                    state
                );
            }
        }
        Command::RefreshAll => {
            let vault = Arc::new(CredentialVault::from_config(&config.vault)?);

            let mut registry = AdapterRegistry::new();
            for platform in &cli.mock {
                registry.register(Arc::new(MockAdapter::success(platform)));
            }

            let scheduler = TokenRefreshScheduler::new(
                db,
                vault,
                Arc::new(registry),
                Duration::from_secs(config.refresh.interval),
                config.refresh.lookahead_days * 86_400,
                Duration::from_millis(config.refresh.inter_call_delay_ms),
            );

            let report = scheduler.refresh_all().await?;
            println!(
                "attempted: {}, rotated: {}, static: {}, failed: {}",
                report.attempted, report.rotated, report.no_expiry, report.failed
            );
        }
    }

    Ok(())
}
