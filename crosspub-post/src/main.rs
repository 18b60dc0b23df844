//! crosspub-post - Publish a post immediately
//!
//! The on-demand trigger: runs the given post through the same dispatch and
//! aggregation path the scheduler uses, bypassing the timer.

use clap::Parser;
use libcrosspub::adapters::mock::MockAdapter;
use libcrosspub::adapters::AdapterRegistry;
use libcrosspub::dispatcher::PublishDispatcher;
use libcrosspub::media::LocalMediaStore;
use libcrosspub::retention::MediaRetentionManager;
use libcrosspub::{Config, CredentialVault, Database, PostStatus, Result};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "crosspub-post")]
#[command(version)]
#[command(about = "Publish a post immediately", long_about = "\
crosspub-post - Publish a post immediately

DESCRIPTION:
    Dispatches one post to all of its resolved channels right now, using the
    same per-channel dispatch and status aggregation the scheduler daemon
    runs. The post must be in draft or scheduled state; terminal posts are
    never re-dispatched.

USAGE:
    crosspub-post 6f2c...-uuid
    crosspub-post --format json 6f2c...-uuid

EXIT CODES:
    0 - Post published (or partially published)
    1 - Every channel failed
    2 - Credential vault error
    3 - Invalid input (unknown id, terminal post, already claimed)
")]
struct Cli {
    /// Id of the post to publish
    post_id: String,

    /// Output format (text or json)
    #[arg(short, long, default_value = "text")]
    format: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Register mock adapters for these platforms (for rehearsal runs)
    #[arg(long, hide = true, value_name = "PLATFORMS", value_delimiter = ',')]
    mock: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    libcrosspub::logging::init(cli.verbose, "error");

    match run(cli).await {
        Ok(status) => {
            if status == PostStatus::Failed {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> Result<PostStatus> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let vault = Arc::new(CredentialVault::from_config(&config.vault)?);

    let mut registry = AdapterRegistry::new();
    for platform in &cli.mock {
        registry.register(Arc::new(MockAdapter::success(platform)));
    }

    let media_dir = PathBuf::from(shellexpand::tilde(&config.retention.media_dir).to_string());
    let media_store = Arc::new(LocalMediaStore::new(media_dir).await?);
    let retention = Arc::new(MediaRetentionManager::new(
        db.clone(),
        media_store,
        config.retention.cleanup_delay as i64,
    ));

    let dispatcher = PublishDispatcher::new(db, vault, Arc::new(registry))
        .with_retention(retention);

    let summary = dispatcher.publish_now(&cli.post_id).await?;

    if cli.format == "json" {
        println!("{}", serde_json::to_string_pretty(&summary).unwrap_or_default());
    } else {
        for result in &summary.results {
            if result.success {
                println!(
                    "{}: ok ({})",
                    result.platform,
                    result.external_id.as_deref().unwrap_or("-")
                );
            } else {
                println!(
                    "{}: failed ({})",
                    result.platform,
                    result.error_message.as_deref().unwrap_or("unknown error")
                );
            }
        }
        println!("status: {}", summary.status);
    }

    Ok(summary.status)
}
