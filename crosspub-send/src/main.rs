//! crosspub-send - Background daemon for scheduled publishing
//!
//! Hosts the publish tick and the token refresh tick, dispatching due posts
//! and renewing expiring channel credentials until told to stop.

use clap::Parser;
use libcrosspub::adapters::mock::MockAdapter;
use libcrosspub::adapters::AdapterRegistry;
use libcrosspub::dispatcher::PublishDispatcher;
use libcrosspub::media::LocalMediaStore;
use libcrosspub::refresh::TokenRefreshScheduler;
use libcrosspub::retention::MediaRetentionManager;
use libcrosspub::scheduler::PublishScheduler;
use libcrosspub::{Config, CredentialVault, Database, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "crosspub-send")]
#[command(version)]
#[command(about = "Background daemon for scheduled publishing")]
#[command(long_about = "\
crosspub-send - Background daemon for scheduled publishing

DESCRIPTION:
    crosspub-send is a long-running daemon that polls the post queue and
    dispatches scheduled content to every resolved channel at the right time.

    It also runs the token refresh loop, renewing channel credentials that
    enter the expiry lookahead window, and drains deferred media-cleanup
    jobs once their delay has elapsed.

USAGE:
    # Run in foreground (logs to stderr)
    crosspub-send

    # Run with a custom publish poll interval
    crosspub-send --poll-interval 30

    # Run one orphan sweep over the media store and exit
    crosspub-send --sweep

SIGNALS:
    SIGTERM, SIGINT - Graceful shutdown (finishes the current dispatch)

CONFIGURATION:
    Configuration file: ~/.config/crosspub/config.toml
    Database location:  ~/.local/share/crosspub/crosspub.db

    [scheduler]
    poll_interval = 60   # seconds between publish ticks
    batch_size = 10      # due posts fetched per tick

    [refresh]
    interval = 3600      # seconds between refresh ticks
    lookahead_days = 3   # renewal window before expiry
    inter_call_delay_ms = 1000

    [retention]
    cleanup_delay = 300  # seconds before post-success media cleanup

EXIT CODES:
    0 - Clean shutdown
    1 - Runtime error
    2 - Credential vault error
")]
struct Cli {
    /// Publish poll interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    poll_interval: Option<u64>,

    /// Token refresh interval in seconds (overrides config)
    #[arg(long, value_name = "SECONDS")]
    refresh_interval: Option<u64>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,

    /// Run a single publish and refresh tick, then exit (for testing)
    #[arg(long, hide = true)]
    once: bool,

    /// Run one orphan sweep over the media store, then exit
    #[arg(long)]
    sweep: bool,

    /// Register mock adapters for these platforms (for rehearsal runs)
    #[arg(long, hide = true, value_name = "PLATFORMS", value_delimiter = ',')]
    mock: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    libcrosspub::logging::init(cli.verbose, "info");

    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let vault = Arc::new(CredentialVault::from_config(&config.vault)?);

    let mut registry = AdapterRegistry::new();
    for platform in &cli.mock {
        warn!("Registering mock adapter for platform '{platform}'");
        registry.register(Arc::new(MockAdapter::success(platform)));
    }
    if registry.is_empty() {
        warn!("No platform adapters registered; dispatches will record failures");
    }
    let registry = Arc::new(registry);

    let media_dir = PathBuf::from(shellexpand::tilde(&config.retention.media_dir).to_string());
    let media_store = Arc::new(LocalMediaStore::new(media_dir).await?);
    let retention = Arc::new(MediaRetentionManager::new(
        db.clone(),
        media_store,
        config.retention.cleanup_delay as i64,
    ));

    if cli.sweep {
        let removed = retention.orphan_sweep().await?;
        info!("Orphan sweep removed {removed} object(s)");
        return Ok(());
    }

    info!("crosspub-send daemon starting");

    let dispatcher = Arc::new(
        PublishDispatcher::new(db.clone(), vault.clone(), registry.clone())
            .with_retention(retention.clone()),
    );

    let poll_interval = cli.poll_interval.unwrap_or(config.scheduler.poll_interval);
    let refresh_interval = cli.refresh_interval.unwrap_or(config.refresh.interval);

    let publish_scheduler = Arc::new(
        PublishScheduler::new(
            db.clone(),
            dispatcher,
            Duration::from_secs(poll_interval),
            config.scheduler.batch_size as i64,
        )
        .with_retention(retention.clone()),
    );

    let refresh_scheduler = Arc::new(TokenRefreshScheduler::new(
        db,
        vault,
        registry,
        Duration::from_secs(refresh_interval),
        config.refresh.lookahead_days * 86_400,
        Duration::from_millis(config.refresh.inter_call_delay_ms),
    ));

    if cli.once {
        publish_scheduler.tick().await;
        refresh_scheduler.tick().await;
        info!("crosspub-send: processed one tick of each loop, exiting");
        return Ok(());
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    setup_signal_handlers(shutdown.clone())?;

    info!("Publish poll interval: {poll_interval}s, refresh interval: {refresh_interval}s");
    publish_scheduler.start();
    refresh_scheduler.start();

    while !shutdown.load(Ordering::Relaxed) {
        sleep(Duration::from_secs(1)).await;
    }

    publish_scheduler.stop();
    refresh_scheduler.stop();
    info!("crosspub-send daemon stopped");
    Ok(())
}

/// Set up signal handlers for graceful shutdown
fn setup_signal_handlers(shutdown: Arc<AtomicBool>) -> Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).map_err(|e| {
        libcrosspub::CrosspubError::InvalidInput(format!("Signal setup failed: {}", e))
    })?;

    let shutdown_clone = shutdown.clone();
    std::thread::spawn(move || {
        for sig in signals.forever() {
            match sig {
                SIGTERM | SIGINT => {
                    info!("Received shutdown signal, stopping gracefully...");
                    shutdown_clone.store(true, Ordering::Relaxed);
                    break;
                }
                _ => {}
            }
        }
    });

    Ok(())
}
