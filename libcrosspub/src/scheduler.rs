//! Time-driven publish scheduler
//!
//! An owned scheduler object with idempotent start/stop and an injectable
//! clock, so tests drive `tick()` directly instead of waiting on real timers.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::Database;
use crate::dispatcher::PublishDispatcher;
use crate::retention::MediaRetentionManager;
use crate::types::PostStatus;

/// Injectable time source (Unix seconds).
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall-clock time.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A manually advanced clock for deterministic tests.
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, secs: i64) {
        self.now.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

/// Everything one tick needs; clones share the same guard and stores.
#[derive(Clone)]
struct TickContext {
    db: Database,
    dispatcher: Arc<PublishDispatcher>,
    retention: Option<Arc<MediaRetentionManager>>,
    clock: Arc<dyn Clock>,
    batch_size: i64,
    tick_lock: Arc<tokio::sync::Mutex<()>>,
}

impl TickContext {
    /// One scheduler pass. A tick that overlaps a still-running one skips
    /// instead of stacking; store failures end the tick early and the next
    /// tick retries naturally.
    async fn tick(&self) {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            debug!("Previous tick still executing; skipping");
            return;
        };

        let now = self.clock.now();

        if let Some(retention) = &self.retention {
            if let Err(e) = retention.process_due_jobs(now).await {
                warn!("Media cleanup pass failed: {e}");
            }
        }

        let due = match self.db.fetch_due_posts(now, self.batch_size).await {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to query due posts: {e}");
                return;
            }
        };

        if due.is_empty() {
            return;
        }

        info!(count = due.len(), "Found due post(s)");

        for post in due {
            match self.db.claim_post(&post.id, now).await {
                Ok(true) => {}
                Ok(false) => {
                    debug!(post_id = %post.id, "Post already claimed; skipping");
                    continue;
                }
                Err(e) => {
                    error!(post_id = %post.id, "Claim failed: {e}");
                    continue;
                }
            }

            if let Err(e) = self.dispatcher.dispatch(&post).await {
                error!(post_id = %post.id, "Dispatch failed: {e}");
                if let Err(e) = self.db.update_post_status(&post.id, PostStatus::Failed).await {
                    error!(post_id = %post.id, "Could not force post to failed: {e}");
                }
            }
        }
    }
}

/// Finds due posts on a fixed interval and runs them through the dispatcher.
pub struct PublishScheduler {
    ctx: TickContext,
    poll_interval: Duration,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PublishScheduler {
    pub fn new(
        db: Database,
        dispatcher: Arc<PublishDispatcher>,
        poll_interval: Duration,
        batch_size: i64,
    ) -> Self {
        Self {
            ctx: TickContext {
                db,
                dispatcher,
                retention: None,
                clock: Arc::new(SystemClock),
                batch_size,
                tick_lock: Arc::new(tokio::sync::Mutex::new(())),
            },
            poll_interval,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    /// Let the publish poll drain due media-cleanup jobs, making it the
    /// single polling mechanism for deferred work.
    pub fn with_retention(mut self, retention: Arc<MediaRetentionManager>) -> Self {
        self.ctx.retention = Some(retention);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ctx.clock = clock;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the interval loop. Idempotent: a second call on a running
    /// scheduler does nothing.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(
            interval_secs = self.poll_interval.as_secs(),
            batch_size = self.ctx.batch_size,
            "Publish scheduler starting"
        );

        let ctx = self.ctx.clone();
        let running = Arc::clone(&self.running);
        let poll_interval = self.poll_interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            while running.load(Ordering::SeqCst) {
                interval.tick().await;
                if !running.load(Ordering::SeqCst) {
                    break;
                }
                ctx.tick().await;
            }
        });

        *self.handle.lock().unwrap() = Some(handle);
    }

    /// Stop the interval loop. Idempotent.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
        info!("Publish scheduler stopped");
    }

    /// Run one scheduler pass directly, without the timer.
    pub async fn tick(&self) {
        self.ctx.tick().await;
    }
}

impl Drop for PublishScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}
