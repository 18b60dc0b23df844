//! Proactive credential renewal
//!
//! An independent interval loop that renews credentials before they expire.
//! Each tick selects active channels whose expiry falls inside the lookahead
//! window but has not yet passed; an already-expired credential is only
//! recoverable through the manual refresh-all path. Failed renewals leave the
//! channel untouched and re-enter the window on the next tick, which bounds
//! the retry cadence by the lookahead/interval ratio.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::adapters::{AdapterRegistry, RefreshOutcome, RefreshRequest};
use crate::db::Database;
use crate::error::Result;
use crate::scheduler::{Clock, SystemClock};
use crate::types::Channel;
use crate::vault::CredentialVault;

/// Totals from one refresh pass.
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub attempted: usize,
    pub rotated: usize,
    pub no_expiry: usize,
    pub failed: usize,
}

#[derive(Clone)]
struct RefreshContext {
    db: Database,
    vault: Arc<CredentialVault>,
    registry: Arc<AdapterRegistry>,
    clock: Arc<dyn Clock>,
    lookahead_secs: i64,
    inter_call_delay: Duration,
    tick_lock: Arc<tokio::sync::Mutex<()>>,
}

impl RefreshContext {
    /// One refresh pass over the proactive window.
    async fn tick(&self) -> RefreshReport {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            debug!("Previous refresh tick still executing; skipping");
            return RefreshReport::default();
        };

        let now = self.clock.now();
        let due = match self
            .db
            .channels_due_for_refresh(now, now + self.lookahead_secs)
            .await
        {
            Ok(due) => due,
            Err(e) => {
                error!("Failed to query channels for refresh: {e}");
                return RefreshReport::default();
            }
        };

        if due.is_empty() {
            return RefreshReport::default();
        }

        info!(count = due.len(), "Credential(s) entering expiry window");
        self.refresh_channels(&due, now).await
    }

    /// Renew a list of channels one at a time, pacing calls with the
    /// configured delay to stay under provider rate limits.
    async fn refresh_channels(&self, channels: &[Channel], now: i64) -> RefreshReport {
        let mut report = RefreshReport::default();

        for (i, channel) in channels.iter().enumerate() {
            if i > 0 && !self.inter_call_delay.is_zero() {
                sleep(self.inter_call_delay).await;
            }

            report.attempted += 1;
            match self.refresh_channel(channel, now).await {
                Ok(RefreshOutcome::Rotated { .. }) => report.rotated += 1,
                Ok(RefreshOutcome::NoExpiry) => report.no_expiry += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        channel_id = %channel.id,
                        platform = %channel.platform,
                        "Credential refresh failed: {e}"
                    );
                    if let Err(audit_err) = self
                        .db
                        .record_refresh_attempt(
                            &channel.id,
                            &channel.platform,
                            false,
                            Some(&e.to_string()),
                            now,
                        )
                        .await
                    {
                        error!(
                            channel_id = %channel.id,
                            "Could not write refresh audit: {audit_err}"
                        );
                    }
                }
            }
        }

        report
    }

    /// Renew one channel: open its credentials, call the platform's refresh
    /// protocol, and persist the re-encrypted result. The channel row is
    /// only touched on success.
    async fn refresh_channel(&self, channel: &Channel, now: i64) -> Result<RefreshOutcome> {
        let adapter = self
            .registry
            .get(&channel.platform)
            .ok_or_else(|| crate::error::AdapterError::NotRegistered(channel.platform.clone()))?;

        let access = self.vault.open(&channel.access_credential)?;
        let refresh = match &channel.refresh_credential {
            Some(stored) => Some(self.vault.open(stored)?),
            None => None,
        };

        let outcome = adapter
            .refresh(RefreshRequest {
                channel,
                access_credential: &access,
                refresh_credential: refresh.as_deref(),
            })
            .await?;

        match &outcome {
            RefreshOutcome::Rotated {
                access_credential,
                refresh_credential,
                expires_at,
            } => {
                let sealed_access = self.vault.seal(access_credential)?;
                let sealed_refresh = match refresh_credential {
                    Some(r) => Some(self.vault.seal(r)?),
                    None => None,
                };

                self.db
                    .update_channel_credential(
                        &channel.id,
                        &sealed_access,
                        sealed_refresh.as_deref(),
                        *expires_at,
                    )
                    .await?;

                info!(
                    channel_id = %channel.id,
                    platform = %channel.platform,
                    expires_at = ?expires_at,
                    "Credential rotated"
                );
            }
            RefreshOutcome::NoExpiry => {
                self.db.clear_channel_expiry(&channel.id).await?;
                debug!(
                    channel_id = %channel.id,
                    platform = %channel.platform,
                    "Credential does not expire; leaving refresh window"
                );
            }
        }

        self.db
            .record_refresh_attempt(&channel.id, &channel.platform, true, None, now)
            .await?;

        Ok(outcome)
    }
}

/// Renews expiring channel credentials on its own timer, independent of the
/// publish scheduler.
pub struct TokenRefreshScheduler {
    ctx: RefreshContext,
    interval: Duration,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TokenRefreshScheduler {
    pub fn new(
        db: Database,
        vault: Arc<CredentialVault>,
        registry: Arc<AdapterRegistry>,
        interval: Duration,
        lookahead_secs: i64,
        inter_call_delay: Duration,
    ) -> Self {
        Self {
            ctx: RefreshContext {
                db,
                vault,
                registry,
                clock: Arc::new(SystemClock),
                lookahead_secs,
                inter_call_delay,
                tick_lock: Arc::new(tokio::sync::Mutex::new(())),
            },
            interval,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.ctx.clock = clock;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the interval loop. Idempotent.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        info!(
            interval_secs = self.interval.as_secs(),
            lookahead_secs = self.ctx.lookahead_secs,
            "Token refresh scheduler starting"
        );

        let ctx = self.ctx.clone();
        let running = Arc::clone(&self.running);
        let interval_duration = self.interval;

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(interval_duration);
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
        info!("Token refresh scheduler stopped");
    }

    /// Run one refresh pass directly, without the timer.
    pub async fn tick(&self) -> RefreshReport {
        self.ctx.tick().await
    }

    /// Manual path: renew every active channel with an expiry set, the
    /// already-expired ones included. This is the only way an expired
    /// credential recovers without re-connecting the channel.
    pub async fn refresh_all(&self) -> Result<RefreshReport> {
        let now = self.ctx.clock.now();
        let channels = self.ctx.db.channels_with_expiry().await?;
        info!(count = channels.len(), "Manual refresh of all expiring channels");
        Ok(self.ctx.refresh_channels(&channels, now).await)
    }
}

impl Drop for TokenRefreshScheduler {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.lock().unwrap().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::mock::{MockAdapter, RefreshScript};
    use crate::scheduler::ManualClock;
    use tempfile::TempDir;

    const DAY: i64 = 86_400;

    async fn setup(
        adapter: Arc<MockAdapter>,
        now: i64,
    ) -> (TempDir, Database, Arc<CredentialVault>, TokenRefreshScheduler) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(db_path.to_str().unwrap()).await.unwrap();

        let vault = Arc::new(CredentialVault::new(Some("secret"), false, false).unwrap());
        let mut registry = AdapterRegistry::new();
        registry.register(adapter);

        let scheduler = TokenRefreshScheduler::new(
            db.clone(),
            vault.clone(),
            Arc::new(registry),
            Duration::from_secs(3600),
            3 * DAY,
            Duration::ZERO,
        )
        .with_clock(Arc::new(ManualClock::new(now)));

        (temp_dir, db, vault, scheduler)
    }

    async fn seed_channel(
        db: &Database,
        vault: &CredentialVault,
        platform: &str,
        expiry: Option<i64>,
    ) -> Channel {
        let mut channel = Channel::new(
            "u".to_string(),
            platform.to_string(),
            vault.seal("access-token").unwrap(),
        );
        channel.refresh_credential = Some(vault.seal("refresh-token").unwrap());
        channel.credential_expiry = expiry;
        db.create_channel(&channel).await.unwrap();
        channel
    }

    #[tokio::test]
    async fn test_tick_rotates_channel_inside_window() {
        let adapter = Arc::new(MockAdapter::with_refresh(
            "facegram",
            RefreshScript::Rotate { lifetime: 60 * DAY },
        ));
        let now = 1_000_000;
        let (_tmp, db, vault, scheduler) = setup(adapter.clone(), now).await;

        let channel = seed_channel(&db, &vault, "facegram", Some(now + 2 * DAY)).await;

        let report = scheduler.tick().await;
        assert_eq!(report.attempted, 1);
        assert_eq!(report.rotated, 1);
        assert_eq!(adapter.refresh_call_count(), 1);

        let loaded = db.get_channel(&channel.id).await.unwrap().unwrap();
        assert_eq!(loaded.credential_expiry, Some(now + 2 * DAY + 60 * DAY));
        // Stored credentials are re-encrypted envelopes around the rotated values
        assert!(loaded.access_credential.starts_with("v1:"));
        assert_eq!(vault.open(&loaded.access_credential).unwrap(), "access-token-rotated");
        assert_eq!(
            vault.open(loaded.refresh_credential.as_deref().unwrap()).unwrap(),
            "refresh-token-rotated"
        );
    }

    #[tokio::test]
    async fn test_tick_window_boundaries() {
        let adapter = Arc::new(MockAdapter::with_refresh(
            "facegram",
            RefreshScript::Rotate { lifetime: 60 * DAY },
        ));
        let now = 1_000_000;
        let (_tmp, db, vault, scheduler) = setup(adapter.clone(), now).await;

        seed_channel(&db, &vault, "facegram", Some(now - DAY)).await; // expired
        seed_channel(&db, &vault, "facegram", Some(now + 10 * DAY)).await; // distant

        let report = scheduler.tick().await;
        assert_eq!(report.attempted, 0);
        assert_eq!(adapter.refresh_call_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_leaves_channel_unchanged_and_audits() {
        let adapter = Arc::new(MockAdapter::with_refresh(
            "facegram",
            RefreshScript::Fail("invalid_grant".to_string()),
        ));
        let now = 1_000_000;
        let (_tmp, db, vault, scheduler) = setup(adapter.clone(), now).await;

        let channel = seed_channel(&db, &vault, "facegram", Some(now + DAY)).await;

        let report = scheduler.tick().await;
        assert_eq!(report.failed, 1);

        let loaded = db.get_channel(&channel.id).await.unwrap().unwrap();
        assert_eq!(loaded.access_credential, channel.access_credential);
        assert_eq!(loaded.credential_expiry, channel.credential_expiry);
        assert_eq!(db.refresh_failures(&channel.id).await.unwrap(), 1);

        // Still inside the window, the next tick retries
        let report = scheduler.tick().await;
        assert_eq!(report.failed, 1);
        assert_eq!(db.refresh_failures(&channel.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_no_expiry_outcome_clears_window() {
        let adapter = Arc::new(MockAdapter::with_refresh("relaybot", RefreshScript::NoExpiry));
        let now = 1_000_000;
        let (_tmp, db, vault, scheduler) = setup(adapter.clone(), now).await;

        let channel = seed_channel(&db, &vault, "relaybot", Some(now + DAY)).await;

        let report = scheduler.tick().await;
        assert_eq!(report.no_expiry, 1);

        let loaded = db.get_channel(&channel.id).await.unwrap().unwrap();
        assert_eq!(loaded.credential_expiry, None);

        // Out of the window for good
        let report = scheduler.tick().await;
        assert_eq!(report.attempted, 0);
    }

    #[tokio::test]
    async fn test_refresh_all_includes_expired() {
        let adapter = Arc::new(MockAdapter::with_refresh(
            "facegram",
            RefreshScript::Rotate { lifetime: 60 * DAY },
        ));
        let now = 1_000_000;
        let (_tmp, db, vault, scheduler) = setup(adapter.clone(), now).await;

        let expired = seed_channel(&db, &vault, "facegram", Some(now - DAY)).await;
        seed_channel(&db, &vault, "facegram", Some(now + DAY)).await;

        let report = scheduler.refresh_all().await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.rotated, 2);

        let loaded = db.get_channel(&expired.id).await.unwrap().unwrap();
        assert_eq!(loaded.credential_expiry, Some(now - DAY + 60 * DAY));
    }

    #[tokio::test]
    async fn test_unregistered_platform_counts_as_failure() {
        let adapter = Arc::new(MockAdapter::success("facegram"));
        let now = 1_000_000;
        let (_tmp, db, vault, scheduler) = setup(adapter, now).await;

        let channel = seed_channel(&db, &vault, "unknown-platform", Some(now + DAY)).await;

        let report = scheduler.tick().await;
        assert_eq!(report.failed, 1);
        assert_eq!(db.refresh_failures(&channel.id).await.unwrap(), 1);
    }
}
