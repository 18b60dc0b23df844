//! Media retention: deferred post-success cleanup and the orphan sweep
//!
//! A post that reaches `published` gets a durable cleanup job (post id +
//! due time); the publish poll drains due jobs, so a process restart resumes
//! pending cleanups instead of losing them. Cleanup is all-or-nothing: any
//! failed result row retains the media for manual retry or inspection.

use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::db::Database;
use crate::media::{object_name, MediaStore};
use crate::error::Result;

/// Metadata key stamped on a post after its media has been cleaned up,
/// preventing redundant future work.
pub const CLEANED_AT_KEY: &str = "media_cleaned_at";

/// What a cleanup run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Deleted this many media objects and their catalog rows
    Cleaned(usize),
    /// At least one result row is failed (or none exist); media retained
    Retained,
    /// The post already carries the cleanup stamp
    AlreadyCleaned,
    /// The post no longer exists
    Missing,
}

pub struct MediaRetentionManager {
    db: Database,
    store: Arc<dyn MediaStore>,
    cleanup_delay: i64,
}

impl MediaRetentionManager {
    pub fn new(db: Database, store: Arc<dyn MediaStore>, cleanup_delay: i64) -> Self {
        Self {
            db,
            store,
            cleanup_delay,
        }
    }

    /// Enqueue the deferred cleanup for a post. Idempotent on the post id.
    pub async fn schedule_cleanup(&self, post_id: &str, now: i64) -> Result<()> {
        self.db
            .enqueue_cleanup(post_id, now + self.cleanup_delay, now)
            .await?;
        debug!(post_id = %post_id, delay = self.cleanup_delay, "Media cleanup enqueued");
        Ok(())
    }

    /// Drain every cleanup job that has come due. Jobs are consumed whatever
    /// their outcome: a retained post keeps its media until someone retries
    /// and republishes, which enqueues a fresh job.
    pub async fn process_due_jobs(&self, now: i64) -> Result<usize> {
        let due = self.db.due_cleanup_jobs(now).await?;
        let count = due.len();

        for post_id in due {
            match self.run_cleanup(&post_id).await {
                Ok(CleanupOutcome::Cleaned(n)) => {
                    info!(post_id = %post_id, deleted = n, "Media cleanup complete");
                }
                Ok(outcome) => {
                    debug!(post_id = %post_id, ?outcome, "Media cleanup was a no-op");
                }
                Err(e) => {
                    warn!(post_id = %post_id, "Media cleanup failed: {e}");
                }
            }
            self.db.delete_cleanup_job(&post_id).await?;
        }

        Ok(count)
    }

    /// Re-evaluate a post and delete its media when, and only when, every
    /// attempted result is a success.
    pub async fn run_cleanup(&self, post_id: &str) -> Result<CleanupOutcome> {
        let post = match self.db.get_post(post_id).await? {
            Some(post) => post,
            None => return Ok(CleanupOutcome::Missing),
        };

        if metadata_has_stamp(post.metadata.as_deref()) {
            return Ok(CleanupOutcome::AlreadyCleaned);
        }

        let results = self.db.get_publish_results(post_id).await?;
        if results.is_empty() || results.iter().any(|r| !r.success) {
            return Ok(CleanupOutcome::Retained);
        }

        let mut deleted = 0;
        for url in &post.media_urls {
            match self.store.delete(url).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    // Leave the object for the orphan sweep
                    warn!(url = %url, "Could not delete media object: {e}");
                }
            }
        }

        self.db.remove_catalog_for_post(post_id).await?;

        let stamped = stamp_metadata(post.metadata.as_deref(), chrono::Utc::now().timestamp());
        self.db.update_post_metadata(post_id, &stamped).await?;

        Ok(CleanupOutcome::Cleaned(deleted))
    }

    /// Delete stored objects that no catalog row references. Never touches a
    /// catalog-referenced object, whatever the owning post's status.
    pub async fn orphan_sweep(&self) -> Result<usize> {
        let referenced: HashSet<String> = self
            .db
            .all_catalog_urls()
            .await?
            .iter()
            .map(|url| object_name(url).to_string())
            .collect();

        let mut removed = 0;
        for name in self.store.list().await? {
            if referenced.contains(&name) {
                continue;
            }
            match self.store.delete(&name).await {
                Ok(()) => {
                    removed += 1;
                    debug!(object = %name, "Removed orphaned media object");
                }
                Err(e) => warn!(object = %name, "Could not remove orphaned object: {e}"),
            }
        }

        if removed > 0 {
            info!(removed, "Orphan sweep complete");
        }
        Ok(removed)
    }
}

fn metadata_has_stamp(metadata: Option<&str>) -> bool {
    metadata
        .and_then(|m| serde_json::from_str::<serde_json::Value>(m).ok())
        .map(|v| v.get(CLEANED_AT_KEY).is_some())
        .unwrap_or(false)
}

fn stamp_metadata(metadata: Option<&str>, now: i64) -> String {
    let mut value = metadata
        .and_then(|m| serde_json::from_str::<serde_json::Value>(m).ok())
        .unwrap_or_else(|| serde_json::json!({}));

    if let Some(map) = value.as_object_mut() {
        map.insert(CLEANED_AT_KEY.to_string(), serde_json::json!(now));
    } else {
        value = serde_json::json!({ CLEANED_AT_KEY: now });
    }

    value.to_string()
}
