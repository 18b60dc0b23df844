//! Publish dispatch: per-channel adapter calls and status aggregation
//!
//! The dispatcher is shared by the scheduler loop and the on-demand publish
//! path; both run the exact same dispatch-and-aggregate cycle. Channels are
//! dispatched sequentially, never in parallel: that bounds the per-user
//! request rate against every provider at once and keeps result ordering
//! deterministic.

use std::sync::Arc;
use tracing::{info, warn};

use crate::adapters::{AdapterRegistry, PublishRequest};
use crate::aggregate::aggregate_status;
use crate::channels::ChannelResolver;
use crate::db::Database;
use crate::error::{AdapterError, CrosspubError, Result};
use crate::retention::MediaRetentionManager;
use crate::scheduler::{Clock, SystemClock};
use crate::types::{Channel, MediaKind, Post, PostStatus, PostType, PublishResult};
use crate::vault::CredentialVault;

/// Outcome of one full dispatch cycle for one post.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DispatchSummary {
    pub post_id: String,
    pub status: PostStatus,
    pub results: Vec<PublishResult>,
}

pub struct PublishDispatcher {
    db: Database,
    vault: Arc<CredentialVault>,
    registry: Arc<AdapterRegistry>,
    resolver: ChannelResolver,
    retention: Option<Arc<MediaRetentionManager>>,
    clock: Arc<dyn Clock>,
}

impl PublishDispatcher {
    pub fn new(db: Database, vault: Arc<CredentialVault>, registry: Arc<AdapterRegistry>) -> Self {
        let resolver = ChannelResolver::new(db.clone());
        Self {
            db,
            vault,
            registry,
            resolver,
            retention: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Wire in the retention manager so successful publishes enqueue their
    /// deferred media cleanup.
    pub fn with_retention(mut self, retention: Arc<MediaRetentionManager>) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// On-demand publish of a single post, bypassing the timer but running
    /// the same dispatch-and-aggregate cycle the scheduler uses.
    pub async fn publish_now(&self, post_id: &str) -> Result<DispatchSummary> {
        let post = self
            .db
            .get_post(post_id)
            .await?
            .ok_or_else(|| CrosspubError::InvalidInput(format!("Post not found: {post_id}")))?;

        if post.status.is_terminal() {
            return Err(CrosspubError::InvalidInput(format!(
                "Post {post_id} is already {} and cannot be re-dispatched",
                post.status
            )));
        }

        if !self.db.claim_post(post_id, self.clock.now()).await? {
            return Err(CrosspubError::InvalidInput(format!(
                "Post {post_id} was already claimed by another dispatch"
            )));
        }

        self.dispatch(&post).await
    }

    /// Run one dispatch-and-aggregate cycle for an already-claimed post.
    ///
    /// Per-channel failures are isolated into failed result rows; an `Err`
    /// from this method means the store itself failed mid-cycle.
    pub async fn dispatch(&self, post: &Post) -> Result<DispatchSummary> {
        if post.status.is_terminal() {
            return Err(CrosspubError::InvalidInput(format!(
                "Post {} is already {} and cannot be re-dispatched",
                post.id, post.status
            )));
        }

        let now = self.clock.now();
        let channels = self.resolver.resolve(post).await?;

        if channels.is_empty() {
            warn!(post_id = %post.id, "No channels resolved; marking post failed");
            self.db.update_post_status(&post.id, PostStatus::Failed).await?;
            return Ok(DispatchSummary {
                post_id: post.id.clone(),
                status: PostStatus::Failed,
                results: Vec::new(),
            });
        }

        let mut results = Vec::with_capacity(channels.len());
        for channel in &channels {
            let result = self.publish_to_channel(post, channel, now).await;
            self.db.create_publish_result(&result).await?;
            results.push(result);
        }

        let status = aggregate_status(&results);
        self.db.update_post_status(&post.id, status).await?;

        let successes = results.iter().filter(|r| r.success).count();
        info!(
            post_id = %post.id,
            status = %status,
            successes,
            failures = results.len() - successes,
            "Dispatch complete"
        );

        if status == PostStatus::Published && !post.media_urls.is_empty() {
            if let Some(retention) = &self.retention {
                if let Err(e) = retention.schedule_cleanup(&post.id, now).await {
                    warn!(post_id = %post.id, "Failed to enqueue media cleanup: {e}");
                }
            }
        }

        Ok(DispatchSummary {
            post_id: post.id.clone(),
            status,
            results,
        })
    }

    /// One channel attempt: open the credential, check preconditions, call
    /// the adapter, normalize the outcome into a result row.
    async fn publish_to_channel(&self, post: &Post, channel: &Channel, now: i64) -> PublishResult {
        let credential = match self.vault.open(&channel.access_credential) {
            Ok(credential) => credential,
            Err(e) => {
                warn!(channel_id = %channel.id, "Cannot open channel credential: {e}");
                return PublishResult::failure(
                    post.id.clone(),
                    channel.id.clone(),
                    channel.platform.clone(),
                    format!("credential unavailable: {e}"),
                );
            }
        };

        if let Err(message) = check_preconditions(post) {
            return PublishResult::failure(
                post.id.clone(),
                channel.id.clone(),
                channel.platform.clone(),
                AdapterError::Precondition(message).to_string(),
            );
        }

        let adapter = match self.registry.get(&channel.platform) {
            Some(adapter) => adapter,
            None => {
                return PublishResult::failure(
                    post.id.clone(),
                    channel.id.clone(),
                    channel.platform.clone(),
                    AdapterError::NotRegistered(channel.platform.clone()).to_string(),
                )
            }
        };

        if !adapter.supports(post.post_type) {
            return PublishResult::failure(
                post.id.clone(),
                channel.id.clone(),
                channel.platform.clone(),
                AdapterError::Precondition(format!(
                    "post type {} is not supported on {}",
                    post.post_type, channel.platform
                ))
                .to_string(),
            );
        }

        let request = PublishRequest {
            post,
            channel,
            credential: &credential,
            channel_metadata: channel.metadata.as_deref(),
        };

        match adapter.publish(request).await {
            Ok(outcome) => {
                info!(
                    post_id = %post.id,
                    channel_id = %channel.id,
                    platform = %channel.platform,
                    external_id = %outcome.external_id,
                    "Published"
                );
                PublishResult::success(
                    post.id.clone(),
                    channel.id.clone(),
                    channel.platform.clone(),
                    outcome.external_id,
                    outcome.url,
                    now,
                )
            }
            Err(e) => {
                warn!(
                    post_id = %post.id,
                    channel_id = %channel.id,
                    platform = %channel.platform,
                    "Publish failed: {e}"
                );
                PublishResult::failure(
                    post.id.clone(),
                    channel.id.clone(),
                    channel.platform.clone(),
                    e.to_string(),
                )
            }
        }
    }
}

/// Validate a post's media against its post type. Violations fail fast
/// before any adapter call is made.
fn check_preconditions(post: &Post) -> std::result::Result<(), String> {
    let kinds: Vec<MediaKind> = post.media_urls.iter().map(|u| MediaKind::from_url(u)).collect();
    let images = kinds.iter().filter(|k| **k == MediaKind::Image).count();
    let videos = kinds.iter().filter(|k| **k == MediaKind::Video).count();

    match post.post_type {
        PostType::Text | PostType::Thread => {
            if post.content.trim().is_empty() && post.media_urls.is_empty() {
                Err(format!("{} post has no content", post.post_type))
            } else {
                Ok(())
            }
        }
        PostType::Photo => {
            if images >= 1 {
                Ok(())
            } else {
                Err("photo post requires at least one image attachment".to_string())
            }
        }
        PostType::Video => {
            if videos >= 1 {
                Ok(())
            } else {
                Err("video post requires a video attachment".to_string())
            }
        }
        PostType::Reel => {
            if videos >= 1 {
                Ok(())
            } else {
                Err("reel requires a video attachment".to_string())
            }
        }
        PostType::Story => {
            if images + videos >= 1 {
                Ok(())
            } else {
                Err("story requires an image or video attachment".to_string())
            }
        }
        PostType::Carousel => {
            if images >= 2 {
                Ok(())
            } else {
                Err("carousel requires at least two image attachments".to_string())
            }
        }
        PostType::Album => {
            if images + videos >= 2 {
                Ok(())
            } else {
                Err("album requires at least two attachments".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post_with(post_type: PostType, content: &str, media: &[&str]) -> Post {
        let mut post = Post::new("u".to_string(), content.to_string());
        post.post_type = post_type;
        post.media_urls = media.iter().map(|s| s.to_string()).collect();
        post
    }

    #[test]
    fn test_text_requires_content() {
        assert!(check_preconditions(&post_with(PostType::Text, "hi", &[])).is_ok());
        assert!(check_preconditions(&post_with(PostType::Text, "  ", &[])).is_err());
        assert!(check_preconditions(&post_with(PostType::Thread, "", &[])).is_err());
    }

    #[test]
    fn test_photo_requires_image() {
        assert!(check_preconditions(&post_with(PostType::Photo, "", &["a.jpg"])).is_ok());
        assert!(check_preconditions(&post_with(PostType::Photo, "", &["clip.mp4"])).is_err());
        assert!(check_preconditions(&post_with(PostType::Photo, "caption", &[])).is_err());
    }

    #[test]
    fn test_reel_requires_video() {
        assert!(check_preconditions(&post_with(PostType::Reel, "", &["clip.mp4"])).is_ok());
        let err = check_preconditions(&post_with(PostType::Reel, "", &["a.jpg"])).unwrap_err();
        assert!(err.contains("video"));
        assert!(check_preconditions(&post_with(PostType::Reel, "caption", &[])).is_err());
    }

    #[test]
    fn test_video_requires_video() {
        assert!(check_preconditions(&post_with(PostType::Video, "", &["clip.webm"])).is_ok());
        assert!(check_preconditions(&post_with(PostType::Video, "", &[])).is_err());
    }

    #[test]
    fn test_story_takes_either() {
        assert!(check_preconditions(&post_with(PostType::Story, "", &["a.jpg"])).is_ok());
        assert!(check_preconditions(&post_with(PostType::Story, "", &["clip.mp4"])).is_ok());
        assert!(check_preconditions(&post_with(PostType::Story, "", &["doc.pdf"])).is_err());
        assert!(check_preconditions(&post_with(PostType::Story, "", &[])).is_err());
    }

    #[test]
    fn test_carousel_requires_two_images() {
        assert!(check_preconditions(&post_with(PostType::Carousel, "", &["a.jpg", "b.png"])).is_ok());
        assert!(check_preconditions(&post_with(PostType::Carousel, "", &["a.jpg"])).is_err());
        assert!(
            check_preconditions(&post_with(PostType::Carousel, "", &["a.jpg", "clip.mp4"])).is_err()
        );
    }

    #[test]
    fn test_album_requires_two_attachments() {
        assert!(check_preconditions(&post_with(PostType::Album, "", &["a.jpg", "clip.mp4"])).is_ok());
        assert!(check_preconditions(&post_with(PostType::Album, "", &["a.jpg"])).is_err());
    }
}
