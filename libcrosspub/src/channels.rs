//! Channel resolution: which connected accounts a post targets

use tracing::debug;

use crate::db::Database;
use crate::error::Result;
use crate::types::{Channel, Post};

/// Computes the set of target channels for a post.
pub struct ChannelResolver {
    db: Database,
}

impl ChannelResolver {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Resolve a post's target channels.
    ///
    /// With an explicit `selected_channel_ids` list, exactly those channels
    /// are resolved, filtered to the owning user's active channels; ids that
    /// do not resolve are silently dropped and request order is preserved.
    ///
    /// With an empty selection, each platform in `platforms` falls back to
    /// the user's first active channel on that platform in creation order,
    /// at most one channel per platform. Multiple channels on the same
    /// platform are only reachable through an explicit selection.
    pub async fn resolve(&self, post: &Post) -> Result<Vec<Channel>> {
        if !post.selected_channel_ids.is_empty() {
            let mut channels = Vec::new();
            for channel_id in &post.selected_channel_ids {
                match self.db.get_channel(channel_id).await? {
                    Some(channel) if channel.is_active && channel.user_id == post.user_id => {
                        channels.push(channel);
                    }
                    _ => {
                        debug!(
                            post_id = %post.id,
                            channel_id = %channel_id,
                            "Dropping unresolvable channel selection"
                        );
                    }
                }
            }
            return Ok(channels);
        }

        let mut channels = Vec::new();
        for platform in &post.platforms {
            if let Some(channel) = self.db.first_active_channel(&post.user_id, platform).await? {
                channels.push(channel);
            } else {
                debug!(
                    post_id = %post.id,
                    platform = %platform,
                    "No active channel for platform"
                );
            }
        }

        Ok(channels)
    }
}
