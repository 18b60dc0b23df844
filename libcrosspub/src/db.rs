//! Database operations for Crosspub

use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::path::Path;

use crate::error::Result;
use crate::types::{Channel, Post, PostStatus, PostType, PublishResult};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn encode_list(list: &[String]) -> String {
    serde_json::to_string(list).unwrap_or_else(|_| "[]".to_string())
}

fn decode_list(raw: &str) -> Vec<String> {
    serde_json::from_str(raw).unwrap_or_default()
}

fn post_from_row(r: &sqlx::sqlite::SqliteRow) -> Post {
    Post {
        id: r.get("id"),
        user_id: r.get("user_id"),
        title: r.get("title"),
        content: r.get("content"),
        post_type: PostType::parse(&r.get::<String, _>("post_type")),
        platforms: decode_list(&r.get::<String, _>("platforms")),
        selected_channel_ids: decode_list(&r.get::<String, _>("selected_channel_ids")),
        media_urls: decode_list(&r.get::<String, _>("media_urls")),
        status: PostStatus::parse(&r.get::<String, _>("status")).unwrap_or(PostStatus::Draft),
        scheduled_at: r.get("scheduled_at"),
        claimed_at: r.get("claimed_at"),
        created_at: r.get("created_at"),
        metadata: r.get("metadata"),
    }
}

fn channel_from_row(r: &sqlx::sqlite::SqliteRow) -> Channel {
    Channel {
        id: r.get("id"),
        user_id: r.get("user_id"),
        platform: r.get("platform"),
        display_name: r.get("display_name"),
        access_credential: r.get("access_credential"),
        refresh_credential: r.get("refresh_credential"),
        credential_expiry: r.get("credential_expiry"),
        metadata: r.get("metadata"),
        is_active: r.get::<i64, _>("is_active") != 0,
        created_at: r.get("created_at"),
    }
}

fn result_from_row(r: &sqlx::sqlite::SqliteRow) -> PublishResult {
    PublishResult {
        id: r.get("id"),
        post_id: r.get("post_id"),
        channel_id: r.get("channel_id"),
        platform: r.get("platform"),
        success: r.get::<i64, _>("success") != 0,
        external_id: r.get("external_id"),
        external_url: r.get("external_url"),
        error_message: r.get("error_message"),
        published_at: r.get("published_at"),
    }
}

impl Database {
    /// Create a new database connection
    pub async fn new(db_path: &str) -> Result<Self> {
        // Expand path and create parent directories
        let expanded_path = shellexpand::tilde(db_path).to_string();
        let path = Path::new(&expanded_path);

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(crate::error::DbError::IoError)?;
        }

        // Use mode=rwc to allow creating the database file if it doesn't exist
        let db_url = format!("sqlite://{}?mode=rwc", expanded_path.replace('\\', "/"));

        let pool = SqlitePool::connect(&db_url)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(crate::error::DbError::MigrationError)?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Posts
    // ------------------------------------------------------------------

    pub async fn create_post(&self, post: &Post) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO posts (id, user_id, title, content, post_type, platforms,
                               selected_channel_ids, media_urls, status, scheduled_at,
                               claimed_at, created_at, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&post.id)
        .bind(&post.user_id)
        .bind(&post.title)
        .bind(&post.content)
        .bind(post.post_type.as_str())
        .bind(encode_list(&post.platforms))
        .bind(encode_list(&post.selected_channel_ids))
        .bind(encode_list(&post.media_urls))
        .bind(post.status.as_str())
        .bind(post.scheduled_at)
        .bind(post.claimed_at)
        .bind(post.created_at)
        .bind(&post.metadata)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_post(&self, post_id: &str) -> Result<Option<Post>> {
        let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.map(|r| post_from_row(&r)))
    }

    pub async fn update_post_status(&self, post_id: &str, status: PostStatus) -> Result<()> {
        sqlx::query("UPDATE posts SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    pub async fn update_post_metadata(&self, post_id: &str, metadata: &str) -> Result<()> {
        sqlx::query("UPDATE posts SET metadata = ? WHERE id = ?")
            .bind(metadata)
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Posts due for dispatch: scheduled, past their scheduled time, oldest
    /// first.
    pub async fn fetch_due_posts(&self, now: i64, limit: i64) -> Result<Vec<Post>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM posts
            WHERE status = 'scheduled' AND scheduled_at IS NOT NULL AND scheduled_at <= ?
            ORDER BY scheduled_at ASC
            LIMIT ?
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows.iter().map(post_from_row).collect())
    }

    /// Conditionally claim a post for dispatch. Returns false when the post
    /// was already claimed or has left a claimable state, which makes a
    /// concurrent dispatcher skip it instead of double-publishing.
    pub async fn claim_post(&self, post_id: &str, now: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET claimed_at = ?
            WHERE id = ? AND claimed_at IS NULL AND status IN ('draft', 'scheduled')
            "#,
        )
        .bind(now)
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    /// Cancel a scheduled post. Only possible before the scheduler claims it.
    pub async fn cancel_post(&self, post_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE posts SET status = 'cancelled'
            WHERE id = ? AND status = 'scheduled' AND claimed_at IS NULL
            "#,
        )
        .bind(post_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(result.rows_affected() == 1)
    }

    // ------------------------------------------------------------------
    // Channels
    // ------------------------------------------------------------------

    pub async fn create_channel(&self, channel: &Channel) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO channels (id, user_id, platform, display_name, access_credential,
                                  refresh_credential, credential_expiry, metadata,
                                  is_active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&channel.id)
        .bind(&channel.user_id)
        .bind(&channel.platform)
        .bind(&channel.display_name)
        .bind(&channel.access_credential)
        .bind(&channel.refresh_credential)
        .bind(channel.credential_expiry)
        .bind(&channel.metadata)
        .bind(if channel.is_active { 1 } else { 0 })
        .bind(channel.created_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_channel(&self, channel_id: &str) -> Result<Option<Channel>> {
        let row = sqlx::query("SELECT * FROM channels WHERE id = ?")
            .bind(channel_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.map(|r| channel_from_row(&r)))
    }

    /// The oldest active channel a user has on a platform. Creation order is
    /// the documented tie-break when a post names platforms but no explicit
    /// channels.
    pub async fn first_active_channel(
        &self,
        user_id: &str,
        platform: &str,
    ) -> Result<Option<Channel>> {
        let row = sqlx::query(
            r#"
            SELECT * FROM channels
            WHERE user_id = ? AND platform = ? AND is_active = 1
            ORDER BY created_at ASC, id ASC
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(platform)
        .fetch_optional(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.map(|r| channel_from_row(&r)))
    }

    /// Persist rotated credentials. A missing refresh credential keeps the
    /// stored one (OAuth2 providers may omit it on rotation).
    pub async fn update_channel_credential(
        &self,
        channel_id: &str,
        access_credential: &str,
        refresh_credential: Option<&str>,
        credential_expiry: Option<i64>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE channels
            SET access_credential = ?,
                refresh_credential = COALESCE(?, refresh_credential),
                credential_expiry = ?
            WHERE id = ?
            "#,
        )
        .bind(access_credential)
        .bind(refresh_credential)
        .bind(credential_expiry)
        .bind(channel_id)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Mark a channel's credential as non-expiring so the refresh window no
    /// longer selects it.
    pub async fn clear_channel_expiry(&self, channel_id: &str) -> Result<()> {
        sqlx::query("UPDATE channels SET credential_expiry = NULL WHERE id = ?")
            .bind(channel_id)
            .execute(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    /// Channels inside the proactive refresh window: active, expiring within
    /// the horizon, but not yet expired. Already-expired credentials are only
    /// reachable through the manual refresh-all path.
    pub async fn channels_due_for_refresh(&self, now: i64, horizon: i64) -> Result<Vec<Channel>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM channels
            WHERE is_active = 1
              AND credential_expiry IS NOT NULL
              AND credential_expiry > ?
              AND credential_expiry <= ?
            ORDER BY credential_expiry ASC
            "#,
        )
        .bind(now)
        .bind(horizon)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows.iter().map(channel_from_row).collect())
    }

    /// Every active channel with an expiring credential, including already
    /// expired ones. Backs the manual refresh-all path.
    pub async fn channels_with_expiry(&self) -> Result<Vec<Channel>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM channels
            WHERE is_active = 1 AND credential_expiry IS NOT NULL
            ORDER BY credential_expiry ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows.iter().map(channel_from_row).collect())
    }

    // ------------------------------------------------------------------
    // Publish results
    // ------------------------------------------------------------------

    pub async fn create_publish_result(&self, result: &PublishResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO publish_results (post_id, channel_id, platform, success,
                                         external_id, external_url, error_message, published_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&result.post_id)
        .bind(&result.channel_id)
        .bind(&result.platform)
        .bind(if result.success { 1 } else { 0 })
        .bind(&result.external_id)
        .bind(&result.external_url)
        .bind(&result.error_message)
        .bind(result.published_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    pub async fn get_publish_results(&self, post_id: &str) -> Result<Vec<PublishResult>> {
        let rows = sqlx::query(
            "SELECT * FROM publish_results WHERE post_id = ? ORDER BY id ASC",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows.iter().map(result_from_row).collect())
    }

    // ------------------------------------------------------------------
    // Media catalog
    // ------------------------------------------------------------------

    pub async fn catalog_media(&self, post_id: &str, urls: &[String], now: i64) -> Result<()> {
        for url in urls {
            sqlx::query(
                "INSERT OR IGNORE INTO media_catalog (post_id, url, created_at) VALUES (?, ?, ?)",
            )
            .bind(post_id)
            .bind(url)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;
        }

        Ok(())
    }

    pub async fn remove_catalog_for_post(&self, post_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM media_catalog WHERE post_id = ?")
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    pub async fn all_catalog_urls(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT url FROM media_catalog")
            .fetch_all(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows.iter().map(|r| r.get("url")).collect())
    }

    // ------------------------------------------------------------------
    // Cleanup jobs
    // ------------------------------------------------------------------

    /// Enqueue a deferred cleanup. The post id is the idempotency key, so a
    /// re-dispatch never produces a second job.
    pub async fn enqueue_cleanup(&self, post_id: &str, due_at: i64, now: i64) -> Result<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO cleanup_jobs (post_id, due_at, created_at) VALUES (?, ?, ?)",
        )
        .bind(post_id)
        .bind(due_at)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    pub async fn due_cleanup_jobs(&self, now: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT post_id FROM cleanup_jobs WHERE due_at <= ? ORDER BY due_at ASC",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(rows.iter().map(|r| r.get("post_id")).collect())
    }

    pub async fn delete_cleanup_job(&self, post_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM cleanup_jobs WHERE post_id = ?")
            .bind(post_id)
            .execute(&self.pool)
            .await
            .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Refresh audit
    // ------------------------------------------------------------------

    pub async fn record_refresh_attempt(
        &self,
        channel_id: &str,
        platform: &str,
        success: bool,
        error_message: Option<&str>,
        attempted_at: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_audit (channel_id, platform, success, error_message, attempted_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(channel_id)
        .bind(platform)
        .bind(if success { 1 } else { 0 })
        .bind(error_message)
        .bind(attempted_at)
        .execute(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(())
    }

    pub async fn refresh_failures(&self, channel_id: &str) -> Result<i64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM refresh_audit WHERE channel_id = ? AND success = 0",
        )
        .bind(channel_id)
        .fetch_one(&self.pool)
        .await
        .map_err(crate::error::DbError::SqlxError)?;

        Ok(row.get("n"))
    }
}
