//! Core types for Crosspub

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of content targeted at one or more social platforms.
///
/// List-valued fields (`platforms`, `selected_channel_ids`, `media_urls`) are
/// stored as JSON-encoded TEXT columns; `metadata` is an open JSON object for
/// platform-specific extras.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub user_id: String,
    pub title: Option<String>,
    pub content: String,
    pub post_type: PostType,
    pub platforms: Vec<String>,
    pub selected_channel_ids: Vec<String>,
    pub media_urls: Vec<String>,
    pub status: PostStatus,
    pub scheduled_at: Option<i64>,
    pub claimed_at: Option<i64>,
    pub created_at: i64,
    pub metadata: Option<String>,
}

impl Post {
    pub fn new(user_id: String, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            title: None,
            content,
            post_type: PostType::Text,
            platforms: Vec::new(),
            selected_channel_ids: Vec::new(),
            media_urls: Vec::new(),
            status: PostStatus::Draft,
            scheduled_at: None,
            claimed_at: None,
            created_at: chrono::Utc::now().timestamp(),
            metadata: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PostStatus {
    Draft,
    Scheduled,
    Published,
    Partial,
    Failed,
    Cancelled,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Scheduled => "scheduled",
            Self::Published => "published",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "scheduled" => Some(Self::Scheduled),
            "published" => Some(Self::Published),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states are never left once entered.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Published | Self::Partial | Self::Failed | Self::Cancelled
        )
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The shape of a post, which determines its media preconditions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PostType {
    Text,
    Photo,
    Video,
    Reel,
    Carousel,
    Album,
    Thread,
    Story,
}

impl PostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Photo => "photo",
            Self::Video => "video",
            Self::Reel => "reel",
            Self::Carousel => "carousel",
            Self::Album => "album",
            Self::Thread => "thread",
            Self::Story => "story",
        }
    }

    /// Parse a stored post type, falling back to `Text` for unknown values.
    pub fn parse(s: &str) -> Self {
        match s {
            "photo" => Self::Photo,
            "video" => Self::Video,
            "reel" => Self::Reel,
            "carousel" => Self::Carousel,
            "album" => Self::Album,
            "thread" => Self::Thread,
            "story" => Self::Story,
            _ => Self::Text,
        }
    }
}

impl std::fmt::Display for PostType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A connected account/credential on one platform belonging to one user.
///
/// Credential fields hold vault envelopes, never plaintext (outside explicitly
/// disabled-vault deployments). `credential_expiry` drives the refresh
/// scheduler's selection window; NULL means the credential does not expire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub user_id: String,
    pub platform: String,
    pub display_name: Option<String>,
    pub access_credential: String,
    pub refresh_credential: Option<String>,
    pub credential_expiry: Option<i64>,
    pub metadata: Option<String>,
    pub is_active: bool,
    pub created_at: i64,
}

impl Channel {
    pub fn new(user_id: String, platform: String, access_credential: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_id,
            platform,
            display_name: None,
            access_credential,
            refresh_credential: None,
            credential_expiry: None,
            metadata: None,
            is_active: true,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// The outcome record of one dispatch attempt for one (post, channel) pair.
///
/// Append-only: one row per attempted pair, never-attempted channels produce
/// no row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishResult {
    pub id: Option<i64>,
    pub post_id: String,
    pub channel_id: String,
    pub platform: String,
    pub success: bool,
    pub external_id: Option<String>,
    pub external_url: Option<String>,
    pub error_message: Option<String>,
    pub published_at: Option<i64>,
}

impl PublishResult {
    /// Build a success row from a provider-confirmed publish.
    pub fn success(
        post_id: String,
        channel_id: String,
        platform: String,
        external_id: String,
        external_url: Option<String>,
        published_at: i64,
    ) -> Self {
        Self {
            id: None,
            post_id,
            channel_id,
            platform,
            success: true,
            external_id: Some(external_id),
            external_url,
            error_message: None,
            published_at: Some(published_at),
        }
    }

    /// Build a failure row carrying the error message.
    pub fn failure(
        post_id: String,
        channel_id: String,
        platform: String,
        error_message: String,
    ) -> Self {
        Self {
            id: None,
            post_id,
            channel_id,
            platform,
            success: false,
            external_id: None,
            external_url: None,
            error_message: Some(error_message),
            published_at: None,
        }
    }
}

/// Coarse media classification derived from a URL, used for post-type
/// precondition checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Video,
    Other,
}

impl MediaKind {
    /// Classify a media URL by its file extension (query string ignored).
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        let ext = match path.rsplit_once('.') {
            Some((_, ext)) => ext.to_lowercase(),
            None => return Self::Other,
        };
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "gif" | "webp" => Self::Image,
            "mp4" | "mov" | "m4v" | "webm" | "avi" | "mkv" => Self::Video,
            _ => Self::Other,
        }
    }
}
