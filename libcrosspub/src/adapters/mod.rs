//! Platform adapter contract and registry
//!
//! Each social platform is integrated through one [`PlatformAdapter`]
//! implementation supplied at startup. The orchestration core never branches
//! on a platform name; adding a platform is a registration, not a new arm in
//! shared logic. The concrete HTTP protocol, payload shape, and auth headers
//! live entirely inside the adapter.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::Result;
use crate::types::{Channel, Post, PostType};

pub mod mock;

/// Everything an adapter needs to publish one post to one channel.
///
/// `credential` is the decrypted channel credential; `channel_metadata`
/// carries platform-specific linkage (e.g. a parent page id) as stored on the
/// channel.
pub struct PublishRequest<'a> {
    pub post: &'a Post,
    pub channel: &'a Channel,
    pub credential: &'a str,
    pub channel_metadata: Option<&'a str>,
}

/// A provider-confirmed publish.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// The provider's post/media identifier
    pub external_id: String,
    /// Canonical URL of the published content, when the provider returns one
    pub url: Option<String>,
    /// Raw provider response for diagnostics
    pub raw: Option<serde_json::Value>,
}

/// Inputs to a credential refresh call, with both credentials decrypted.
pub struct RefreshRequest<'a> {
    pub channel: &'a Channel,
    pub access_credential: &'a str,
    pub refresh_credential: Option<&'a str>,
}

/// What a refresh call produced.
///
/// The three refresh protocol families map onto these: long-lived token
/// exchange and OAuth2 refresh grants return `Rotated`; static bot tokens
/// return `NoExpiry` so the channel leaves the refresh window for good.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Rotated {
        access_credential: String,
        refresh_credential: Option<String>,
        expires_at: Option<i64>,
    },
    NoExpiry,
}

/// The uniform capability every platform integration implements.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    /// Lowercase platform key this adapter serves (e.g. "mastodon")
    fn platform(&self) -> &str;

    /// Whether this platform can carry the given post type. Unsupported
    /// types fail the dispatch precondition without a publish call.
    fn supports(&self, _post_type: PostType) -> bool {
        true
    }

    /// Publish one post to one channel.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::Provider` when the platform rejects or errors
    /// on the call.
    async fn publish(&self, request: PublishRequest<'_>) -> Result<PublishOutcome>;

    /// Renew the channel's credential.
    ///
    /// The default implementation is the static-token no-op: the credential
    /// never expires and no provider call is made.
    ///
    /// # Errors
    ///
    /// Returns `AdapterError::Refresh` when the provider rejects the renewal.
    async fn refresh(&self, _request: RefreshRequest<'_>) -> Result<RefreshOutcome> {
        Ok(RefreshOutcome::NoExpiry)
    }
}

/// Maps platform keys to their adapter.
#[derive(Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn PlatformAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an adapter under its own platform key. A later registration
    /// for the same key replaces the earlier one.
    pub fn register(&mut self, adapter: Arc<dyn PlatformAdapter>) {
        self.adapters.insert(adapter.platform().to_string(), adapter);
    }

    pub fn get(&self, platform: &str) -> Option<Arc<dyn PlatformAdapter>> {
        self.adapters.get(platform).cloned()
    }

    /// Registered platform keys, sorted for stable output.
    pub fn platforms(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.adapters.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
