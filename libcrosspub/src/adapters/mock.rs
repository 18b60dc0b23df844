//! Mock adapter implementation for testing
//!
//! A configurable adapter that scripts publish and refresh outcomes and
//! records every call it receives. Available in all builds so integration
//! tests and daemon rehearsal runs can exercise the full dispatch path
//! without platform credentials or network access.

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::{PlatformAdapter, PublishOutcome, PublishRequest, RefreshOutcome, RefreshRequest};
use crate::error::{AdapterError, Result};
use crate::types::PostType;

/// One recorded publish invocation.
#[derive(Debug, Clone)]
pub struct RecordedPublish {
    pub post_id: String,
    pub channel_id: String,
    /// The credential as the adapter saw it, already decrypted by the
    /// dispatcher, so tests can assert the vault ran.
    pub credential: String,
}

/// Scripted refresh behavior.
#[derive(Debug, Clone)]
pub enum RefreshScript {
    /// Rotate to a fresh credential expiring `lifetime` seconds after the
    /// old expiry (or immediately counted from zero when none was set)
    Rotate { lifetime: i64 },
    /// Static token, never expires
    NoExpiry,
    /// Provider rejects the renewal
    Fail(String),
}

/// Mock platform adapter with scripted outcomes.
pub struct MockAdapter {
    platform: String,
    publish_error: Option<String>,
    unsupported: Vec<PostType>,
    refresh_script: RefreshScript,
    publish_seq: AtomicUsize,
    publishes: Mutex<Vec<RecordedPublish>>,
    refresh_calls: AtomicUsize,
}

impl MockAdapter {
    /// An adapter that publishes successfully and never expires.
    pub fn success(platform: &str) -> Self {
        Self {
            platform: platform.to_string(),
            publish_error: None,
            unsupported: Vec::new(),
            refresh_script: RefreshScript::NoExpiry,
            publish_seq: AtomicUsize::new(0),
            publishes: Mutex::new(Vec::new()),
            refresh_calls: AtomicUsize::new(0),
        }
    }

    /// An adapter whose every publish fails with the given provider message.
    pub fn failing(platform: &str, error: &str) -> Self {
        Self {
            publish_error: Some(error.to_string()),
            ..Self::success(platform)
        }
    }

    /// An adapter that declares the given post types unsupported.
    pub fn without_post_types(platform: &str, unsupported: Vec<PostType>) -> Self {
        Self {
            unsupported,
            ..Self::success(platform)
        }
    }

    /// An adapter with a scripted refresh behavior.
    pub fn with_refresh(platform: &str, script: RefreshScript) -> Self {
        Self {
            refresh_script: script,
            ..Self::success(platform)
        }
    }

    pub fn publish_call_count(&self) -> usize {
        self.publishes.lock().unwrap().len()
    }

    pub fn publish_calls(&self) -> Vec<RecordedPublish> {
        self.publishes.lock().unwrap().clone()
    }

    pub fn refresh_call_count(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformAdapter for MockAdapter {
    fn platform(&self) -> &str {
        &self.platform
    }

    fn supports(&self, post_type: PostType) -> bool {
        !self.unsupported.contains(&post_type)
    }

    async fn publish(&self, request: PublishRequest<'_>) -> Result<PublishOutcome> {
        self.publishes.lock().unwrap().push(RecordedPublish {
            post_id: request.post.id.clone(),
            channel_id: request.channel.id.clone(),
            credential: request.credential.to_string(),
        });

        if let Some(error) = &self.publish_error {
            return Err(AdapterError::Provider(error.clone()).into());
        }

        let n = self.publish_seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(PublishOutcome {
            external_id: format!("{}-{}", self.platform, n),
            url: Some(format!("https://{}.example/{}", self.platform, n)),
            raw: None,
        })
    }

    async fn refresh(&self, request: RefreshRequest<'_>) -> Result<RefreshOutcome> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);

        match &self.refresh_script {
            RefreshScript::Rotate { lifetime } => {
                let base = request.channel.credential_expiry.unwrap_or(0);
                Ok(RefreshOutcome::Rotated {
                    access_credential: format!("{}-rotated", request.access_credential),
                    refresh_credential: request
                        .refresh_credential
                        .map(|r| format!("{r}-rotated")),
                    expires_at: Some(base + lifetime),
                })
            }
            RefreshScript::NoExpiry => Ok(RefreshOutcome::NoExpiry),
            RefreshScript::Fail(message) => Err(AdapterError::Refresh(message.clone()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Channel, Post};

    fn request_parts() -> (Post, Channel) {
        let post = Post::new("u".to_string(), "hello".to_string());
        let channel = Channel::new("u".to_string(), "mock".to_string(), "sealed".to_string());
        (post, channel)
    }

    #[tokio::test]
    async fn test_mock_publish_success_and_recording() {
        let adapter = MockAdapter::success("mock");
        let (post, channel) = request_parts();

        let outcome = adapter
            .publish(PublishRequest {
                post: &post,
                channel: &channel,
                credential: "plain-token",
                channel_metadata: None,
            })
            .await
            .unwrap();

        assert_eq!(outcome.external_id, "mock-1");
        assert_eq!(adapter.publish_call_count(), 1);

        let calls = adapter.publish_calls();
        assert_eq!(calls[0].post_id, post.id);
        assert_eq!(calls[0].channel_id, channel.id);
        assert_eq!(calls[0].credential, "plain-token");
    }

    #[tokio::test]
    async fn test_mock_publish_failure_still_recorded() {
        let adapter = MockAdapter::failing("mock", "rate limited");
        let (post, channel) = request_parts();

        let result = adapter
            .publish(PublishRequest {
                post: &post,
                channel: &channel,
                credential: "tok",
                channel_metadata: None,
            })
            .await;

        assert!(result.is_err());
        assert_eq!(adapter.publish_call_count(), 1);
    }

    #[tokio::test]
    async fn test_mock_refresh_scripts() {
        let (_, mut channel) = request_parts();
        channel.credential_expiry = Some(1000);

        let rotate = MockAdapter::with_refresh("mock", RefreshScript::Rotate { lifetime: 500 });
        let outcome = rotate
            .refresh(RefreshRequest {
                channel: &channel,
                access_credential: "tok",
                refresh_credential: Some("ref"),
            })
            .await
            .unwrap();
        match outcome {
            RefreshOutcome::Rotated {
                access_credential,
                refresh_credential,
                expires_at,
            } => {
                assert_eq!(access_credential, "tok-rotated");
                assert_eq!(refresh_credential, Some("ref-rotated".to_string()));
                assert_eq!(expires_at, Some(1500));
            }
            other => panic!("expected rotation, got {other:?}"),
        }

        let failing = MockAdapter::with_refresh("mock", RefreshScript::Fail("nope".to_string()));
        assert!(failing
            .refresh(RefreshRequest {
                channel: &channel,
                access_credential: "tok",
                refresh_credential: None,
            })
            .await
            .is_err());
        assert_eq!(failing.refresh_call_count(), 1);
    }

    #[test]
    fn test_mock_supports() {
        let adapter = MockAdapter::without_post_types("mock", vec![PostType::Reel]);
        assert!(!adapter.supports(PostType::Reel));
        assert!(adapter.supports(PostType::Text));
    }
}
