//! End-to-end dispatch tests: resolution, sequential publishing, status
//! aggregation, and the on-demand path.

mod common;

use common::{seed_channel, seed_scheduled_post, setup_db, test_vault, MemoryMediaStore};
use libcrosspub::adapters::mock::MockAdapter;
use libcrosspub::adapters::AdapterRegistry;
use libcrosspub::dispatcher::PublishDispatcher;
use libcrosspub::retention::MediaRetentionManager;
use libcrosspub::scheduler::ManualClock;
use libcrosspub::types::{Post, PostStatus, PostType};
use libcrosspub::CrosspubError;
use std::sync::Arc;

const NOW: i64 = 1_700_000_000;

fn dispatcher_with(
    db: libcrosspub::Database,
    adapters: Vec<Arc<MockAdapter>>,
) -> (PublishDispatcher, Arc<MemoryMediaStore>) {
    let vault = Arc::new(test_vault());
    let mut registry = AdapterRegistry::new();
    for adapter in adapters {
        registry.register(adapter);
    }

    let store = Arc::new(MemoryMediaStore::new());
    let retention = Arc::new(MediaRetentionManager::new(db.clone(), store.clone(), 300));

    let dispatcher = PublishDispatcher::new(db, vault, Arc::new(registry))
        .with_retention(retention)
        .with_clock(Arc::new(ManualClock::new(NOW)));

    (dispatcher, store)
}

#[tokio::test]
async fn partial_success_yields_partial_status_and_no_cleanup() {
    let (_tmp, db) = setup_db().await;
    let vault = test_vault();

    let ok_adapter = Arc::new(MockAdapter::success("mastodon"));
    let bad_adapter = Arc::new(MockAdapter::failing("pixelgram", "rate limited"));
    let (dispatcher, _store) =
        dispatcher_with(db.clone(), vec![ok_adapter.clone(), bad_adapter.clone()]);

    seed_channel(&db, &vault, "u", "mastodon", "token-a").await;
    seed_channel(&db, &vault, "u", "pixelgram", "token-b").await;

    let post = seed_scheduled_post(&db, "u", &["mastodon", "pixelgram"], NOW - 60).await;

    let summary = dispatcher.publish_now(&post.id).await.unwrap();

    assert_eq!(summary.status, PostStatus::Partial);
    assert_eq!(summary.results.len(), 2);
    assert!(summary.results[0].success);
    assert_eq!(summary.results[0].platform, "mastodon");
    assert!(summary.results[0].external_id.is_some());
    assert!(!summary.results[1].success);
    assert!(summary.results[1]
        .error_message
        .as_deref()
        .unwrap()
        .contains("rate limited"));

    let loaded = db.get_post(&post.id).await.unwrap().unwrap();
    assert_eq!(loaded.status, PostStatus::Partial);
    assert_eq!(db.get_publish_results(&post.id).await.unwrap().len(), 2);

    // Partial success never schedules media cleanup
    assert!(db.due_cleanup_jobs(i64::MAX).await.unwrap().is_empty());
}

#[tokio::test]
async fn reel_without_video_fails_without_adapter_calls() {
    let (_tmp, db) = setup_db().await;
    let vault = test_vault();

    let adapter = Arc::new(MockAdapter::success("pixelgram"));
    let (dispatcher, _store) = dispatcher_with(db.clone(), vec![adapter.clone()]);

    seed_channel(&db, &vault, "u", "pixelgram", "token").await;

    let mut post = Post::new("u".to_string(), "caption only".to_string());
    post.post_type = PostType::Reel;
    post.platforms = vec!["pixelgram".to_string()];
    post.status = PostStatus::Scheduled;
    post.scheduled_at = Some(NOW - 60);
    db.create_post(&post).await.unwrap();

    let summary = dispatcher.publish_now(&post.id).await.unwrap();

    assert_eq!(summary.status, PostStatus::Failed);
    assert_eq!(summary.results.len(), 1);
    assert!(!summary.results[0].success);
    assert!(summary.results[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("video"));

    // The adapter was never invoked
    assert_eq!(adapter.publish_call_count(), 0);
}

#[tokio::test]
async fn zero_resolved_channels_fails_with_no_rows() {
    let (_tmp, db) = setup_db().await;

    let (dispatcher, _store) = dispatcher_with(db.clone(), vec![]);

    let post = seed_scheduled_post(&db, "u", &["unconnected"], NOW - 60).await;
    let summary = dispatcher.publish_now(&post.id).await.unwrap();

    assert_eq!(summary.status, PostStatus::Failed);
    assert!(summary.results.is_empty());
    assert!(db.get_publish_results(&post.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn adapter_receives_decrypted_credential() {
    let (_tmp, db) = setup_db().await;
    let vault = test_vault();

    let adapter = Arc::new(MockAdapter::success("mastodon"));
    let (dispatcher, _store) = dispatcher_with(db.clone(), vec![adapter.clone()]);

    let channel = seed_channel(&db, &vault, "u", "mastodon", "plain-oauth-token").await;
    assert!(channel.access_credential.starts_with("v1:"));

    let post = seed_scheduled_post(&db, "u", &["mastodon"], NOW - 60).await;
    dispatcher.publish_now(&post.id).await.unwrap();

    let calls = adapter.publish_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].credential, "plain-oauth-token");
    assert_eq!(calls[0].channel_id, channel.id);
}

#[tokio::test]
async fn explicit_selection_reaches_second_channel_on_same_platform() {
    let (_tmp, db) = setup_db().await;
    let vault = test_vault();

    let adapter = Arc::new(MockAdapter::success("mastodon"));
    let (dispatcher, _store) = dispatcher_with(db.clone(), vec![adapter.clone()]);

    let first = seed_channel(&db, &vault, "u", "mastodon", "token-1").await;
    let second = seed_channel(&db, &vault, "u", "mastodon", "token-2").await;

    let mut post = Post::new("u".to_string(), "to both accounts".to_string());
    post.selected_channel_ids = vec![
        first.id.clone(),
        second.id.clone(),
        "ghost-channel".to_string(),
    ];
    post.status = PostStatus::Scheduled;
    post.scheduled_at = Some(NOW - 60);
    db.create_post(&post).await.unwrap();

    let summary = dispatcher.publish_now(&post.id).await.unwrap();

    // The unresolvable id is silently dropped; both real channels publish
    assert_eq!(summary.status, PostStatus::Published);
    assert_eq!(summary.results.len(), 2);
    assert_eq!(adapter.publish_call_count(), 2);
}

#[tokio::test]
async fn unregistered_platform_records_failure_but_others_proceed() {
    let (_tmp, db) = setup_db().await;
    let vault = test_vault();

    let adapter = Arc::new(MockAdapter::success("mastodon"));
    let (dispatcher, _store) = dispatcher_with(db.clone(), vec![adapter]);

    seed_channel(&db, &vault, "u", "exotic", "token-x").await;
    seed_channel(&db, &vault, "u", "mastodon", "token-m").await;

    let post = seed_scheduled_post(&db, "u", &["exotic", "mastodon"], NOW - 60).await;
    let summary = dispatcher.publish_now(&post.id).await.unwrap();

    assert_eq!(summary.status, PostStatus::Partial);
    assert!(summary.results[0]
        .error_message
        .as_deref()
        .unwrap()
        .contains("No adapter registered"));
    assert!(summary.results[1].success);
}

#[tokio::test]
async fn terminal_posts_are_never_redispatched() {
    let (_tmp, db) = setup_db().await;
    let vault = test_vault();

    let adapter = Arc::new(MockAdapter::success("mastodon"));
    let (dispatcher, _store) = dispatcher_with(db.clone(), vec![adapter.clone()]);

    seed_channel(&db, &vault, "u", "mastodon", "token").await;
    let post = seed_scheduled_post(&db, "u", &["mastodon"], NOW - 60).await;

    dispatcher.publish_now(&post.id).await.unwrap();
    assert_eq!(adapter.publish_call_count(), 1);

    // Now published: a second on-demand publish is rejected
    let result = dispatcher.publish_now(&post.id).await;
    assert!(matches!(result, Err(CrosspubError::InvalidInput(_))));
    assert_eq!(adapter.publish_call_count(), 1);
    assert_eq!(db.get_publish_results(&post.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn cancelled_post_is_rejected() {
    let (_tmp, db) = setup_db().await;

    let (dispatcher, _store) = dispatcher_with(db.clone(), vec![]);

    let post = seed_scheduled_post(&db, "u", &["mastodon"], NOW + 600).await;
    assert!(db.cancel_post(&post.id).await.unwrap());

    let result = dispatcher.publish_now(&post.id).await;
    assert!(matches!(result, Err(CrosspubError::InvalidInput(_))));
}

#[tokio::test]
async fn published_post_with_media_enqueues_cleanup() {
    let (_tmp, db) = setup_db().await;
    let vault = test_vault();

    let adapter = Arc::new(MockAdapter::success("mastodon"));
    let (dispatcher, _store) = dispatcher_with(db.clone(), vec![adapter]);

    seed_channel(&db, &vault, "u", "mastodon", "token").await;

    let mut post = Post::new("u".to_string(), "with media".to_string());
    post.post_type = PostType::Photo;
    post.platforms = vec!["mastodon".to_string()];
    post.media_urls = vec!["https://cdn.example.com/a.jpg".to_string()];
    post.status = PostStatus::Scheduled;
    post.scheduled_at = Some(NOW - 60);
    db.create_post(&post).await.unwrap();

    let summary = dispatcher.publish_now(&post.id).await.unwrap();
    assert_eq!(summary.status, PostStatus::Published);

    let jobs = db.due_cleanup_jobs(i64::MAX).await.unwrap();
    assert_eq!(jobs, vec![post.id.clone()]);
    // Deferred by the configured delay, not runnable immediately
    assert!(db.due_cleanup_jobs(NOW).await.unwrap().is_empty());
}
