//! Shared helpers for integration tests

use async_trait::async_trait;
use libcrosspub::error::Result;
use libcrosspub::media::{object_name, MediaStore};
use libcrosspub::types::{Channel, Post, PostStatus};
use libcrosspub::{CredentialVault, Database};
use std::collections::BTreeSet;
use std::sync::Mutex;
use tempfile::TempDir;

pub async fn setup_db() -> (TempDir, Database) {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(db_path.to_str().unwrap()).await.unwrap();
    (temp_dir, db)
}

pub fn test_vault() -> CredentialVault {
    CredentialVault::new(Some("integration test secret"), false, false).unwrap()
}

pub async fn seed_channel(
    db: &Database,
    vault: &CredentialVault,
    user: &str,
    platform: &str,
    token: &str,
) -> Channel {
    let channel = Channel::new(
        user.to_string(),
        platform.to_string(),
        vault.seal(token).unwrap(),
    );
    db.create_channel(&channel).await.unwrap();
    channel
}

pub async fn seed_scheduled_post(
    db: &Database,
    user: &str,
    platforms: &[&str],
    scheduled_at: i64,
) -> Post {
    let mut post = Post::new(user.to_string(), "integration post".to_string());
    post.platforms = platforms.iter().map(|p| p.to_string()).collect();
    post.status = PostStatus::Scheduled;
    post.scheduled_at = Some(scheduled_at);
    db.create_post(&post).await.unwrap();
    post
}

/// In-memory media store tracking object names.
#[derive(Default)]
pub struct MemoryMediaStore {
    objects: Mutex<BTreeSet<String>>,
}

impl MemoryMediaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, url: &str) {
        self.objects
            .lock()
            .unwrap()
            .insert(object_name(url).to_string());
    }

    pub fn contains(&self, url: &str) -> bool {
        self.objects.lock().unwrap().contains(object_name(url))
    }

    pub fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaStore for MemoryMediaStore {
    async fn delete(&self, url: &str) -> Result<()> {
        self.objects.lock().unwrap().remove(object_name(url));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<String>> {
        Ok(self.objects.lock().unwrap().iter().cloned().collect())
    }
}
