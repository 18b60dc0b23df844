//! Media storage collaborator seam
//!
//! The retention manager only ever issues deletions and listings; uploads and
//! URL generation belong to the upload collaborator. `LocalMediaStore` backs
//! deployments that keep media on local disk, one flat file per object.

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::info;

use crate::error::{DbError, Result};

/// Deletion/listing surface of the media storage collaborator.
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Delete the object a media URL refers to. Deleting an already-absent
    /// object is not an error.
    async fn delete(&self, url: &str) -> Result<()>;

    /// List every stored object name, for the orphan sweep.
    async fn list(&self) -> Result<Vec<String>>;
}

/// The object name a media URL refers to: its final path segment, query
/// string stripped.
pub fn object_name(url: &str) -> &str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/').next().unwrap_or(path)
}

/// Flat-directory media store: each object is `{dir}/{object_name}`.
pub struct LocalMediaStore {
    dir: PathBuf,
}

impl LocalMediaStore {
    pub async fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).await.map_err(DbError::IoError)?;
        info!("Media storage directory: {}", dir.display());
        Ok(Self { dir })
    }

    fn object_path(&self, url: &str) -> PathBuf {
        self.dir.join(object_name(url))
    }
}

#[async_trait]
impl MediaStore for LocalMediaStore {
    async fn delete(&self, url: &str) -> Result<()> {
        let path = self.object_path(url);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(DbError::IoError(e).into()),
        }
    }

    async fn list(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await.map_err(DbError::IoError)?;
        while let Some(entry) = entries.next_entry().await.map_err(DbError::IoError)? {
            if entry.file_type().await.map_err(DbError::IoError)?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}
