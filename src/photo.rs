//! Photo attachments, stored outside the sync cache.
//!
//! Photos are keyed by `(user_id, meal_id)` and never travel through the
//! sync engine; attaching or detaching one leaves the meal's sync state
//! untouched.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

use crate::models::MealId;

#[derive(Debug, Error)]
pub enum PhotoError {
    #[error("Photo I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Photo is empty")]
    Empty,
}

pub trait PhotoStore: Send + Sync {
    /// Stores `bytes` as the meal's photo, replacing any previous one.
    fn attach(
        &self,
        user_id: i64,
        meal_id: MealId,
        bytes: &[u8],
    ) -> impl Future<Output = Result<PathBuf, PhotoError>> + Send;

    /// Returns `false` when there was nothing to remove.
    fn detach(&self, user_id: i64, meal_id: MealId) -> impl Future<Output = Result<bool, PhotoError>> + Send;

    fn load(
        &self,
        user_id: i64,
        meal_id: MealId,
    ) -> impl Future<Output = Result<Option<Vec<u8>>, PhotoError>> + Send;
}

/// Writes `<dir>/<userId>-<mealId>.jpeg`.
#[derive(Debug, Clone)]
pub struct FsPhotoStore {
    dir: PathBuf,
}

impl FsPhotoStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, user_id: i64, meal_id: MealId) -> PathBuf {
        self.dir.join(format!("{}-{}.jpeg", user_id, meal_id))
    }
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> PhotoError + '_ {
    move |source| PhotoError::Io {
        path: path.to_path_buf(),
        source,
    }
}

impl PhotoStore for FsPhotoStore {
    async fn attach(&self, user_id: i64, meal_id: MealId, bytes: &[u8]) -> Result<PathBuf, PhotoError> {
        if bytes.is_empty() {
            return Err(PhotoError::Empty);
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(io_error(&self.dir))?;

        let path = self.path_for(user_id, meal_id);
        tokio::fs::write(&path, bytes).await.map_err(io_error(&path))?;
        debug!(user_id, meal_id, path = %path.display(), "Photo attached");
        Ok(path)
    }

    async fn detach(&self, user_id: i64, meal_id: MealId) -> Result<bool, PhotoError> {
        let path = self.path_for(user_id, meal_id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(user_id, meal_id, "Photo detached");
                Ok(true)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(io_error(&path)(e)),
        }
    }

    async fn load(&self, user_id: i64, meal_id: MealId) -> Result<Option<Vec<u8>>, PhotoError> {
        let path = self.path_for(user_id, meal_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error(&path)(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_attach_writes_keyed_file() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsPhotoStore::new(temp_dir.path().join("photos"));

        let path = store.attach(3, 42, b"jpeg bytes").await.unwrap();
        assert_eq!(path, temp_dir.path().join("photos").join("3-42.jpeg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"jpeg bytes");

        assert_eq!(store.load(3, 42).await.unwrap().as_deref(), Some(&b"jpeg bytes"[..]));
        assert_eq!(store.load(4, 42).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_attach_replaces_previous_photo() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsPhotoStore::new(temp_dir.path());

        store.attach(1, 5, b"first").await.unwrap();
        store.attach(1, 5, b"second").await.unwrap();
        assert_eq!(store.load(1, 5).await.unwrap().unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_detach() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsPhotoStore::new(temp_dir.path());

        store.attach(1, -7, b"queued meal photo").await.unwrap();
        assert!(store.detach(1, -7).await.unwrap());
        assert!(!store.detach(1, -7).await.unwrap());
        assert_eq!(store.load(1, -7).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_empty_photo_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let store = FsPhotoStore::new(temp_dir.path());
        assert!(matches!(store.attach(1, 1, b"").await, Err(PhotoError::Empty)));
    }
}
