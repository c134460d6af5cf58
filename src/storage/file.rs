//! Filesystem-backed [`ObjectStore`], used in tests and single-box runs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{ObjectStore, StorageError};

pub struct FileObjectStore {
    base_dir: PathBuf,
}

impl FileObjectStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }

    fn location_for(path: &Path) -> String {
        format!("file://{}", path.display())
    }
}

#[async_trait]
impl ObjectStore for FileObjectStore {
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(Self::location_for(&path))
    }

    async fn fetch(&self, location: &str) -> Result<Vec<u8>, StorageError> {
        let path = location
            .strip_prefix("file://")
            .ok_or_else(|| StorageError::UnsupportedScheme(location.to_string()))?;
        Ok(tokio::fs::read(path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_store_then_fetch_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::new(dir.path());
        let location = store
            .store("1234567/0001234567-25-000001/submission.txt", b"hello")
            .await
            .unwrap();
        assert!(location.starts_with("file://"));
        let bytes = store.fetch(&location).await.unwrap();
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn test_store_overwrite_is_safe() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::new(dir.path());
        let key = "1234567/0001234567-25-000001/index.html";
        store.store(key, b"v1").await.unwrap();
        let location = store.store(key, b"v2").await.unwrap();
        assert_eq!(store.fetch(&location).await.unwrap(), b"v2");
    }
}
