//! Content-addressable artifact storage (spec §6: `store`/`fetch`).
//!
//! Blobs are written once per `(filing, kind)` under a deterministic key
//! (`<cik>/<accession>/<filename>`); overwrites are safe because the
//! filing/kind pair is the identity, not the checksum. [`S3ObjectStore`] is
//! the production backend; [`FileObjectStore`] backs tests and local runs.

pub mod file;
pub mod s3;

pub use file::FileObjectStore;
pub use s3::S3ObjectStore;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("s3 error: {0}")]
    S3(String),
    #[error("unsupported location scheme: {0}")]
    UnsupportedScheme(String),
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` to `key` and return its location URI
    /// (`s3://<bucket>/<key>` or `file://<path>`).
    async fn store(&self, key: &str, bytes: &[u8]) -> Result<String, StorageError>;

    /// Read back bytes previously returned by `store`'s location URI.
    async fn fetch(&self, location: &str) -> Result<Vec<u8>, StorageError>;
}

/// Hex-encoded SHA-256 of `bytes`, used as the blob checksum.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Storage key for a filing artifact: `<cik>/<accession>/<filename>`.
pub fn artifact_key(cik: &str, accession: &str, filename: &str) -> String {
    format!("{cik}/{accession}/{filename}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_deterministic() {
        assert_eq!(content_hash(b"hello"), content_hash(b"hello"));
        assert_ne!(content_hash(b"hello"), content_hash(b"world"));
    }

    #[test]
    fn test_artifact_key_shape() {
        assert_eq!(
            artifact_key("1234567", "0001234567-25-000001", "submission.txt"),
            "1234567/0001234567-25-000001/submission.txt"
        );
    }
}
