pub mod disk;
pub mod memory;

use crate::error::StorageError;
use async_trait::async_trait;
use bytes::Bytes;

pub use disk::DiskBlobStore;
pub use memory::MemoryBlobStore;

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Object storage addressed by bucket and key.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    /// Store an object in one call.
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()>;

    /// Start a streaming write. The object becomes visible only on `finish`.
    async fn put_stream(&self, bucket: &str, key: &str) -> StorageResult<Box<dyn BlobWriter>>;

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes>;

    /// Keys in `bucket` starting with `prefix`, sorted.
    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>>;

    async fn health_check(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// An in-progress streaming write. Dropping it without `finish` discards the data.
#[async_trait]
pub trait BlobWriter: Send {
    async fn write(&mut self, data: Bytes) -> StorageResult<()>;

    /// Commit the object and return the number of bytes written.
    async fn finish(self: Box<Self>) -> StorageResult<u64>;

    async fn abort(self: Box<Self>) -> StorageResult<()>;
}

/// Reject keys that could escape a bucket.
pub(crate) fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("empty key".to_string()));
    }
    if key.contains("..") || key.starts_with('/') || key.starts_with('\\') {
        return Err(StorageError::InvalidKey(format!("path traversal not allowed: {}", key)));
    }
    for component in std::path::Path::new(key).components() {
        if !matches!(component, std::path::Component::Normal(_)) {
            return Err(StorageError::InvalidKey(format!("unsafe path component: {}", key)));
        }
    }
    Ok(())
}

pub(crate) fn validate_bucket(bucket: &str) -> StorageResult<()> {
    let valid = !bucket.is_empty()
        && !bucket.starts_with('.')
        && bucket
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.');
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidKey(format!("invalid bucket name: {}", bucket)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_key() {
        assert!(validate_key("alicef1/chunk_0").is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("../etc/passwd").is_err());
        assert!(validate_key("/abs").is_err());
        assert!(validate_key("./a").is_err());
    }

    #[test]
    fn test_validate_bucket() {
        assert!(validate_bucket("cloudstor").is_ok());
        assert!(validate_bucket(".tmp").is_err());
        assert!(validate_bucket("a/b").is_err());
        assert!(validate_bucket("").is_err());
    }
}
