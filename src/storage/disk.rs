use std::path::{Path, PathBuf};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::{validate_bucket, validate_key, BlobStore, BlobWriter, StorageResult};
use crate::error::StorageError;

const TMP_DIR: &str = ".tmp";

/// Blob store on the local filesystem, laid out as `{root}/{bucket}/{key}`.
pub struct DiskBlobStore {
    root: PathBuf,
    tmp_path: PathBuf,
}

impl DiskBlobStore {
    pub async fn new<P: AsRef<Path>>(root: P) -> StorageResult<Self> {
        let root = root.as_ref().to_owned();
        let tmp_path = root.join(TMP_DIR);

        fs::create_dir_all(&root).await?;
        fs::create_dir_all(&tmp_path).await?;

        Ok(Self { root, tmp_path })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, bucket: &str, key: &str) -> StorageResult<PathBuf> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        Ok(self.root.join(bucket).join(key))
    }

    fn not_found(err: std::io::Error, bucket: &str, key: &str) -> StorageError {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(format!("{}/{}", bucket, key))
        } else {
            StorageError::Io(err)
        }
    }
}

#[async_trait]
impl BlobStore for DiskBlobStore {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()> {
        let mut writer = self.put_stream(bucket, key).await?;
        writer.write(data).await?;
        writer.finish().await?;
        Ok(())
    }

    async fn put_stream(&self, bucket: &str, key: &str) -> StorageResult<Box<dyn BlobWriter>> {
        let final_path = self.object_path(bucket, key)?;
        let tmp_path = self.tmp_path.join(Uuid::new_v4().to_string());
        let file = fs::File::create(&tmp_path).await?;

        Ok(Box::new(DiskBlobWriter {
            file: Some(file),
            tmp_path,
            final_path,
            written: 0,
            committed: false,
        }))
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        let path = self.object_path(bucket, key)?;
        let data = fs::read(&path)
            .await
            .map_err(|e| Self::not_found(e, bucket, key))?;
        Ok(Bytes::from(data))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        validate_bucket(bucket)?;
        let bucket_path = self.root.join(bucket);
        if !fs::try_exists(&bucket_path).await? {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut pending = vec![bucket_path.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = fs::read_dir(&dir).await?;
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&bucket_path) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }

    async fn health_check(&self) -> StorageResult<()> {
        let metadata = fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("storage root is not a directory: {}", self.root.display()),
            )));
        }
        Ok(())
    }
}

/// Writes into a temp file and renames it into place on `finish`.
struct DiskBlobWriter {
    file: Option<fs::File>,
    tmp_path: PathBuf,
    final_path: PathBuf,
    written: u64,
    committed: bool,
}

#[async_trait]
impl BlobWriter for DiskBlobWriter {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| StorageError::Io(std::io::Error::other("writer already closed")))?;
        file.write_all(&data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    async fn finish(mut self: Box<Self>) -> StorageResult<u64> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| StorageError::Io(std::io::Error::other("writer already closed")))?;
        file.flush().await?;
        file.sync_all().await?;
        drop(file);

        if let Some(parent) = self.final_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(&self.tmp_path, &self.final_path).await?;
        self.committed = true;
        Ok(self.written)
    }

    async fn abort(mut self: Box<Self>) -> StorageResult<()> {
        drop(self.file.take());
        match fs::remove_file(&self.tmp_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::Io(e)),
        }
        self.committed = true;
        Ok(())
    }
}

impl Drop for DiskBlobWriter {
    fn drop(&mut self) {
        if !self.committed {
            drop(self.file.take());
            if let Err(e) = std::fs::remove_file(&self.tmp_path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.tmp_path.display(), error = %e, "Failed to remove abandoned upload");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_storage() -> (DiskBlobStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let storage = DiskBlobStore::new(temp_dir.path())
            .await
            .expect("can't create disk storage");
        (storage, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (storage, _temp_dir) = create_test_storage().await;
        storage
            .put("cloudstor", "alicef1/chunk_0", Bytes::from_static(b"Hello, world!"))
            .await
            .unwrap();
        let data = storage.get("cloudstor", "alicef1/chunk_0").await.unwrap();
        assert_eq!(&data[..], b"Hello, world!");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let (storage, _temp_dir) = create_test_storage().await;
        let err = storage.get("cloudstor", "nope").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_streaming_write_is_invisible_until_finish() {
        let (storage, _temp_dir) = create_test_storage().await;
        let mut writer = storage.put_stream("cloudstor", "f/chunk_0").await.unwrap();
        writer.write(Bytes::from_static(b"part one ")).await.unwrap();
        writer.write(Bytes::from_static(b"part two")).await.unwrap();
        assert!(storage.get("cloudstor", "f/chunk_0").await.is_err());

        let written = writer.finish().await.unwrap();
        assert_eq!(written, 17);
        let data = storage.get("cloudstor", "f/chunk_0").await.unwrap();
        assert_eq!(&data[..], b"part one part two");
    }

    #[tokio::test]
    async fn test_abort_and_drop_leave_nothing_behind() {
        let (storage, temp_dir) = create_test_storage().await;

        let mut writer = storage.put_stream("cloudstor", "f/chunk_1").await.unwrap();
        writer.write(Bytes::from_static(b"partial")).await.unwrap();
        writer.abort().await.unwrap();

        let mut writer = storage.put_stream("cloudstor", "f/chunk_2").await.unwrap();
        writer.write(Bytes::from_static(b"partial")).await.unwrap();
        drop(writer);

        assert!(storage.list("cloudstor", "").await.unwrap().is_empty());
        let mut tmp_entries = std::fs::read_dir(temp_dir.path().join(TMP_DIR)).unwrap();
        assert!(tmp_entries.next().is_none());
    }

    #[tokio::test]
    async fn test_list_by_prefix() {
        let (storage, _temp_dir) = create_test_storage().await;
        for key in ["af1/chunk_0", "af1/chunk_1", "bf2/chunk_0"] {
            storage.put("cloudstor", key, Bytes::from_static(b"x")).await.unwrap();
        }
        let keys = storage.list("cloudstor", "af1/").await.unwrap();
        assert_eq!(keys, vec!["af1/chunk_0".to_string(), "af1/chunk_1".to_string()]);
        assert!(storage.list("other", "").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_traversal_keys() {
        let (storage, _temp_dir) = create_test_storage().await;
        let err = storage
            .put("cloudstor", "../escape", Bytes::from_static(b"x"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidKey(_)));
    }
}
