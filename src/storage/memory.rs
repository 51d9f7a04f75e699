use std::collections::BTreeMap;
use std::sync::Arc;
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::RwLock;

use super::{validate_bucket, validate_key, BlobStore, BlobWriter, StorageResult};
use crate::error::StorageError;

type Objects = Arc<RwLock<BTreeMap<(String, String), Bytes>>>;

/// Process-local blob store.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    objects: Objects,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.objects.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.objects.read().await.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        self.objects
            .write()
            .await
            .insert((bucket.to_string(), key.to_string()), data);
        Ok(())
    }

    async fn put_stream(&self, bucket: &str, key: &str) -> StorageResult<Box<dyn BlobWriter>> {
        validate_bucket(bucket)?;
        validate_key(key)?;
        Ok(Box::new(MemoryBlobWriter {
            objects: Arc::clone(&self.objects),
            bucket: bucket.to_string(),
            key: key.to_string(),
            buffer: Vec::new(),
        }))
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("{}/{}", bucket, key)))
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        let objects = self.objects.read().await;
        Ok(objects
            .keys()
            .filter(|(b, k)| b == bucket && k.starts_with(prefix))
            .map(|(_, k)| k.clone())
            .collect())
    }
}

struct MemoryBlobWriter {
    objects: Objects,
    bucket: String,
    key: String,
    buffer: Vec<u8>,
}

#[async_trait]
impl BlobWriter for MemoryBlobWriter {
    async fn write(&mut self, data: Bytes) -> StorageResult<()> {
        self.buffer.extend_from_slice(&data);
        Ok(())
    }

    async fn finish(self: Box<Self>) -> StorageResult<u64> {
        let this = *self;
        let written = this.buffer.len() as u64;
        this.objects
            .write()
            .await
            .insert((this.bucket, this.key), Bytes::from(this.buffer));
        Ok(written)
    }

    async fn abort(self: Box<Self>) -> StorageResult<()> {
        Ok(())
    }
}
