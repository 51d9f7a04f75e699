#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chunk_store::error::{CacheError, StorageError};
use chunk_store::metadata::{
    CacheResult, LruMetadataCache, MetadataCache, MetadataResult, MetadataService, MetadataStore,
    SqliteStore,
};
use chunk_store::pool::TaskPool;
use chunk_store::storage::{BlobStore, BlobWriter, MemoryBlobStore, StorageResult};
use chunk_store::{ChunkMetadata, ChunkUploadService, FileMetadata, FileStatus, UploadConfig};

pub const OWNER: &str = "alice";

/// A cache whose every call fails.
pub struct FailingCache;

#[async_trait]
impl MetadataCache for FailingCache {
    async fn get(&self, _file_id: &str) -> CacheResult<Option<FileMetadata>> {
        Err(CacheError::Unavailable("cache is down".to_string()))
    }

    async fn set(&self, _file: &FileMetadata) -> CacheResult<()> {
        Err(CacheError::Unavailable("cache is down".to_string()))
    }

    async fn delete(&self, _file_id: &str) -> CacheResult<()> {
        Err(CacheError::Unavailable("cache is down".to_string()))
    }

    async fn batch_get(&self, _file_ids: &[String]) -> CacheResult<HashMap<String, FileMetadata>> {
        Err(CacheError::Unavailable("cache is down".to_string()))
    }
}

/// Wraps a memory store; reads and writes of keys containing `fail_on` fail.
#[derive(Clone)]
pub struct FailingBlobStore {
    inner: MemoryBlobStore,
    fail_on: String,
}

impl FailingBlobStore {
    pub fn new(inner: MemoryBlobStore, fail_on: &str) -> Self {
        Self {
            inner,
            fail_on: fail_on.to_string(),
        }
    }

    fn check(&self, key: &str) -> StorageResult<()> {
        if key.contains(&self.fail_on) {
            Err(StorageError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("injected failure for {}", key),
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl BlobStore for FailingBlobStore {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()> {
        self.check(key)?;
        self.inner.put(bucket, key, data).await
    }

    async fn put_stream(&self, bucket: &str, key: &str) -> StorageResult<Box<dyn BlobWriter>> {
        self.check(key)?;
        self.inner.put_stream(bucket, key).await
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        self.check(key)?;
        self.inner.get(bucket, key).await
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(bucket, prefix).await
    }
}

/// Wraps a memory store; reads of lower chunk ids take longer, so parallel reads
/// complete in descending chunk order.
#[derive(Clone)]
pub struct DelayedReads {
    inner: MemoryBlobStore,
    chunk_count: u32,
    step: Duration,
}

impl DelayedReads {
    pub fn new(inner: MemoryBlobStore, chunk_count: u32, step: Duration) -> Self {
        Self {
            inner,
            chunk_count,
            step,
        }
    }

    fn delay_for(&self, key: &str) -> Duration {
        let chunk_id = key
            .rsplit("chunk_")
            .next()
            .and_then(|id| id.parse::<u32>().ok())
            .unwrap_or(self.chunk_count);
        self.step * self.chunk_count.saturating_sub(chunk_id)
    }
}

#[async_trait]
impl BlobStore for DelayedReads {
    async fn put(&self, bucket: &str, key: &str, data: Bytes) -> StorageResult<()> {
        self.inner.put(bucket, key, data).await
    }

    async fn put_stream(&self, bucket: &str, key: &str) -> StorageResult<Box<dyn BlobWriter>> {
        self.inner.put_stream(bucket, key).await
    }

    async fn get(&self, bucket: &str, key: &str) -> StorageResult<Bytes> {
        tokio::time::sleep(self.delay_for(key)).await;
        self.inner.get(bucket, key).await
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StorageResult<Vec<String>> {
        self.inner.list(bucket, prefix).await
    }
}

/// Counts durable-store file reads so tests can tell cache hits from misses.
pub struct CountingStore {
    inner: SqliteStore,
    file_reads: AtomicUsize,
}

impl CountingStore {
    pub async fn new() -> Self {
        Self {
            inner: SqliteStore::in_memory().await.unwrap(),
            file_reads: AtomicUsize::new(0),
        }
    }

    pub fn file_reads(&self) -> usize {
        self.file_reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetadataStore for CountingStore {
    async fn insert_file(&self, file: &FileMetadata) -> MetadataResult<()> {
        self.inner.insert_file(file).await
    }

    async fn get_file(&self, file_id: &str) -> MetadataResult<FileMetadata> {
        self.file_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.get_file(file_id).await
    }

    async fn insert_chunk(&self, chunk: &ChunkMetadata) -> MetadataResult<()> {
        self.inner.insert_chunk(chunk).await
    }

    async fn list_chunks(&self, file_id: &str) -> MetadataResult<Vec<ChunkMetadata>> {
        self.inner.list_chunks(file_id).await
    }

    async fn update_file_status(
        &self,
        file_id: &str,
        status: FileStatus,
        update_at: i64,
    ) -> MetadataResult<()> {
        self.inner.update_file_status(file_id, status, update_at).await
    }

    async fn health_check(&self) -> MetadataResult<()> {
        self.inner.health_check().await
    }
}

pub fn test_config(worker_count: usize, queue_capacity: usize) -> UploadConfig {
    UploadConfig {
        worker_count,
        queue_capacity,
        chunk_size: 8,
        ..UploadConfig::default()
    }
}

pub struct Harness {
    pub service: Arc<ChunkUploadService>,
    pub workers: Arc<TaskPool>,
}

pub async fn harness_with(
    blobs: Arc<dyn BlobStore>,
    store: Arc<dyn MetadataStore>,
    cache: Arc<dyn MetadataCache>,
    config: &UploadConfig,
) -> Harness {
    let workers = Arc::new(TaskPool::start_new(config.worker_count, config.queue_capacity));
    let service = ChunkUploadService::new(
        MetadataService::new(store, cache),
        blobs,
        Arc::clone(&workers),
        config,
    );
    Harness {
        service: Arc::new(service),
        workers,
    }
}

pub async fn memory_harness(blobs: &MemoryBlobStore) -> Harness {
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let cache = Arc::new(LruMetadataCache::new(128, Duration::from_secs(60)));
    harness_with(Arc::new(blobs.clone()), store, cache, &test_config(4, 16)).await
}

pub async fn create_file(service: &ChunkUploadService, file_id: &str, chunk_count: u32) -> FileMetadata {
    let mut file = FileMetadata::new(file_id, "payload.bin", OWNER, 0, chunk_count, 1024);
    service
        .metadata()
        .create_file_metadata(&mut file)
        .await
        .unwrap();
    file
}

pub async fn upload(service: &ChunkUploadService, file_id: &str, chunk_id: u32, body: &[u8]) -> ChunkMetadata {
    let mut reader = body;
    service
        .upload_chunk(file_id, chunk_id, &mut reader, OWNER)
        .await
        .unwrap()
}
