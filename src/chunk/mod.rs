//! Chunk upload and merge pipeline.

mod locks;

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::UploadConfig;
use crate::error::{PoolError, Result, StorageError, UploadError};
use crate::metadata::MetadataService;
use crate::pool::{BufferPool, TaskPool};
use crate::storage::{BlobStore, BlobWriter};
use crate::types::{assembled_key, chunk_storage_key, ChunkMetadata, FileMetadata, FileStatus};
use locks::FileLocks;

/// Wait applied when the pool is saturated and this merge has nothing of its own to drain.
const QUEUE_FULL_BACKOFF: Duration = Duration::from_millis(10);

/// Lower-case hex SHA-256 of `data`.
pub fn fingerprint(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// The assembled object produced by a successful merge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedObject {
    pub file_id: String,
    pub storage_path: String,
    pub size: u64,
}

pub struct ChunkUploadService {
    metadata: MetadataService,
    blobs: Arc<dyn BlobStore>,
    workers: Arc<TaskPool>,
    buffers: BufferPool,
    locks: FileLocks,
    bucket: String,
    read_ahead: usize,
}

impl ChunkUploadService {
    pub fn new(
        metadata: MetadataService,
        blobs: Arc<dyn BlobStore>,
        workers: Arc<TaskPool>,
        config: &UploadConfig,
    ) -> Self {
        let read_ahead = workers.worker_count().saturating_mul(2).max(1);
        Self {
            metadata,
            blobs,
            workers,
            buffers: BufferPool::new(config.chunk_size, config.max_pooled_buffers),
            locks: FileLocks::default(),
            bucket: config.bucket.clone(),
            read_ahead,
        }
    }

    pub fn metadata(&self) -> &MetadataService {
        &self.metadata
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Streams one chunk into the blob store, hashing the same bytes that are written,
    /// then records its metadata. The blob is always written before the record.
    ///
    /// The commit of the blob and the record happen under the file's merge lock,
    /// after re-reading the durable status, so an upload that loses a race with a
    /// merge is rejected instead of rewriting a merged file.
    pub async fn upload_chunk<R>(
        &self,
        file_id: &str,
        chunk_id: u32,
        data: &mut R,
        user_id: &str,
    ) -> Result<ChunkMetadata>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let file = self.metadata.get_file_metadata(file_id).await?;
        authorize(&file, user_id)?;
        if file.status.is_terminal() {
            return Err(UploadError::AlreadyMerged(file_id.to_string()));
        }
        if chunk_id >= file.chunk_count {
            return Err(UploadError::InvalidChunk {
                file_id: file_id.to_string(),
                chunk_id,
                chunk_count: file.chunk_count,
            });
        }

        let storage_path = chunk_storage_key(&file.user_id, file_id, chunk_id);
        let writer = self
            .blobs
            .put_stream(&self.bucket, &storage_path)
            .await
            .map_err(|e| {
                error!(file_id, chunk_id, error = %e, "Failed to open chunk upload");
                UploadError::StorageFailure(e)
            })?;

        let (etag, writer) = self.stream_chunk(&file, chunk_id, data, writer).await?;

        let _guard = self.locks.lock(file_id).await;
        let current = match self.metadata.refresh_file_metadata(file_id).await {
            Ok(current) => current,
            Err(e) => {
                abort_quietly(writer).await;
                return Err(e);
            }
        };
        if current.status.is_terminal() {
            abort_quietly(writer).await;
            warn!(file_id, chunk_id, "Discarding chunk uploaded after merge");
            return Err(UploadError::AlreadyMerged(file_id.to_string()));
        }

        let size = writer.finish().await.map_err(|e| {
            error!(file_id, chunk_id, error = %e, "Failed to commit chunk");
            UploadError::StorageFailure(e)
        })?;

        let chunk = ChunkMetadata {
            file_id: file_id.to_string(),
            chunk_id,
            etag,
            size,
            storage_path,
        };
        self.metadata.save_chunk_metadata(&chunk).await?;

        info!(file_id, chunk_id, size, etag = %chunk.etag, "Chunk uploaded");
        Ok(chunk)
    }

    /// Copies the body into `writer` and returns its fingerprint with the still
    /// uncommitted writer. The writer is aborted on every failure.
    async fn stream_chunk<R>(
        &self,
        file: &FileMetadata,
        chunk_id: u32,
        data: &mut R,
        mut writer: Box<dyn BlobWriter>,
    ) -> Result<(String, Box<dyn BlobWriter>)>
    where
        R: AsyncRead + Unpin + Send + ?Sized,
    {
        let mut buffer = self.buffers.acquire();
        let mut hasher = Sha256::new();
        let mut size: u64 = 0;

        loop {
            let n = match data.read(&mut buffer[..]).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => {
                    abort_quietly(writer).await;
                    error!(file_id = %file.file_id, chunk_id, error = %e, "Failed to read chunk body");
                    return Err(UploadError::StorageFailure(StorageError::Io(e)));
                }
            };

            size += n as u64;
            if file.chunk_size > 0 && size > file.chunk_size {
                abort_quietly(writer).await;
                return Err(UploadError::ChunkTooLarge {
                    file_id: file.file_id.clone(),
                    chunk_id,
                    limit: file.chunk_size,
                });
            }

            hasher.update(&buffer[..n]);
            if let Err(e) = writer.write(Bytes::copy_from_slice(&buffer[..n])).await {
                abort_quietly(writer).await;
                error!(file_id = %file.file_id, chunk_id, error = %e, "Failed to write chunk");
                return Err(UploadError::StorageFailure(e));
            }
        }

        Ok((hex::encode(hasher.finalize()), writer))
    }

    /// Assembles all chunks of a file in sequence order and marks it merged.
    ///
    /// Chunk reads run on the task pool; writes to the assembled object happen
    /// strictly in ascending chunk order. At most one merge per file succeeds.
    pub async fn merge_chunks(&self, file_id: &str, user_id: &str) -> Result<MergedObject> {
        let _guard = self.locks.lock(file_id).await;

        let file = self.metadata.refresh_file_metadata(file_id).await?;
        if file.status.is_terminal() {
            return Err(UploadError::AlreadyMerged(file_id.to_string()));
        }
        authorize(&file, user_id)?;

        let mut chunks = self.metadata.list_chunks(file_id).await?;
        if chunks.len() != file.chunk_count as usize {
            warn!(
                file_id,
                expected = file.chunk_count,
                actual = chunks.len(),
                "Refusing to merge incomplete upload"
            );
            return Err(UploadError::ChunkCountMismatch {
                file_id: file_id.to_string(),
                expected: file.chunk_count,
                actual: chunks.len(),
            });
        }
        chunks.sort_by_key(|c| c.chunk_id);
        if let Some(stray) = chunks.iter().find(|c| c.chunk_id >= file.chunk_count) {
            return Err(UploadError::InvalidChunk {
                file_id: file_id.to_string(),
                chunk_id: stray.chunk_id,
                chunk_count: file.chunk_count,
            });
        }

        let storage_path = assembled_key(&file.user_id, file_id, file.chunk_count);
        let size = self.assemble(file_id, &chunks, &storage_path).await?;
        if size != file.total_size {
            warn!(file_id, declared = file.total_size, assembled = size, "Assembled size differs from declared size");
        }

        self.metadata
            .update_file_status(file_id, FileStatus::Merged)
            .await?;

        info!(file_id, chunks = chunks.len(), size, "File merged");
        Ok(MergedObject {
            file_id: file_id.to_string(),
            storage_path,
            size,
        })
    }

    async fn assemble(&self, file_id: &str, chunks: &[ChunkMetadata], dest: &str) -> Result<u64> {
        let mut writer = self.blobs.put_stream(&self.bucket, dest).await?;
        match self.copy_in_order(file_id, chunks, writer.as_mut()).await {
            Ok(()) => Ok(writer.finish().await?),
            Err(e) => {
                abort_quietly(writer).await;
                Err(e)
            }
        }
    }

    async fn copy_in_order(
        &self,
        file_id: &str,
        chunks: &[ChunkMetadata],
        writer: &mut dyn BlobWriter,
    ) -> Result<()> {
        let mut pending: VecDeque<(u32, oneshot::Receiver<Result<Bytes>>)> = VecDeque::new();

        for chunk in chunks {
            if pending.len() >= self.read_ahead {
                if let Some((chunk_id, reply)) = pending.pop_front() {
                    write_next(file_id, chunk_id, reply, writer).await?;
                }
            }

            loop {
                let (tx, rx) = oneshot::channel();
                let task = read_chunk_task(
                    Arc::clone(&self.blobs),
                    self.bucket.clone(),
                    chunk.clone(),
                    tx,
                );
                match self.workers.submit(task) {
                    Ok(()) => {
                        pending.push_back((chunk.chunk_id, rx));
                        break;
                    }
                    Err(PoolError::QueueFull) => match pending.pop_front() {
                        Some((chunk_id, reply)) => {
                            write_next(file_id, chunk_id, reply, writer).await?
                        }
                        None => tokio::time::sleep(QUEUE_FULL_BACKOFF).await,
                    },
                    Err(e) => return Err(e.into()),
                }
            }
        }

        while let Some((chunk_id, reply)) = pending.pop_front() {
            write_next(file_id, chunk_id, reply, writer).await?;
        }
        Ok(())
    }
}

fn authorize(file: &FileMetadata, user_id: &str) -> Result<()> {
    if file.is_owned_by(user_id) {
        Ok(())
    } else {
        warn!(file_id = %file.file_id, user_id, "Caller does not own file");
        Err(UploadError::PermissionDenied {
            file_id: file.file_id.clone(),
            user_id: user_id.to_string(),
        })
    }
}

async fn write_next(
    file_id: &str,
    chunk_id: u32,
    reply: oneshot::Receiver<Result<Bytes>>,
    writer: &mut dyn BlobWriter,
) -> Result<()> {
    // A dropped sender means the task never reported back.
    let data = reply.await.map_err(|_| UploadError::WorkerFault {
        file_id: file_id.to_string(),
        chunk_id,
    })??;
    writer.write(data).await?;
    debug!(file_id, chunk_id, "Chunk appended to assembled object");
    Ok(())
}

fn read_chunk_task(
    blobs: Arc<dyn BlobStore>,
    bucket: String,
    chunk: ChunkMetadata,
    reply: oneshot::Sender<Result<Bytes>>,
) -> impl Future<Output = anyhow::Result<()>> + Send + 'static {
    async move {
        let result = read_verified(blobs.as_ref(), &bucket, &chunk).await;
        let failure = result.as_ref().err().map(|e| e.to_string());
        // The merge may have given up already; nobody is listening then.
        let _ = reply.send(result);
        match failure {
            Some(message) => Err(anyhow::anyhow!(message)),
            None => Ok(()),
        }
    }
}

async fn read_verified(blobs: &dyn BlobStore, bucket: &str, chunk: &ChunkMetadata) -> Result<Bytes> {
    let data = blobs.get(bucket, &chunk.storage_path).await?;
    let actual = fingerprint(&data);
    if actual != chunk.etag {
        return Err(UploadError::FingerprintMismatch {
            file_id: chunk.file_id.clone(),
            chunk_id: chunk.chunk_id,
            expected: chunk.etag.clone(),
            actual,
        });
    }
    Ok(data)
}

async fn abort_quietly(writer: Box<dyn BlobWriter>) {
    if let Err(e) = writer.abort().await {
        warn!(error = %e, "Failed to abort blob write");
    }
}
