use std::collections::HashMap;
use std::sync::Arc;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use super::cache::{CacheResult, MetadataCache};
use super::store::MetadataStore;
use crate::error::{MetadataError, Result, UploadError};
use crate::types::{ChunkMetadata, FileMetadata, FileStatus};

/// Cache-aside access to file and chunk metadata.
///
/// Every operation has two result channels: the durable store result, which is
/// returned to the caller, and the cache result, which is advisory and only logged.
#[derive(Clone)]
pub struct MetadataService {
    store: Arc<dyn MetadataStore>,
    cache: Arc<dyn MetadataCache>,
}

impl MetadataService {
    pub fn new(store: Arc<dyn MetadataStore>, cache: Arc<dyn MetadataCache>) -> Self {
        Self { store, cache }
    }

    pub async fn create_file_metadata(&self, file: &mut FileMetadata) -> Result<()> {
        let now = Utc::now().timestamp();
        if file.create_at == 0 {
            file.create_at = now;
        }
        if file.update_at == 0 {
            file.update_at = now;
        }

        if let Err(e) = self.store.insert_file(file).await {
            error!(file_id = %file.file_id, error = %e, "Failed to insert file metadata");
            return Err(UploadError::MetadataWriteFailure(e));
        }

        self.advisory("set", &file.file_id, self.cache.set(file).await);

        info!(file_id = %file.file_id, status = %file.status, "File metadata created");
        Ok(())
    }

    pub async fn get_file_metadata(&self, file_id: &str) -> Result<FileMetadata> {
        if let Some(Some(file)) = self.advisory("get", file_id, self.cache.get(file_id).await) {
            debug!(file_id, "File metadata served from cache");
            return Ok(file);
        }

        let file = self.store.get_file(file_id).await.map_err(|e| match e {
            MetadataError::NotFound(_) => UploadError::NotFound(file_id.to_string()),
            other => {
                error!(file_id, error = %other, "Failed to read file metadata");
                UploadError::MetadataReadFailure(other)
            }
        })?;

        self.advisory("set", file_id, self.cache.set(&file).await);
        debug!(file_id, "File metadata served from database");
        Ok(file)
    }

    /// Looks up several files; ids unknown to the durable store are omitted.
    pub async fn batch_get_file_metadata(
        &self,
        file_ids: &[String],
    ) -> Result<HashMap<String, FileMetadata>> {
        let mut found = self
            .advisory("batch_get", "*", self.cache.batch_get(file_ids).await)
            .unwrap_or_default();

        for file_id in file_ids {
            if found.contains_key(file_id) {
                continue;
            }
            match self.store.get_file(file_id).await {
                Ok(file) => {
                    self.advisory("set", file_id, self.cache.set(&file).await);
                    found.insert(file_id.clone(), file);
                }
                Err(MetadataError::NotFound(_)) => {}
                Err(e) => {
                    error!(file_id = %file_id, error = %e, "Failed to read file metadata");
                    return Err(UploadError::MetadataReadFailure(e));
                }
            }
        }
        Ok(found)
    }

    /// Reads the durable record, bypassing the cache, and refreshes the cached copy.
    pub async fn refresh_file_metadata(&self, file_id: &str) -> Result<FileMetadata> {
        let file = self.store.get_file(file_id).await.map_err(|e| match e {
            MetadataError::NotFound(_) => UploadError::NotFound(file_id.to_string()),
            other => {
                error!(file_id, error = %other, "Failed to read file metadata");
                UploadError::MetadataReadFailure(other)
            }
        })?;
        self.advisory("set", file_id, self.cache.set(&file).await);
        Ok(file)
    }

    /// Chunk metadata is only read in bulk at merge time, so it bypasses the cache.
    /// The write is refused once the file is merged.
    pub async fn save_chunk_metadata(&self, chunk: &ChunkMetadata) -> Result<()> {
        match self.store.insert_chunk(chunk).await {
            Ok(()) => {
                debug!(file_id = %chunk.file_id, chunk_id = chunk.chunk_id, "Chunk metadata saved");
                Ok(())
            }
            Err(MetadataError::Conflict(_)) => {
                self.advisory("delete", &chunk.file_id, self.cache.delete(&chunk.file_id).await);
                Err(UploadError::AlreadyMerged(chunk.file_id.clone()))
            }
            Err(MetadataError::NotFound(_)) => Err(UploadError::NotFound(chunk.file_id.clone())),
            Err(e) => {
                error!(
                    file_id = %chunk.file_id,
                    chunk_id = chunk.chunk_id,
                    error = %e,
                    "Failed to save chunk metadata"
                );
                Err(UploadError::MetadataWriteFailure(e))
            }
        }
    }

    pub async fn list_chunks(&self, file_id: &str) -> Result<Vec<ChunkMetadata>> {
        self.store.list_chunks(file_id).await.map_err(|e| {
            error!(file_id, error = %e, "Failed to list chunk metadata");
            UploadError::MetadataReadFailure(e)
        })
    }

    /// Writes the status, then drops the cached entry so the next read refreshes.
    pub async fn update_file_status(&self, file_id: &str, status: FileStatus) -> Result<()> {
        let result = self
            .store
            .update_file_status(file_id, status, Utc::now().timestamp())
            .await;

        // A conflict means the stored status moved on; any cached copy is stale too.
        if matches!(result, Ok(()) | Err(MetadataError::Conflict(_))) {
            self.advisory("delete", file_id, self.cache.delete(file_id).await);
        }

        match result {
            Ok(()) => {
                info!(file_id, status = %status, "File status updated");
                Ok(())
            }
            Err(MetadataError::Conflict(_)) => Err(UploadError::AlreadyMerged(file_id.to_string())),
            Err(MetadataError::NotFound(_)) => Err(UploadError::NotFound(file_id.to_string())),
            Err(e) => {
                error!(file_id, status = %status, error = %e, "Failed to update file status");
                Err(UploadError::MetadataWriteFailure(e))
            }
        }
    }

    pub async fn health_check(&self) -> Result<()> {
        self.store
            .health_check()
            .await
            .map_err(UploadError::MetadataReadFailure)
    }

    fn advisory<T>(&self, op: &'static str, file_id: &str, result: CacheResult<T>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(file_id, op, error = %e, "Metadata cache operation failed");
                None
            }
        }
    }
}
