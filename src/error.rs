use thiserror::Error;

/// Blob store errors.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Object not found: {0}")]
    NotFound(String),
    #[error("Invalid key: {0}")]
    InvalidKey(String),
}

/// Durable metadata store errors.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Conflicting update: {0}")]
    Conflict(String),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

/// Volatile cache errors. These never leave the metadata layer.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Cache unavailable: {0}")]
    Unavailable(String),
}

/// Task pool errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PoolError {
    #[error("task queue is full")]
    QueueFull,
    #[error("task pool is shut down")]
    Closed,
    #[error("task pool has not been started")]
    NotRunning,
}

/// Caller-facing errors of the upload pipeline.
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Permission denied: user {user_id} does not own file {file_id}")]
    PermissionDenied { file_id: String, user_id: String },
    #[error("File already merged: {0}")]
    AlreadyMerged(String),
    #[error("Chunk count mismatch for file {file_id}: expected {expected}, found {actual}")]
    ChunkCountMismatch {
        file_id: String,
        expected: u32,
        actual: usize,
    },
    #[error("Invalid chunk {chunk_id} for file {file_id}: file has {chunk_count} chunks")]
    InvalidChunk {
        file_id: String,
        chunk_id: u32,
        chunk_count: u32,
    },
    #[error("Chunk {chunk_id} of file {file_id} exceeds the declared chunk size of {limit} bytes")]
    ChunkTooLarge {
        file_id: String,
        chunk_id: u32,
        limit: u64,
    },
    #[error("Fingerprint mismatch for chunk {chunk_id} of file {file_id}: expected {expected}, got {actual}")]
    FingerprintMismatch {
        file_id: String,
        chunk_id: u32,
        expected: String,
        actual: String,
    },
    #[error("Storage failure: {0}")]
    StorageFailure(#[from] StorageError),
    #[error("Metadata write failed: {0}")]
    MetadataWriteFailure(#[source] MetadataError),
    #[error("Metadata read failed: {0}")]
    MetadataReadFailure(#[source] MetadataError),
    #[error("Task queue is full")]
    QueueFull,
    #[error("Worker fault while processing chunk {chunk_id} of file {file_id}")]
    WorkerFault { file_id: String, chunk_id: u32 },
    #[error("Task pool unavailable: {0}")]
    PoolUnavailable(PoolError),
}

impl UploadError {
    /// Stable machine-readable code for each failure kind.
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::NotFound(_) => "not_found",
            UploadError::PermissionDenied { .. } => "permission_denied",
            UploadError::AlreadyMerged(_) => "already_merged",
            UploadError::ChunkCountMismatch { .. } => "chunk_count_mismatch",
            UploadError::InvalidChunk { .. } => "invalid_chunk",
            UploadError::ChunkTooLarge { .. } => "chunk_too_large",
            UploadError::FingerprintMismatch { .. } => "fingerprint_mismatch",
            UploadError::StorageFailure(_) => "storage_failure",
            UploadError::MetadataWriteFailure(_) => "metadata_write_failure",
            UploadError::MetadataReadFailure(_) => "metadata_read_failure",
            UploadError::QueueFull => "queue_full",
            UploadError::WorkerFault { .. } => "worker_fault",
            UploadError::PoolUnavailable(_) => "pool_unavailable",
        }
    }
}

impl From<PoolError> for UploadError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::QueueFull => UploadError::QueueFull,
            other => UploadError::PoolUnavailable(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, UploadError>;
