mod metadata;
mod chunk;

pub use chunk::{assembled_key, chunk_storage_key, ChunkMetadata};
pub use metadata::{FileMetadata, FileStatus};
