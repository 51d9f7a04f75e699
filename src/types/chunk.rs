use serde::{Deserialize, Serialize};

/// One uploaded chunk of a file. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub file_id: String,
    pub chunk_id: u32,
    /// Lower-case hex SHA-256 of the stored bytes.
    pub etag: String,
    pub size: u64,
    pub storage_path: String,
}

/// Object key of a chunk: `{owner}{file_id}/chunk_{seq}`.
pub fn chunk_storage_key(owner: &str, file_id: &str, chunk_id: u32) -> String {
    format!("{}{}/chunk_{}", owner, file_id, chunk_id)
}

/// Object key of the assembled file, the slot right after the last chunk.
pub fn assembled_key(owner: &str, file_id: &str, chunk_count: u32) -> String {
    chunk_storage_key(owner, file_id, chunk_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_key_layout() {
        assert_eq!(chunk_storage_key("alice", "f1", 0), "alicef1/chunk_0");
        assert_eq!(chunk_storage_key("alice", "f1", 12), "alicef1/chunk_12");
    }

    #[test]
    fn test_assembled_key_uses_chunk_count_slot() {
        assert_eq!(assembled_key("bob", "f2", 3), "bobf2/chunk_3");
    }
}
