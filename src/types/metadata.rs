use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Uploading,
    Merged,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Uploading => "uploading",
            FileStatus::Merged => "merged",
        }
    }

    /// `merged` is terminal.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Merged)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "uploading" => Ok(FileStatus::Uploading),
            "merged" => Ok(FileStatus::Merged),
            other => Err(format!("unknown file status: {}", other)),
        }
    }
}

/// A logical file being uploaded in chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_id: String,
    pub file_name: String,
    pub total_size: u64,
    pub chunk_count: u32,
    pub chunk_size: u64,
    pub status: FileStatus,
    pub user_id: String,
    /// Unix seconds; zero means "not yet stamped".
    pub create_at: i64,
    pub update_at: i64,
}

impl FileMetadata {
    pub fn new(
        file_id: impl Into<String>,
        file_name: impl Into<String>,
        user_id: impl Into<String>,
        total_size: u64,
        chunk_count: u32,
        chunk_size: u64,
    ) -> Self {
        Self {
            file_id: file_id.into(),
            file_name: file_name.into(),
            total_size,
            chunk_count,
            chunk_size,
            status: FileStatus::Pending,
            user_id: user_id.into(),
            create_at: 0,
            update_at: 0,
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.user_id == user_id
    }
}
