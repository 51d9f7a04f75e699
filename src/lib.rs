pub mod chunk;
pub mod config;
pub mod error;
pub mod metadata;
pub mod pool;
pub mod storage;

mod types;

pub use chunk::{fingerprint, ChunkUploadService, MergedObject};
pub use config::UploadConfig;
pub use error::{Result, UploadError};
pub use types::*;
