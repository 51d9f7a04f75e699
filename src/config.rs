use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 24 * 60 * 60;

/// Tunables consumed by the upload core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct UploadConfig {
    pub worker_count: usize,
    pub queue_capacity: usize,
    /// Size of each pooled staging buffer.
    pub chunk_size: usize,
    pub max_pooled_buffers: usize,
    pub cache_ttl_secs: u64,
    pub cache_capacity: usize,
    pub bucket: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            queue_capacity: 1000,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_pooled_buffers: 64,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            cache_capacity: 10_000,
            bucket: "cloudstor".to_string(),
        }
    }
}

impl UploadConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be at least 1".to_string());
        }
        if self.queue_capacity == 0 {
            return Err("queue_capacity must be at least 1".to_string());
        }
        if self.chunk_size == 0 {
            return Err("chunk_size must be at least 1".to_string());
        }
        if self.cache_capacity == 0 {
            return Err("cache_capacity must be at least 1".to_string());
        }
        if self.bucket.trim().is_empty() {
            return Err("bucket must not be empty".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = UploadConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_rejects_zero_workers_and_queue() {
        let config = UploadConfig { worker_count: 0, ..Default::default() };
        assert!(config.validate().unwrap_err().contains("worker_count"));

        let config = UploadConfig { queue_capacity: 0, ..Default::default() };
        assert!(config.validate().unwrap_err().contains("queue_capacity"));
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: UploadConfig = serde_json::from_str(r#"{"worker_count": 4}"#).unwrap();
        assert_eq!(config.worker_count, 4);
        assert_eq!(config.queue_capacity, 1000);
        assert_eq!(config.bucket, "cloudstor");
    }
}
