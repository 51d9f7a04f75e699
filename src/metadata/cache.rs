use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::Mutex;

use crate::error::CacheError;
use crate::types::FileMetadata;

pub type CacheResult<T> = std::result::Result<T, CacheError>;

const KEY_PREFIX: &str = "file:metadata:";

/// Volatile file-metadata cache. Purely an optimization over the durable store.
#[async_trait]
pub trait MetadataCache: Send + Sync + 'static {
    /// `Ok(None)` is a miss.
    async fn get(&self, file_id: &str) -> CacheResult<Option<FileMetadata>>;
    async fn set(&self, file: &FileMetadata) -> CacheResult<()>;
    async fn delete(&self, file_id: &str) -> CacheResult<()>;
    /// Returns only the ids that were live hits.
    async fn batch_get(&self, file_ids: &[String]) -> CacheResult<HashMap<String, FileMetadata>>;
}

struct CacheEntry {
    payload: String,
    expires_at: Instant,
}

/// Bounded in-process cache storing serialized metadata with a fixed expiry.
pub struct LruMetadataCache {
    cache: Arc<Mutex<LruCache<String, CacheEntry>>>,
    ttl: Duration,
}

impl LruMetadataCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub async fn len(&self) -> usize {
        self.cache.lock().await.len()
    }

    fn key(file_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, file_id)
    }

    fn lookup(
        cache: &mut LruCache<String, CacheEntry>,
        key: &str,
        now: Instant,
    ) -> CacheResult<Option<FileMetadata>> {
        let expired = match cache.get(key) {
            None => return Ok(None),
            Some(entry) if entry.expires_at > now => {
                return Ok(Some(serde_json::from_str(&entry.payload)?));
            }
            Some(_) => true,
        };
        if expired {
            cache.pop(key);
        }
        Ok(None)
    }
}

#[async_trait]
impl MetadataCache for LruMetadataCache {
    async fn get(&self, file_id: &str) -> CacheResult<Option<FileMetadata>> {
        let mut cache = self.cache.lock().await;
        Self::lookup(&mut cache, &Self::key(file_id), Instant::now())
    }

    async fn set(&self, file: &FileMetadata) -> CacheResult<()> {
        let payload = serde_json::to_string(file)?;
        let entry = CacheEntry {
            payload,
            expires_at: Instant::now() + self.ttl,
        };
        let mut cache = self.cache.lock().await;
        cache.put(Self::key(&file.file_id), entry);
        Ok(())
    }

    async fn delete(&self, file_id: &str) -> CacheResult<()> {
        let mut cache = self.cache.lock().await;
        cache.pop(&Self::key(file_id));
        Ok(())
    }

    async fn batch_get(&self, file_ids: &[String]) -> CacheResult<HashMap<String, FileMetadata>> {
        let now = Instant::now();
        let mut cache = self.cache.lock().await;
        let mut hits = HashMap::new();
        for file_id in file_ids {
            if let Some(file) = Self::lookup(&mut cache, &Self::key(file_id), now)? {
                hits.insert(file_id.clone(), file);
            }
        }
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample(file_id: &str) -> FileMetadata {
        FileMetadata::new(file_id, "a.bin", "alice", 10, 2, 5)
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let cache = LruMetadataCache::new(8, Duration::from_secs(60));
        assert!(cache.get("f1").await.unwrap().is_none());

        cache.set(&sample("f1")).await.unwrap();
        assert_eq!(cache.get("f1").await.unwrap(), Some(sample("f1")));

        cache.delete("f1").await.unwrap();
        assert!(cache.get("f1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expired_entries_are_misses() {
        let cache = LruMetadataCache::new(8, Duration::from_millis(20));
        cache.set(&sample("f1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(cache.get("f1").await.unwrap().is_none());
        assert_eq!(cache.len().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let cache = LruMetadataCache::new(2, Duration::from_secs(60));
        cache.set(&sample("f1")).await.unwrap();
        cache.set(&sample("f2")).await.unwrap();
        cache.get("f1").await.unwrap();
        cache.set(&sample("f3")).await.unwrap();
        assert!(cache.get("f2").await.unwrap().is_none());
        assert!(cache.get("f1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_batch_get_returns_hits_only() {
        let cache = LruMetadataCache::new(8, Duration::from_secs(60));
        cache.set(&sample("f1")).await.unwrap();
        cache.set(&sample("f3")).await.unwrap();
        let ids = vec!["f1".to_string(), "f2".to_string(), "f3".to_string()];
        let hits = cache.batch_get(&ids).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.contains_key("f1"));
        assert!(!hits.contains_key("f2"));
    }

    proptest! {
        #[test]
        fn prop_most_recent_entries_survive(capacity in 1usize..8, inserts in 1usize..20) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            runtime.block_on(async {
                let cache = LruMetadataCache::new(capacity, Duration::from_secs(60));
                for i in 0..inserts {
                    cache.set(&sample(&format!("f{}", i))).await.unwrap();
                }
                assert_eq!(cache.len().await, inserts.min(capacity));
                for i in 0..inserts {
                    let live = cache.get(&format!("f{}", i)).await.unwrap().is_some();
                    assert_eq!(live, i + capacity >= inserts);
                }
            });
        }
    }
}
