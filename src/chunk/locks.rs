use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Per-file async locks. Entries are dropped once nobody holds or waits on them.
#[derive(Default)]
pub(crate) struct FileLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl FileLocks {
    pub(crate) async fn lock(&self, file_id: &str) -> FileLockGuard<'_> {
        let lock = {
            let mut locks = self.lock_map();
            Arc::clone(locks.entry(file_id.to_string()).or_default())
        };
        let guard = lock.lock_owned().await;
        FileLockGuard {
            owner: self,
            file_id: file_id.to_string(),
            _guard: guard,
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.lock_map().len()
    }

    fn lock_map(&self) -> MutexGuard<'_, HashMap<String, Arc<AsyncMutex<()>>>> {
        self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub(crate) struct FileLockGuard<'a> {
    owner: &'a FileLocks,
    file_id: String,
    _guard: OwnedMutexGuard<()>,
}

impl Drop for FileLockGuard<'_> {
    fn drop(&mut self) {
        let mut locks = self.owner.lock_map();
        // One reference in the map, one held by our own guard.
        if let Some(lock) = locks.get(&self.file_id) {
            if Arc::strong_count(lock) <= 2 {
                locks.remove(&self.file_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_entry_is_removed_after_release() {
        let locks = FileLocks::default();
        {
            let _guard = locks.lock("f1").await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_same_file_is_serialized() {
        let locks = Arc::new(FileLocks::default());
        let active = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let locks = Arc::clone(&locks);
            let active = Arc::clone(&active);
            let max_seen = Arc::clone(&max_seen);
            handles.push(tokio::spawn(async move {
                let _guard = locks.lock("f1").await;
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn test_different_files_do_not_block() {
        let locks = FileLocks::default();
        let _a = locks.lock("f1").await;
        let _b = tokio::time::timeout(Duration::from_millis(100), locks.lock("f2"))
            .await
            .expect("lock on another file should not wait");
        assert_eq!(locks.len(), 2);
    }
}
