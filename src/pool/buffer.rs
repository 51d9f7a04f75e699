use std::ops::{Deref, DerefMut};
use std::sync::{Mutex, MutexGuard};

/// Reusable staging buffers for streaming chunk bytes.
///
/// A buffer is checked out with [`BufferPool::acquire`] and is owned exclusively
/// by the returned guard until the guard is dropped, on every exit path.
pub struct BufferPool {
    buffer_size: usize,
    max_pooled: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            buffer_size: buffer_size.max(1),
            max_pooled,
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Number of idle buffers waiting for reuse.
    pub fn available(&self) -> usize {
        self.lock_free().len()
    }

    pub fn acquire(&self) -> PooledBuffer<'_> {
        let buf = self
            .lock_free()
            .pop()
            .unwrap_or_else(|| vec![0u8; self.buffer_size]);
        PooledBuffer { pool: self, buf: Some(buf) }
    }

    fn release(&self, buf: Vec<u8>) {
        if buf.len() != self.buffer_size {
            return;
        }
        let mut free = self.lock_free();
        if free.len() < self.max_pooled {
            free.push(buf);
        }
    }

    fn lock_free(&self) -> MutexGuard<'_, Vec<Vec<u8>>> {
        self.free.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A checked-out buffer; returns itself to the pool on drop.
pub struct PooledBuffer<'a> {
    pool: &'a BufferPool,
    buf: Option<Vec<u8>>,
}

impl Deref for PooledBuffer<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer<'_> {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}
