//! Per-source frame buffer pool
//!
//! Every camera owns a fixed number of frame buffers. A buffer leaves the pool
//! when the backend fills it with a frame and goes back when the last consumer
//! drops the frame, so release happens on every exit path. When consumers hold
//! on to frames the pool runs dry and the backend has to drop new frames.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

struct PoolInner {
    free: Mutex<Vec<Vec<u8>>>,
    buffer_len: usize,
    capacity: usize,
    outstanding: AtomicUsize,
}

/// Fixed-size pool of equally sized byte buffers.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    pub fn new(capacity: usize, buffer_len: usize) -> Self {
        let capacity = capacity.max(1);
        let free = (0..capacity).map(|_| vec![0u8; buffer_len]).collect();
        Self {
            inner: Arc::new(PoolInner {
                free: Mutex::new(free),
                buffer_len,
                capacity,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Take a buffer out of the pool, or `None` if every buffer is in use.
    pub fn try_acquire(&self) -> Option<PooledBuffer> {
        let data = self
            .inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()?;
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        Some(PooledBuffer {
            data,
            pool: Some(self.inner.clone()),
        })
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn buffer_len(&self) -> usize {
        self.inner.buffer_len
    }

    /// Buffers currently held by frames.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    pub fn available(&self) -> usize {
        self.inner
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// A buffer on loan from a [`BufferPool`]. Dropping it returns the buffer.
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Option<Arc<PoolInner>>,
}

impl PooledBuffer {
    /// A buffer that belongs to no pool, for frames built outside a backend.
    pub fn detached(data: Vec<u8>) -> Self {
        Self { data, pool: None }
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.data
    }
}

impl std::fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .field("pooled", &self.pool.is_some())
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        let mut data = std::mem::take(&mut self.data);
        // Consumers may have resized the buffer; restore it before reuse.
        data.resize(pool.buffer_len, 0);
        let mut free = pool.free.lock().unwrap_or_else(PoisonError::into_inner);
        if free.len() < pool.capacity {
            free.push(data);
        }
        pool.outstanding.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_exhaustion_and_release() {
        let pool = BufferPool::new(2, 16);
        let a = pool.try_acquire().expect("first buffer");
        let b = pool.try_acquire().expect("second buffer");
        assert!(pool.try_acquire().is_none(), "pool should be exhausted");
        assert_eq!(pool.outstanding(), 2);

        drop(a);
        assert_eq!(pool.outstanding(), 1);
        assert_eq!(pool.available(), 1);

        let c = pool.try_acquire().expect("released buffer is reusable");
        assert_eq!(c.len(), 16);
        drop(b);
        drop(c);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_resized_buffer_is_restored() {
        let pool = BufferPool::new(1, 8);
        let mut buffer = pool.try_acquire().unwrap();
        buffer.truncate(2);
        drop(buffer);

        let buffer = pool.try_acquire().unwrap();
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn test_detached_buffer_does_not_touch_pool() {
        let pool = BufferPool::new(1, 4);
        let detached = PooledBuffer::detached(vec![1, 2, 3]);
        assert_eq!(&detached[..], &[1, 2, 3]);
        drop(detached);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_release_from_other_thread() {
        let pool = BufferPool::new(1, 4);
        let buffer = pool.try_acquire().unwrap();
        std::thread::spawn(move || drop(buffer)).join().unwrap();
        assert_eq!(pool.outstanding(), 0);
        assert!(pool.try_acquire().is_some());
    }
}
