//! Reusable sample buffers
//!
//! Capture and compositing produce a buffer per frame. Buffers come from a
//! `BufferPool` and go back to it when the owning `MediaSample` is dropped,
//! so steady-state capture does not allocate.

use parking_lot::Mutex;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

struct PoolInner {
    buffer_len: usize,
    max_idle: usize,
    idle: Mutex<Vec<Vec<u8>>>,
    allocated: AtomicUsize,
}

/// A pool of fixed-size byte buffers
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool handing out buffers of `buffer_len` bytes, keeping at
    /// most `max_idle` returned buffers around for reuse
    pub fn new(buffer_len: usize, max_idle: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffer_len,
                max_idle,
                idle: Mutex::new(Vec::with_capacity(max_idle)),
                allocated: AtomicUsize::new(0),
            }),
        }
    }

    /// Size of every buffer handed out by this pool
    pub fn buffer_len(&self) -> usize {
        self.inner.buffer_len
    }

    /// Take a buffer from the pool, allocating if none is idle.
    ///
    /// Reused buffers keep their previous contents.
    pub fn acquire(&self) -> PooledBuffer {
        let reused = self.inner.idle.lock().pop();
        let data = match reused {
            Some(data) => data,
            None => {
                self.inner.allocated.fetch_add(1, Ordering::Relaxed);
                vec![0u8; self.inner.buffer_len]
            }
        };
        PooledBuffer {
            data,
            pool: Arc::downgrade(&self.inner),
        }
    }

    /// Total buffers ever allocated by this pool
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }

    /// Buffers currently waiting for reuse
    pub fn idle(&self) -> usize {
        self.inner.idle.lock().len()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_len", &self.inner.buffer_len)
            .field("allocated", &self.allocated())
            .field("idle", &self.idle())
            .finish()
    }
}

/// A byte buffer that returns to its pool on drop
pub struct PooledBuffer {
    data: Vec<u8>,
    pool: Weak<PoolInner>,
}

impl PooledBuffer {
    /// Wrap a one-off buffer that belongs to no pool
    pub fn detached(data: Vec<u8>) -> Self {
        Self {
            data,
            pool: Weak::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.data.len())
            .field("pooled", &(self.pool.strong_count() > 0))
            .finish()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        let Some(pool) = self.pool.upgrade() else {
            return;
        };
        if self.data.len() != pool.buffer_len {
            return;
        }
        let mut idle = pool.idle.lock();
        if idle.len() < pool.max_idle {
            idle.push(std::mem::take(&mut self.data));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffers_are_reused() {
        let pool = BufferPool::new(16, 4);
        {
            let mut a = pool.acquire();
            a[0] = 7;
            let _b = pool.acquire();
        }
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.idle(), 2);

        let c = pool.acquire();
        assert_eq!(c.len(), 16);
        assert_eq!(pool.allocated(), 2);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_idle_cap_is_respected() {
        let pool = BufferPool::new(8, 1);
        let a = pool.acquire();
        let b = pool.acquire();
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_detached_buffer_outlives_nothing() {
        let buf = PooledBuffer::detached(vec![1, 2, 3]);
        assert_eq!(&buf[..], &[1, 2, 3]);
        drop(buf);
    }
}
