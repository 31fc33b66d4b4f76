//! Receive buffer pool.
//!
//! Buffers are checked out as [`PooledBuffer`] guards and go back to the pool
//! when the guard is dropped, so every checkout is returned exactly once no
//! matter which path releases it (delivered, dropped on a full queue, or
//! discarded during eviction).

use crossbeam_queue::ArrayQueue;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

struct PoolInner {
    free: ArrayQueue<Vec<u8>>,
    buffer_size: usize,
}

/// Bounded pool of fixed-size byte buffers.
///
/// Cloning the pool yields another handle onto the same free list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool handing out buffers of `buffer_size` bytes and retaining
    /// at most `max_pooled` idle buffers.
    ///
    /// # Panics
    ///
    /// Panics if `max_pooled` is zero.
    #[must_use]
    pub fn new(buffer_size: usize, max_pooled: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: ArrayQueue::new(max_pooled),
                buffer_size,
            }),
        }
    }

    /// Check out a buffer sized to [`Self::buffer_size`].
    ///
    /// Reuses an idle buffer when one is available, otherwise allocates.
    #[must_use]
    pub fn checkout(&self) -> PooledBuffer {
        let mut buf = self
            .inner
            .free
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.inner.buffer_size));
        buf.resize(self.inner.buffer_size, 0);
        PooledBuffer {
            buf: Some(buf),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Size of every checked-out buffer
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Number of idle buffers currently held by the pool
    #[must_use]
    pub fn available(&self) -> usize {
        self.inner.free.len()
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("buffer_size", &self.inner.buffer_size)
            .field("available", &self.available())
            .field("capacity", &self.inner.free.capacity())
            .finish()
    }
}

/// A buffer checked out of a [`BufferPool`].
///
/// Dereferences to the valid bytes. Returned to the pool on drop; if the pool
/// is already full the buffer is freed instead.
pub struct PooledBuffer {
    buf: Option<Vec<u8>>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// Shorten the valid region to `len` bytes (e.g. after a receive).
    pub fn truncate(&mut self, len: usize) {
        if let Some(buf) = self.buf.as_mut() {
            buf.truncate(len);
        }
    }
}

impl Deref for PooledBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.buf.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            // Full pool: let the allocation go.
            let _ = self.pool.free.push(buf);
        }
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .finish()
    }
}
