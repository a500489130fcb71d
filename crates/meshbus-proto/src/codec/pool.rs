//! Pool of reusable outbound buffers.
//!
//! Buffers move between threads through a lock-free queue. A
//! [`PooledBuffer`] owns its buffer until it is dropped or discarded, at
//! which point the buffer is cleared and pushed back, exactly once.

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;

struct PoolInner {
    free: ArrayQueue<BytesMut>,
    buffer_capacity: usize,
    outstanding: AtomicUsize,
}

/// Fixed-size pool of byte buffers.
///
/// Cloning the pool is cheap; all clones share the same free list.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool holding up to `slots` idle buffers of `buffer_capacity`
    /// bytes each.
    pub fn new(slots: usize, buffer_capacity: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                free: ArrayQueue::new(slots.max(1)),
                buffer_capacity,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Take a buffer from the pool, allocating if none are idle.
    pub fn acquire(&self) -> PooledBuffer {
        let buf = self
            .inner
            .free
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.inner.buffer_capacity));
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        PooledBuffer { buf: Some(buf), pool: Arc::clone(&self.inner) }
    }

    /// Idle buffers ready for reuse.
    pub fn available(&self) -> usize {
        self.inner.free.len()
    }

    /// Buffers currently held by [`PooledBuffer`] guards.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(256, 1024)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("available", &self.available())
            .field("outstanding", &self.outstanding())
            .finish()
    }
}

/// Scoped ownership of a pooled buffer.
///
/// The buffer returns to its pool when the guard is dropped, including on
/// early returns and when an in-flight send is cancelled. [`discard`] releases
/// it eagerly; further calls are no-ops.
///
/// [`discard`]: PooledBuffer::discard
pub struct PooledBuffer {
    buf: Option<BytesMut>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// Release the buffer back to the pool. Idempotent.
    pub fn discard(&mut self) {
        if let Some(mut buf) = self.buf.take() {
            buf.clear();
            self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);
            // A full free list drops the buffer instead of growing the pool.
            let _ = self.pool.free.push(buf);
        }
    }

    /// True once the buffer has been released.
    pub fn is_discarded(&self) -> bool {
        self.buf.is_none()
    }

    /// Mutable access to the buffer, or `None` after release.
    pub fn buffer_mut(&mut self) -> Option<&mut BytesMut> {
        self.buf.as_mut()
    }

    /// Contents written so far; empty after release.
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_deref().unwrap_or_default()
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.discard();
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.as_slice().len())
            .field("discarded", &self.is_discarded())
            .finish()
    }
}
