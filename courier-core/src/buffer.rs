//! Pooled I/O buffers
//!
//! Connections borrow read and write buffers from a [`BufferPool`]. A buffer is
//! handed out as a [`PooledBuffer`] guard and goes back to the pool when the
//! guard is dropped, so every exit path (normal close, error, shutdown)
//! releases it. [`BufferPool::outstanding`] counts live guards.

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Default number of idle buffers a pool retains
pub const DEFAULT_POOL_CAPACITY: usize = 1024;

/// Default size of a single I/O buffer
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Buffers grown beyond this multiple of the nominal size are not recycled
const MAX_RECYCLE_FACTOR: usize = 8;

/// Allocation policy for connection buffers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPolicy {
    /// Recycle buffers through a bounded free list
    Pooled {
        /// Maximum number of idle buffers kept for reuse
        capacity: usize,
        /// Initial size of each buffer
        buffer_size: usize,
    },
    /// Allocate a fresh buffer every time
    Unpooled {
        /// Initial size of each buffer
        buffer_size: usize,
    },
}

impl BufferPolicy {
    /// Initial size of each buffer
    pub fn buffer_size(&self) -> usize {
        match *self {
            BufferPolicy::Pooled { buffer_size, .. } => buffer_size,
            BufferPolicy::Unpooled { buffer_size } => buffer_size,
        }
    }

    /// Whether buffers are recycled
    pub fn is_pooled(&self) -> bool {
        matches!(self, BufferPolicy::Pooled { .. })
    }
}

impl Default for BufferPolicy {
    fn default() -> Self {
        BufferPolicy::Pooled {
            capacity: DEFAULT_POOL_CAPACITY,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

struct PoolInner {
    policy: BufferPolicy,
    free: Option<ArrayQueue<BytesMut>>,
    outstanding: AtomicUsize,
}

/// Shared buffer pool
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool following the given policy
    pub fn new(policy: BufferPolicy) -> Self {
        let free = match policy {
            BufferPolicy::Pooled { capacity, .. } => Some(ArrayQueue::new(capacity.max(1))),
            BufferPolicy::Unpooled { .. } => None,
        };

        Self {
            inner: Arc::new(PoolInner {
                policy,
                free,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Borrow a cleared buffer with at least the nominal capacity
    pub fn acquire(&self) -> PooledBuffer {
        let size = self.inner.policy.buffer_size();
        let mut buf = self
            .inner
            .free
            .as_ref()
            .and_then(|free| free.pop())
            .unwrap_or_else(|| BytesMut::with_capacity(size));
        buf.reserve(size);

        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        PooledBuffer {
            buf,
            pool: self.inner.clone(),
        }
    }

    /// Number of buffers currently borrowed
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Number of idle buffers waiting for reuse
    pub fn idle(&self) -> usize {
        self.inner.free.as_ref().map_or(0, |free| free.len())
    }

    /// The pool's allocation policy
    pub fn policy(&self) -> BufferPolicy {
        self.inner.policy
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(BufferPolicy::default())
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("policy", &self.inner.policy)
            .field("outstanding", &self.outstanding())
            .field("idle", &self.idle())
            .finish()
    }
}

/// A buffer borrowed from a [`BufferPool`]
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<PoolInner>,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.outstanding.fetch_sub(1, Ordering::AcqRel);

        let Some(free) = self.pool.free.as_ref() else {
            return;
        };
        let mut buf = std::mem::take(&mut self.buf);
        if buf.capacity() > self.pool.policy.buffer_size() * MAX_RECYCLE_FACTOR {
            return;
        }
        buf.clear();
        let _ = free.push(buf);
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BufMut;

    #[test]
    fn test_release_on_drop() {
        let pool = BufferPool::new(BufferPolicy::Pooled {
            capacity: 4,
            buffer_size: 256,
        });

        let mut a = pool.acquire();
        let b = pool.acquire();
        a.put_slice(b"payload");
        assert_eq!(pool.outstanding(), 2);
        assert_eq!(pool.idle(), 0);

        drop(a);
        drop(b);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 2);

        let reused = pool.acquire();
        assert!(reused.is_empty());
        assert!(reused.capacity() >= 256);
    }

    #[test]
    fn test_release_on_unwind() {
        let pool = BufferPool::default();
        let cloned = pool.clone();
        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
            let _buf = cloned.acquire();
            panic!("handler failure");
        }));

        assert!(result.is_err());
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_free_list_is_bounded() {
        let pool = BufferPool::new(BufferPolicy::Pooled {
            capacity: 1,
            buffer_size: 64,
        });
        let held: Vec<_> = (0..3).map(|_| pool.acquire()).collect();
        drop(held);

        assert_eq!(pool.idle(), 1);
        assert_eq!(pool.outstanding(), 0);
    }

    #[test]
    fn test_oversized_buffers_are_not_recycled() {
        let pool = BufferPool::new(BufferPolicy::Pooled {
            capacity: 4,
            buffer_size: 16,
        });
        let mut buf = pool.acquire();
        buf.reserve(16 * MAX_RECYCLE_FACTOR * 2);
        drop(buf);

        assert_eq!(pool.idle(), 0);
    }

    #[test]
    fn test_unpooled_tracks_outstanding() {
        let pool = BufferPool::new(BufferPolicy::Unpooled { buffer_size: 128 });
        let buf = pool.acquire();
        assert_eq!(pool.outstanding(), 1);
        assert!(!pool.policy().is_pooled());
        drop(buf);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 0);
    }
}
