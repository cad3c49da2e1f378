use std::ops::{Deref, DerefMut};

use bytes::BytesMut;
use crossbeam::queue::ArrayQueue;
use once_cell::sync::Lazy;

const POOL_SLOTS: usize = 256;
const BUF_CAPACITY: usize = 8 * 1024;

static PACK_POOL: Lazy<BufferPool> = Lazy::new(|| BufferPool::new(POOL_SLOTS, BUF_CAPACITY));

/// Process-wide pool of staging buffers for the frame pack path.
///
/// Buffers are cleared on acquire, so a pooled buffer never leaks bytes from
/// a previous frame. The pool is bounded; when it is empty a fresh buffer is
/// allocated, and when it is full released buffers are simply dropped.
pub struct BufferPool {
    slots: ArrayQueue<BytesMut>,
    buf_capacity: usize,
}

impl BufferPool {
    fn new(slots: usize, buf_capacity: usize) -> Self {
        Self {
            slots: ArrayQueue::new(slots),
            buf_capacity,
        }
    }

    /// The process-wide pack staging pool.
    pub fn global() -> &'static BufferPool {
        &PACK_POOL
    }

    pub fn acquire(&'static self) -> PooledBuf {
        let mut buf = self
            .slots
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buf_capacity));
        buf.clear();
        PooledBuf {
            buf: Some(buf),
            pool: self,
        }
    }

    fn release(&self, buf: BytesMut) {
        let _ = self.slots.push(buf);
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.slots.len()
    }
}

/// A buffer on loan from the pool; returns itself on drop.
pub struct PooledBuf {
    buf: Option<BytesMut>,
    pool: &'static BufferPool,
}

impl Deref for PooledBuf {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        self.buf.as_ref().expect("pooled buffer taken")
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut BytesMut {
        self.buf.as_mut().expect("pooled buffer taken")
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquired_buffer_is_empty_and_returns_on_drop() {
        let pool = BufferPool::global();

        let mut buf = pool.acquire();
        assert!(buf.is_empty());
        buf.extend_from_slice(b"stale frame bytes");
        let before = pool.pooled();
        drop(buf);
        assert!(pool.pooled() > before);

        // The recycled buffer comes back cleared.
        let buf = pool.acquire();
        assert!(buf.is_empty());
    }
}
