use std::borrow::Cow;

use crate::{AppError, AppResult};

/// Fixed-capacity byte ring used by the session receive path to accumulate
/// transport bytes until at least one complete frame is buffered.
///
/// Single producer, single consumer, both the receive task, so no internal
/// locking. Capacity is fixed at construction; a frame larger than the free
/// space is a session-fatal `RingFull`.
#[derive(Debug)]
pub struct RingBuffer {
    buf: Box<[u8]>,
    /// Index of the first unread byte.
    read_pos: usize,
    /// Number of unread bytes.
    len: usize,
}

impl RingBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            read_pos: 0,
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn free(&self) -> usize {
        self.buf.len() - self.len
    }

    pub fn reset(&mut self) {
        self.read_pos = 0;
        self.len = 0;
    }

    /// Appends `src` to the ring. Fails without writing anything if the free
    /// space is insufficient.
    pub fn write_n(&mut self, src: &[u8]) -> AppResult<()> {
        let n = src.len();
        if n > self.free() {
            return Err(AppError::RingFull {
                need: n,
                free: self.free(),
            });
        }

        let cap = self.buf.len();
        let write_pos = (self.read_pos + self.len) % cap;
        let first = n.min(cap - write_pos);
        self.buf[write_pos..write_pos + first].copy_from_slice(&src[..first]);
        if first < n {
            self.buf[..n - first].copy_from_slice(&src[first..]);
        }
        self.len += n;
        Ok(())
    }

    /// Non-consuming read of the next `n` bytes as a contiguous view.
    /// Copies when the requested range wraps around the end of the ring.
    pub fn peek(&self, n: usize) -> AppResult<Cow<'_, [u8]>> {
        if n > self.len {
            return Err(AppError::RingEmpty {
                need: n,
                buffered: self.len,
            });
        }

        let cap = self.buf.len();
        if self.read_pos + n <= cap {
            Ok(Cow::Borrowed(&self.buf[self.read_pos..self.read_pos + n]))
        } else {
            let first = cap - self.read_pos;
            let mut out = Vec::with_capacity(n);
            out.extend_from_slice(&self.buf[self.read_pos..]);
            out.extend_from_slice(&self.buf[..n - first]);
            Ok(Cow::Owned(out))
        }
    }

    /// Consuming read of exactly `n` bytes.
    pub fn read(&mut self, n: usize) -> AppResult<Vec<u8>> {
        let out = self.peek(n)?.into_owned();
        self.advance(n);
        Ok(out)
    }

    /// Discards `n` buffered bytes.
    pub fn skip(&mut self, n: usize) -> AppResult<()> {
        if n > self.len {
            return Err(AppError::RingEmpty {
                need: n,
                buffered: self.len,
            });
        }
        self.advance(n);
        Ok(())
    }

    fn advance(&mut self, n: usize) {
        self.read_pos = (self.read_pos + n) % self.buf.len();
        self.len -= n;
    }
}
