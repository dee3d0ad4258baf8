//! Fixed-capacity ring buffer used for both halves of a relayed connection.
//!
//! One non-blocking read or write per call, `WouldBlock` swallowed, as a
//! reusable ring instead of an ever-growing `Vec<u8>`, since the reactor
//! needs a `room()` figure to drive watcher backpressure.

use std::io::{self, ErrorKind, Read, Write};

/// Recommended minimum; the source proxy uses single-page-scale buffers.
pub const DEFAULT_CAPACITY: usize = 8192;

/// A contiguous byte ring. `head` is the read cursor, `len` the number of
/// pending bytes; both are kept modulo `capacity` to avoid shuffling data
/// on every partial drain.
pub struct Buffer {
    data: Vec<u8>,
    capacity: usize,
    head: usize,
    len: usize,
}

impl Buffer {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity],
            capacity,
            head: 0,
            len: 0,
        }
    }

    /// Bytes currently pending (not yet sent).
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Free bytes available for a subsequent `recv`.
    pub fn room(&self) -> usize {
        self.capacity - self.len
    }

    fn tail(&self) -> usize {
        (self.head + self.len) % self.capacity
    }

    /// Copies up to `min(dst.len(), len())` pending bytes into `dst`
    /// without advancing the read cursor. Idempotent: calling it again with
    /// the same or smaller `dst` yields the same prefix until `recv` or
    /// `send` actually moves data.
    pub fn peek(&self, dst: &mut [u8]) -> usize {
        let n = dst.len().min(self.len);
        for i in 0..n {
            dst[i] = self.data[(self.head + i) % self.capacity];
        }
        n
    }

    /// Drains a non-blocking read from `fd` into whatever room remains.
    /// Returns `Ok(None)` if the buffer has no room and no read was even
    /// attempted — this is backpressure, not EOF, and callers must not
    /// treat it as one. Returns `Ok(Some(0))` on a genuine peer EOF,
    /// `Ok(Some(n))` with `n > 0` on a normal read, or propagates the
    /// error (caller is expected to treat `WouldBlock`/`Interrupted` as
    /// non-fatal, see `is_transient`).
    pub fn recv<R: Read>(&mut self, fd: &mut R) -> io::Result<Option<usize>> {
        let room = self.room();
        if room == 0 {
            return Ok(None);
        }
        let tail = self.tail();
        let contiguous = (self.capacity - tail).min(room);
        let n = fd.read(&mut self.data[tail..tail + contiguous])?;
        self.len += n;
        Ok(Some(n))
    }

    /// Drains a single non-blocking write of the pending prefix to `fd`.
    /// Returns bytes written and advances the read cursor by that amount.
    pub fn send<W: Write>(&mut self, fd: &mut W) -> io::Result<usize> {
        if self.len == 0 {
            return Ok(0);
        }
        let contiguous = (self.capacity - self.head).min(self.len);
        let n = fd.write(&self.data[self.head..self.head + contiguous])?;
        self.head = (self.head + n) % self.capacity;
        self.len -= n;
        Ok(n)
    }
}

/// `EAGAIN`/`EWOULDBLOCK`/`EINTR` are not fatal; caller retries on the next
/// readiness event.
pub fn is_transient(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted)
}
