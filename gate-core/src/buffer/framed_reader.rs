use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};

use super::slab::SlabPool;
use crate::error::{GateError, Result};

/// Buffered reader with automatic buffer management and pooled memory reuse.
///
/// Grounded on the teacher's `bufreader.Reader` (`pkg/net/internal/bufreader/reader.go` in the
/// original source): a single growable buffer with read/write cursors, backed by a slab pool
/// instead of per-call heap allocation. Generalised from blocking `io.Reader` to
/// `tokio::io::AsyncRead` since every read here happens inside a worker's async read task.
pub struct FramedReader<R> {
    reader: R,
    pool: Arc<SlabPool>,
    buf: Vec<u8>,
    r: usize,
    w: usize,
    closed: bool,
}

impl<R: AsyncRead + Unpin> FramedReader<R> {
    pub fn new(reader: R, pool: Arc<SlabPool>, initial_size: usize) -> FramedReader<R> {
        let buf = pool.alloc(initial_size);
        FramedReader {
            reader,
            pool,
            buf,
            r: 0,
            w: 0,
            closed: false,
        }
    }

    #[inline]
    fn unread(&self) -> usize {
        self.w - self.r
    }

    #[inline]
    fn cap_left(&self) -> usize {
        self.buf.len() - self.w
    }

    /// Returns the next unread byte, refilling the buffer from the underlying source if needed.
    pub async fn read_byte(&mut self) -> Result<u8> {
        if self.unread() > 0 {
            let b = self.buf[self.r];
            self.r += 1;
            return Ok(b);
        }

        if self.closed {
            return Err(GateError::AlreadyClosed);
        }

        if self.cap_left() == 0 {
            self.r = 0;
            self.w = 0;
        }

        self.read_at_least(1).await?;
        let b = self.buf[self.r];
        self.r += 1;
        Ok(b)
    }

    /// Returns a slice aliasing the internal buffer containing exactly `n` bytes. The slice
    /// stays valid until the next read call.
    pub async fn read_full(&mut self, n: usize) -> Result<&[u8]> {
        if self.closed {
            return Err(GateError::AlreadyClosed);
        }

        if self.unread() >= n {
            let start = self.r;
            self.r += n;
            return Ok(&self.buf[start..start + n]);
        }

        let needed = n + self.unread();
        if needed > self.buf.len() {
            let new_size = next_pow2(needed + 128);
            let mut new_buf = self.pool.alloc(new_size);
            let unread = self.unread();
            new_buf[..unread].copy_from_slice(&self.buf[self.r..self.w]);
            let old_buf = std::mem::replace(&mut self.buf, new_buf);
            self.pool.free(old_buf);
            self.w = unread;
            self.r = 0;
        } else {
            let unread = self.unread();
            self.buf.copy_within(self.r..self.w, 0);
            self.w = unread;
            self.r = 0;
        }

        let remaining = n - self.unread();
        self.read_at_least(remaining).await?;

        let start = self.r;
        self.r += n;
        Ok(&self.buf[start..start + n])
    }

    async fn read_at_least(&mut self, want: usize) -> Result<()> {
        let mut got = 0usize;
        while got < want {
            if self.w == self.buf.len() {
                // Buffer exhausted without satisfying `want`; read_full already grew it to fit,
                // so this only happens if the caller asked for more than the buffer can hold,
                // which is a programming error in this module, not a protocol error.
                return Err(GateError::Protocol("framed reader buffer exhausted"));
            }
            let n = self.reader.read(&mut self.buf[self.w..]).await?;
            if n == 0 {
                return Err(GateError::Io(std::io::ErrorKind::UnexpectedEof));
            }
            self.w += n;
            got += n;
        }
        Ok(())
    }

    /// Idempotent close; releases the buffer back to the pool.
    pub fn close(&mut self) -> Result<()> {
        if self.closed {
            return Err(GateError::AlreadyClosed);
        }
        self.closed = true;
        let buf = std::mem::take(&mut self.buf);
        self.pool.free(buf);
        self.r = 0;
        self.w = 0;
        Ok(())
    }
}

impl<R> Drop for FramedReader<R> {
    fn drop(&mut self) {
        if !self.closed && !self.buf.is_empty() {
            let buf = std::mem::take(&mut self.buf);
            self.pool.free(buf);
        }
    }
}

#[inline]
fn next_pow2(n: usize) -> usize {
    if n <= 1 {
        return 1;
    }
    let mut n = n - 1;
    n |= n >> 1;
    n |= n >> 2;
    n |= n >> 4;
    n |= n >> 8;
    n |= n >> 16;
    n |= n >> 32;
    n + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn pool() -> Arc<SlabPool> {
        Arc::new(SlabPool::new(64, 65536, 4).unwrap())
    }

    #[tokio::test]
    async fn reads_exact_slices() {
        let data: Vec<u8> = (0u8..=255).collect();
        let mut r = FramedReader::new(Cursor::new(data.clone()), pool(), 32);

        let first = r.read_full(4).await.unwrap().to_vec();
        assert_eq!(&first[..], &data[0..4]);

        let second = r.read_full(100).await.unwrap().to_vec();
        assert_eq!(&second[..], &data[4..104]);
    }

    #[tokio::test]
    async fn short_read_yields_eof() {
        let data = vec![1u8, 2, 3];
        let mut r = FramedReader::new(Cursor::new(data), pool(), 32);
        let err = r.read_full(10).await.unwrap_err();
        assert!(matches!(err, GateError::Io(std::io::ErrorKind::UnexpectedEof)));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_errors_after() {
        let data = vec![1u8, 2, 3, 4];
        let mut r = FramedReader::new(Cursor::new(data), pool(), 32);
        r.close().unwrap();
        assert!(matches!(r.read_full(1).await, Err(GateError::AlreadyClosed)));
        assert!(matches!(r.close(), Err(GateError::AlreadyClosed)));
    }

    #[tokio::test]
    async fn read_byte_refills_across_boundary() {
        let data: Vec<u8> = (0u8..16).collect();
        let mut r = FramedReader::new(Cursor::new(data.clone()), pool(), 4);
        let mut out = Vec::new();
        for _ in 0..16 {
            out.push(r.read_byte().await.unwrap());
        }
        assert_eq!(out, data);
    }
}
