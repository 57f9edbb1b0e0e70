//! Fixed-capacity byte ring buffer.
//!
//! This is the substrate both sides of the mux engine run on: every channel
//! owns one, and the peer-facing inbound/outbound queues are rings too.
//! The buffer is a single contiguous allocation with wraparound, so any
//! readable or writable span is coverable by at most two segments — callers
//! doing vectored I/O never need more than a two-entry iovec.
//!
//! All operations are allocation-free after construction. Size contracts
//! (`copy_out` more than is readable, `copy_in` more than fits) are caller
//! bugs and panic.

/// Fixed-capacity FIFO of bytes.
pub struct RingBuf {
    buf: Box<[u8]>,
    start: usize,
    len: usize,
}

impl RingBuf {
    /// Create a ring holding at most `capacity` bytes.
    ///
    /// # Panics
    /// Panics if `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "ring capacity must be non-zero");
        Self {
            buf: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            len: 0,
        }
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// Bytes currently readable.
    pub fn size(&self) -> usize {
        self.len
    }

    /// Bytes currently writable.
    pub fn room(&self) -> usize {
        self.buf.len() - self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Copy the first `dst.len()` readable bytes into `dst` without
    /// consuming them.
    ///
    /// # Panics
    /// Panics if `dst.len() > self.size()`.
    pub fn copy_out(&self, dst: &mut [u8]) {
        let (a, b) = self.readable_segments(dst.len());
        dst[..a.len()].copy_from_slice(a);
        dst[a.len()..].copy_from_slice(b);
    }

    /// Append all of `src`.
    ///
    /// # Panics
    /// Panics if `src.len() > self.room()`.
    pub fn copy_in(&mut self, src: &[u8]) {
        let (a, b) = self.writable_segments(src.len());
        let split = a.len();
        a.copy_from_slice(&src[..split]);
        b.copy_from_slice(&src[split..]);
        self.note_added(src.len());
    }

    /// The first `n` readable bytes as at most two contiguous segments.
    /// The second segment is empty unless the span wraps.
    ///
    /// # Panics
    /// Panics if `n > self.size()`.
    pub fn readable_segments(&self, n: usize) -> (&[u8], &[u8]) {
        assert!(n <= self.len, "read overrun: {n} > {}", self.len);
        let cap = self.buf.len();
        let first = n.min(cap - self.start);
        (
            &self.buf[self.start..self.start + first],
            &self.buf[..n - first],
        )
    }

    /// The next `n` writable bytes as at most two contiguous segments.
    /// Bytes written through these views become readable only after
    /// [`note_added`](Self::note_added).
    ///
    /// # Panics
    /// Panics if `n > self.room()`.
    pub fn writable_segments(&mut self, n: usize) -> (&mut [u8], &mut [u8]) {
        assert!(n <= self.room(), "write overrun: {n} > {}", self.room());
        let cap = self.buf.len();
        let wpos = (self.start + self.len) % cap;
        let first = n.min(cap - wpos);
        let (head, tail) = self.buf.split_at_mut(wpos);
        (&mut tail[..first], &mut head[..n - first])
    }

    /// Advance the read cursor past `n` consumed bytes.
    ///
    /// # Panics
    /// Panics if `n > self.size()`.
    pub fn note_removed(&mut self, n: usize) {
        assert!(n <= self.len, "removed more than readable: {n} > {}", self.len);
        self.start = (self.start + n) % self.buf.len();
        self.len -= n;
    }

    /// Mark `n` bytes written through [`writable_segments`](Self::writable_segments)
    /// as readable.
    ///
    /// # Panics
    /// Panics if `n > self.room()`.
    pub fn note_added(&mut self, n: usize) {
        assert!(n <= self.room(), "added more than room: {n} > {}", self.room());
        self.len += n;
    }

    /// Move `n` bytes from the front of `src` into this ring without an
    /// intermediate buffer.
    ///
    /// # Panics
    /// Panics if `n > src.size()` or `n > self.room()`.
    pub fn transfer_from(&mut self, src: &mut RingBuf, n: usize) {
        assert!(n <= src.size(), "transfer overrun: {n} > {}", src.size());
        assert!(n <= self.room(), "transfer overflow: {n} > {}", self.room());

        let mut remaining = n;
        while remaining > 0 {
            let (dst, _) = self.writable_segments(remaining);
            let take = dst.len();
            let (a, b) = src.readable_segments(take);
            dst[..a.len()].copy_from_slice(a);
            dst[a.len()..].copy_from_slice(b);
            self.note_added(take);
            src.note_removed(take);
            remaining -= take;
        }
    }
}

impl std::fmt::Debug for RingBuf {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RingBuf")
            .field("capacity", &self.capacity())
            .field("size", &self.len)
            .finish()
    }
}
