use std::io::{self, IoSlice, IoSliceMut};
use std::os::fd::{AsFd, AsRawFd, BorrowedFd, OwnedFd};

use nix::errno::Errno;
use nix::poll::PollFlags;
use nix::sys::uio::{readv, writev};
use tracing::debug;

use chanmux_ring::RingBuf;

/// Which way bytes flow between a channel's ring and its fd.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The ring drains into the fd; the fd is a local sink.
    ToFd,
    /// The fd fills the ring; the fd is a local source.
    FromFd,
}

/// One multiplexed stream endpoint: a ring buffer bound to an optional
/// owned file descriptor, plus flow-control and close state.
///
/// A channel with no fd is locally closed; once its ring drains, the
/// engine announces end-of-stream to the peer exactly once.
pub struct Channel {
    dir: Direction,
    fd: Option<OwnedFd>,
    rb: RingBuf,
    /// FROM_FD only: bytes the peer has authorized us to send.
    window: u32,
    /// TO_FD only: bytes delivered to the fd since the last credit return.
    bytes_written: u32,
    track_bytes_written: bool,
    sent_eof: bool,
    pending_close: bool,
}

impl Channel {
    /// Create a channel over `fd` with a ring of `capacity` bytes.
    ///
    /// Flow-control accounting is off by default; user channels enable the
    /// side they need via [`with_window`](Self::with_window) (local
    /// sources) or [`with_bytes_written_tracking`](Self::with_bytes_written_tracking)
    /// (local sinks). The transport channels use neither.
    pub fn new(dir: Direction, fd: OwnedFd, capacity: usize) -> Self {
        Self {
            dir,
            fd: Some(fd),
            rb: RingBuf::with_capacity(capacity),
            window: 0,
            bytes_written: 0,
            track_bytes_written: false,
            sent_eof: false,
            pending_close: false,
        }
    }

    /// Start with `window` bytes of send credit (FROM_FD channels).
    pub fn with_window(mut self, window: u32) -> Self {
        self.window = window;
        self
    }

    /// Return credit to the peer as bytes reach the fd (TO_FD channels).
    pub fn with_bytes_written_tracking(mut self) -> Self {
        self.track_bytes_written = true;
        self
    }

    pub fn dir(&self) -> Direction {
        self.dir
    }

    /// The channel's ring: pending fd writes for TO_FD, bytes awaiting
    /// transmission for FROM_FD.
    pub fn rb(&self) -> &RingBuf {
        &self.rb
    }

    pub(crate) fn rb_mut(&mut self) -> &mut RingBuf {
        &mut self.rb
    }

    /// Remaining send credit.
    pub fn window(&self) -> u32 {
        self.window
    }

    /// Bytes delivered to the fd since the last credit return.
    pub fn bytes_written(&self) -> u32 {
        self.bytes_written
    }

    /// Whether the channel still holds its fd.
    pub fn is_open(&self) -> bool {
        self.fd.is_some()
    }

    /// Whether end-of-stream has been announced to the peer.
    pub fn sent_eof(&self) -> bool {
        self.sent_eof
    }

    pub fn pending_close(&self) -> bool {
        self.pending_close
    }

    /// Ask for a graceful close: the fd is released only once the ring has
    /// drained, so buffered bytes still reach the sink.
    pub fn request_close(&mut self) {
        self.pending_close = true;
    }

    /// Close the channel's local end. A live sink with undelivered bytes
    /// is downgraded to a pending close so the bytes still drain first.
    pub fn close(&mut self) {
        if self.dir == Direction::ToFd && self.fd.is_some() && !self.rb.is_empty() {
            self.pending_close = true;
            return;
        }
        if self.fd.take().is_some() {
            debug!("released channel fd");
        }
    }

    pub(crate) fn mark_sent_eof(&mut self) {
        self.sent_eof = true;
    }

    /// Add peer credit; `None` means the counter overflowed.
    pub(crate) fn credit_window(&mut self, delta: u32) -> Option<u32> {
        self.window = self.window.checked_add(delta)?;
        Some(self.window)
    }

    pub(crate) fn debit_window(&mut self, n: u32) {
        debug_assert!(n <= self.window);
        self.window -= n;
    }

    pub(crate) fn take_bytes_written(&mut self) -> u32 {
        std::mem::take(&mut self.bytes_written)
    }

    pub(crate) fn borrowed_fd(&self) -> Option<BorrowedFd<'_>> {
        self.fd.as_ref().map(|fd| fd.as_fd())
    }

    /// The poll events this channel currently has work for.
    pub(crate) fn poll_interest(&self) -> PollFlags {
        if self.fd.is_none() {
            return PollFlags::empty();
        }
        match self.dir {
            Direction::FromFd if self.rb.room() > 0 => PollFlags::POLLIN,
            Direction::ToFd if self.rb.size() > 0 => PollFlags::POLLOUT,
            _ => PollFlags::empty(),
        }
    }

    /// Put the fd in non-blocking mode. No-op for closed channels.
    pub(crate) fn set_nonblocking(&self) -> io::Result<()> {
        let Some(fd) = self.fd.as_ref() else {
            return Ok(());
        };
        let raw = fd.as_raw_fd();

        // SAFETY: `raw` is an open descriptor owned by this channel for
        // the duration of both calls.
        let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
        if flags < 0 {
            return Err(io::Error::last_os_error());
        }
        if flags & libc::O_NONBLOCK == 0 {
            let rc = unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) };
            if rc < 0 {
                return Err(io::Error::last_os_error());
            }
        }
        Ok(())
    }

    /// One non-blocking transfer between the fd and the ring, in whichever
    /// direction the channel runs.
    pub(crate) fn service(&mut self) -> io::Result<()> {
        match self.dir {
            Direction::FromFd => self.fill_from_fd(),
            Direction::ToFd => self.drain_to_fd(),
        }
    }

    fn fill_from_fd(&mut self) -> io::Result<()> {
        let Self { fd, rb, .. } = self;
        let Some(src) = fd.as_ref() else {
            return Ok(());
        };
        let room = rb.room();
        if room == 0 {
            return Ok(());
        }

        let (a, b) = rb.writable_segments(room);
        let mut iov = [IoSliceMut::new(a), IoSliceMut::new(b)];
        match readv(src.as_fd(), &mut iov) {
            Ok(0) => {
                debug!("channel source reached end of stream");
                *fd = None;
            }
            Ok(n) => rb.note_added(n),
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => {}
            Err(errno) => return Err(io::Error::from_raw_os_error(errno as i32)),
        }
        Ok(())
    }

    fn drain_to_fd(&mut self) -> io::Result<()> {
        let Self {
            fd,
            rb,
            bytes_written,
            track_bytes_written,
            ..
        } = self;
        let Some(sink) = fd.as_ref() else {
            return Ok(());
        };
        let avail = rb.size();
        if avail == 0 {
            return Ok(());
        }

        let (a, b) = rb.readable_segments(avail);
        let iov = [IoSlice::new(a), IoSlice::new(b)];
        match writev(sink.as_fd(), &iov) {
            Ok(n) => {
                rb.note_removed(n);
                if *track_bytes_written {
                    *bytes_written = bytes_written.saturating_add(n as u32);
                }
            }
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => {}
            Err(Errno::EPIPE) | Err(Errno::ECONNRESET) => {
                debug!("channel sink went away");
                // Whatever is still buffered can never be delivered.
                let stranded = rb.size();
                rb.note_removed(stranded);
                *fd = None;
            }
            Err(errno) => return Err(io::Error::from_raw_os_error(errno as i32)),
        }
        Ok(())
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("dir", &self.dir)
            .field("open", &self.fd.is_some())
            .field("buffered", &self.rb.size())
            .field("window", &self.window)
            .field("bytes_written", &self.bytes_written)
            .field("sent_eof", &self.sent_eof)
            .field("pending_close", &self.pending_close)
            .finish()
    }
}
