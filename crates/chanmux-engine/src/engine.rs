use std::io;

use nix::errno::Errno;
use nix::poll::{ppoll, PollFd};
use nix::sys::signal::SigSet;
use tracing::{debug, trace};

use chanmux_wire::{
    detect_msg, ChannelClose, ChannelData, ChannelWindow, MsgHeader, OwnedMsg, CLOSE_MSG_SIZE,
    DATA_PREFIX_SIZE, HEADER_SIZE, MSG_CHANNEL_CLOSE, MSG_CHANNEL_DATA, MSG_CHANNEL_WINDOW,
    WINDOW_MSG_SIZE,
};

use crate::channel::{Channel, Direction};
use crate::dispatch::MsgDispatch;
use crate::error::{EngineError, Result};

/// Channel number of the ring holding bytes read from the peer transport.
pub const FROM_PEER: usize = 0;
/// Channel number of the ring holding bytes bound for the peer transport.
pub const TO_PEER: usize = 1;
/// Highest channel number reserved for the transport itself. User channels
/// are strictly greater.
pub const NR_SPECIAL_CH: usize = TO_PEER;

/// Default cap on a single outgoing message, header included.
pub const DEFAULT_MAX_OUTGOING_MSG: u32 = 4096;

/// Engine tunables fixed at construction.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Cap on any single message we emit, header included.
    pub max_outgoing_msg: u32,
    /// Signal mask installed for the duration of the poll syscall, so a
    /// driver can keep cancellation signals blocked everywhere else.
    /// `None` leaves the process mask untouched.
    pub poll_sigmask: Option<SigSet>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_outgoing_msg: DEFAULT_MAX_OUTGOING_MSG,
            poll_sigmask: None,
        }
    }
}

/// The multiplexing pump.
///
/// Channels are fixed at construction and indexed by channel number;
/// [`FROM_PEER`] and [`TO_PEER`] carry the transport, everything above
/// [`NR_SPECIAL_CH`] is a user stream. The engine owns no policy about
/// when a session ends — drivers alternate [`do_io`](Self::do_io) and
/// [`pump`](Self::pump) and decide termination from the quiescence
/// probes.
#[derive(Debug)]
pub struct Engine {
    channels: Vec<Channel>,
    max_outgoing_msg: usize,
    poll_sigmask: Option<SigSet>,
}

impl Engine {
    /// Build an engine over a fixed channel set.
    ///
    /// `channels[FROM_PEER]` must be a local source and `channels[TO_PEER]`
    /// a local sink, both over the peer transport. The inbound ring must be
    /// able to hold any message the peer may legally send, so its capacity
    /// must be at least `max_outgoing_msg` as agreed between the peers.
    pub fn new(channels: Vec<Channel>, config: EngineConfig) -> Result<Self> {
        if channels.len() <= NR_SPECIAL_CH {
            return Err(EngineError::Config("transport channels missing"));
        }
        if channels[FROM_PEER].dir() != Direction::FromFd {
            return Err(EngineError::Config("FROM_PEER channel must be a source"));
        }
        if channels[TO_PEER].dir() != Direction::ToFd {
            return Err(EngineError::Config("TO_PEER channel must be a sink"));
        }
        let max_outgoing_msg = config.max_outgoing_msg as usize;
        if max_outgoing_msg > u16::MAX as usize {
            return Err(EngineError::Config("max outgoing message exceeds size field"));
        }
        if max_outgoing_msg < WINDOW_MSG_SIZE {
            return Err(EngineError::Config("max outgoing message below control size"));
        }
        if channels[FROM_PEER].rb().capacity() < max_outgoing_msg {
            return Err(EngineError::Config("inbound ring smaller than max message"));
        }

        Ok(Self {
            channels,
            max_outgoing_msg,
            poll_sigmask: config.poll_sigmask,
        })
    }

    pub fn nr_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn channel(&self, chno: usize) -> &Channel {
        &self.channels[chno]
    }

    pub fn channel_mut(&mut self, chno: usize) -> &mut Channel {
        &mut self.channels[chno]
    }

    /// Largest message we may emit right now: the configured cap, bounded
    /// by what the outbound ring can still absorb.
    pub fn max_emit(&self) -> usize {
        self.max_outgoing_msg.min(self.channels[TO_PEER].rb().room())
    }

    /// Both transport channels still hold their fds.
    pub fn peer_connected(&self) -> bool {
        self.channels[FROM_PEER].is_open() && self.channels[TO_PEER].is_open()
    }

    /// Every user channel has announced end-of-stream, the outbound ring
    /// has drained, and no inbound bytes are pending. Drivers use this as
    /// their termination test.
    pub fn is_quiescent(&self) -> bool {
        self.channels
            .iter()
            .skip(NR_SPECIAL_CH + 1)
            .all(Channel::sent_eof)
            && self.channels[TO_PEER].rb().is_empty()
            && self.channels[FROM_PEER].rb().is_empty()
    }

    /// Put every channel fd in non-blocking mode. Call once before the
    /// first pump turn.
    pub fn init(&mut self) -> Result<()> {
        for (chno, ch) in self.channels.iter().enumerate() {
            ch.set_nonblocking()
                .map_err(|source| EngineError::ChannelIo {
                    channel: chno,
                    source,
                })?;
        }
        Ok(())
    }

    /// One blocking turn of fd work: poll every channel that wants I/O,
    /// then service the ready ones. Returns immediately if no channel
    /// wants anything. EINTR ends the turn without error so the driver
    /// can check its cancellation flags.
    pub fn do_io(&mut self) -> Result<()> {
        let mut index = Vec::with_capacity(self.channels.len());
        let mut fds = Vec::with_capacity(self.channels.len());
        for (chno, ch) in self.channels.iter().enumerate() {
            let events = ch.poll_interest();
            if events.is_empty() {
                continue;
            }
            let Some(fd) = ch.borrowed_fd() else {
                continue;
            };
            index.push(chno);
            fds.push(PollFd::new(fd, events));
        }
        if fds.is_empty() {
            return Ok(());
        }

        match ppoll(&mut fds, None, self.poll_sigmask) {
            Ok(_) => {}
            Err(Errno::EINTR) => return Ok(()),
            Err(errno) => {
                return Err(EngineError::Poll(io::Error::from_raw_os_error(errno as i32)))
            }
        }

        let ready: Vec<usize> = index
            .iter()
            .zip(fds.iter())
            .filter(|(_, pfd)| pfd.revents().is_some_and(|r| !r.is_empty()))
            .map(|(chno, _)| *chno)
            .collect();
        drop(fds);

        for chno in ready {
            self.channels[chno]
                .service()
                .map_err(|source| EngineError::ChannelIo {
                    channel: chno,
                    source,
                })?;
        }
        Ok(())
    }

    /// One scheduling turn: drain every complete inbound message through
    /// the dispatcher, then fill the outbound ring — credit returns first,
    /// then data, pending closes, and end-of-stream notices per channel in
    /// index order.
    pub fn pump<D: MsgDispatch + ?Sized>(&mut self, dispatch: &mut D) -> Result<()> {
        while let Some(header) = detect_msg(self.channels[FROM_PEER].rb())? {
            dispatch.dispatch(self, header)?;
        }

        for chno in 0..self.channels.len() {
            self.xmit_acks(chno);
        }
        for chno in 0..self.channels.len() {
            if chno > NR_SPECIAL_CH {
                self.xmit_data(chno);
            }
            self.do_pending_close(chno);
            self.xmit_eof(chno);
        }
        Ok(())
    }

    /// Pump until `msg` fits in the outbound ring in one piece, then queue
    /// it whole. For control messages that must not be split or reordered
    /// against channel data.
    pub fn queue_message_synch<D: MsgDispatch + ?Sized>(
        &mut self,
        dispatch: &mut D,
        msg: &[u8],
    ) -> Result<()> {
        let ceiling = self
            .max_outgoing_msg
            .min(self.channels[TO_PEER].rb().capacity());
        if msg.len() > ceiling {
            return Err(EngineError::MessageTooLarge {
                size: msg.len(),
                max: ceiling,
            });
        }

        while self.max_emit() < msg.len() {
            self.do_io()?;
            self.pump(dispatch)?;
        }
        trace!(size = msg.len(), "send synch message");
        self.channels[TO_PEER].rb_mut().copy_in(msg);
        Ok(())
    }

    /// Copy a complete message (header included) out of the inbound ring
    /// and consume it. This is how side-specific dispatchers take delivery
    /// of their extension kinds; the header must come from the current
    /// pump turn, which guarantees the full message is buffered.
    pub fn take_inbound_msg(&mut self, header: MsgHeader) -> OwnedMsg {
        let total = header.size as usize;
        let mut bytes = vec![0u8; total];
        let inbound = self.channels[FROM_PEER].rb_mut();
        inbound.copy_out(&mut bytes);
        inbound.note_removed(total);
        OwnedMsg {
            header,
            body: bytes[HEADER_SIZE..].to_vec(),
        }
    }

    /// Handle one of the three core message kinds; anything else is
    /// consumed from the inbound ring and reported as unrecognized.
    /// Side-specific dispatchers delegate here for kinds they don't own.
    pub fn dispatch_core(&mut self, header: MsgHeader) -> Result<()> {
        match header.kind {
            MSG_CHANNEL_DATA => self.recv_channel_data(header),
            MSG_CHANNEL_WINDOW => self.recv_channel_window(header),
            MSG_CHANNEL_CLOSE => self.recv_channel_close(header),
            kind => {
                self.channels[FROM_PEER]
                    .rb_mut()
                    .note_removed(header.size as usize);
                Err(EngineError::UnknownMessage {
                    kind,
                    size: header.size,
                })
            }
        }
    }

    fn is_user_channel(&self, chno: usize) -> bool {
        chno > NR_SPECIAL_CH && chno < self.channels.len()
    }

    /// Consume a fixed-size message from the inbound ring, insisting the
    /// declared size matches exactly.
    fn read_exact_msg<const N: usize>(&mut self, header: MsgHeader) -> Result<[u8; N]> {
        if header.size as usize != N {
            return Err(EngineError::WrongMsgSize {
                kind: header.kind,
                size: header.size,
            });
        }
        let mut bytes = [0u8; N];
        let inbound = self.channels[FROM_PEER].rb_mut();
        inbound.copy_out(&mut bytes);
        inbound.note_removed(N);
        Ok(bytes)
    }

    fn recv_channel_data(&mut self, header: MsgHeader) -> Result<()> {
        if (header.size as usize) < DATA_PREFIX_SIZE {
            return Err(EngineError::WrongMsgSize {
                kind: header.kind,
                size: header.size,
            });
        }
        let mut prefix = [0u8; DATA_PREFIX_SIZE];
        let inbound = self.channels[FROM_PEER].rb_mut();
        inbound.copy_out(&mut prefix);
        inbound.note_removed(DATA_PREFIX_SIZE);
        let m = ChannelData::decode_body(&prefix[HEADER_SIZE..]);
        let payloadsz = header.size as usize - DATA_PREFIX_SIZE;
        trace!(channel = m.channel, size = payloadsz, "recv data");

        let chno = m.channel as usize;
        if !self.is_user_channel(chno) {
            return Err(EngineError::InvalidChannel { channel: m.channel });
        }
        if self.channels[chno].dir() == Direction::FromFd {
            return Err(EngineError::WrongDirection { channel: m.channel });
        }
        if !self.channels[chno].is_open() {
            // The close raced with data already in flight; drop it.
            self.channels[FROM_PEER].rb_mut().note_removed(payloadsz);
            return Ok(());
        }

        let room = self.channels[chno].rb().room();
        if room < payloadsz {
            return Err(EngineError::WindowDesync {
                channel: m.channel,
                payload: payloadsz,
                room,
            });
        }

        let (head, rest) = self.channels.split_at_mut(chno);
        rest[0]
            .rb_mut()
            .transfer_from(head[FROM_PEER].rb_mut(), payloadsz);
        Ok(())
    }

    fn recv_channel_window(&mut self, header: MsgHeader) -> Result<()> {
        let bytes = self.read_exact_msg::<WINDOW_MSG_SIZE>(header)?;
        let m = ChannelWindow::decode_body(&bytes[HEADER_SIZE..]);
        trace!(channel = m.channel, delta = m.window_delta, "recv window");

        let chno = m.channel as usize;
        if !self.is_user_channel(chno) {
            return Err(EngineError::InvalidChannel { channel: m.channel });
        }
        let ch = &mut self.channels[chno];
        if ch.dir() == Direction::ToFd {
            return Err(EngineError::WrongDirection { channel: m.channel });
        }
        if !ch.is_open() {
            return Ok(());
        }
        ch.credit_window(m.window_delta)
            .ok_or(EngineError::WindowOverflow { channel: m.channel })?;
        Ok(())
    }

    fn recv_channel_close(&mut self, header: MsgHeader) -> Result<()> {
        let bytes = self.read_exact_msg::<CLOSE_MSG_SIZE>(header)?;
        let m = ChannelClose::decode_body(&bytes[HEADER_SIZE..]);
        trace!(channel = m.channel, "recv close");

        let chno = m.channel as usize;
        if !self.is_user_channel(chno) {
            // Closes may race with teardown; a stale one is not an error.
            return Ok(());
        }
        let ch = &mut self.channels[chno];
        // The peer already knows this stream is over; never announce back.
        ch.mark_sent_eof();
        if ch.dir() == Direction::FromFd {
            // Anything we buffered but had not yet sent is stale now.
            let stale = ch.rb().size();
            ch.rb_mut().note_removed(stale);
        }
        ch.close();
        Ok(())
    }

    fn xmit_acks(&mut self, chno: usize) {
        if self.channels[chno].bytes_written() == 0 || self.max_emit() < WINDOW_MSG_SIZE {
            return;
        }
        let window_delta = self.channels[chno].take_bytes_written();
        let msg = ChannelWindow {
            channel: chno as u32,
            window_delta,
        }
        .encode();
        trace!(channel = chno, delta = window_delta, "send window");
        self.channels[TO_PEER].rb_mut().copy_in(&msg);
    }

    fn xmit_data(&mut self, chno: usize) {
        let max_emit = self.max_emit();
        if max_emit <= DATA_PREFIX_SIZE {
            return;
        }
        let ch = &self.channels[chno];
        if ch.dir() != Direction::FromFd {
            return;
        }
        let payloadsz = ch
            .rb()
            .size()
            .min(max_emit - DATA_PREFIX_SIZE)
            .min(ch.window() as usize);
        if payloadsz == 0 {
            return;
        }

        let prefix = ChannelData::encode_prefix(chno as u32, payloadsz);
        trace!(channel = chno, size = payloadsz, "send data");
        let (head, rest) = self.channels.split_at_mut(chno);
        let outbound = head[TO_PEER].rb_mut();
        outbound.copy_in(&prefix);
        outbound.transfer_from(rest[0].rb_mut(), payloadsz);
        rest[0].debit_window(payloadsz as u32);
    }

    fn do_pending_close(&mut self, chno: usize) {
        let ch = &mut self.channels[chno];
        if ch.dir() == Direction::ToFd
            && ch.is_open()
            && ch.rb().is_empty()
            && ch.pending_close()
        {
            debug!(channel = chno, "ring drained, completing pending close");
            ch.close();
        }
    }

    fn xmit_eof(&mut self, chno: usize) {
        {
            let ch = &self.channels[chno];
            if ch.is_open() || ch.sent_eof() || !ch.rb().is_empty() {
                return;
            }
        }
        if self.max_emit() < CLOSE_MSG_SIZE {
            return;
        }
        let msg = ChannelClose {
            channel: chno as u32,
        }
        .encode();
        trace!(channel = chno, "send close");
        self.channels[TO_PEER].rb_mut().copy_in(&msg);
        self.channels[chno].mark_sent_eof();
    }
}
