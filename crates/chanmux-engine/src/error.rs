use chanmux_wire::WireError;

/// Errors raised by the engine.
///
/// Everything except `Poll` and `ChannelIo` is a protocol violation. None
/// of these are recoverable: a violation means the peers disagree about
/// window or channel state, and continuing would corrupt the streams.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// A framing-level violation on the peer-inbound ring.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// The engine was constructed with an unusable channel set.
    #[error("invalid engine configuration: {0}")]
    Config(&'static str),

    /// The peer addressed a channel outside the user range.
    #[error("invalid channel {channel}")]
    InvalidChannel { channel: u32 },

    /// The peer addressed a channel whose direction cannot accept the
    /// message (data for a local source, credit for a local sink).
    #[error("wrong channel direction ch={channel}")]
    WrongDirection { channel: u32 },

    /// A fixed-size message arrived with the wrong declared size.
    #[error("wrong message size (kind {kind}, size {size})")]
    WrongMsgSize { kind: u8, size: u16 },

    /// The peer sent more data than the advertised window allows.
    #[error("window desync on channel {channel} ({payload} payload bytes, {room} bytes of room)")]
    WindowDesync {
        channel: u32,
        payload: usize,
        room: usize,
    },

    /// A window credit pushed the counter past u32::MAX.
    #[error("window overflow on channel {channel}")]
    WindowOverflow { channel: u32 },

    /// A message kind no dispatcher recognized.
    #[error("unrecognized message kind {kind} (size {size})")]
    UnknownMessage { kind: u8, size: u16 },

    /// A synchronous message can never fit the outbound transport.
    #[error("message too large for transport ({size} bytes, max {max})")]
    MessageTooLarge { size: usize, max: usize },

    /// The poll syscall failed with something other than EINTR.
    #[error("poll failed: {0}")]
    Poll(#[source] std::io::Error),

    /// A channel fd read or write failed unrecoverably.
    #[error("channel {channel} I/O failed: {source}")]
    ChannelIo {
        channel: usize,
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;
