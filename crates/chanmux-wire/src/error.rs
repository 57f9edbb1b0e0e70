/// Errors raised while framing or reading peer messages.
///
/// Every variant except `Io` is a protocol violation and fatal to the
/// session: the peers have diverged and continuing is unsafe.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// A message was declared larger than the inbound ring can ever hold.
    #[error("impossibly large message (kind {kind}, {needed} more bytes declared, {room} bytes of room)")]
    ImpossiblyLargeMessage { kind: u8, needed: usize, room: usize },

    /// A header declared a total size smaller than the header itself.
    #[error("impossible message (declared size {size})")]
    ImpossibleMessage { size: u16 },

    /// The peer closed the transport before a complete header arrived.
    #[error("peer disconnected")]
    PeerDisconnected,

    /// The peer closed the transport mid-message.
    #[error("truncated message (expected {expected} body bytes, got {got})")]
    TruncatedMessage { expected: usize, got: usize },

    /// An I/O error occurred on the setup-time transport.
    #[error("message I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, WireError>;
