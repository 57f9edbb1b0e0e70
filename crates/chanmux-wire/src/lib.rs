//! Wire format for the chanmux peer protocol.
//!
//! Every message starts with a fixed 4-byte header: a kind byte, a pad
//! byte, and a little-endian u16 total size (header included). The three
//! core kinds carry channel data, window credit, and end-of-stream. The
//! layout is byte-exact; both peers must agree on it.
//!
//! [`detect_msg`] frames messages out of a ring buffer without consuming
//! or allocating; [`read_msg`] is the blocking reader used during session
//! setup before the pump is live.

pub mod error;
pub mod framer;
pub mod msg;
pub mod reader;

pub use error::{Result, WireError};
pub use framer::detect_msg;
pub use msg::{
    ChannelClose, ChannelData, ChannelWindow, MsgHeader, CLOSE_MSG_SIZE, DATA_PREFIX_SIZE,
    HEADER_SIZE, MSG_CHANNEL_CLOSE, MSG_CHANNEL_DATA, MSG_CHANNEL_WINDOW, WINDOW_MSG_SIZE,
};
pub use reader::{read_msg, OwnedMsg};
