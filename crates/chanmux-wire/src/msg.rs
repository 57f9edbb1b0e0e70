use bytes::{Buf, BufMut};

/// Payload bytes for a channel.
pub const MSG_CHANNEL_DATA: u8 = 1;
/// Window credit granted to the peer.
pub const MSG_CHANNEL_WINDOW: u8 = 2;
/// End-of-stream for a channel.
pub const MSG_CHANNEL_CLOSE: u8 = 3;

/// Message header: kind (1) + pad (1) + total size (2, LE) = 4 bytes.
/// `size` counts the entire message, header included.
pub const HEADER_SIZE: usize = 4;
/// Fixed prefix of a CHANNEL_DATA message: header + channel (4, LE).
pub const DATA_PREFIX_SIZE: usize = HEADER_SIZE + 4;
/// Total size of a CHANNEL_WINDOW message: header + channel + delta.
pub const WINDOW_MSG_SIZE: usize = HEADER_SIZE + 8;
/// Total size of a CHANNEL_CLOSE message: header + channel.
pub const CLOSE_MSG_SIZE: usize = HEADER_SIZE + 4;

/// The fixed header every message starts with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgHeader {
    pub kind: u8,
    /// Total message length in bytes, header included.
    pub size: u16,
}

impl MsgHeader {
    pub fn new(kind: u8, size: u16) -> Self {
        Self { kind, size }
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        let mut buf = &mut bytes[..];
        buf.put_u8(self.kind);
        buf.put_u8(0);
        buf.put_u16_le(self.size);
        bytes
    }

    pub fn decode(bytes: &[u8; HEADER_SIZE]) -> Self {
        let mut buf = &bytes[..];
        let kind = buf.get_u8();
        let _pad = buf.get_u8();
        let size = buf.get_u16_le();
        Self { kind, size }
    }
}

/// Body prefix of a CHANNEL_DATA message; the payload follows on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelData {
    pub channel: u32,
}

impl ChannelData {
    /// Encode the fixed prefix for a data message carrying `payload_len`
    /// bytes. The payload itself is appended by the caller.
    ///
    /// # Panics
    /// Panics if the total message size overflows the u16 size field.
    pub fn encode_prefix(channel: u32, payload_len: usize) -> [u8; DATA_PREFIX_SIZE] {
        let total = DATA_PREFIX_SIZE + payload_len;
        assert!(total <= u16::MAX as usize, "data message too large: {total}");
        let mut bytes = [0u8; DATA_PREFIX_SIZE];
        bytes[..HEADER_SIZE]
            .copy_from_slice(&MsgHeader::new(MSG_CHANNEL_DATA, total as u16).encode());
        let mut buf = &mut bytes[HEADER_SIZE..];
        buf.put_u32_le(channel);
        bytes
    }

    /// Decode from the body bytes following the header.
    pub fn decode_body(mut body: &[u8]) -> Self {
        Self {
            channel: body.get_u32_le(),
        }
    }
}

/// CHANNEL_WINDOW body: credit grant for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelWindow {
    pub channel: u32,
    pub window_delta: u32,
}

impl ChannelWindow {
    pub fn encode(&self) -> [u8; WINDOW_MSG_SIZE] {
        let mut bytes = [0u8; WINDOW_MSG_SIZE];
        bytes[..HEADER_SIZE]
            .copy_from_slice(&MsgHeader::new(MSG_CHANNEL_WINDOW, WINDOW_MSG_SIZE as u16).encode());
        let mut buf = &mut bytes[HEADER_SIZE..];
        buf.put_u32_le(self.channel);
        buf.put_u32_le(self.window_delta);
        bytes
    }

    pub fn decode_body(mut body: &[u8]) -> Self {
        Self {
            channel: body.get_u32_le(),
            window_delta: body.get_u32_le(),
        }
    }
}

/// CHANNEL_CLOSE body: end-of-stream for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelClose {
    pub channel: u32,
}

impl ChannelClose {
    pub fn encode(&self) -> [u8; CLOSE_MSG_SIZE] {
        let mut bytes = [0u8; CLOSE_MSG_SIZE];
        bytes[..HEADER_SIZE]
            .copy_from_slice(&MsgHeader::new(MSG_CHANNEL_CLOSE, CLOSE_MSG_SIZE as u16).encode());
        let mut buf = &mut bytes[HEADER_SIZE..];
        buf.put_u32_le(self.channel);
        bytes
    }

    pub fn decode_body(mut body: &[u8]) -> Self {
        Self {
            channel: body.get_u32_le(),
        }
    }
}
