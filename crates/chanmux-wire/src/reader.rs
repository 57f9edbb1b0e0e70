use std::io::{ErrorKind, Read};

use tracing::trace;

use crate::error::{Result, WireError};
use crate::msg::{MsgHeader, HEADER_SIZE};

/// A complete message read off the transport, owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedMsg {
    pub header: MsgHeader,
    /// Body bytes following the header; `header.size - HEADER_SIZE` long.
    pub body: Vec<u8>,
}

impl OwnedMsg {
    /// Build a message from a kind and body, computing the size field.
    ///
    /// # Panics
    /// Panics if the total message size overflows the u16 size field.
    pub fn new(kind: u8, body: Vec<u8>) -> Self {
        let total = HEADER_SIZE + body.len();
        assert!(total <= u16::MAX as usize, "message too large: {total}");
        Self {
            header: MsgHeader::new(kind, total as u16),
            body,
        }
    }

    /// The full wire encoding, header followed by body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE + self.body.len());
        bytes.extend_from_slice(&self.header.encode());
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

/// Read one complete message from a blocking transport.
///
/// This is the setup-time path, used before the pump is live: two reads,
/// header then body, with no buffering between messages. A short read on
/// the header means the peer disconnected; a short read on the body means
/// the message was truncated. Both are fatal.
pub fn read_msg<R: Read>(rdr: &mut R) -> Result<OwnedMsg> {
    let mut bytes = [0u8; HEADER_SIZE];
    if read_full(rdr, &mut bytes)? < HEADER_SIZE {
        return Err(WireError::PeerDisconnected);
    }

    let header = MsgHeader::decode(&bytes);
    if (header.size as usize) < HEADER_SIZE {
        return Err(WireError::ImpossibleMessage { size: header.size });
    }
    trace!(kind = header.kind, size = header.size, "read message header");

    let mut body = vec![0u8; header.size as usize - HEADER_SIZE];
    let got = read_full(rdr, &mut body)?;
    if got < body.len() {
        return Err(WireError::TruncatedMessage {
            expected: body.len(),
            got,
        });
    }

    Ok(OwnedMsg { header, body })
}

fn read_full<R: Read>(rdr: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut off = 0;
    while off < buf.len() {
        match rdr.read(&mut buf[off..]) {
            Ok(0) => break,
            Ok(n) => off += n,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(WireError::Io(err)),
        }
    }
    Ok(off)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::msg::{ChannelClose, MSG_CHANNEL_CLOSE};

    #[test]
    fn reads_complete_message() {
        let wire = ChannelClose { channel: 4 }.encode();
        let mut cursor = Cursor::new(wire.to_vec());

        let msg = read_msg(&mut cursor).unwrap();
        assert_eq!(msg.header.kind, MSG_CHANNEL_CLOSE);
        assert_eq!(msg.body, wire[HEADER_SIZE..]);
    }

    #[test]
    fn reads_back_to_back_messages() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&ChannelClose { channel: 2 }.encode());
        wire.extend_from_slice(&ChannelClose { channel: 3 }.encode());
        let mut cursor = Cursor::new(wire);

        let first = read_msg(&mut cursor).unwrap();
        let second = read_msg(&mut cursor).unwrap();
        assert_eq!(ChannelClose::decode_body(&first.body).channel, 2);
        assert_eq!(ChannelClose::decode_body(&second.body).channel, 3);
    }

    #[test]
    fn eof_before_header_is_disconnect() {
        let mut cursor = Cursor::new(Vec::<u8>::new());
        let err = read_msg(&mut cursor).unwrap_err();
        assert!(matches!(err, WireError::PeerDisconnected));
    }

    #[test]
    fn partial_header_is_disconnect() {
        let mut cursor = Cursor::new(vec![MSG_CHANNEL_CLOSE, 0]);
        let err = read_msg(&mut cursor).unwrap_err();
        assert!(matches!(err, WireError::PeerDisconnected));
    }

    #[test]
    fn undersized_declaration_is_impossible() {
        let mut cursor = Cursor::new(MsgHeader::new(9, 1).encode().to_vec());
        let err = read_msg(&mut cursor).unwrap_err();
        assert!(matches!(err, WireError::ImpossibleMessage { size: 1 }));
    }

    #[test]
    fn eof_mid_body_is_truncation() {
        let wire = ChannelClose { channel: 4 }.encode();
        let mut cursor = Cursor::new(wire[..6].to_vec());

        let err = read_msg(&mut cursor).unwrap_err();
        assert!(matches!(
            err,
            WireError::TruncatedMessage {
                expected: 4,
                got: 2
            }
        ));
    }

    #[test]
    fn byte_by_byte_reads_assemble() {
        let wire = ChannelClose { channel: 9 }.encode();
        let mut rdr = ByteByByteReader {
            bytes: wire.to_vec(),
            pos: 0,
        };

        let msg = read_msg(&mut rdr).unwrap();
        assert_eq!(ChannelClose::decode_body(&msg.body).channel, 9);
    }

    #[test]
    fn interrupted_read_retries() {
        let wire = ChannelClose { channel: 1 }.encode();
        let mut rdr = InterruptedThenData {
            interrupted: false,
            bytes: wire.to_vec(),
            pos: 0,
        };

        let msg = read_msg(&mut rdr).unwrap();
        assert_eq!(msg.header.kind, MSG_CHANNEL_CLOSE);
    }

    #[test]
    fn owned_msg_roundtrips_through_bytes() {
        let msg = OwnedMsg::new(40, b"status".to_vec());
        let mut cursor = Cursor::new(msg.to_bytes());
        assert_eq!(read_msg(&mut cursor).unwrap(), msg);
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            let n = (self.bytes.len() - self.pos).min(buf.len());
            buf[..n].copy_from_slice(&self.bytes[self.pos..self.pos + n]);
            self.pos += n;
            Ok(n)
        }
    }
}
