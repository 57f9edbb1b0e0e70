use chanmux_ring::RingBuf;

use crate::error::{Result, WireError};
use crate::msg::{MsgHeader, HEADER_SIZE};

/// Detect a complete message at the front of the peer-inbound ring.
///
/// Returns `Ok(None)` until a whole message is buffered. The header is
/// peeked, never consumed; the caller is responsible for removing exactly
/// `header.size` bytes once it has processed the message.
///
/// Fails if the header declares a size smaller than the header itself, or
/// a size the ring could not hold even fully drained — in either case the
/// stream can never frame again and the session is unrecoverable.
pub fn detect_msg(rb: &RingBuf) -> Result<Option<MsgHeader>> {
    let avail = rb.size();
    if avail < HEADER_SIZE {
        return Ok(None);
    }

    let mut bytes = [0u8; HEADER_SIZE];
    rb.copy_out(&mut bytes);
    let header = MsgHeader::decode(&bytes);

    let declared = header.size as usize;
    if declared < HEADER_SIZE {
        return Err(WireError::ImpossibleMessage { size: header.size });
    }

    if declared > avail {
        if declared - avail > rb.room() {
            return Err(WireError::ImpossiblyLargeMessage {
                kind: header.kind,
                needed: declared - avail,
                room: rb.room(),
            });
        }
        return Ok(None);
    }

    Ok(Some(header))
}
