//! Session layer shared by `host` and `attach`: the hello exchange that
//! fixes ring and message sizes before the pump starts, the channel number
//! assignments for bridged stdio, and the dispatcher extension that carries
//! the remote exit status.

use serde::{Deserialize, Serialize};

use chanmux_engine::{Engine, EngineError, MsgDispatch};
use chanmux_wire::{MsgHeader, OwnedMsg};

/// Session setup greeting, exchanged before the pump starts.
pub const MSG_HELLO: u8 = 16;
/// Remote command exit status, sent by the host at end of session.
pub const MSG_EXIT_STATUS: u8 = 17;

pub const PROTOCOL_VERSION: u32 = 1;

/// Channel carrying the command's stdin (attach source, host sink).
pub const CH_STDIN: usize = 2;
/// Channel carrying the command's stdout (host source, attach sink).
pub const CH_STDOUT: usize = 3;
/// Channel carrying the command's stderr (host source, attach sink).
pub const CH_STDERR: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("malformed hello: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unexpected message kind {kind} during session setup")]
    UnexpectedMessage { kind: u8 },

    #[error("protocol version mismatch (ours {ours}, peer {theirs})")]
    VersionMismatch { ours: u32, theirs: u32 },

    #[error("peer offered an unusable {what} of {value}")]
    BadParameter { what: &'static str, value: u32 },
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Setup greeting. Each side states what it can do; both adopt the minima.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hello {
    pub version: u32,
    /// Per-channel ring capacity in bytes.
    pub ring_size: u32,
    /// Largest single message, header included.
    pub max_msg: u32,
}

impl Hello {
    pub fn to_msg(&self) -> Result<OwnedMsg> {
        Ok(OwnedMsg::new(MSG_HELLO, serde_json::to_vec(self)?))
    }

    pub fn from_msg(msg: &OwnedMsg) -> Result<Self> {
        if msg.header.kind != MSG_HELLO {
            return Err(SessionError::UnexpectedMessage {
                kind: msg.header.kind,
            });
        }
        Ok(serde_json::from_slice(&msg.body)?)
    }
}

/// Session parameters both peers have agreed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Negotiated {
    pub ring_size: u32,
    pub max_msg: u32,
}

/// Combine the two hellos into one set of session parameters.
///
/// Both sides run this over the same pair of messages, so they land on
/// identical values — which the protocol requires: the initial window for
/// a source channel is the peer sink's ring capacity.
pub fn negotiate(ours: &Hello, theirs: &Hello) -> Result<Negotiated> {
    if theirs.version != ours.version {
        return Err(SessionError::VersionMismatch {
            ours: ours.version,
            theirs: theirs.version,
        });
    }
    let max_msg = ours.max_msg.min(theirs.max_msg);
    let ring_size = ours.ring_size.min(theirs.ring_size);
    if max_msg < 64 {
        return Err(SessionError::BadParameter {
            what: "max message size",
            value: theirs.max_msg,
        });
    }
    if ring_size < max_msg {
        return Err(SessionError::BadParameter {
            what: "ring size",
            value: theirs.ring_size,
        });
    }
    Ok(Negotiated { ring_size, max_msg })
}

pub fn exit_status_msg(code: i32) -> OwnedMsg {
    OwnedMsg::new(MSG_EXIT_STATUS, code.to_le_bytes().to_vec())
}

/// Dispatcher for the attach side: owns the exit-status extension and
/// hands the three core kinds back to the engine.
#[derive(Debug, Default)]
pub struct SessionDispatch {
    pub exit_status: Option<i32>,
}

impl MsgDispatch for SessionDispatch {
    fn dispatch(
        &mut self,
        engine: &mut Engine,
        header: MsgHeader,
    ) -> chanmux_engine::Result<()> {
        match header.kind {
            MSG_EXIT_STATUS => {
                let msg = engine.take_inbound_msg(header);
                let Ok(bytes) = <[u8; 4]>::try_from(msg.body.as_slice()) else {
                    return Err(EngineError::WrongMsgSize {
                        kind: header.kind,
                        size: header.size,
                    });
                };
                let code = i32::from_le_bytes(bytes);
                tracing::debug!(code, "remote command exited");
                self.exit_status = Some(code);
                Ok(())
            }
            _ => engine.dispatch_core(header),
        }
    }
}
