//! The chanmux I/O pump: a single-threaded, poll-driven engine that
//! multiplexes per-channel byte streams over one peer transport.
//!
//! Each channel binds a ring buffer and (until closed) a non-blocking file
//! descriptor. Two reserved channels carry the peer transport itself; the
//! rest bridge local fds. One engine turn polls every channel, services the
//! ready ones, drains framed messages off the peer-inbound ring, and fills
//! the peer-outbound ring with window credits, data, and end-of-stream
//! notices — in that order, so credit returns are never starved by our own
//! sends.
//!
//! The engine never recovers locally from a protocol violation: the peers
//! have diverged, and the error unwinds to whatever drives the pump.

pub mod channel;
pub mod dispatch;
pub mod engine;
pub mod error;

pub use channel::{Channel, Direction};
pub use dispatch::{CoreDispatch, MsgDispatch};
pub use engine::{Engine, EngineConfig, DEFAULT_MAX_OUTGOING_MSG, FROM_PEER, NR_SPECIAL_CH, TO_PEER};
pub use error::{EngineError, Result};
