//! Peer-transport setup for chanmux sessions.
//!
//! The engine itself is transport-agnostic — it pumps whatever fds it is
//! handed. This crate supplies the one transport the CLI speaks: a
//! filesystem-path Unix domain socket. A bind probes the path first so a
//! live host is never displaced, then stages the new socket under a
//! private name, hardens its permissions while it is unreachable, and
//! renames it into place. Connections come back as plain `UnixStream`s so
//! callers can split them into the owned fds the engine's transport
//! channels want.

pub mod error;
pub mod uds;

pub use error::{Result, TransportError};
pub use uds::{connect, SessionSocket};
