use std::io;

use chanmux_engine::EngineError;
use chanmux_transport::TransportError;
use chanmux_wire::WireError;

use crate::session::SessionError;

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const PERMISSION_DENIED: i32 = 50;
pub const PROTOCOL_ERROR: i32 = 60;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

/// Everything the CLI can fail with, one variant per layer that can give
/// out, so the exit code can say which one did.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Session socket setup failed.
    #[error("{context}: {source}")]
    Transport {
        context: &'static str,
        source: TransportError,
    },

    /// The peer byte stream violated the framing rules.
    #[error("{context}: {source}")]
    Wire {
        context: &'static str,
        source: WireError,
    },

    /// The pump died, from a protocol violation or an fd giving out.
    #[error("{context}: {source}")]
    Engine {
        context: &'static str,
        source: EngineError,
    },

    /// The hello exchange went wrong.
    #[error("{context}: {source}")]
    Session {
        context: &'static str,
        source: SessionError,
    },

    /// A plain OS-level failure outside the engine (spawn, dup, write).
    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        source: io::Error,
    },

    /// The peer went away before delivering the remote exit status.
    #[error("session ended before the remote exit status arrived")]
    SessionCutShort,

    /// A broken assumption inside the tool itself.
    #[error("{0}")]
    Internal(String),
}

impl CliError {
    pub fn transport(context: &'static str, source: TransportError) -> Self {
        Self::Transport { context, source }
    }

    pub fn wire(context: &'static str, source: WireError) -> Self {
        Self::Wire { context, source }
    }

    pub fn engine(context: &'static str, source: EngineError) -> Self {
        Self::Engine { context, source }
    }

    pub fn session(context: &'static str, source: SessionError) -> Self {
        Self::Session { context, source }
    }

    pub fn io(context: &'static str, source: io::Error) -> Self {
        Self::Io { context, source }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// The process exit code this failure maps to. Protocol divergence
    /// and plain disconnects get distinct codes so scripts wrapping
    /// `attach` can tell a broken peer from a vanished one.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Transport { source, .. } => match source {
                TransportError::InUse { .. } | TransportError::NotASocket { .. } => FAILURE,
                TransportError::Bind { source, .. }
                | TransportError::Connect { source, .. }
                | TransportError::Accept(source)
                | TransportError::Io(source) => io_exit_code(source),
                TransportError::PathTooLong { .. } => TRANSPORT_ERROR,
            },
            CliError::Wire { source, .. } => match source {
                WireError::Io(source) => io_exit_code(source),
                WireError::PeerDisconnected => FAILURE,
                _ => PROTOCOL_ERROR,
            },
            CliError::Engine { source, .. } => match source {
                EngineError::Wire(WireError::Io(source))
                | EngineError::Poll(source)
                | EngineError::ChannelIo { source, .. } => io_exit_code(source),
                EngineError::Wire(WireError::PeerDisconnected) => FAILURE,
                _ => PROTOCOL_ERROR,
            },
            CliError::Session { .. } => PROTOCOL_ERROR,
            CliError::Io { source, .. } => io_exit_code(source),
            CliError::SessionCutShort => FAILURE,
            CliError::Internal(_) => INTERNAL,
        }
    }
}

fn io_exit_code(err: &io::Error) -> i32 {
    match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        // The other end is gone or was never there; that is an ordinary
        // failed session, not a tool malfunction.
        io::ErrorKind::NotFound
        | io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::BrokenPipe => FAILURE,
        _ => INTERNAL,
    }
}
