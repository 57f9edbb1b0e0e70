use chanmux_wire::MsgHeader;

use crate::engine::Engine;
use crate::error::Result;

/// Hook for side-specific message handling.
///
/// The engine frames messages but does not assume it knows every kind; a
/// session layer implements this trait to own its extension kinds and
/// delegates everything else to [`Engine::dispatch_core`].
///
/// Implementations must consume exactly `header.size` bytes from the
/// peer-inbound ring for every message they handle themselves — the pump
/// frames the next message from whatever the dispatcher leaves behind.
pub trait MsgDispatch {
    fn dispatch(&mut self, engine: &mut Engine, header: MsgHeader) -> Result<()>;
}

/// The default dispatcher: recognizes only the three core kinds.
#[derive(Debug, Default)]
pub struct CoreDispatch;

impl MsgDispatch for CoreDispatch {
    fn dispatch(&mut self, engine: &mut Engine, header: MsgHeader) -> Result<()> {
        engine.dispatch_core(header)
    }
}
