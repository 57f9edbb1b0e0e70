use std::io::Write;
use std::os::fd::{AsFd, OwnedFd};

use tracing::info;

use chanmux_engine::{Channel, Direction, Engine, EngineConfig};
use chanmux_wire::read_msg;

use crate::cmd::AttachArgs;
use crate::exit::{CliError, CliResult};
use crate::session::{
    negotiate, Hello, SessionDispatch, CH_STDERR, CH_STDOUT, PROTOCOL_VERSION,
};

pub fn run(args: AttachArgs) -> CliResult<i32> {
    let mut stream = chanmux_transport::connect(&args.socket)
        .map_err(|err| CliError::transport("connect failed", err))?;

    // We speak first, then adopt the negotiated minima.
    let ours = Hello {
        version: PROTOCOL_VERSION,
        ring_size: args.ring_size,
        max_msg: args.max_msg,
    };
    let hello = ours
        .to_msg()
        .map_err(|err| CliError::session("hello encode failed", err))?;
    stream
        .write_all(&hello.to_bytes())
        .map_err(|err| CliError::io("hello write failed", err))?;
    let msg = read_msg(&mut stream).map_err(|err| CliError::wire("hello read failed", err))?;
    let theirs =
        Hello::from_msg(&msg).map_err(|err| CliError::session("hello rejected", err))?;
    let nego = negotiate(&ours, &theirs)
        .map_err(|err| CliError::session("negotiation failed", err))?;
    info!(
        ring_size = nego.ring_size,
        max_msg = nego.max_msg,
        "session negotiated"
    );

    let stdin = dup_stdio(std::io::stdin().as_fd(), "stdin dup failed")?;
    let stdout = dup_stdio(std::io::stdout().as_fd(), "stdout dup failed")?;
    let stderr = dup_stdio(std::io::stderr().as_fd(), "stderr dup failed")?;

    let ring = nego.ring_size as usize;
    let transport_dup: OwnedFd = stream
        .try_clone()
        .map_err(|err| CliError::io("transport dup failed", err))?
        .into();
    let channels = vec![
        Channel::new(Direction::FromFd, transport_dup, ring),
        Channel::new(Direction::ToFd, stream.into(), ring),
        Channel::new(Direction::FromFd, stdin, ring).with_window(nego.ring_size),
        Channel::new(Direction::ToFd, stdout, ring).with_bytes_written_tracking(),
        Channel::new(Direction::ToFd, stderr, ring).with_bytes_written_tracking(),
    ];
    let config = EngineConfig {
        max_outgoing_msg: nego.max_msg,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(channels, config)
        .map_err(|err| CliError::engine("engine setup failed", err))?;
    engine
        .init()
        .map_err(|err| CliError::engine("engine init failed", err))?;

    let mut dispatch = SessionDispatch::default();
    loop {
        engine
            .pump(&mut dispatch)
            .map_err(|err| CliError::engine("pump failed", err))?;

        if let Some(code) = dispatch.exit_status {
            if engine.channel(CH_STDOUT).rb().is_empty()
                && engine.channel(CH_STDERR).rb().is_empty()
            {
                info!(code, "remote command finished");
                return Ok(code);
            }
        }

        if dispatch.exit_status.is_none() && !engine.peer_connected() {
            return Err(CliError::SessionCutShort);
        }

        engine
            .do_io()
            .map_err(|err| CliError::engine("io failed", err))?;
    }
}

fn dup_stdio(fd: std::os::fd::BorrowedFd<'_>, context: &'static str) -> CliResult<OwnedFd> {
    fd.try_clone_to_owned()
        .map_err(|err| CliError::io(context, err))
}
