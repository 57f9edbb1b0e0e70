use std::io::Write;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::process::{Child, Command as SysCommand, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use chanmux_engine::{Channel, CoreDispatch, Direction, Engine, EngineConfig, TO_PEER};
use chanmux_transport::SessionSocket;
use chanmux_wire::{read_msg, WireError};

use crate::cmd::HostArgs;
use crate::exit::{CliError, CliResult, INTERNAL, SUCCESS};
use crate::session::{
    exit_status_msg, negotiate, Hello, CH_STDERR, CH_STDIN, CH_STDOUT, PROTOCOL_VERSION,
};

pub fn run(args: HostArgs) -> CliResult<i32> {
    let listener =
        SessionSocket::bind(&args.socket).map_err(|err| CliError::transport("bind failed", err))?;

    let running = Arc::new(AtomicBool::new(true));
    install_ctrlc_handler(running.clone())?;

    while running.load(Ordering::SeqCst) {
        let stream = match listener.accept() {
            Ok(stream) => stream,
            Err(err) => return Err(CliError::transport("accept failed", err)),
        };

        match serve_session(stream, &args) {
            Ok(true) => {
                info!("session finished");
                if args.once {
                    break;
                }
            }
            // Probe connections and vanished clients don't use up the
            // --once session.
            Ok(false) => {}
            Err(err) if args.once => return Err(err),
            Err(err) => warn!(error = %err, "session failed"),
        }
    }

    Ok(SUCCESS)
}

/// Serve one connection. Returns false if the connection went away before
/// a hello arrived — binding hosts probe the socket like that, and it is
/// not a session.
fn serve_session(mut stream: UnixStream, args: &HostArgs) -> CliResult<bool> {
    // The attaching client speaks first.
    let msg = match read_msg(&mut stream) {
        Ok(msg) => msg,
        Err(WireError::PeerDisconnected) => {
            debug!("connection closed before hello");
            return Ok(false);
        }
        Err(err) => return Err(CliError::wire("hello read failed", err)),
    };
    let theirs = Hello::from_msg(&msg).map_err(|err| CliError::session("hello rejected", err))?;
    let ours = Hello {
        version: PROTOCOL_VERSION,
        ring_size: args.ring_size,
        max_msg: args.max_msg,
    };
    let reply = ours
        .to_msg()
        .map_err(|err| CliError::session("hello encode failed", err))?;
    stream
        .write_all(&reply.to_bytes())
        .map_err(|err| CliError::io("hello write failed", err))?;
    let nego =
        negotiate(&ours, &theirs).map_err(|err| CliError::session("negotiation failed", err))?;
    info!(
        ring_size = nego.ring_size,
        max_msg = nego.max_msg,
        command = ?args.command,
        "session negotiated"
    );

    let mut child = SysCommand::new(&args.command[0])
        .args(&args.command[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| CliError::io("spawn failed", err))?;
    let child_in = take_fd(child.stdin.take(), "stdin")?;
    let child_out = take_fd(child.stdout.take(), "stdout")?;
    let child_err = take_fd(child.stderr.take(), "stderr")?;

    let ring = nego.ring_size as usize;
    let transport_dup: OwnedFd = stream
        .try_clone()
        .map_err(|err| CliError::io("transport dup failed", err))?
        .into();
    let channels = vec![
        Channel::new(Direction::FromFd, transport_dup, ring),
        Channel::new(Direction::ToFd, stream.into(), ring),
        Channel::new(Direction::ToFd, child_in, ring).with_bytes_written_tracking(),
        Channel::new(Direction::FromFd, child_out, ring).with_window(nego.ring_size),
        Channel::new(Direction::FromFd, child_err, ring).with_window(nego.ring_size),
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
    info!(
        stdin = CH_STDIN,
        stdout = CH_STDOUT,
        stderr = CH_STDERR,
        "bridging command stdio"
    );

    let result = drive(&mut engine, &mut child);
    // The command may still be running if the client vanished or the
    // session errored out.
    let _ = child.kill();
    let _ = child.wait();
    result.map(|()| true)
}

fn drive(engine: &mut Engine, child: &mut Child) -> CliResult<()> {
    let mut dispatch = CoreDispatch;
    let mut exit_status: Option<i32> = None;

    loop {
        engine
            .pump(&mut dispatch)
            .map_err(|err| CliError::engine("pump failed", err))?;

        if exit_status.is_none() {
            if let Some(status) = child
                .try_wait()
                .map_err(|err| CliError::io("wait failed", err))?
            {
                exit_status = Some(exit_code(status));
            }
        }

        if let Some(code) = exit_status {
            if output_done(engine) {
                let msg = exit_status_msg(code).to_bytes();
                engine
                    .queue_message_synch(&mut dispatch, &msg)
                    .map_err(|err| CliError::engine("exit status send failed", err))?;
                flush_outbound(engine)?;
                info!(code, "reported exit status");
                return Ok(());
            }
        }

        if !engine.peer_connected() {
            warn!("client disconnected mid-session");
            return Ok(());
        }

        engine
            .do_io()
            .map_err(|err| CliError::engine("io failed", err))?;
    }
}

/// All command output has been forwarded and announced as ended.
fn output_done(engine: &Engine) -> bool {
    engine.channel(CH_STDOUT).sent_eof() && engine.channel(CH_STDERR).sent_eof()
}

fn flush_outbound(engine: &mut Engine) -> CliResult<()> {
    while !engine.channel(TO_PEER).rb().is_empty() && engine.peer_connected() {
        engine
            .do_io()
            .map_err(|err| CliError::engine("flush failed", err))?;
    }
    Ok(())
}

fn exit_code(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|sig| 128 + sig))
        .unwrap_or(INTERNAL)
}

fn take_fd<T: Into<OwnedFd>>(handle: Option<T>, what: &str) -> CliResult<OwnedFd> {
    handle
        .map(Into::into)
        .ok_or_else(|| CliError::internal(format!("child {what} not piped")))
}

fn install_ctrlc_handler(running: Arc<AtomicBool>) -> CliResult<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .map_err(|err| CliError::internal(format!("signal handler setup failed: {err}")))
}
