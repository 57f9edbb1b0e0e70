use std::path::PathBuf;

use clap::{Args, Subcommand};

use crate::exit::CliResult;

pub mod attach;
pub mod host;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve a command's stdio to attaching clients.
    Host(HostArgs),
    /// Attach to a hosted session and bridge local stdio.
    Attach(AttachArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Host(args) => host::run(args),
        Command::Attach(args) => attach::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct HostArgs {
    /// Socket path to bind.
    pub socket: PathBuf,

    /// Exit after serving one session.
    #[arg(long)]
    pub once: bool,

    /// Per-channel ring capacity in bytes (negotiated down to the
    /// smaller of the two peers).
    #[arg(long, default_value_t = 64 * 1024)]
    pub ring_size: u32,

    /// Largest single protocol message, header included.
    #[arg(long, default_value_t = 4096)]
    pub max_msg: u32,

    /// Command to run for each session, after `--`.
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

#[derive(Args, Debug)]
pub struct AttachArgs {
    /// Socket path to connect to.
    pub socket: PathBuf,

    /// Per-channel ring capacity in bytes (negotiated down to the
    /// smaller of the two peers).
    #[arg(long, default_value_t = 64 * 1024)]
    pub ring_size: u32,

    /// Largest single protocol message, header included.
    #[arg(long, default_value_t = 4096)]
    pub max_msg: u32,
}

#[derive(Args, Debug, Default)]
pub struct VersionArgs {
    /// Show extended build information.
    #[arg(long)]
    pub extended: bool,
}
