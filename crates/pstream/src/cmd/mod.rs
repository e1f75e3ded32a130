use clap::{Args, Subcommand, ValueEnum};

use crate::exit::CliResult;
use crate::output::OutputFormat;

pub mod loopback;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream packets and memblocks between two local endpoints and verify them.
    Loopback(LoopbackArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command, format: OutputFormat) -> CliResult<i32> {
    match command {
        Command::Loopback(args) => loopback::run(args, format),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
pub enum Transport {
    /// A connected Unix socket pair.
    Unix,
    /// An in-process pipe pair.
    Memory,
}

#[derive(Args, Debug)]
pub struct LoopbackArgs {
    /// Channel pair to stream over.
    #[arg(long, value_enum, default_value = "unix")]
    pub transport: Transport,
    /// Number of packets to send.
    #[arg(long, default_value = "8")]
    pub packets: usize,
    /// Number of memblock chunks to send.
    #[arg(long, default_value = "8")]
    pub memblocks: usize,
    /// Payload size of every frame, in bytes.
    #[arg(long, default_value = "1024")]
    pub size: usize,
    /// Memblock channel id (must be nonzero).
    #[arg(long, default_value = "1")]
    pub channel: u32,
    /// Delta attached to every memblock frame.
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    pub delta: i32,
    /// Cap on bytes moved per channel call (memory transport only).
    #[arg(long, value_name = "BYTES")]
    pub max_io: Option<usize>,
    /// Give up after this long (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Include build and platform details.
    #[arg(long)]
    pub extended: bool,
}
