mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "pstream", version, about = "Packet stream diagnostics")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(
        long,
        value_name = "FORMAT",
        default_value = "text",
        env = "PSTREAM_LOG_FORMAT",
        global = true
    )]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "info",
        env = "PSTREAM_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    match cmd::run(cli.command, format) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cmd::Transport;

    #[test]
    fn parses_loopback_defaults() {
        let cli = Cli::try_parse_from(["pstream", "loopback"]).expect("loopback should parse");
        let Command::Loopback(args) = cli.command else {
            panic!("expected loopback");
        };
        assert!(matches!(args.transport, Transport::Unix));
        assert_eq!(args.packets, 8);
        assert_eq!(args.memblocks, 8);
        assert_eq!(args.channel, 1);
        assert_eq!(args.max_io, None);
        assert_eq!(args.timeout, "5s");
    }

    #[test]
    fn parses_memory_loopback_with_options() {
        let cli = Cli::try_parse_from([
            "pstream",
            "--format",
            "json",
            "loopback",
            "--transport",
            "memory",
            "--max-io",
            "1",
            "--delta",
            "-40",
            "--size",
            "300",
        ])
        .expect("memory loopback should parse");

        assert!(matches!(cli.format, Some(OutputFormat::Json)));
        let Command::Loopback(args) = cli.command else {
            panic!("expected loopback");
        };
        assert!(matches!(args.transport, Transport::Memory));
        assert_eq!(args.max_io, Some(1));
        assert_eq!(args.delta, -40);
        assert_eq!(args.size, 300);
    }

    #[test]
    fn rejects_unknown_transport() {
        let err = Cli::try_parse_from(["pstream", "loopback", "--transport", "tcp"])
            .expect_err("unknown transport should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }

    #[test]
    fn parses_extended_version() {
        let cli = Cli::try_parse_from(["pstream", "version", "--extended"])
            .expect("version args should parse");
        assert!(matches!(cli.command, Command::Version(args) if args.extended));
    }
}
