//! dgrelay command-line interface.
//!
//! Copies datagrams between two endpoints while preserving message
//! boundaries. On files and pipes each record carries a 4-byte big-endian
//! length prefix; UDP endpoints keep boundaries natively.

use std::sync::Arc;

use clap::Parser;
use tracing::debug;
use tracing_subscriber::filter::LevelFilter;

use dgrelay_core::{Config, Copier};

/// Copy between datagram streams while preserving message lengths.
///
/// Reads datagrams from a UDP socket, file, pipe, or generator and forwards
/// them to another UDP socket, file, or pipe. For files and pipes, each
/// datagram is prefixed with a 4-byte length field in network byte order.
#[derive(Parser, Debug)]
#[command(name = "dgrelay", version, about, verbatim_doc_comment)]
#[command(after_help = "\
Examples:
  dgrelay udp://9876
    Listen on UDP port 9876 and copy datagrams to stdout.

  dgrelay capture.bin udp://replay.example.net:9876 --max-datagram-rate 100
    Replay a capture file as UDP datagrams at 100 per second.

  dgrelay 'random://?n=1000&min_size=32&max_size=1400&seed=1' out.bin
    Write 1000 reproducible random records to a file.")]
struct Cli {
    /// Per-datagram receive buffer size in bytes; larger datagrams are
    /// discarded
    #[arg(long, default_value_t = dgrelay_core::DEFAULT_MAX_DATAGRAM_SIZE)]
    max_datagram_size: usize,

    /// Bytes of backlog to buffer between reader and writer, length
    /// prefixes included
    #[arg(short = 'b', long, default_value_t = dgrelay_core::DEFAULT_MAX_BACKLOG)]
    max_backlog: usize,

    /// Seconds without datagrams on a UDP source before inferring EOF;
    /// <= 0 waits forever
    #[arg(short = 't', long, default_value_t = 0.0, allow_negative_numbers = true)]
    eof_timeout: f64,

    /// Seconds to wait for the first datagram on a UDP source; < 0 uses
    /// --eof-timeout, 0 waits forever
    #[arg(long, default_value_t = -1.0, allow_negative_numbers = true)]
    start_timeout: f64,

    /// Maximum datagrams per second at a UDP destination; <= 0 is
    /// unlimited
    #[arg(short = 'r', long, default_value_t = -1.0, allow_negative_numbers = true)]
    max_datagram_rate: f64,

    /// Stop after copying this many datagrams; 0 copies everything
    #[arg(short = 'n', long, default_value_t = 0)]
    max_datagrams: u64,

    /// Maximum bytes requested by one read syscall
    #[arg(long, default_value_t = dgrelay_core::DEFAULT_MAX_IO_SIZE)]
    max_read_size: usize,

    /// Maximum bytes submitted to one write syscall
    #[arg(long, default_value_t = dgrelay_core::DEFAULT_MAX_IO_SIZE)]
    max_write_size: usize,

    /// Datagrams received per vectored-receive syscall; 0 uses the OS
    /// maximum
    #[arg(long, default_value_t = 0)]
    max_iovecs: usize,

    /// Append to an existing destination file instead of truncating it
    #[arg(short = 'a', long)]
    append: bool,

    /// Disable the signal thread (SIGINT drain, SIGUSR1 stats)
    #[arg(long)]
    no_handle_signals: bool,

    /// Log level: debug, info, warning, error, or critical
    #[arg(short = 'l', long, default_value = "warning")]
    log_level: String,

    /// Print a backtrace when the run fails
    #[arg(long)]
    tb: bool,

    /// Datagram source: a path, "file://<path>", "udp://[bind:]port",
    /// "random://[?]k=v&...", or "-"/"stdin"
    #[arg(default_value = "stdin")]
    src: String,

    /// Datagram destination: a path, "file://<path>", "udp://host:port",
    /// or "-"/"stdout"
    #[arg(default_value = "stdout")]
    dst: String,
}

fn parse_log_level(name: &str) -> Option<LevelFilter> {
    match name.to_ascii_lowercase().as_str() {
        "debug" => Some(LevelFilter::DEBUG),
        "info" => Some(LevelFilter::INFO),
        "warning" => Some(LevelFilter::WARN),
        "error" => Some(LevelFilter::ERROR),
        "critical" => Some(LevelFilter::ERROR),
        _ => None,
    }
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            std::process::exit(1);
        }
    };

    if cli.tb {
        std::env::set_var("RUST_BACKTRACE", "1");
    }

    let Some(level) = parse_log_level(&cli.log_level) else {
        eprintln!("dgrelay: invalid log level '{}'", cli.log_level);
        std::process::exit(1);
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(&cli) {
        if cli.tb {
            eprintln!("dgrelay: {err:?}");
        } else {
            eprintln!("dgrelay: {err:#}");
        }
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    let config = Arc::new(Config {
        max_datagram_size: cli.max_datagram_size,
        max_backlog: cli.max_backlog,
        eof_timeout: cli.eof_timeout,
        start_timeout: cli.start_timeout,
        max_datagram_rate: cli.max_datagram_rate,
        max_datagrams: cli.max_datagrams,
        max_read_size: cli.max_read_size,
        max_write_size: cli.max_write_size,
        max_iovecs: cli.max_iovecs,
        append: cli.append,
        handle_signals: !cli.no_handle_signals,
    });
    config.validate()?;
    debug!(?config, src = %cli.src, dst = %cli.dst, "starting relay");

    let mut copier = Copier::new(config, &cli.src, &cli.dst)?;
    copier.start()?;
    let result = copier.wait();
    // The summary line goes out whether or not the copy succeeded.
    eprintln!("{}", copier.get_stats().brief_str());
    result?;
    Ok(())
}
