//! # dgrelay core
//!
//! A length-preserving datagram relay pipeline. Discrete messages are read
//! from a source endpoint (UDP socket, file, stdin, or a pseudo-random
//! generator) and written to a destination endpoint (UDP socket, file,
//! stdout), keeping message boundaries intact. On stream transports each
//! record is framed with a 4-byte big-endian length prefix; datagram sockets
//! preserve boundaries natively.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐    producer     ┌──────────────┐    consumer     ┌──────────────┐
//! │   Source    │ ──────────────▶ │  FramedRing  │ ──────────────▶ │ Destination  │
//! │ (udp/file/  │  commit_batch   │  (bounded,   │  start/commit   │ (udp/file/   │
//! │  random)    │                 │   framed)    │     batch       │  stdout)     │
//! └────────────┘                 └──────────────┘                 └──────────────┘
//!       ▲                               │  end-of-stream flag            │
//!       └── force_eof ◀── Copier ◀──────┴────────────────────────────────┘
//! ```
//!
//! The [`copier::Copier`] owns the ring and both endpoints, runs each side on
//! its own OS thread, and optionally runs a third thread that turns `SIGINT`
//! into a forced end-of-stream and `SIGUSR1` into an on-demand statistics
//! line. Shutdown is cooperative: forcing end-of-stream closes the source's
//! OS handle, which wakes a thread parked inside a blocking receive.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod config;
pub mod copier;
pub mod dest;
pub mod endpoint;
pub mod error;
pub mod resolve;
pub mod ring;
pub mod source;
pub mod stats;
pub mod sys;

pub use config::Config;
pub use copier::Copier;
pub use dest::Destination;
pub use error::{Error, Result, RingError};
pub use ring::{ConsumerBatch, FramedRing, Record, RecordFlags};
pub use source::Source;
pub use stats::{CopierStats, DestinationStats, RingStats, SourceStats, StatsCell};

/// Length of the big-endian record-length prefix used on stream transports.
pub const LEN_PREFIX: usize = 4;

/// Default per-datagram receive buffer size (the UDP maximum).
pub const DEFAULT_MAX_DATAGRAM_SIZE: usize = 65535;

/// Default ring capacity in bytes, including length prefixes.
pub const DEFAULT_MAX_BACKLOG: usize = 256 * 1024 * 1024;

/// Default ceiling on the bytes moved by a single read or write syscall.
pub const DEFAULT_MAX_IO_SIZE: usize = 256 * 1024;
