//! Error types for the relay pipeline.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level relay errors.
#[derive(Debug, Error)]
pub enum Error {
    /// An endpoint URI could not be parsed.
    #[error("invalid endpoint '{uri}': {reason}")]
    InvalidEndpoint {
        /// The URI as given.
        uri: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A configuration knob is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Name resolution produced no usable address, or every bind/connect
    /// attempt failed.
    #[error("no usable address for {host}:{port}")]
    Resolve {
        /// Host portion of the endpoint.
        host: String,
        /// Port portion of the endpoint.
        port: u16,
    },

    /// The source's underlying handle could not be opened or bound.
    #[error("failed to open source {name}")]
    SourceOpen {
        /// Endpoint name for diagnostics.
        name: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// The destination's underlying handle could not be opened or connected.
    #[error("failed to open destination {name}")]
    DestinationOpen {
        /// Endpoint name for diagnostics.
        name: String,
        /// Underlying OS error.
        #[source]
        source: io::Error,
    },

    /// A read or receive returned a non-recoverable OS error.
    #[error("source I/O failed")]
    SourceIo(#[source] io::Error),

    /// A write or send returned a non-recoverable OS error.
    #[error("destination I/O failed")]
    DestinationIo(#[source] io::Error),

    /// A ring-contract violation.
    #[error(transparent)]
    Ring(#[from] RingError),

    /// A worker thread could not be spawned.
    #[error("failed to spawn worker thread")]
    Spawn(#[source] io::Error),
}

/// Violations of the [`FramedRing`](crate::ring::FramedRing) contract.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RingError {
    /// A producer-side operation was attempted after end-of-stream.
    #[error("producer write after end-of-stream")]
    ClosedForWrite,

    /// A record plus its 4-byte prefix exceeds the ring capacity. Fatal:
    /// the ring cannot buffer even one such record.
    #[error("datagram too large for ring: {len} bytes + 4-byte prefix, capacity {cap} bytes")]
    MessageTooLarge {
        /// Payload length of the offending record.
        len: usize,
        /// Ring capacity in bytes.
        cap: usize,
    },

    /// The consumer released more bytes than the ring holds.
    #[error("consumer released {n} bytes with only {available} buffered")]
    OverCommit {
        /// Bytes the consumer tried to release.
        n: usize,
        /// Bytes actually buffered.
        available: usize,
    },

    /// The consumer asked for more bytes than the ring can ever hold.
    #[error("consumer requested {n} bytes, capacity {cap} bytes")]
    RequestTooLarge {
        /// Bytes requested.
        n: usize,
        /// Ring capacity in bytes.
        cap: usize,
    },
}
