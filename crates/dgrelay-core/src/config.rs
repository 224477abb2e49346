//! Relay configuration.
//!
//! A [`Config`] is built once (normally from CLI flags), validated, and then
//! passed by `Arc` to every component. Several knobs encode their "disabled"
//! state in-band (zero or negative values); the accessor methods resolve
//! those encodings so the hot paths never re-interpret them.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::{sys, DEFAULT_MAX_BACKLOG, DEFAULT_MAX_DATAGRAM_SIZE, DEFAULT_MAX_IO_SIZE, LEN_PREFIX};

/// Immutable tuning knobs for a relay run.
#[derive(Debug, Clone)]
pub struct Config {
    /// Per-datagram receive buffer size in bytes. Datagrams larger than this
    /// arrive truncated and are discarded.
    pub max_datagram_size: usize,

    /// Ring capacity in bytes, including the 4-byte length prefixes.
    pub max_backlog: usize,

    /// Seconds of idle on a UDP source before end-of-stream is synthesized.
    /// `<= 0` means wait forever.
    pub eof_timeout: f64,

    /// Same as `eof_timeout`, applied only before the first datagram.
    /// `< 0` means inherit `eof_timeout`; `0` means wait forever.
    pub start_timeout: f64,

    /// Maximum datagrams per second at the UDP destination. `<= 0` means
    /// unlimited.
    pub max_datagram_rate: f64,

    /// Stop after this many records. `0` means unlimited.
    pub max_datagrams: u64,

    /// Ceiling on the bytes requested by one file-source read.
    pub max_read_size: usize,

    /// Ceiling on the bytes submitted to one file-destination write.
    pub max_write_size: usize,

    /// Batch width for the vectored receive. `0` means the OS maximum;
    /// larger values are clamped to it.
    pub max_iovecs: usize,

    /// Append to an existing destination file instead of truncating it.
    pub append: bool,

    /// Run the signal thread (`SIGINT` drain, `SIGUSR1` stats).
    pub handle_signals: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_datagram_size: DEFAULT_MAX_DATAGRAM_SIZE,
            max_backlog: DEFAULT_MAX_BACKLOG,
            eof_timeout: 0.0,
            start_timeout: -1.0,
            max_datagram_rate: -1.0,
            max_datagrams: 0,
            max_read_size: DEFAULT_MAX_IO_SIZE,
            max_write_size: DEFAULT_MAX_IO_SIZE,
            max_iovecs: 0,
            append: false,
            handle_signals: true,
        }
    }
}

impl Config {
    /// Check the knobs for values no run could work with.
    pub fn validate(&self) -> Result<()> {
        if self.max_datagram_size == 0 {
            return Err(Error::InvalidConfig(
                "max_datagram_size must be at least 1 byte".into(),
            ));
        }
        if self.max_backlog < LEN_PREFIX {
            return Err(Error::InvalidConfig(format!(
                "max_backlog must be at least {LEN_PREFIX} bytes to hold one empty record"
            )));
        }
        if self.max_read_size < LEN_PREFIX {
            return Err(Error::InvalidConfig(format!(
                "max_read_size must be at least {LEN_PREFIX} bytes"
            )));
        }
        if self.max_write_size == 0 {
            return Err(Error::InvalidConfig(
                "max_write_size must be at least 1 byte".into(),
            ));
        }
        Ok(())
    }

    /// Idle timeout after the first datagram. `None` means wait forever.
    pub fn effective_eof_timeout(&self) -> Option<Duration> {
        secs_opt(self.eof_timeout)
    }

    /// Idle timeout before the first datagram. A negative configured value
    /// inherits the end-of-stream timeout; zero means wait forever.
    pub fn effective_start_timeout(&self) -> Option<Duration> {
        if self.start_timeout < 0.0 {
            self.effective_eof_timeout()
        } else {
            secs_opt(self.start_timeout)
        }
    }

    /// Minimum interval between sends at a rate-limited UDP destination.
    /// `None` means unlimited.
    pub fn send_interval(&self) -> Option<Duration> {
        if self.max_datagram_rate > 0.0 {
            Some(Duration::from_secs_f64(1.0 / self.max_datagram_rate))
        } else {
            None
        }
    }

    /// Vectored-receive batch width with the zero-means-OS-maximum rule and
    /// the OS clamp applied.
    pub fn recv_batch_width(&self) -> usize {
        if self.max_iovecs == 0 {
            sys::MAX_RECV_BATCH
        } else {
            self.max_iovecs.min(sys::MAX_RECV_BATCH)
        }
    }

    /// Number of records still allowed after `produced` records, honoring
    /// the `max_datagrams` cap. `usize::MAX` when uncapped.
    pub fn remaining_records(&self, produced: u64) -> usize {
        if self.max_datagrams == 0 {
            usize::MAX
        } else {
            self.max_datagrams.saturating_sub(produced) as usize
        }
    }
}

fn secs_opt(secs: f64) -> Option<Duration> {
    if secs > 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}
