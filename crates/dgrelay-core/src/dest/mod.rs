//! Datagram destinations.
//!
//! A destination drains the ring until end-of-stream is reported and the
//! bytes it wants are gone. Destinations have no forced-shutdown entry
//! point; they wind down naturally once the ring's end-of-stream flag is
//! set and the backlog is drained.

mod file;
mod udp;

pub use file::FileDestination;
pub use udp::UdpDestination;

use crate::error::Result;
use crate::ring::FramedRing;
use crate::stats::{DestinationStats, StatsCell};

/// Capability set of a datagram destination.
pub trait Destination: Send + Sync {
    /// Drain the ring until end-of-stream. Blocks; runs on the dedicated
    /// destination thread.
    fn copy_from_ring(&self, ring: &FramedRing, stats: &StatsCell<DestinationStats>)
        -> Result<()>;
}
