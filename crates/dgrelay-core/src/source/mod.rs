//! Datagram sources.
//!
//! A source owns its OS handle and pushes records into the ring until the
//! input ends naturally or end-of-stream is forced from another thread.
//! Forcing end-of-stream on the fd-backed sources closes the handle, which
//! is the only portable way to wake a thread parked inside a blocking read
//! or receive; the woken thread recognizes the bad-descriptor error by
//! checking the flag that was set before the close.

mod file;
mod random;
mod udp;

pub use file::FileSource;
pub use random::RandomSource;
pub use udp::UdpSource;

use std::os::fd::RawFd;
use std::sync::{Mutex, PoisonError};
use std::time::{Instant, SystemTime};

use tracing::debug;

use crate::error::Result;
use crate::ring::FramedRing;
use crate::stats::{SourceStats, StatsCell};

/// Capability set of a datagram source.
pub trait Source: Send + Sync {
    /// Copy records into the ring until natural or forced end-of-stream.
    /// Blocks; runs on the dedicated source thread.
    fn copy_to_ring(&self, ring: &FramedRing, stats: &StatsCell<SourceStats>) -> Result<()>;

    /// Force an end-of-stream condition as soon as possible. Non-blocking,
    /// idempotent, and safe to call from any thread while `copy_to_ring`
    /// is running.
    fn force_eof(&self);
}

/// Shared state for sources backed by an OS descriptor: the descriptor
/// itself plus the `closed`/`force_eof` bits, all behind one small mutex
/// that is never held across a blocking syscall.
#[derive(Debug)]
pub(crate) struct FdGuard {
    state: Mutex<FdState>,
}

#[derive(Debug)]
struct FdState {
    fd: RawFd,
    closed: bool,
    force_eof: bool,
}

impl FdGuard {
    pub(crate) fn new(fd: RawFd) -> Self {
        Self {
            state: Mutex::new(FdState {
                fd,
                closed: false,
                force_eof: false,
            }),
        }
    }

    /// The descriptor, or `None` once closed.
    pub(crate) fn fd(&self) -> Option<RawFd> {
        let state = self.lock();
        (!state.closed).then_some(state.fd)
    }

    /// Whether end-of-stream has been forced.
    pub(crate) fn force_eof_requested(&self) -> bool {
        self.lock().force_eof
    }

    /// Set the forced-end-of-stream flag, then close the descriptor. The
    /// flag is visible before `close` returns, so a reader woken by the
    /// close observes it.
    pub(crate) fn force_eof(&self) {
        let mut state = self.lock();
        state.force_eof = true;
        close_locked(&mut state);
    }

    /// Close the descriptor without forcing end-of-stream.
    pub(crate) fn close(&self) {
        close_locked(&mut self.lock());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FdState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn close_locked(state: &mut FdState) {
    if !state.closed {
        state.closed = true;
        crate::sys::close_fd(state.fd);
        state.fd = -1;
    }
}

impl Drop for FdGuard {
    fn drop(&mut self) {
        self.close();
    }
}

/// Record a produced batch in the source stats, latching the first-datagram
/// timestamps on the first call.
pub(crate) fn note_batch(
    stats: &StatsCell<SourceStats>,
    clump: usize,
    start: &mut Option<(Instant, SystemTime)>,
) {
    let now = Instant::now();
    if start.is_none() {
        *start = Some((now, SystemTime::now()));
        debug!("first datagram produced");
    }
    let (start_time, start_clock_time) = start.unwrap_or((now, SystemTime::now()));
    stats.update(|s| {
        s.max_clump_size = s.max_clump_size.max(clump);
        s.start_time = Some(start_time);
        s.start_clock_time = Some(start_clock_time);
        s.end_time = Some(now);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fd_guard_close_is_idempotent() {
        let fd = crate::sys::dup_fd(0).unwrap();
        let guard = FdGuard::new(fd);
        assert_eq!(guard.fd(), Some(fd));
        assert!(!guard.force_eof_requested());

        guard.close();
        assert_eq!(guard.fd(), None);
        guard.close();
        assert_eq!(guard.fd(), None);
        assert!(!guard.force_eof_requested());
    }

    #[test]
    fn force_eof_sets_flag_and_closes() {
        let fd = crate::sys::dup_fd(0).unwrap();
        let guard = FdGuard::new(fd);
        guard.force_eof();
        assert!(guard.force_eof_requested());
        assert_eq!(guard.fd(), None);
        // Idempotent.
        guard.force_eof();
        assert!(guard.force_eof_requested());
    }
}
