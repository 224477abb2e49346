//! UDP datagram source with batched vectored receive.

use std::io;
use std::net::SocketAddr;
use std::os::fd::IntoRawFd;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use super::{note_batch, FdGuard, Source};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::resolve;
use crate::ring::{FramedRing, Record, RecordFlags};
use crate::stats::{SourceStats, StatsCell};
use crate::sys::{self, RecvMeta};

/// Source reading datagrams from a bound UDP socket.
///
/// Receives run in batches of up to [`Config::recv_batch_width`] datagrams
/// per syscall, each into its own preallocated `max_datagram_size` buffer.
/// A receive timeout synthesizes end-of-stream on idle; a forced
/// end-of-stream closes the socket out from under the parked receive.
#[derive(Debug)]
pub struct UdpSource {
    config: Arc<Config>,
    handle: FdGuard,
    local: SocketAddr,
    recv: Mutex<RecvState>,
}

#[derive(Debug)]
struct RecvState {
    bufs: Vec<Vec<u8>>,
    meta: Vec<RecvMeta>,
}

impl UdpSource {
    /// Resolve `bind:port`, bind the first workable address, and preallocate
    /// the receive batch.
    pub fn open(config: Arc<Config>, bind: &str, port: u16) -> Result<Self> {
        let name = format!("udp://{bind}:{port}");
        let addrs = resolve::resolve_datagram(bind, port)?;
        let socket = resolve::bind_datagram(&addrs).map_err(|err| Error::SourceOpen {
            name: name.clone(),
            source: err,
        })?;
        let local = socket
            .local_addr()
            .ok()
            .and_then(|addr| addr.as_socket())
            .ok_or_else(|| Error::SourceOpen {
                name,
                source: io::Error::new(io::ErrorKind::AddrNotAvailable, "no local address"),
            })?;
        debug!(%local, "udp source bound");

        let width = config.recv_batch_width();
        let recv = RecvState {
            bufs: vec![vec![0u8; config.max_datagram_size]; width],
            meta: vec![RecvMeta::default(); width],
        };
        Ok(Self {
            config,
            handle: FdGuard::new(socket.into_raw_fd()),
            local,
            recv: Mutex::new(recv),
        })
    }

    /// The bound local address (useful when binding port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

impl Source for UdpSource {
    fn copy_to_ring(&self, ring: &FramedRing, stats: &StatsCell<SourceStats>) -> Result<()> {
        let mut recv = self.recv.lock().unwrap_or_else(PoisonError::into_inner);
        let recv = &mut *recv;
        let width = recv.bufs.len();

        let mut produced: u64 = 0;
        let mut start = None;
        let mut current_timeout: Option<Option<Duration>> = None;
        loop {
            let remaining = self.config.remaining_records(produced);
            if remaining == 0 {
                debug!(produced, "reached max_datagrams; stopping receive");
                break;
            }

            let timeout = if produced == 0 {
                self.config.effective_start_timeout()
            } else {
                self.config.effective_eof_timeout()
            };
            let Some(fd) = self.handle.fd() else {
                if self.handle.force_eof_requested() {
                    debug!("socket closed by forced end-of-stream");
                    break;
                }
                return Err(Error::SourceIo(io::Error::from_raw_os_error(libc::EBADF)));
            };
            if current_timeout != Some(timeout) {
                if let Err(err) = sys::set_recv_timeout(fd, timeout) {
                    if sys::is_closed_handle_error(&err) && self.handle.force_eof_requested() {
                        break;
                    }
                    return Err(Error::SourceIo(err));
                }
                current_timeout = Some(timeout);
            }

            let batch = width.min(remaining);
            match sys::recv_batch(fd, &mut recv.bufs[..batch], &mut recv.meta[..batch]) {
                Ok(0) => {
                    debug!("empty receive batch; synthesizing end-of-stream");
                    break;
                }
                Ok(n) => {
                    if n == width && n > 1 {
                        warn!(
                            n,
                            "receive batch came back full; kernel buffer may be saturated"
                        );
                    }
                    let records: Vec<Record<'_>> = recv.meta[..n]
                        .iter()
                        .zip(&recv.bufs[..n])
                        .map(|(meta, buf)| {
                            Record::with_flags(
                                &buf[..meta.len.min(buf.len())],
                                RecordFlags {
                                    truncated: meta.truncated,
                                    ancillary: meta.ancillary,
                                },
                            )
                        })
                        .collect();
                    ring.producer_commit_batch(&records)?;
                    produced += n as u64;
                    note_batch(stats, n, &mut start);
                }
                Err(err) => match err.kind() {
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut => {
                        debug!("receive timeout; synthesizing end-of-stream");
                        break;
                    }
                    io::ErrorKind::Interrupted => continue,
                    _ => {
                        if sys::is_closed_handle_error(&err) && self.handle.force_eof_requested() {
                            debug!("receive woken by forced end-of-stream");
                            break;
                        }
                        return Err(Error::SourceIo(err));
                    }
                },
            }
        }
        Ok(())
    }

    fn force_eof(&self) {
        self.handle.force_eof();
    }
}
