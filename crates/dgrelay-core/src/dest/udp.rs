//! UDP datagram destination.
//!
//! Reads one framed record at a time from the ring, strips the 4-byte
//! header, and sends the payload as a single datagram on a connected
//! socket, optionally pacing sends to a configured rate.

use std::io;
use std::net::UdpSocket;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, warn};

use super::Destination;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::resolve;
use crate::ring::FramedRing;
use crate::stats::{DestinationStats, StatsCell};
use crate::{sys, LEN_PREFIX};

/// Destination sending each record as one datagram to a fixed peer.
#[derive(Debug)]
pub struct UdpDestination {
    config: Arc<Config>,
    socket: UdpSocket,
}

impl UdpDestination {
    /// Resolve `host:port` and connect the first workable address, fixing
    /// the default peer for all sends.
    pub fn open(config: Arc<Config>, host: &str, port: u16) -> Result<Self> {
        let addrs = resolve::resolve_datagram(host, port)?;
        let socket = resolve::connect_datagram(&addrs).map_err(|err| Error::DestinationOpen {
            name: format!("udp://{host}:{port}"),
            source: err,
        })?;
        let socket: UdpSocket = socket.into();
        Ok(Self { config, socket })
    }
}

impl Destination for UdpDestination {
    fn copy_from_ring(
        &self,
        ring: &FramedRing,
        _stats: &StatsCell<DestinationStats>,
    ) -> Result<()> {
        let send_interval = self.config.send_interval();
        let mut next_send = Instant::now();
        // Bytes the next borrow must hold: a header, then header + payload
        // once a record's length is known.
        let mut n_min = LEN_PREFIX;
        loop {
            let mut batch = ring.consumer_start_batch(n_min, usize::MAX)?;
            if batch.len() < n_min {
                if !batch.is_empty() {
                    warn!(
                        residual = batch.len(),
                        "end-of-stream inside a record; dropping truncated tail"
                    );
                }
                debug!("ring drained; finishing");
                break;
            }

            let Some(len) = batch.read_len_prefix() else {
                // Unreachable while the borrow honors n_min >= 4.
                break;
            };
            let len = len as usize;
            if batch.len() < len {
                // Re-borrow so the whole payload is present in one view.
                n_min = LEN_PREFIX + len;
                continue;
            }

            if send_interval.is_some() {
                let now = Instant::now();
                if now < next_send {
                    thread::sleep(next_send - now);
                }
            }
            let payload = batch.first(len);
            match sys::send_segments(self.socket.as_raw_fd(), payload.as_slices()) {
                Ok(_) => {}
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {
                    // Nothing was consumed; retry the same record.
                    n_min = LEN_PREFIX + len;
                    continue;
                }
                Err(err) => return Err(Error::DestinationIo(err)),
            }
            drop(batch);
            ring.consumer_commit_batch(LEN_PREFIX + len)?;
            if let Some(interval) = send_interval {
                next_send += interval;
            }
            n_min = LEN_PREFIX;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::Record;
    use crate::stats::StatsCell;
    use std::time::Duration;

    fn loopback_pair(config: Config) -> (Arc<Config>, UdpSocket, UdpDestination) {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let port = receiver.local_addr().unwrap().port();
        let config = Arc::new(config);
        let dest = UdpDestination::open(config.clone(), "127.0.0.1", port).unwrap();
        (config, receiver, dest)
    }

    #[test]
    fn sends_one_datagram_per_record() {
        let (config, receiver, dest) = loopback_pair(Config {
            max_backlog: 256,
            ..Config::default()
        });
        let cell = Arc::new(StatsCell::new());
        let ring = FramedRing::new(&config, cell);
        ring.producer_commit_batch(&[
            Record::new(b""),
            Record::new(b"A"),
            Record::new(b"BC"),
        ])
        .unwrap();
        ring.producer_set_eof();

        dest.copy_from_ring(&ring, &StatsCell::new()).unwrap();

        let mut buf = [0u8; 64];
        let mut received = Vec::new();
        for _ in 0..3 {
            let (n, _) = receiver.recv_from(&mut buf).unwrap();
            received.push(buf[..n].to_vec());
        }
        assert_eq!(received, vec![b"".to_vec(), b"A".to_vec(), b"BC".to_vec()]);
        assert_eq!(ring.backlog(), 0);
    }

    // A record committed across the ring's wrap point must still arrive as
    // one contiguous datagram.
    #[test]
    fn wrapped_record_arrives_whole() {
        let (config, receiver, dest) = loopback_pair(Config {
            max_backlog: 16,
            ..Config::default()
        });
        let cell = Arc::new(StatsCell::new());
        let ring = FramedRing::new(&config, cell);

        // Push the indices toward the end of the buffer so the next
        // record's payload itself straddles the wrap point.
        ring.producer_commit_batch(&[Record::new(b"123456")]).unwrap();
        let first = ring.consumer_start_batch(10, usize::MAX).unwrap();
        let n = first.len();
        drop(first);
        ring.consumer_commit_batch(n).unwrap();
        ring.producer_commit_batch(&[Record::new(b"wrapme")]).unwrap();
        ring.producer_set_eof();

        dest.copy_from_ring(&ring, &StatsCell::new()).unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"wrapme");
    }

    #[test]
    fn rate_cap_spaces_sends() {
        let (config, receiver, dest) = loopback_pair(Config {
            max_backlog: 256,
            max_datagram_rate: 50.0,
            ..Config::default()
        });
        let cell = Arc::new(StatsCell::new());
        let ring = FramedRing::new(&config, cell);
        let records = [Record::new(b"a"), Record::new(b"b"), Record::new(b"c")];
        ring.producer_commit_batch(&records).unwrap();
        ring.producer_set_eof();

        let started = Instant::now();
        dest.copy_from_ring(&ring, &StatsCell::new()).unwrap();
        // Three sends at 50/s leave two 20 ms gaps.
        assert!(started.elapsed() >= Duration::from_millis(35));

        let mut buf = [0u8; 8];
        for _ in 0..3 {
            receiver.recv_from(&mut buf).unwrap();
        }
    }

    #[test]
    fn unresolvable_peer_is_error() {
        let config = Arc::new(Config::default());
        let err = UdpDestination::open(config, "no.such.host.invalid.", 9).unwrap_err();
        assert!(matches!(err, Error::Resolve { .. }));
    }
}
