//! Bounded framed byte-ring coupling the producer and consumer threads.
//!
//! The ring holds a sequence of framed records, each a 4-byte big-endian
//! length header followed by the payload bytes, in a fixed-capacity circular
//! byte buffer. Exactly one producer thread commits records and exactly one
//! consumer thread drains bytes; both block on a single condition variable,
//! so back-pressure is strict: the producer waits rather than overwrite.
//!
//! # Zero-copy consumer view
//!
//! [`FramedRing::consumer_start_batch`] hands out a [`ConsumerBatch`]: up to
//! two borrowed slices pointing directly into the ring storage (two when the
//! oldest bytes straddle the wrap point). The view stays valid until the next
//! [`FramedRing::consumer_commit_batch`] on the same ring, which is sound
//! because the producer only ever writes into free space and the consumer is
//! the only thread that frees it.

use std::cell::UnsafeCell;
use std::io::IoSlice;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::warn;

use crate::config::Config;
use crate::error::RingError;
use crate::stats::{RingStats, StatsCell};
use crate::LEN_PREFIX;

/// Receive-time flags attached to a record by the producer.
///
/// Records carrying out-of-band/error-queue data or a truncation mark are
/// discarded at commit time and counted instead of buffered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordFlags {
    /// The datagram was truncated by the receive buffer.
    pub truncated: bool,
    /// The receive carried out-of-band or error-queue data.
    pub ancillary: bool,
}

impl RecordFlags {
    fn discard(self) -> bool {
        self.truncated || self.ancillary
    }
}

/// One record handed to the producer side of the ring.
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    /// Payload bytes (without the length prefix; the ring adds it).
    pub payload: &'a [u8],
    /// Receive-time flags.
    pub flags: RecordFlags,
}

impl<'a> Record<'a> {
    /// A clean record for the given payload.
    pub fn new(payload: &'a [u8]) -> Self {
        Self {
            payload,
            flags: RecordFlags::default(),
        }
    }

    /// A record carrying receive-time flags.
    pub fn with_flags(payload: &'a [u8], flags: RecordFlags) -> Self {
        Self { payload, flags }
    }
}

/// Index state guarded by the ring mutex.
#[derive(Debug)]
struct RingIndex {
    /// Next byte to be filled by the producer.
    head: usize,
    /// Next byte to be consumed.
    tail: usize,
    /// Bytes currently buffered. Always `(head - tail) mod cap`.
    n: usize,
    /// Monotonic end-of-stream flag.
    eof: bool,
    /// Ring statistics, published to the shared cell after each batch.
    stats: RingStats,
}

/// Bounded single-producer/single-consumer byte ring of framed records.
pub struct FramedRing {
    cap: usize,
    data: Box<[UnsafeCell<u8>]>,
    index: Mutex<RingIndex>,
    cond: Condvar,
    shared_stats: Arc<StatsCell<RingStats>>,
}

// SAFETY: the byte storage is only touched through the SPSC protocol below:
// the producer writes exclusively into free space ([head, head+len), which
// the consumer never reads) and the consumer reads exclusively buffered
// space ([tail, tail+n), which the producer never writes). Which range is
// which is agreed under the index mutex, whose acquire/release establishes
// the necessary happens-before edges. See the per-access SAFETY comments.
unsafe impl Send for FramedRing {}
// SAFETY: as above; &FramedRing is shared by exactly one producer thread and
// one consumer thread.
unsafe impl Sync for FramedRing {}

impl FramedRing {
    /// Create a ring of `config.max_backlog` bytes publishing its statistics
    /// to `stats`.
    pub fn new(config: &Config, stats: Arc<StatsCell<RingStats>>) -> Self {
        let cap = config.max_backlog;
        let data = (0..cap)
            .map(|_| UnsafeCell::new(0u8))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            cap,
            data,
            index: Mutex::new(RingIndex {
                head: 0,
                tail: 0,
                n: 0,
                eof: false,
                stats: RingStats::default(),
            }),
            cond: Condvar::new(),
            shared_stats: stats,
        }
    }

    /// Ring capacity in bytes, length prefixes included.
    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Bytes currently buffered.
    pub fn backlog(&self) -> usize {
        self.lock_index().n
    }

    /// Whether end-of-stream has been set. Monotonic: once true, always true.
    pub fn is_eof(&self) -> bool {
        self.lock_index().eof
    }

    /// Set end-of-stream and wake all waiters. Idempotent. Any subsequent
    /// producer-side mutation fails with [`RingError::ClosedForWrite`]; the
    /// consumer may still drain the remaining bytes.
    pub fn producer_set_eof(&self) {
        let mut index = self.lock_index();
        index.eof = true;
        self.cond.notify_all();
    }

    /// Commit a batch of records, blocking for free space as needed.
    ///
    /// Flagged records are discarded and counted. Records become visible to
    /// the consumer atomically and in order; a partial record is never
    /// committed. Fails with [`RingError::MessageTooLarge`] if a record can
    /// never fit, and [`RingError::ClosedForWrite`] if end-of-stream is set
    /// before or while waiting.
    pub fn producer_commit_batch(&self, records: &[Record<'_>]) -> Result<(), RingError> {
        self.commit_batch_inner(records, None).map(|_| ())
    }

    /// Like [`Self::producer_commit_batch`] but gives up at an absolute
    /// deadline. Returns the number of records processed (committed or
    /// discarded); on deadline it returns early without failing and without
    /// committing the blocking record.
    pub fn producer_commit_batch_deadline(
        &self,
        records: &[Record<'_>],
        deadline: Instant,
    ) -> Result<usize, RingError> {
        self.commit_batch_inner(records, Some(deadline))
    }

    fn commit_batch_inner(
        &self,
        records: &[Record<'_>],
        deadline: Option<Instant>,
    ) -> Result<usize, RingError> {
        if records.is_empty() {
            return Ok(0);
        }
        let mut index = self.lock_index();
        if index.eof {
            return Err(RingError::ClosedForWrite);
        }

        let mut processed = 0usize;
        let mut need_notify = false;
        let mut stats_dirty = false;
        'records: for record in records {
            if record.flags.discard() {
                if record.flags.ancillary {
                    warn!(
                        len = record.payload.len(),
                        "ancillary data discarded from receive batch"
                    );
                } else {
                    warn!(
                        len = record.payload.len(),
                        "truncated datagram discarded from receive batch"
                    );
                }
                index.stats.n_datagrams_discarded += 1;
                stats_dirty = true;
                processed += 1;
                continue;
            }

            let framed = record.payload.len() + LEN_PREFIX;
            if framed > self.cap {
                if stats_dirty {
                    self.shared_stats.set(index.stats.clone());
                }
                if need_notify {
                    self.cond.notify_all();
                }
                return Err(RingError::MessageTooLarge {
                    len: record.payload.len(),
                    cap: self.cap,
                });
            }

            while self.cap - index.n < framed {
                // Let the consumer make progress before parking.
                if stats_dirty {
                    self.shared_stats.set(index.stats.clone());
                    stats_dirty = false;
                }
                if need_notify {
                    self.cond.notify_all();
                    need_notify = false;
                }
                match deadline {
                    None => {
                        index = self.wait(index);
                    }
                    Some(deadline) => {
                        let now = Instant::now();
                        if now >= deadline {
                            break 'records;
                        }
                        index = self.wait_until(index, deadline);
                    }
                }
                if index.eof {
                    return Err(RingError::ClosedForWrite);
                }
            }

            let header = (record.payload.len() as u32).to_be_bytes();
            self.put_bytes(&mut index, &header);
            self.put_bytes(&mut index, record.payload);
            need_notify = true;
            processed += 1;

            let len = record.payload.len();
            let stats = &mut index.stats;
            if stats.n_datagrams == 0 {
                stats.first_datagram_size = len;
                stats.min_datagram_size = len;
            } else {
                stats.min_datagram_size = stats.min_datagram_size.min(len);
            }
            stats.max_datagram_size = stats.max_datagram_size.max(len);
            stats.n_datagrams += 1;
            stats.n_datagram_bytes += len as u64;
            let n = index.n;
            index.stats.max_backlog_bytes = index.stats.max_backlog_bytes.max(n);
            stats_dirty = true;
        }

        if stats_dirty {
            self.shared_stats.set(index.stats.clone());
        }
        if need_notify {
            self.cond.notify_all();
        }
        Ok(processed)
    }

    /// Wait until at least `n_min` bytes are buffered or end-of-stream is
    /// set, then return a borrowed view of the oldest `min(n, n_max)` bytes.
    ///
    /// After end-of-stream the view may hold fewer than `n_min` bytes, even
    /// zero. The view stays valid until the next
    /// [`Self::consumer_commit_batch`]; drop it before committing.
    pub fn consumer_start_batch(
        &self,
        n_min: usize,
        n_max: usize,
    ) -> Result<ConsumerBatch<'_>, RingError> {
        if n_min > self.cap {
            return Err(RingError::RequestTooLarge {
                n: n_min,
                cap: self.cap,
            });
        }
        let mut index = self.lock_index();
        while !index.eof && index.n < n_min {
            index = self.wait(index);
        }
        Ok(self.view_locked(&index, n_max))
    }

    /// Like [`Self::consumer_start_batch`] but additionally returns (with
    /// whatever is buffered, possibly nothing) at an absolute deadline.
    pub fn consumer_start_batch_deadline(
        &self,
        n_min: usize,
        n_max: usize,
        deadline: Instant,
    ) -> Result<ConsumerBatch<'_>, RingError> {
        if n_min > self.cap {
            return Err(RingError::RequestTooLarge {
                n: n_min,
                cap: self.cap,
            });
        }
        let mut index = self.lock_index();
        while !index.eof && index.n < n_min {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            index = self.wait_until(index, deadline);
        }
        Ok(self.view_locked(&index, n_max))
    }

    /// Release the first `n` bytes of the current borrow and wake the
    /// producer. Fails with [`RingError::OverCommit`] if `n` exceeds the
    /// buffered byte count.
    pub fn consumer_commit_batch(&self, n: usize) -> Result<(), RingError> {
        if n == 0 {
            return Ok(());
        }
        let mut index = self.lock_index();
        if n > index.n {
            return Err(RingError::OverCommit {
                n,
                available: index.n,
            });
        }
        index.tail = (index.tail + n) % self.cap;
        index.n -= n;
        self.cond.notify_all();
        Ok(())
    }

    fn lock_index(&self) -> MutexGuard<'_, RingIndex> {
        self.index.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'g>(&self, guard: MutexGuard<'g, RingIndex>) -> MutexGuard<'g, RingIndex> {
        self.cond
            .wait(guard)
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn wait_until<'g>(
        &self,
        guard: MutexGuard<'g, RingIndex>,
        deadline: Instant,
    ) -> MutexGuard<'g, RingIndex> {
        let timeout = deadline.saturating_duration_since(Instant::now());
        match self.cond.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    /// Copy `src` into the ring at `head`, splitting across the wrap point.
    fn put_bytes(&self, index: &mut MutexGuard<'_, RingIndex>, src: &[u8]) {
        if src.is_empty() {
            return;
        }
        debug_assert!(self.cap - index.n >= src.len());
        let first = src.len().min(self.cap - index.head);
        // SAFETY: [head, head+first) lies in free space: the caller verified
        // `cap - n >= src.len()` under the index lock, and the consumer only
        // reads [tail, tail+n). UnsafeCell<u8> slots are written through raw
        // pointers so no &mut to the storage is ever formed.
        unsafe {
            std::ptr::copy_nonoverlapping(
                src.as_ptr(),
                self.data[index.head].get(),
                first,
            );
        }
        index.head = (index.head + first) % self.cap;
        if first < src.len() {
            let rest = src.len() - first;
            // SAFETY: same free-space argument; the write wrapped to offset 0.
            unsafe {
                std::ptr::copy_nonoverlapping(
                    src.as_ptr().add(first),
                    self.data[index.head].get(),
                    rest,
                );
            }
            index.head = (index.head + rest) % self.cap;
        }
        index.n += src.len();
    }

    /// Build the 0-, 1-, or 2-segment view of the oldest buffered bytes.
    fn view_locked(&self, index: &RingIndex, n_max: usize) -> ConsumerBatch<'_> {
        let n = index.n.min(n_max);
        if n == 0 {
            return ConsumerBatch::empty();
        }
        let first = n.min(self.cap - index.tail);
        // SAFETY: [tail, tail+n) is buffered space the producer never writes
        // until the consumer releases it via consumer_commit_batch; the
        // returned slices are read-only and the single consumer thread drops
        // them before committing.
        let seg1 = unsafe {
            std::slice::from_raw_parts(self.data[index.tail].get() as *const u8, first)
        };
        if first == n {
            return ConsumerBatch::new(seg1, &[]);
        }
        // SAFETY: as above, for the wrapped remainder at offset 0.
        let seg2 =
            unsafe { std::slice::from_raw_parts(self.data[0].get() as *const u8, n - first) };
        ConsumerBatch::new(seg1, seg2)
    }
}

/// A borrowed view of the oldest bytes in the ring: up to two contiguous
/// segments whose concatenation is the byte sequence in commit order.
///
/// Valid until the next `consumer_commit_batch` on the same ring.
#[derive(Debug, Clone, Copy)]
pub struct ConsumerBatch<'a> {
    segs: [&'a [u8]; 2],
}

impl<'a> ConsumerBatch<'a> {
    fn empty() -> Self {
        Self { segs: [&[], &[]] }
    }

    fn new(seg1: &'a [u8], seg2: &'a [u8]) -> Self {
        if seg1.is_empty() {
            Self {
                segs: [seg2, &[]],
            }
        } else {
            Self { segs: [seg1, seg2] }
        }
    }

    /// Total byte count across both segments.
    pub fn len(&self) -> usize {
        self.segs[0].len() + self.segs[1].len()
    }

    /// Whether the view holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.segs[0].is_empty()
    }

    /// The two segments in order. The second is empty unless the view
    /// straddles the ring's wrap point.
    pub fn as_slices(&self) -> (&'a [u8], &'a [u8]) {
        (self.segs[0], self.segs[1])
    }

    /// The non-empty segments as `IoSlice`s for a vectored write, plus the
    /// slice count (0, 1, or 2).
    pub fn io_slices(&self) -> ([IoSlice<'a>; 2], usize) {
        let n = if self.segs[1].is_empty() {
            usize::from(!self.segs[0].is_empty())
        } else {
            2
        };
        ([IoSlice::new(self.segs[0]), IoSlice::new(self.segs[1])], n)
    }

    /// Drop `n` bytes from the front of the view.
    pub fn advance(&mut self, n: usize) {
        let first = n.min(self.segs[0].len());
        self.segs[0] = &self.segs[0][first..];
        let rest = (n - first).min(self.segs[1].len());
        self.segs[1] = &self.segs[1][rest..];
        if self.segs[0].is_empty() {
            self.segs = [self.segs[1], &[]];
        }
    }

    /// A sub-view of the first `n` bytes (or everything, if shorter).
    pub fn first(&self, n: usize) -> ConsumerBatch<'a> {
        let first = n.min(self.segs[0].len());
        let rest = (n - first).min(self.segs[1].len());
        ConsumerBatch::new(&self.segs[0][..first], &self.segs[1][..rest])
    }

    /// Decode and consume a 4-byte big-endian length prefix from the front,
    /// even when it straddles the segment boundary. `None` if fewer than
    /// 4 bytes remain.
    pub fn read_len_prefix(&mut self) -> Option<u32> {
        if self.len() < LEN_PREFIX {
            return None;
        }
        let mut header = [0u8; LEN_PREFIX];
        let first = LEN_PREFIX.min(self.segs[0].len());
        header[..first].copy_from_slice(&self.segs[0][..first]);
        header[first..].copy_from_slice(&self.segs[1][..LEN_PREFIX - first]);
        self.advance(LEN_PREFIX);
        Some(u32::from_be_bytes(header))
    }

    /// Copy the whole view into a `Vec`, in order.
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        out.extend_from_slice(self.segs[0]);
        out.extend_from_slice(self.segs[1]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn ring_with_cap(cap: usize) -> FramedRing {
        let config = Config {
            max_backlog: cap,
            ..Config::default()
        };
        FramedRing::new(&config, Arc::new(StatsCell::new()))
    }

    fn drain(ring: &FramedRing) -> Vec<u8> {
        let batch = ring.consumer_start_batch(0, usize::MAX).unwrap();
        let bytes = batch.to_vec();
        let n = batch.len();
        drop(batch);
        ring.consumer_commit_batch(n).unwrap();
        bytes
    }

    #[test]
    fn commit_then_drain_is_framed() {
        let ring = ring_with_cap(64);
        ring.producer_commit_batch(&[Record::new(b"abc"), Record::new(b"")])
            .unwrap();

        let bytes = drain(&ring);
        assert_eq!(
            bytes,
            [0, 0, 0, 3, b'a', b'b', b'c', 0, 0, 0, 0].to_vec()
        );
        assert_eq!(ring.backlog(), 0);
    }

    #[test]
    fn zero_length_record_round_trips() {
        let ring = ring_with_cap(16);
        ring.producer_commit_batch(&[Record::new(b"")]).unwrap();
        assert_eq!(drain(&ring), vec![0, 0, 0, 0]);
    }

    #[test]
    fn view_straddles_wrap_point() {
        let ring = ring_with_cap(16);

        // Advance the indices so the next record wraps.
        ring.producer_commit_batch(&[Record::new(b"12345678")])
            .unwrap();
        let batch = ring.consumer_start_batch(1, usize::MAX).unwrap();
        let n = batch.len();
        drop(batch);
        ring.consumer_commit_batch(n).unwrap();

        // 10 framed bytes starting at offset 12 of a 16-byte ring.
        ring.producer_commit_batch(&[Record::new(b"wrapme")]).unwrap();
        let batch = ring.consumer_start_batch(10, usize::MAX).unwrap();
        let (seg1, seg2) = batch.as_slices();
        assert_eq!(seg1.len(), 4);
        assert_eq!(seg2.len(), 6);
        assert_eq!(batch.to_vec(), [0, 0, 0, 6, b'w', b'r', b'a', b'p', b'm', b'e']);
        let n = batch.len();
        drop(batch);
        ring.consumer_commit_batch(n).unwrap();
    }

    #[test]
    fn exact_fit_record() {
        let ring = ring_with_cap(16);
        let payload = [0x5au8; 12];
        ring.producer_commit_batch(&[Record::new(&payload)]).unwrap();
        assert_eq!(ring.backlog(), 16);
        let bytes = drain(&ring);
        assert_eq!(&bytes[..4], &[0, 0, 0, 12]);
        assert_eq!(&bytes[4..], &payload);
    }

    #[test]
    fn message_too_large_leaves_ring_unchanged() {
        let ring = ring_with_cap(16);
        ring.producer_commit_batch(&[Record::new(b"ok")]).unwrap();
        let before = ring.backlog();

        let oversized = [0u8; 13];
        let err = ring
            .producer_commit_batch(&[Record::new(&oversized)])
            .unwrap_err();
        assert_eq!(
            err,
            RingError::MessageTooLarge {
                len: 13,
                cap: 16
            }
        );
        assert_eq!(ring.backlog(), before);
        assert!(!ring.is_eof());
    }

    #[test]
    fn eof_is_monotonic_and_closes_writes() {
        let ring = ring_with_cap(32);
        ring.producer_commit_batch(&[Record::new(b"x")]).unwrap();
        ring.producer_set_eof();
        ring.producer_set_eof();
        assert!(ring.is_eof());

        let err = ring.producer_commit_batch(&[Record::new(b"y")]).unwrap_err();
        assert_eq!(err, RingError::ClosedForWrite);

        // Consumer can still drain the committed record.
        let bytes = drain(&ring);
        assert_eq!(bytes, vec![0, 0, 0, 1, b'x']);
        assert!(ring.is_eof());
    }

    #[test]
    fn consumer_sees_fewer_than_n_min_after_eof() {
        let ring = ring_with_cap(32);
        ring.producer_commit_batch(&[Record::new(b"ab")]).unwrap();
        ring.producer_set_eof();
        let batch = ring.consumer_start_batch(32, usize::MAX).unwrap();
        assert_eq!(batch.len(), 6);
    }

    #[test]
    fn over_commit_rejected() {
        let ring = ring_with_cap(32);
        ring.producer_commit_batch(&[Record::new(b"ab")]).unwrap();
        let err = ring.consumer_commit_batch(7).unwrap_err();
        assert_eq!(err, RingError::OverCommit { n: 7, available: 6 });
    }

    #[test]
    fn request_too_large_rejected() {
        let ring = ring_with_cap(32);
        let err = ring.consumer_start_batch(33, usize::MAX).unwrap_err();
        assert_eq!(err, RingError::RequestTooLarge { n: 33, cap: 32 });
    }

    #[test]
    fn flagged_records_are_discarded_and_counted() {
        let config = Config {
            max_backlog: 64,
            ..Config::default()
        };
        let cell = Arc::new(StatsCell::new());
        let ring = FramedRing::new(&config, cell.clone());

        ring.producer_commit_batch(&[
            Record::with_flags(
                b"oob",
                RecordFlags {
                    ancillary: true,
                    ..RecordFlags::default()
                },
            ),
            Record::new(b"keep"),
            Record::with_flags(
                b"trunc",
                RecordFlags {
                    truncated: true,
                    ..RecordFlags::default()
                },
            ),
        ])
        .unwrap();

        let stats: RingStats = cell.get();
        assert_eq!(stats.n_datagrams, 1);
        assert_eq!(stats.n_datagrams_discarded, 2);
        assert_eq!(stats.n_datagram_bytes, 4);
        assert_eq!(drain(&ring), vec![0, 0, 0, 4, b'k', b'e', b'e', b'p']);
    }

    #[test]
    fn stats_track_sizes_and_backlog_peak() {
        let config = Config {
            max_backlog: 64,
            ..Config::default()
        };
        let cell = Arc::new(StatsCell::new());
        let ring = FramedRing::new(&config, cell.clone());

        ring.producer_commit_batch(&[
            Record::new(b"12345"),
            Record::new(b""),
            Record::new(b"123456789012"),
        ])
        .unwrap();

        let stats = cell.get();
        assert_eq!(stats.n_datagrams, 3);
        assert_eq!(stats.n_datagram_bytes, 17);
        assert_eq!(stats.first_datagram_size, 5);
        assert_eq!(stats.min_datagram_size, 0);
        assert_eq!(stats.max_datagram_size, 12);
        assert_eq!(stats.max_backlog_bytes, 17 + 3 * LEN_PREFIX);
    }

    // Back-pressure: with cap 16, two framed 4-byte records fill the ring
    // exactly and the third commit blocks until the consumer frees a record.
    #[test]
    fn producer_blocks_until_consumer_frees_space() {
        let ring = Arc::new(ring_with_cap(16));
        let (started_tx, started_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();

        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                for payload in [b"aaaa", b"bbbb", b"cccc"] {
                    ring.producer_commit_batch(&[Record::new(payload)]).unwrap();
                    started_tx.send(()).unwrap();
                }
                done_tx.send(()).unwrap();
            })
        };

        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        started_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(ring.backlog(), 16);
        // Third commit must be parked.
        assert!(done_rx.recv_timeout(Duration::from_millis(200)).is_err());

        // Free one record's worth of bytes; the producer completes.
        let batch = ring.consumer_start_batch(8, 8).unwrap();
        assert_eq!(batch.len(), 8);
        drop(batch);
        ring.consumer_commit_batch(8).unwrap();

        done_rx.recv_timeout(Duration::from_secs(1)).unwrap();
        producer.join().unwrap();
        assert_eq!(ring.backlog(), 16);
    }

    #[test]
    fn eof_unblocks_parked_producer() {
        let ring = Arc::new(ring_with_cap(16));
        ring.producer_commit_batch(&[Record::new(b"aaaa"), Record::new(b"bbbb")])
            .unwrap();

        let producer = {
            let ring = ring.clone();
            thread::spawn(move || ring.producer_commit_batch(&[Record::new(b"cccc")]))
        };

        thread::sleep(Duration::from_millis(50));
        ring.producer_set_eof();
        let result = producer.join().unwrap();
        assert_eq!(result.unwrap_err(), RingError::ClosedForWrite);
    }

    #[test]
    fn producer_deadline_returns_partial_count() {
        let ring = ring_with_cap(16);
        ring.producer_commit_batch(&[Record::new(b"aaaa")]).unwrap();

        // Second record fits, third cannot until the consumer drains.
        let records = [Record::new(b"bbbb"), Record::new(b"cccc")];
        let deadline = Instant::now() + Duration::from_millis(50);
        let committed = ring
            .producer_commit_batch_deadline(&records, deadline)
            .unwrap();
        assert_eq!(committed, 1);
        assert_eq!(ring.backlog(), 16);
    }

    #[test]
    fn consumer_deadline_returns_empty_view() {
        let ring = ring_with_cap(16);
        let deadline = Instant::now() + Duration::from_millis(50);
        let batch = ring
            .consumer_start_batch_deadline(1, usize::MAX, deadline)
            .unwrap();
        assert!(batch.is_empty());
    }

    #[test]
    fn records_arrive_in_commit_order() {
        let ring = Arc::new(ring_with_cap(64));
        const N: u32 = 10_000;

        let producer = {
            let ring = ring.clone();
            thread::spawn(move || {
                for i in 0..N {
                    let payload = i.to_be_bytes();
                    ring.producer_commit_batch(&[Record::new(&payload)]).unwrap();
                }
                ring.producer_set_eof();
            })
        };

        let consumer = {
            let ring = ring.clone();
            thread::spawn(move || {
                let mut next = 0u32;
                loop {
                    let mut batch = ring.consumer_start_batch(8, usize::MAX).unwrap();
                    if batch.len() < 8 {
                        assert!(ring.is_eof());
                        assert_eq!(batch.len(), 0);
                        break;
                    }
                    let len = batch.read_len_prefix().unwrap();
                    assert_eq!(len, 4);
                    let value = {
                        let bytes = batch.first(4).to_vec();
                        u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
                    };
                    assert_eq!(value, next);
                    next += 1;
                    drop(batch);
                    ring.consumer_commit_batch(8).unwrap();
                }
                next
            })
        };

        producer.join().unwrap();
        assert_eq!(consumer.join().unwrap(), N);
    }

    #[test]
    fn batch_cursor_operations() {
        let mut batch = ConsumerBatch::new(&[0, 0], &[0, 5, b'h', b'i']);
        assert_eq!(batch.len(), 6);
        assert_eq!(batch.read_len_prefix(), Some(5));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.to_vec(), vec![b'h', b'i']);

        let first = batch.first(1);
        assert_eq!(first.to_vec(), vec![b'h']);

        batch.advance(2);
        assert!(batch.is_empty());
        assert_eq!(batch.read_len_prefix(), None);

        let (slices, count) = ConsumerBatch::new(b"ab", b"cd").io_slices();
        assert_eq!(count, 2);
        assert_eq!(&*slices[0], b"ab");
        assert_eq!(&*slices[1], b"cd");
    }
}
