//! Lifecycle and thread supervision for a relay run.
//!
//! The copier owns the ring, one source, and one destination. `start` puts
//! each side on its own named OS thread and, when signal handling is
//! enabled, adds a third thread that consumes `SIGINT`/`SIGUSR1` via
//! `sigwait`. Worker failures land in a first-writer-wins slot and are
//! returned from `wait` after every thread has been joined.
//!
//! Termination of either side flows to the other: a finished source sets
//! the ring's end-of-stream flag (draining the destination), and a finished
//! destination forces end-of-stream on the source (waking it out of a
//! blocking receive by closing its handle).

use std::os::unix::thread::JoinHandleExt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{Builder, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info};

use crate::config::Config;
use crate::dest::Destination;
use crate::endpoint;
use crate::error::{Error, Result};
use crate::ring::FramedRing;
use crate::source::Source;
use crate::stats::{CopierStats, DestinationStats, RingStats, SourceStats, StatsCell};
use crate::sys;

/// The per-substat cells a run writes into. Snapshots are taken per cell;
/// no lock spans all three.
#[derive(Debug, Default)]
struct StatsHub {
    source: StatsCell<SourceStats>,
    ring: Arc<StatsCell<RingStats>>,
    destination: StatsCell<DestinationStats>,
}

impl StatsHub {
    fn snapshot(&self, stat_seq: u64) -> CopierStats {
        CopierStats {
            stat_seq,
            source: self.source.get(),
            ring: self.ring.get(),
            destination: self.destination.get(),
        }
    }
}

/// State shared with the worker and signal threads.
#[derive(Debug)]
struct Shared {
    /// First worker failure; later failures are dropped.
    first_error: Mutex<Option<Error>>,
    /// Whether the signal thread is inside (or headed back into) `sigwait`.
    signal_waiting: Mutex<bool>,
    signal_cond: Condvar,
    stat_seq: AtomicU64,
}

impl Shared {
    fn store_first_error(&self, err: Error) {
        let mut slot = self
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        } else {
            debug!("dropping secondary worker failure");
        }
    }

    fn lock_waiting(&self) -> MutexGuard<'_, bool> {
        self.signal_waiting
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Copies datagrams from one source to one destination through the ring.
pub struct Copier {
    config: Arc<Config>,
    ring: Arc<FramedRing>,
    source: Arc<dyn Source>,
    destination: Arc<dyn Destination>,
    stats: Arc<StatsHub>,
    shared: Arc<Shared>,
    source_thread: Option<JoinHandle<()>>,
    destination_thread: Option<JoinHandle<()>>,
    signal_thread: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for Copier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Copier").finish_non_exhaustive()
    }
}

impl Copier {
    /// Build a copier from endpoint URIs.
    pub fn new(config: Arc<Config>, source_uri: &str, destination_uri: &str) -> Result<Self> {
        let source = endpoint::create_source(&config, source_uri)?;
        let destination = endpoint::create_destination(&config, destination_uri)?;
        Ok(Self::from_parts(config, source.into(), destination.into()))
    }

    /// Build a copier from already-constructed endpoints.
    pub fn from_parts(
        config: Arc<Config>,
        source: Arc<dyn Source>,
        destination: Arc<dyn Destination>,
    ) -> Self {
        let stats = Arc::new(StatsHub::default());
        let ring = Arc::new(FramedRing::new(&config, stats.ring.clone()));
        Self {
            config,
            ring,
            source,
            destination,
            stats,
            shared: Arc::new(Shared {
                first_error: Mutex::new(None),
                signal_waiting: Mutex::new(false),
                signal_cond: Condvar::new(),
                stat_seq: AtomicU64::new(0),
            }),
            source_thread: None,
            destination_thread: None,
            signal_thread: None,
        }
    }

    /// Spawn the worker threads (and the signal thread when enabled).
    ///
    /// Signal handling must be configured before the workers exist so every
    /// thread inherits the blocked mask.
    pub fn start(&mut self) -> Result<()> {
        let handle_signals = self.config.handle_signals;
        if handle_signals {
            sys::block_relay_signals().map_err(Error::Spawn)?;
            let shared = self.shared.clone();
            let ring = self.ring.clone();
            let source = self.source.clone();
            let stats = self.stats.clone();
            self.signal_thread = Some(
                Builder::new()
                    .name("dgrelay-signals".into())
                    .spawn(move || signal_loop(&shared, &ring, &*source, &stats))
                    .map_err(Error::Spawn)?,
            );
        }

        {
            let shared = self.shared.clone();
            let ring = self.ring.clone();
            let source = self.source.clone();
            let destination = self.destination.clone();
            let stats = self.stats.clone();
            self.destination_thread = Some(
                Builder::new()
                    .name("dgrelay-dest".into())
                    .spawn(move || {
                        if handle_signals {
                            let _ = sys::block_relay_signals();
                        }
                        if let Err(err) = destination.copy_from_ring(&ring, &stats.destination) {
                            error!(%err, "destination worker failed");
                            shared.store_first_error(err);
                        }
                        // Wake the source even when the destination died
                        // early; its records have nowhere to go.
                        source.force_eof();
                    })
                    .map_err(Error::Spawn)?,
            );
        }

        {
            let shared = self.shared.clone();
            let ring = self.ring.clone();
            let source = self.source.clone();
            let stats = self.stats.clone();
            let spawned = Builder::new().name("dgrelay-source".into()).spawn(move || {
                if handle_signals {
                    let _ = sys::block_relay_signals();
                }
                if let Err(err) = source.copy_to_ring(&ring, &stats.source) {
                    error!(%err, "source worker failed");
                    shared.store_first_error(err);
                }
                ring.producer_set_eof();
            });
            match spawned {
                Ok(handle) => self.source_thread = Some(handle),
                Err(err) => {
                    // The destination would otherwise wait forever for
                    // records that will never come.
                    self.ring.producer_set_eof();
                    return Err(Error::Spawn(err));
                }
            }
        }
        Ok(())
    }

    /// Join every thread, then surface the first captured worker failure.
    pub fn wait(&mut self) -> Result<()> {
        if let Some(handle) = self.source_thread.take() {
            join_worker(handle);
        }
        if let Some(handle) = self.destination_thread.take() {
            join_worker(handle);
        }
        if let Some(handle) = self.signal_thread.take() {
            // The signal thread parks in sigwait; poke it with SIGUSR1
            // until it confirms it is no longer waiting, then join.
            let thread = handle.as_pthread_t();
            loop {
                let _ = sys::kill_thread_usr1(thread);
                let waiting = self.shared.lock_waiting();
                if !*waiting {
                    break;
                }
                let (waiting, _) = self
                    .shared
                    .signal_cond
                    .wait_timeout(waiting, Duration::from_secs(1))
                    .unwrap_or_else(PoisonError::into_inner);
                if !*waiting {
                    break;
                }
            }
            join_worker(handle);
        }

        if let Some(err) = self
            .shared
            .first_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            return Err(err);
        }
        Ok(())
    }

    /// Force end-of-stream on the source as soon as possible. Safe from any
    /// thread.
    pub fn force_eof(&self) {
        self.source.force_eof();
    }

    /// Aggregate statistics snapshot with a freshly stamped sequence number.
    pub fn get_stats(&self) -> CopierStats {
        let seq = self.shared.stat_seq.fetch_add(1, Ordering::Relaxed);
        self.stats.snapshot(seq)
    }
}

fn join_worker(handle: JoinHandle<()>) {
    if let Err(panic) = handle.join() {
        std::panic::resume_unwind(panic);
    }
}

fn signal_loop(shared: &Shared, ring: &FramedRing, source: &dyn Source, stats: &StatsHub) {
    debug!("signal thread started");
    *shared.lock_waiting() = true;

    let mut n_sigint = 0u32;
    loop {
        if ring.is_eof() {
            debug!("end-of-stream observed; leaving signal loop");
            break;
        }
        let sig = match sys::wait_relay_signal() {
            Ok(sig) => sig,
            Err(err) => {
                // sigwait on a fixed valid set cannot fail in a recoverable
                // way; bail out loudly rather than spin.
                error!(%err, "sigwait failed");
                std::process::abort();
            }
        };
        if ring.is_eof() {
            debug!("end-of-stream observed after wake; leaving signal loop");
            break;
        }
        match sig {
            libc::SIGINT => {
                n_sigint += 1;
                if n_sigint >= 2 {
                    eprintln!("second interrupt; exiting immediately");
                    std::process::exit(1);
                }
                info!("interrupt received; forcing end-of-stream");
                source.force_eof();
            }
            libc::SIGUSR1 => {
                let seq = shared.stat_seq.fetch_add(1, Ordering::Relaxed);
                eprintln!("{}", stats.snapshot(seq).brief_str());
            }
            other => debug!(signal = other, "ignoring unexpected signal"),
        }
    }

    *shared.lock_waiting() = false;
    shared.signal_cond.notify_all();
    debug!("signal thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::Record;
    use std::time::Instant;

    /// Source that produces a fixed set of records then returns.
    struct ScriptedSource {
        payloads: Vec<Vec<u8>>,
    }

    impl Source for ScriptedSource {
        fn copy_to_ring(&self, ring: &FramedRing, stats: &StatsCell<SourceStats>) -> Result<()> {
            let records: Vec<Record<'_>> =
                self.payloads.iter().map(|p| Record::new(p)).collect();
            ring.producer_commit_batch(&records)?;
            crate::source::note_batch(stats, records.len(), &mut None);
            Ok(())
        }

        fn force_eof(&self) {}
    }

    /// Destination that counts drained bytes.
    struct CountingDestination {
        bytes: AtomicU64,
    }

    impl Destination for CountingDestination {
        fn copy_from_ring(
            &self,
            ring: &FramedRing,
            _stats: &StatsCell<DestinationStats>,
        ) -> Result<()> {
            loop {
                let batch = ring.consumer_start_batch(1, usize::MAX)?;
                if batch.is_empty() {
                    if ring.is_eof() {
                        return Ok(());
                    }
                    continue;
                }
                let n = batch.len();
                drop(batch);
                ring.consumer_commit_batch(n)?;
                self.bytes.fetch_add(n as u64, Ordering::Relaxed);
            }
        }
    }

    /// Source that fails immediately.
    struct FailingSource;

    impl Source for FailingSource {
        fn copy_to_ring(&self, _ring: &FramedRing, _stats: &StatsCell<SourceStats>) -> Result<()> {
            Err(Error::SourceIo(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "scripted failure",
            )))
        }

        fn force_eof(&self) {}
    }

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            max_backlog: 4096,
            handle_signals: false,
            ..Config::default()
        })
    }

    #[test]
    fn runs_scripted_copy_to_completion() {
        let source = Arc::new(ScriptedSource {
            payloads: vec![b"one".to_vec(), b"two!".to_vec()],
        });
        let destination = Arc::new(CountingDestination {
            bytes: AtomicU64::new(0),
        });
        let mut copier =
            Copier::from_parts(test_config(), source, destination.clone());
        copier.start().unwrap();
        copier.wait().unwrap();

        // 3 + 4 payload bytes plus two 4-byte prefixes.
        assert_eq!(destination.bytes.load(Ordering::Relaxed), 15);

        let stats = copier.get_stats();
        assert_eq!(stats.ring.n_datagrams, 2);
        assert_eq!(stats.ring.n_datagram_bytes, 7);
        assert_eq!(stats.source.max_clump_size, 2);
    }

    #[test]
    fn stat_seq_increases_per_snapshot() {
        let source = Arc::new(ScriptedSource { payloads: vec![] });
        let destination = Arc::new(CountingDestination {
            bytes: AtomicU64::new(0),
        });
        let copier = Copier::from_parts(test_config(), source, destination);
        let first = copier.get_stats().stat_seq;
        let second = copier.get_stats().stat_seq;
        assert!(second > first);
    }

    #[test]
    fn worker_failure_surfaces_from_wait() {
        let destination = Arc::new(CountingDestination {
            bytes: AtomicU64::new(0),
        });
        let mut copier = Copier::from_parts(test_config(), Arc::new(FailingSource), destination);
        copier.start().unwrap();
        let err = copier.wait().unwrap_err();
        assert!(matches!(err, Error::SourceIo(_)));
    }

    #[test]
    fn wait_is_reentrant_after_completion() {
        let source = Arc::new(ScriptedSource { payloads: vec![] });
        let destination = Arc::new(CountingDestination {
            bytes: AtomicU64::new(0),
        });
        let mut copier = Copier::from_parts(test_config(), source, destination);
        copier.start().unwrap();
        copier.wait().unwrap();
        copier.wait().unwrap();
    }

    #[test]
    fn blocked_destination_drains_after_source_eof() {
        // A slow consumer start: the destination only sees bytes after the
        // source thread has finished and set end-of-stream.
        let source = Arc::new(ScriptedSource {
            payloads: vec![vec![7u8; 64]; 8],
        });
        let destination = Arc::new(CountingDestination {
            bytes: AtomicU64::new(0),
        });
        let mut copier =
            Copier::from_parts(test_config(), source, destination.clone());
        let started = Instant::now();
        copier.start().unwrap();
        copier.wait().unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            destination.bytes.load(Ordering::Relaxed),
            8 * (64 + crate::LEN_PREFIX) as u64
        );
    }
}
