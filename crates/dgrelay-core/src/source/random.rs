//! Pseudo-random datagram source, mostly useful for testing pipelines.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use super::{note_batch, Source};
use crate::config::Config;
use crate::endpoint::RandomSpec;
use crate::error::Result;
use crate::ring::{FramedRing, Record};
use crate::stats::{SourceStats, StatsCell};

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Source generating records with uniformly distributed sizes and lowercase
/// hex-digit payloads. A fixed seed reproduces the same stream.
pub struct RandomSource {
    config: Arc<Config>,
    spec: RandomSpec,
    rng: Mutex<SmallRng>,
    stop: AtomicBool,
}

impl RandomSource {
    /// Build a generator for the given spec, seeding it once. A zero seed
    /// draws nondeterministic entropy.
    pub fn new(config: Arc<Config>, spec: RandomSpec) -> Self {
        let rng = if spec.seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(spec.seed)
        };
        Self {
            config,
            spec,
            rng: Mutex::new(rng),
            stop: AtomicBool::new(false),
        }
    }
}

impl Source for RandomSource {
    fn copy_to_ring(&self, ring: &FramedRing, stats: &StatsCell<SourceStats>) -> Result<()> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let mut buffer = vec![0u8; self.spec.max_size];

        let mut produced: u64 = 0;
        let mut start = None;
        loop {
            if self.spec.count != 0 && produced >= self.spec.count {
                debug!(produced, "generated the requested record count");
                break;
            }
            if self.config.remaining_records(produced) == 0 {
                debug!(produced, "reached max_datagrams; stopping generation");
                break;
            }
            if self.stop.load(Ordering::Acquire) {
                debug!(produced, "forced end-of-stream; stopping generation");
                break;
            }

            let size = rng.gen_range(self.spec.min_size..=self.spec.max_size);
            for byte in &mut buffer[..size] {
                *byte = HEX_DIGITS[rng.gen_range(0..HEX_DIGITS.len())];
            }
            ring.producer_commit_batch(&[Record::new(&buffer[..size])])?;
            produced += 1;
            note_batch(stats, 1, &mut start);
        }
        Ok(())
    }

    fn force_eof(&self) {
        self.stop.store(true, Ordering::Release);
    }
}
