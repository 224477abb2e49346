//! File and stdin datagram source.
//!
//! Reads raw bytes, parses the 4-byte big-endian length framing, and hands
//! complete records to the ring. The incomplete tail of a read is carried
//! over to the front of the buffer for the next pass.

use std::fs::File;
use std::io;
use std::os::fd::IntoRawFd;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, warn};

use super::{note_batch, FdGuard, Source};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ring::{FramedRing, Record};
use crate::stats::{SourceStats, StatsCell};
use crate::{sys, LEN_PREFIX};

/// Source reading length-prefixed records from a file or the inherited
/// standard input.
#[derive(Debug)]
pub struct FileSource {
    config: Arc<Config>,
    handle: FdGuard,
    name: String,
    buffer: Mutex<Vec<u8>>,
}

impl FileSource {
    /// Open a named file read-only.
    pub fn open(config: Arc<Config>, path: &str) -> Result<Self> {
        let file = File::open(path).map_err(|err| Error::SourceOpen {
            name: path.to_string(),
            source: err,
        })?;
        Ok(Self::from_fd(config, file.into_raw_fd(), path.to_string()))
    }

    /// Duplicate the inherited stdin handle so it can be closed on forced
    /// end-of-stream without touching the process stream.
    pub fn stdin(config: Arc<Config>) -> Result<Self> {
        let fd = sys::dup_fd(libc::STDIN_FILENO).map_err(|err| Error::SourceOpen {
            name: "stdin".to_string(),
            source: err,
        })?;
        Ok(Self::from_fd(config, fd, "stdin".to_string()))
    }

    fn from_fd(config: Arc<Config>, fd: i32, name: String) -> Self {
        let buffer = vec![0u8; config.max_read_size.max(LEN_PREFIX)];
        Self {
            config,
            handle: FdGuard::new(fd),
            name,
            buffer: Mutex::new(buffer),
        }
    }
}

impl Source for FileSource {
    fn copy_to_ring(&self, ring: &FramedRing, stats: &StatsCell<SourceStats>) -> Result<()> {
        let mut buffer = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);

        let mut n_read = 0usize;
        // Target fill before the next parse attempt; grows to cover a record
        // whose header arrived without its payload.
        let mut n_min = LEN_PREFIX;
        let mut produced: u64 = 0;
        let mut start = None;
        loop {
            let remaining = self.config.remaining_records(produced);
            if remaining == 0 {
                debug!(produced, source = %self.name, "reached max_datagrams; stopping read");
                break;
            }
            if buffer.len() < n_min {
                buffer.resize(n_min, 0);
            }

            let Some(fd) = self.handle.fd() else {
                if self.handle.force_eof_requested() {
                    debug!(source = %self.name, "handle closed by forced end-of-stream");
                    break;
                }
                return Err(Error::SourceIo(io::Error::from_raw_os_error(libc::EBADF)));
            };
            let read = match sys::read_fd(fd, &mut buffer[n_read..]) {
                Ok(read) => read,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    if sys::is_closed_handle_error(&err) && self.handle.force_eof_requested() {
                        debug!(source = %self.name, "read woken by forced end-of-stream");
                        break;
                    }
                    return Err(Error::SourceIo(err));
                }
            };
            if read == 0 {
                if n_read > 0 {
                    warn!(
                        residual = n_read,
                        source = %self.name,
                        "end of input inside a record; discarding truncated tail"
                    );
                }
                debug!(source = %self.name, "end of input");
                break;
            }
            n_read += read;
            if n_read < n_min {
                continue;
            }

            // Collect the complete records in the buffered bytes.
            let mut parsed: Vec<(usize, usize)> = Vec::new();
            let mut pos = 0usize;
            let mut need = LEN_PREFIX;
            while pos + LEN_PREFIX <= n_read {
                let len = u32::from_be_bytes([
                    buffer[pos],
                    buffer[pos + 1],
                    buffer[pos + 2],
                    buffer[pos + 3],
                ]) as usize;
                if pos + LEN_PREFIX + len > n_read {
                    need = LEN_PREFIX + len;
                    break;
                }
                parsed.push((pos + LEN_PREFIX, len));
                pos += LEN_PREFIX + len;
                if parsed.len() >= remaining {
                    break;
                }
            }
            if parsed.is_empty() {
                n_min = need;
                continue;
            }

            {
                let records: Vec<Record<'_>> = parsed
                    .iter()
                    .map(|&(off, len)| Record::new(&buffer[off..off + len]))
                    .collect();
                ring.producer_commit_batch(&records)?;
            }
            produced += parsed.len() as u64;
            note_batch(stats, parsed.len(), &mut start);

            if pos < n_read {
                buffer.copy_within(pos..n_read, 0);
                n_read -= pos;
            } else {
                n_read = 0;
            }
            n_min = LEN_PREFIX;
        }
        Ok(())
    }

    fn force_eof(&self) {
        self.handle.force_eof();
    }
}
