//! File and stdout datagram destination.
//!
//! Forwards the ring's framed bytes verbatim with plain or vectored writes;
//! it never interprets the length prefixes, so record boundaries survive in
//! the output byte-for-byte.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::fd::FromRawFd;
use std::sync::Arc;

use tracing::debug;

use super::Destination;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::ring::FramedRing;
use crate::stats::{DestinationStats, StatsCell};
use crate::sys;

/// Destination writing framed records to a file or the inherited standard
/// output.
#[derive(Debug)]
pub struct FileDestination {
    config: Arc<Config>,
    file: File,
    name: String,
}

impl FileDestination {
    /// Open a named file write-only, creating it and appending or
    /// truncating per the configuration.
    pub fn open(config: Arc<Config>, path: &str) -> Result<Self> {
        let mut options = OpenOptions::new();
        options.write(true).create(true);
        if config.append {
            options.append(true);
        } else {
            options.truncate(true);
        }
        let file = options.open(path).map_err(|err| Error::DestinationOpen {
            name: path.to_string(),
            source: err,
        })?;
        Ok(Self {
            config,
            file,
            name: path.to_string(),
        })
    }

    /// Duplicate the inherited stdout handle.
    pub fn stdout(config: Arc<Config>) -> Result<Self> {
        let fd = sys::dup_fd(libc::STDOUT_FILENO).map_err(|err| Error::DestinationOpen {
            name: "stdout".to_string(),
            source: err,
        })?;
        // SAFETY: the freshly duplicated descriptor is owned by nothing
        // else; File takes over closing it.
        let file = unsafe { File::from_raw_fd(fd) };
        Ok(Self {
            config,
            file,
            name: "stdout".to_string(),
        })
    }
}

impl Destination for FileDestination {
    fn copy_from_ring(
        &self,
        ring: &FramedRing,
        _stats: &StatsCell<DestinationStats>,
    ) -> Result<()> {
        loop {
            let batch = ring.consumer_start_batch(1, self.config.max_write_size)?;
            if batch.is_empty() {
                if ring.is_eof() {
                    debug!(dest = %self.name, "ring drained; finishing");
                    break;
                }
                continue;
            }

            let (seg1, seg2) = batch.as_slices();
            let written = if seg2.is_empty() {
                (&self.file).write(seg1)
            } else {
                let (slices, n) = batch.io_slices();
                (&self.file).write_vectored(&slices[..n])
            };
            drop(batch);
            match written {
                Ok(0) => {
                    return Err(Error::DestinationIo(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "write made no progress",
                    )))
                }
                // Short writes commit only what actually landed.
                Ok(written) => ring.consumer_commit_batch(written)?,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(Error::DestinationIo(err)),
            }
        }

        if let Err(err) = self.file.sync_all() {
            // Pipes and terminals cannot be synced; only real I/O failures
            // are worth failing the run over.
            match err.raw_os_error() {
                Some(libc::EINVAL) | Some(libc::ENOTSUP) | Some(libc::EROFS) => {
                    debug!(dest = %self.name, "output does not support sync");
                }
                _ => return Err(Error::DestinationIo(err)),
            }
        }
        Ok(())
    }
}
