// src/db/lock.rs

//! Advisory file locking for the installation database
//!
//! One zero-length lock file per database directory, locked shared for
//! reads and exclusive for writes. Acquisition is a bounded
//! exponential-backoff polling loop rather than a blocking wait, because
//! the install tree may live on a network filesystem where blocking fcntl
//! waits are unreliable. Within one process the lock is recursive: nested
//! acquires of the same type only bump a counter, and only the outermost
//! release drops the OS-level lock.
//!
//! The counters make this process-safe, not thread-safe. Callers sharing
//! a [`LockFile`] across threads must serialize access themselves.

use crate::error::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// First poll interval; doubles per attempt up to [`MAX_POLL`].
const INITIAL_POLL: Duration = Duration::from_millis(100);
const MAX_POLL: Duration = Duration::from_secs(2);

/// Attempt bound when no timeout is configured.
const DEFAULT_MAX_ATTEMPTS: usize = 30;

/// A shared/exclusive advisory lock on one file, with in-process
/// recursive acquisition.
pub struct LockFile {
    path: PathBuf,
    file: Option<File>,
    reads: usize,
    writes: usize,
    timeout: Option<Duration>,
    /// Write `pid=<pid>,host=<host>` into the lock file on exclusive
    /// acquisition. Diagnostic only; never read back.
    debug_metadata: bool,
}

impl LockFile {
    /// Prepare a lock on `path`, creating the file if needed.
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Create eagerly so later opens only need read access for shared
        // locks
        if !path.exists() {
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .map_err(|source| Error::CantCreateLock {
                    path: path.clone(),
                    source,
                })?;
        }
        Ok(Self {
            path,
            file: None,
            reads: 0,
            writes: 0,
            timeout: Some(Duration::from_secs(60)),
            debug_metadata: false,
        })
    }

    /// `None` disables the timeout; a fixed attempt bound still applies.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_debug_metadata(mut self, enabled: bool) -> Self {
        self.debug_metadata = enabled;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Acquire (or nest) a shared lock.
    pub fn acquire_read(&mut self) -> Result<()> {
        if self.reads + self.writes == 0 {
            let file = File::open(&self.path)?;
            self.poll(&file, false)?;
            self.file = Some(file);
            log::debug!("acquired read lock on {}", self.path.display());
        }
        self.reads += 1;
        Ok(())
    }

    /// Acquire (or nest) an exclusive lock. Upgrading a held read lock is
    /// not supported: finish the read transaction first.
    pub fn acquire_write(&mut self) -> Result<()> {
        if self.writes == 0 && self.reads > 0 {
            return Err(Error::LockUpgrade(self.path.clone()));
        }
        if self.writes == 0 {
            // Checked on metadata, not the open() outcome: a privileged
            // process can open read-only files for write
            if std::fs::metadata(&self.path)?.permissions().readonly() {
                return Err(Error::LockReadOnlyFile(self.path.clone()));
            }
            let file = OpenOptions::new()
                .write(true)
                .open(&self.path)
                .map_err(|e| {
                    if e.kind() == std::io::ErrorKind::PermissionDenied {
                        Error::LockReadOnlyFile(self.path.clone())
                    } else {
                        Error::Io(e)
                    }
                })?;
            self.poll(&file, true)?;
            if self.debug_metadata {
                self.write_metadata(&file);
            }
            self.file = Some(file);
            log::debug!("acquired write lock on {}", self.path.display());
        }
        self.writes += 1;
        Ok(())
    }

    pub fn release_read(&mut self) -> Result<()> {
        debug_assert!(self.reads > 0, "release_read without acquire_read");
        self.reads = self.reads.saturating_sub(1);
        self.release_if_last()
    }

    pub fn release_write(&mut self) -> Result<()> {
        debug_assert!(self.writes > 0, "release_write without acquire_write");
        self.writes = self.writes.saturating_sub(1);
        self.release_if_last()
    }

    fn release_if_last(&mut self) -> Result<()> {
        if self.reads + self.writes == 0 {
            if let Some(file) = self.file.take() {
                file.unlock()?;
                log::debug!("released lock on {}", self.path.display());
            }
        }
        Ok(())
    }

    /// The backoff loop. The attempt bound derives from the timeout and
    /// the poll schedule, or falls back to a fixed count.
    fn poll(&self, file: &File, exclusive: bool) -> Result<()> {
        let start = Instant::now();
        let max_attempts = match self.timeout {
            Some(timeout) => {
                // enough attempts that their sleeps add up past the timeout
                let mut total = Duration::ZERO;
                let mut delay = INITIAL_POLL;
                let mut attempts = 1;
                while total < timeout {
                    total += delay;
                    delay = (delay * 2).min(MAX_POLL);
                    attempts += 1;
                }
                attempts
            }
            None => DEFAULT_MAX_ATTEMPTS,
        };

        let mut delay = INITIAL_POLL;
        for attempt in 1..=max_attempts {
            let outcome = if exclusive {
                fs2::FileExt::try_lock_exclusive(file)
            } else {
                fs2::FileExt::try_lock_shared(file)
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    if let Some(timeout) = self.timeout {
                        if start.elapsed() >= timeout {
                            return Err(Error::LockTimeout {
                                path: self.path.clone(),
                                attempts: attempt,
                                timeout: self.timeout,
                            });
                        }
                    }
                    std::thread::sleep(delay);
                    delay = (delay * 2).min(MAX_POLL);
                }
                Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                    // Retrying can never succeed here
                    return Err(Error::LockReadOnlyFile(self.path.clone()));
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Err(Error::LockTimeout {
            path: self.path.clone(),
            attempts: max_attempts,
            timeout: self.timeout,
        })
    }

    fn write_metadata(&self, mut file: &File) {
        let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
        let _ = writeln!(file, "pid={},host={}", std::process::id(), host);
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            let _ = file.unlock();
        }
    }
}
