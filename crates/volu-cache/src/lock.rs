//! Per-fingerprint entry locking
//!
//! Optional. When enabled, a lookup that may query holds an advisory
//! exclusive lock on `<cache dir>/<fingerprint>.lock` from the freshness
//! check until the entry is written, so concurrent misses on the same
//! fingerprint run the query once.
//!
//! - Configurable timeout
//! - Contention is logged once per acquisition
//! - Released on drop

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Lock result type
pub type LockResult<T> = Result<T, LockError>;

/// Errors from lock operations
#[derive(Debug, Error)]
pub enum LockError {
    #[error("timed out after {timeout:?} waiting for {path}")]
    Timeout { path: PathBuf, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Advisory lock on one cache entry.
#[derive(Debug)]
pub struct EntryLock {
    lock_path: PathBuf,
    #[cfg_attr(not(unix), allow(dead_code))]
    lock_file: File,
}

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const CONTENTION_WARN_AFTER: Duration = Duration::from_millis(500);

impl EntryLock {
    /// Lock file extension
    pub const EXTENSION: &'static str = "lock";

    /// Acquire the lock for `<cache_dir>/<key>.lock`.
    ///
    /// Creates `cache_dir` if needed and waits up to `timeout`.
    pub fn acquire(cache_dir: &Path, key: &str, timeout: Duration) -> LockResult<Self> {
        fs::create_dir_all(cache_dir)?;
        let lock_path = cache_dir.join(format!("{}.{}", key, Self::EXTENSION));

        let start = Instant::now();
        let mut contended = false;
        let lock_file = loop {
            if let Some(file) = try_lock(&lock_path)? {
                break file;
            }

            let waited = start.elapsed();
            if waited >= timeout {
                return Err(LockError::Timeout {
                    path: lock_path,
                    timeout,
                });
            }
            if !contended && waited > CONTENTION_WARN_AFTER {
                tracing::warn!(lock = %lock_path.display(), "entry lock contended, waiting");
                contended = true;
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if contended {
            tracing::info!(
                lock = %lock_path.display(),
                waited_ms = start.elapsed().as_millis() as u64,
                "entry lock acquired after contention"
            );
        }
        Ok(Self {
            lock_path,
            lock_file,
        })
    }

    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

/// `Ok(None)` while another holder has the lock.
#[cfg(unix)]
fn try_lock(lock_path: &Path) -> io::Result<Option<File>> {
    use std::os::unix::io::AsRawFd;

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(false)
        .open(lock_path)?;

    if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
        return Ok(Some(file));
    }
    match io::Error::last_os_error() {
        e if e.raw_os_error() == Some(libc::EWOULDBLOCK) => Ok(None),
        e => Err(e),
    }
}

/// Exclusive create; the file is removed on drop.
#[cfg(not(unix))]
fn try_lock(lock_path: &Path) -> io::Result<Option<File>> {
    match OpenOptions::new().write(true).create_new(true).open(lock_path) {
        Ok(file) => Ok(Some(file)),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
        Err(e) => Err(e),
    }
}

impl Drop for EntryLock {
    fn drop(&mut self) {
        #[cfg(unix)]
        {
            use std::os::unix::io::AsRawFd;
            unsafe {
                libc::flock(self.lock_file.as_raw_fd(), libc::LOCK_UN);
            }
        }
        #[cfg(not(unix))]
        {
            let _ = fs::remove_file(&self.lock_path);
        }
    }
}
