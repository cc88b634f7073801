//! Cross-process exclusion for the registry file
//!
//! The in-process mutex in [`Registry`](super::Registry) only serializes
//! threads of one pets process. Separate invocations (`pets up` in two
//! terminals) coordinate through an exclusive `flock` on a sidecar lock file.

use super::error::RegistryError;
use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::Duration;

#[cfg(not(unix))]
use std::path::PathBuf;

/// Held for the duration of one registry read-modify-write.
pub(crate) struct RegistryLock {
    _file: File,
    #[cfg(not(unix))]
    path: PathBuf,
}

impl RegistryLock {
    /// Take the lock at `path`, sleeping 50ms, 100ms, 200ms, ... between
    /// attempts and giving up after `retries` of them.
    pub(crate) fn acquire(path: &Path, retries: u32) -> Result<Self, RegistryError> {
        for attempt in 0..=retries {
            if let Some(lock) = Self::try_acquire(path)? {
                return Ok(lock);
            }
            if attempt < retries {
                std::thread::sleep(backoff(attempt));
            }
        }
        Err(RegistryError::LockTimeout {
            path: path.to_path_buf(),
            retries,
        })
    }

    #[cfg(unix)]
    fn try_acquire(path: &Path) -> Result<Option<Self>, RegistryError> {
        use std::os::unix::io::AsRawFd;

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| RegistryError::io(path, e))?;

        // SAFETY: the descriptor is owned by `file`, which outlives the call.
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) } == 0 {
            return Ok(Some(Self { _file: file }));
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EWOULDBLOCK || code == libc::EAGAIN => Ok(None),
            _ => Err(RegistryError::io(path, err)),
        }
    }

    // Without flock, owning the lock means having created the file.
    #[cfg(not(unix))]
    fn try_acquire(path: &Path) -> Result<Option<Self>, RegistryError> {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => Ok(Some(Self {
                _file: file,
                path: path.to_path_buf(),
            })),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(None),
            Err(e) => Err(RegistryError::io(path, e)),
        }
    }
}

// On unix, closing the descriptor releases the flock.
#[cfg(not(unix))]
impl Drop for RegistryLock {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(50u64 << attempt.min(10))
}
