//! Process-level run lock.
//!
//! One lock file per host guards the whole pipeline. The file is created
//! exclusively, so an existing file means another run is active (or a stale
//! lock needs operator attention); the second run fails immediately instead
//! of waiting. The guard removes the file when dropped, and
//! [`RunLock::release_on_signal`] covers SIGINT/SIGTERM.

use crate::error::{ChannelError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Exit status used when a signal interrupts a locked run.
const SIGNAL_EXIT_CODE: i32 = 130;

/// Exclusive run lock, released on drop.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
    file: File,
}

impl RunLock {
    /// Acquire the lock or fail with [`ChannelError::LockContention`].
    pub fn acquire(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.exists() {
                return Err(ChannelError::Io {
                    message: format!("lock directory {} does not exist", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: None,
                });
            }
        }

        let file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ChannelError::LockContention {
                    path: path.to_path_buf(),
                    holder: read_holder(path),
                });
            }
            Err(e) => return Err(ChannelError::io("failed to create lock file", path, e)),
        };

        if let Err(e) = FileExt::try_lock_exclusive(&file) {
            let _ = fs::remove_file(path);
            return Err(ChannelError::io("failed to lock run lock file", path, e));
        }

        let mut lock = Self {
            path: path.to_path_buf(),
            file,
        };
        writeln!(lock.file, "{}", std::process::id())
            .and_then(|_| lock.file.flush())
            .map_err(|e| ChannelError::io("failed to write lock file", path, e))?;

        debug!("Acquired run lock {}", path.display());
        Ok(lock)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the lock file if the process is interrupted by a signal.
    ///
    /// Only one handler can be installed per process.
    pub fn release_on_signal(&self) -> Result<()> {
        let path = self.path.clone();
        ctrlc::set_handler(move || {
            warn!("Interrupted, releasing run lock {}", path.display());
            let _ = fs::remove_file(&path);
            std::process::exit(SIGNAL_EXIT_CODE);
        })
        .map_err(|e| ChannelError::Other(format!("failed to install signal handler: {e}")))
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        match fs::remove_file(&self.path) {
            Ok(()) => debug!("Released run lock {}", self.path.display()),
            Err(e) => warn!("Failed to remove lock file {}: {}", self.path.display(), e),
        }
    }
}

/// PID recorded by the current lock holder, if readable.
fn read_holder(path: &Path) -> Option<u32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}
