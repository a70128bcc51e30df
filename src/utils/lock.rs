// backrest/src/utils/lock.rs
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use crate::cli::Operation;
use crate::config::Stanza;
use crate::errors::{AppError, Result};

/// An exclusive advisory lock. Released when dropped or when the process exits.
pub struct ProcessLock {
    path: PathBuf,
    _flock: Flock<File>,
}

impl ProcessLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Debug for ProcessLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessLock").field("path", &self.path).finish()
    }
}

#[derive(Debug)]
pub enum LockOutcome {
    Held(ProcessLock),
    AlreadyHeld,
}

/// `<archive-root>/lock/archive-<stanza>.lock`
pub fn archive_lock_path(archive_root: &Path, stanza: &Stanza) -> PathBuf {
    archive_root
        .join("lock")
        .join(format!("archive-{}.lock", stanza.name()))
}

/// `<backup-root>/lock/<operation>-<stanza>.lock`
pub fn operation_lock_path(backup_root: &Path, operation: Operation, stanza: &Stanza) -> PathBuf {
    backup_root
        .join("lock")
        .join(format!("{}-{}.lock", operation.as_str(), stanza.name()))
}

/// Takes a non-blocking exclusive lock on `path`, creating it and its directory if needed.
/// Another holder is reported as `AlreadyHeld`, never as an error.
pub fn acquire_exclusive(path: &Path) -> Result<LockOutcome> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .mode(0o640)
        .open(path)?;

    let mut flock = match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(flock) => flock,
        Err((_file, errno)) if errno == Errno::EWOULDBLOCK => {
            debug!(path = %path.display(), "lock is held by another process");
            return Ok(LockOutcome::AlreadyHeld);
        }
        Err((_file, errno)) => {
            return Err(AppError::Lock {
                path: path.to_path_buf(),
                source: errno,
            });
        }
    };

    // Record the owner for operators; the lock itself is the flock, not the content.
    flock.set_len(0)?;
    writeln!(&mut *flock, "{}", std::process::id())?;

    debug!(path = %path.display(), "lock acquired");
    Ok(LockOutcome::Held(ProcessLock {
        path: path.to_path_buf(),
        _flock: flock,
    }))
}
