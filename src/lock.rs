//! Directory Lock
//!
//! Cross-process exclusion over a store directory.
//!
//! An exclusive advisory lock is held on `{data_dir}/lock` for as long as a
//! store is open. The OS drops the lock when the handle closes, including
//! on process exit, so a crashed owner never blocks the next open. The file
//! itself is deleted on release.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use fs2::FileExt;
use tracing::{debug, warn};

use crate::error::{CaskError, Result};

/// Exclusive lock on a store directory
#[derive(Debug)]
pub struct DirLock {
    path: PathBuf,

    /// `None` once released
    file: Option<File>,
}

impl DirLock {
    /// Name of the lock file inside the store directory
    pub const FILE_NAME: &'static str = "lock";

    /// Take the lock without blocking
    ///
    /// Fails with `LockHeld` if any other handle owns it, including another
    /// store in this process.
    pub fn acquire(dir: &Path) -> Result<Self> {
        let path = dir.join(Self::FILE_NAME);

        // A releasing owner unlinks the file; one retry picks up its successor
        for _ in 0..2 {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .open(&path)?;

            if let Some(file) = lock_opened(file, &path, dir)? {
                debug!(path = %path.display(), "Acquired directory lock");
                return Ok(Self {
                    path,
                    file: Some(file),
                });
            }
            debug!(path = %path.display(), "Lock file replaced while locking, retrying");
        }

        Err(CaskError::LockHeld(dir.to_path_buf()))
    }

    /// Delete the lock file and drop the lock. Idempotent.
    pub fn release(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            // Unlink while still locked so a waiter cannot lock a doomed file
            match fs::remove_file(&self.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            FileExt::unlock(&file)?;
            debug!(path = %self.path.display(), "Released directory lock");
        }
        Ok(())
    }

    pub fn is_held(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(path = %self.path.display(), error = %e, "Failed to release directory lock");
        }
    }
}

/// Lock an already opened handle on `path`
///
/// `None` when the file was unlinked between the open and the lock; the lock
/// is then on a file nobody else can see and is dropped with the handle.
fn lock_opened(file: File, path: &Path, dir: &Path) -> Result<Option<File>> {
    if let Err(e) = FileExt::try_lock_exclusive(&file) {
        return Err(if is_contended(&e) {
            CaskError::LockHeld(dir.to_path_buf())
        } else {
            CaskError::Io(e)
        });
    }

    if !same_file(&file, path)? {
        return Ok(None);
    }
    Ok(Some(file))
}

fn is_contended(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
        || e.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn same_file(file: &File, path: &Path) -> Result<bool> {
    use std::os::unix::fs::MetadataExt;

    let held = file.metadata()?;
    match fs::metadata(path) {
        Ok(on_disk) => Ok(held.dev() == on_disk.dev() && held.ino() == on_disk.ino()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

#[cfg(not(unix))]
fn same_file(_file: &File, _path: &Path) -> Result<bool> {
    Ok(true)
}
