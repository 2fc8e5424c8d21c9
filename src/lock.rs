// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cross-process mutual exclusion for ticks.

use std::fs::{File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};

use crate::error::StorageError;

/// An exclusive lock on a file, held for the duration of one tick.
///
/// The lock is released when the guard is dropped or the process exits.
///
/// # Examples
///
/// ```
/// use mainswatch::TickLock;
///
/// let dir = tempfile::tempdir().unwrap();
/// let path = dir.path().join("tick.lock");
///
/// let first = TickLock::try_acquire(&path).unwrap();
/// assert!(first.is_some());
/// assert!(TickLock::try_acquire(&path).unwrap().is_none());
///
/// drop(first);
/// assert!(TickLock::try_acquire(&path).unwrap().is_some());
/// ```
#[derive(Debug)]
pub struct TickLock {
    file: File,
    path: PathBuf,
}

impl TickLock {
    /// Tries to take the lock without blocking.
    ///
    /// Returns `Ok(None)` if another holder has it.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock file cannot be opened or locked for a
    /// reason other than contention.
    pub fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(path)?;

        match file.try_lock() {
            Ok(()) => {
                tracing::trace!(path = %path.display(), "Tick lock acquired");
                Ok(Some(Self {
                    file,
                    path: path.to_path_buf(),
                }))
            }
            Err(TryLockError::WouldBlock) => {
                tracing::debug!(path = %path.display(), "Tick lock busy");
                Ok(None)
            }
            Err(TryLockError::Error(e)) => Err(StorageError::Io(e)),
        }
    }

    /// Path of the lock file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TickLock {
    fn drop(&mut self) {
        if let Err(e) = self.file.unlock() {
            tracing::warn!(path = %self.path.display(), error = %e, "Failed to release tick lock");
        }
    }
}
