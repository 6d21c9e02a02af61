//! Store directory management.
//!
//! ```text
//! <store_path>/
//! ├─ LOCK          # Advisory lock for single-writer
//! ├─ journal.log   # Append-only journal
//! └─ journal.tmp   # Compaction scratch file (transient)
//! ```

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const JOURNAL_FILE: &str = "journal.log";
const JOURNAL_TEMP: &str = "journal.tmp";

/// An exclusively locked store directory.
///
/// The lock is held for the lifetime of this value and released when the
/// lock file handle is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory and takes the lock.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - the directory doesn't exist and `create_if_missing` is false
    /// - the path is not a directory
    /// - another process holds the lock (`StoreLocked`)
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(CoreError::invalid_store(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_store(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::StoreLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path of the journal.
    #[must_use]
    pub fn journal_path(&self) -> PathBuf {
        self.path.join(JOURNAL_FILE)
    }

    /// Returns the path of the compaction scratch file.
    #[must_use]
    pub fn journal_temp_path(&self) -> PathBuf {
        self.path.join(JOURNAL_TEMP)
    }

    /// Atomically moves the scratch file over the journal.
    ///
    /// # Errors
    ///
    /// Returns an error if the rename or directory sync fails.
    pub fn promote_temp_journal(&self) -> CoreResult<()> {
        fs::rename(self.journal_temp_path(), self.journal_path())?;
        self.sync_directory()
    }

    /// Removes a leftover scratch file from an interrupted compaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove_stale_temp(&self) -> CoreResult<bool> {
        let temp = self.journal_temp_path();
        if temp.exists() {
            fs::remove_file(temp)?;
            return Ok(true);
        }
        Ok(false)
    }

    #[cfg(unix)]
    fn sync_directory(&self) -> CoreResult<()> {
        File::open(&self.path)?.sync_all()?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn sync_directory(&self) -> CoreResult<()> {
        Ok(())
    }
}
