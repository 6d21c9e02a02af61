//! Storage backend trait definition.

use crate::error::{StorageError, StorageResult};

/// An append-only byte store holding the mirror journal.
///
/// # Invariants
///
/// - `append` returns the offset the data was written at
/// - `read_at` returns exactly the bytes previously written at that offset
/// - after `flush` returns, appended data survives process termination
/// - implementations are `Send + Sync` so a context can move between threads
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::ReadPastEnd`] if the range is not fully
    /// inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends data to the end of the store and returns its offset.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Flushes appended data to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Returns the current size in bytes (the offset of the next append).
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Truncates the store to `new_size` bytes.
    ///
    /// Used to cut off a torn trailing record after a crash and to reset the
    /// store before a compacted snapshot is written.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is larger than the current size or
    /// the truncation fails.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Reads the whole store.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is larger than addressable memory or a
    /// read fails.
    fn read_all(&self) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        let len = usize::try_from(size)
            .map_err(|_| StorageError::Corrupted(format!("store too large: {size} bytes")))?;
        self.read_at(0, len)
    }
}
