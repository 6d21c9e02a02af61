//! Journal writer and recovery.

use crate::error::CoreResult;
use crate::journal::record::{scan, Batch, JournalScan};
use mirrorsync_storage::StorageBackend;
use tracing::{debug, warn};

/// Append-only journal of committed batches.
///
/// The journal is not internally synchronized; the owning
/// [`Context`](crate::Context) keeps it behind its single writer lock.
pub struct Journal {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
}

impl Journal {
    /// Creates a journal over a backend.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
        }
    }

    /// Appends one batch as a single framed record.
    ///
    /// Returns the offset of the record. When `sync_on_commit` is set the
    /// record is durable once this returns.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or the write fails.
    pub fn append(&mut self, batch: &Batch) -> CoreResult<u64> {
        let frame = batch.encode_frame()?;
        let start = self.backend.size()?;
        let written = self.backend.append(&frame).and_then(|offset| {
            if self.sync_on_commit {
                self.backend.flush()?;
            }
            Ok(offset)
        });
        let offset = match written {
            Ok(offset) => offset,
            Err(err) => {
                // A partial frame must not become a mid-journal checksum failure.
                if let Err(rollback) = self.backend.truncate(start) {
                    warn!(error = %rollback, "failed to roll back partial journal append");
                }
                return Err(err.into());
            }
        };
        debug!(
            sequence = batch.sequence,
            mutations = batch.mutations.len(),
            offset,
            "journal batch appended"
        );
        Ok(offset)
    }

    /// Reads every complete batch and cuts off a torn tail.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal is corrupted before its final
    /// record or the backend fails.
    pub fn recover(&mut self) -> CoreResult<Vec<Batch>> {
        let data = self.backend.read_all()?;
        let JournalScan {
            batches,
            valid_len,
            total_len,
            tail,
        } = scan(&data)?;

        if let Some(damage) = tail {
            warn!(
                ?damage,
                discarded = total_len - valid_len,
                "discarding torn journal tail"
            );
            self.backend.truncate(valid_len)?;
            self.backend.flush()?;
        }

        Ok(batches.into_iter().map(|(_, batch)| batch).collect())
    }

    /// Replaces the whole journal with a single snapshot batch.
    ///
    /// Used by in-memory contexts; file-backed contexts write the snapshot
    /// to a scratch file and swap it in with [`Journal::replace_backend`].
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails.
    pub fn reset(&mut self, snapshot: &Batch) -> CoreResult<()> {
        let frame = snapshot.encode_frame()?;
        self.backend.truncate(0)?;
        self.backend.append(&frame)?;
        self.backend.flush()?;
        Ok(())
    }

    /// Swaps in a new backend, returning the old one.
    pub fn replace_backend(
        &mut self,
        backend: Box<dyn StorageBackend>,
    ) -> Box<dyn StorageBackend> {
        std::mem::replace(&mut self.backend, backend)
    }

    /// Flushes pending writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&mut self) -> CoreResult<()> {
        self.backend.flush()?;
        Ok(())
    }

    /// Returns the journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }
}

/// Walks a journal without modifying it.
///
/// # Errors
///
/// Returns the first fatal corruption found.
pub fn verify(backend: &dyn StorageBackend) -> CoreResult<JournalScan> {
    let data = backend.read_all()?;
    scan(&data)
}
