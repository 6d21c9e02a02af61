//! Context facade and recovery.

use crate::change_feed::{ChangeEvent, ChangeFeed};
use crate::config::Config;
use crate::dir::StoreDir;
use crate::error::CoreResult;
use crate::journal::Journal;
use crate::queue::PendingOperationQueue;
use crate::state::MirrorState;
use crate::store::LocalStore;
use crate::transaction::WriteTxn;
use mirrorsync_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::mpsc::Receiver;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info};

/// Sizes before and after a compaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactionStats {
    /// Journal bytes before.
    pub before: u64,
    /// Journal bytes after.
    pub after: u64,
}

/// The local side of a sync session.
///
/// `Context` owns the mirrored entities, the pending-operation queue and
/// the session credential. It is shared (behind an `Arc`) by the sync
/// engine, the live channel and the application facade; there is no global
/// instance.
///
/// # Writes
///
/// All mutations go through [`Context::write`], which serializes writers on
/// the journal lock, appends one framed batch, and only then applies the
/// batch to the in-memory state. Readers take a short read lock and never
/// observe a partially applied batch.
///
/// # Example
///
/// ```rust
/// use mirrorsync_core::Context;
/// use mirrorsync_protocol::{Entity, OperationKind};
///
/// let ctx = Context::open_in_memory().unwrap();
/// let entity = Entity::new_local(Default::default()).with_field("name", "Half-Life");
/// let id = entity.id.clone();
///
/// ctx.write(|txn| {
///     txn.put_entity(entity);
///     txn.enqueue(&id, OperationKind::Create);
///     Ok(())
/// })
/// .unwrap();
///
/// assert_eq!(ctx.queue().len(), 1);
/// assert!(ctx.store().get(&id).unwrap().needs_sync);
/// ```
pub struct Context {
    config: Config,
    dir: Option<StoreDir>,
    journal: Mutex<Journal>,
    state: RwLock<MirrorState>,
    feed: ChangeFeed,
    credential: RwLock<Option<String>>,
}

impl Context {
    /// Opens a file-backed context with the default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory is locked, missing (and
    /// `create_if_missing` is off), or the journal is corrupted.
    pub fn open(path: &Path) -> CoreResult<Self> {
        Self::open_with_config(path, Config::default())
    }

    /// Opens a file-backed context.
    ///
    /// # Errors
    ///
    /// See [`Context::open`].
    pub fn open_with_config(path: &Path, config: Config) -> CoreResult<Self> {
        let dir = StoreDir::open(path, config.create_if_missing)?;
        if dir.remove_stale_temp()? {
            debug!(path = %path.display(), "removed stale compaction file");
        }
        let backend = FileBackend::open(&dir.journal_path())?;
        Self::from_parts(Box::new(backend), Some(dir), config)
    }

    /// Opens an empty in-memory context.
    ///
    /// # Errors
    ///
    /// Infallible in practice; returns `CoreResult` for symmetry.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backend(Box::new(InMemoryBackend::new()), Config::default())
    }

    /// Opens a context over an arbitrary journal backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be recovered.
    pub fn open_with_backend(
        backend: Box<dyn StorageBackend>,
        config: Config,
    ) -> CoreResult<Self> {
        Self::from_parts(backend, None, config)
    }

    fn from_parts(
        backend: Box<dyn StorageBackend>,
        dir: Option<StoreDir>,
        config: Config,
    ) -> CoreResult<Self> {
        let mut journal = Journal::new(backend, config.sync_on_commit);
        let batches = journal.recover()?;

        let mut state = MirrorState::default();
        for batch in &batches {
            state.apply(batch);
        }
        info!(
            batches = batches.len(),
            entities = state.entities.len(),
            pending = state.operations.len(),
            "mirror recovered"
        );

        let ctx = Self {
            feed: ChangeFeed::with_max_history(config.max_feed_history),
            config,
            dir,
            journal: Mutex::new(journal),
            state: RwLock::new(state),
            credential: RwLock::new(None),
        };

        if ctx.config.compact_threshold > 0 && ctx.journal_size()? > ctx.config.compact_threshold
        {
            ctx.compact()?;
        }

        Ok(ctx)
    }

    /// Runs `f` as one atomic write transaction.
    ///
    /// If `f` returns `Ok` and staged at least one mutation, the mutations
    /// are appended to the journal as a single batch, applied, and
    /// published on the change feed. If `f` returns `Err` nothing is
    /// written.
    ///
    /// # Errors
    ///
    /// Returns the closure's error or a journal write failure.
    pub fn write<T, F>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut WriteTxn<'_>) -> CoreResult<T>,
    {
        let mut journal = self.journal.lock();

        let (value, batch) = {
            let state = self.state.read();
            let mut txn = WriteTxn::new(&state, now_millis());
            let value = f(&mut txn)?;
            (value, txn.into_batch())
        };

        if let Some(batch) = batch {
            journal.append(&batch)?;
            let events: Vec<ChangeEvent> = self.state.write().apply(&batch);
            self.feed.emit_batch(events);
        }

        Ok(value)
    }

    /// Runs `f` with a read view of the committed state.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&MirrorState) -> T) -> T {
        f(&self.state.read())
    }

    /// Returns the local entity store.
    #[must_use]
    pub fn store(&self) -> LocalStore<'_> {
        LocalStore::new(self)
    }

    /// Returns the pending-operation queue.
    #[must_use]
    pub fn queue(&self) -> PendingOperationQueue<'_> {
        PendingOperationQueue::new(self)
    }

    /// Subscribes to committed entity changes.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.feed.subscribe()
    }

    /// Returns the change feed.
    #[must_use]
    pub fn change_feed(&self) -> &ChangeFeed {
        &self.feed
    }

    /// Sets the session credential (bearer token).
    pub fn set_credential(&self, token: impl Into<String>) {
        *self.credential.write() = Some(token.into());
    }

    /// Clears the session credential.
    pub fn clear_credential(&self) {
        *self.credential.write() = None;
    }

    /// Returns the session credential, if any.
    #[must_use]
    pub fn credential(&self) -> Option<String> {
        self.credential.read().clone()
    }

    /// Returns the sequence of the last committed batch.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.state.read().sequence
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Returns the store directory, or `None` for in-memory contexts.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.dir.as_ref().map(StoreDir::path)
    }

    /// Returns the journal size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    pub fn journal_size(&self) -> CoreResult<u64> {
        self.journal.lock().size()
    }

    /// Flushes the journal.
    ///
    /// Only needed when `sync_on_commit` is off.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn flush(&self) -> CoreResult<()> {
        self.journal.lock().flush()
    }

    /// Rewrites the journal as a single snapshot batch.
    ///
    /// File-backed contexts write the snapshot to a scratch file and rename
    /// it over the journal, so a crash leaves either the old or the new
    /// journal intact.
    ///
    /// # Errors
    ///
    /// Returns an error if writing the snapshot fails.
    pub fn compact(&self) -> CoreResult<CompactionStats> {
        let mut journal = self.journal.lock();
        let before = journal.size()?;
        let snapshot = self.state.read().snapshot();

        match &self.dir {
            Some(dir) => {
                let mut scratch = FileBackend::create(&dir.journal_temp_path())?;
                scratch.append(&snapshot.encode_frame()?)?;
                scratch.flush()?;
                drop(scratch);
                dir.promote_temp_journal()?;
                let fresh = FileBackend::open(&dir.journal_path())?;
                journal.replace_backend(Box::new(fresh));
            }
            None => journal.reset(&snapshot)?,
        }

        let after = journal.size()?;
        info!(before, after, "journal compacted");
        Ok(CompactionStats { before, after })
    }
}

pub(crate) fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use mirrorsync_protocol::{Entity, EntityId, OperationKind};
    use tempfile::tempdir;

    fn local(name: &str) -> Entity {
        Entity::new_local(Default::default()).with_field("name", name)
    }

    #[test]
    fn failed_closure_writes_nothing() {
        let ctx = Context::open_in_memory().unwrap();
        let result: CoreResult<()> = ctx.write(|txn| {
            txn.put_entity(local("Doom"));
            Err(CoreError::invalid_operation("abort"))
        });

        assert!(result.is_err());
        assert!(ctx.store().is_empty());
        assert_eq!(ctx.sequence(), 0);
        assert_eq!(ctx.journal_size().unwrap(), 0);
    }

    #[test]
    fn state_survives_reopen() {
        let backend = InMemoryBackend::new();
        let entity = local("Half-Life");
        let id = entity.id.clone();

        {
            let ctx =
                Context::open_with_backend(Box::new(backend.clone()), Config::default()).unwrap();
            ctx.write(|txn| {
                txn.put_entity(entity.clone());
                txn.enqueue(&id, OperationKind::Create);
                Ok(())
            })
            .unwrap();
        }

        let ctx = Context::open_with_backend(Box::new(backend), Config::default()).unwrap();
        assert_eq!(ctx.store().get(&id), Some(entity));
        assert_eq!(ctx.queue().all_ordered()[0].kind, OperationKind::Create);
    }

    #[test]
    fn operation_ids_are_not_reused_after_restart() {
        let backend = InMemoryBackend::new();
        let id = EntityId::new("g1");

        let first = {
            let ctx =
                Context::open_with_backend(Box::new(backend.clone()), Config::default()).unwrap();
            let op = ctx.queue().enqueue(&id, OperationKind::Delete).unwrap();
            ctx.queue().remove(op.id).unwrap();
            op
        };

        let ctx = Context::open_with_backend(Box::new(backend), Config::default()).unwrap();
        let second = ctx.queue().enqueue(&id, OperationKind::Delete).unwrap();
        assert!(second.id > first.id);
        assert!(second.sequence > first.sequence);
    }

    #[test]
    fn file_backed_context_survives_reopen() {
        let temp = tempdir().unwrap();
        let entity = local("Portal");
        let id = entity.id.clone();

        {
            let ctx = Context::open(temp.path()).unwrap();
            ctx.store().upsert(entity.clone()).unwrap();
            ctx.queue().enqueue(&id, OperationKind::Create).unwrap();
        }

        let ctx = Context::open(temp.path()).unwrap();
        assert_eq!(ctx.store().get(&id), Some(entity));
        assert_eq!(ctx.queue().len(), 1);
        assert_eq!(ctx.path(), Some(temp.path()));
    }

    #[test]
    fn compaction_preserves_state() {
        let temp = tempdir().unwrap();
        let ctx = Context::open(temp.path()).unwrap();
        let id = EntityId::new("g1");

        for version in 1..=20 {
            ctx.store()
                .upsert(Entity::synced("g1", version, Default::default()))
                .unwrap();
        }
        ctx.queue().enqueue(&id, OperationKind::Update).unwrap();

        let stats = ctx.compact().unwrap();
        assert!(stats.after < stats.before);

        ctx.store()
            .upsert(Entity::synced("g2", 1, Default::default()))
            .unwrap();
        drop(ctx);

        let ctx = Context::open(temp.path()).unwrap();
        assert_eq!(ctx.store().get(&id).unwrap().version, 20);
        assert_eq!(ctx.store().len(), 2);
        assert_eq!(ctx.queue().len(), 1);
    }

    #[test]
    fn open_compacts_over_threshold() {
        let backend = InMemoryBackend::new();
        {
            let ctx = Context::open_with_backend(
                Box::new(backend.clone()),
                Config::default().compact_threshold(0),
            )
            .unwrap();
            for version in 1..=10 {
                ctx.store()
                    .upsert(Entity::synced("g1", version, Default::default()))
                    .unwrap();
            }
        }
        let grown = backend.size().unwrap();

        let ctx = Context::open_with_backend(
            Box::new(backend.clone()),
            Config::default().compact_threshold(1),
        )
        .unwrap();
        assert!(backend.size().unwrap() < grown);
        assert_eq!(ctx.store().get(&EntityId::new("g1")).unwrap().version, 10);
    }

    #[test]
    fn credential_round_trip() {
        let ctx = Context::open_in_memory().unwrap();
        assert!(ctx.credential().is_none());
        ctx.set_credential("token-1");
        assert_eq!(ctx.credential().as_deref(), Some("token-1"));
        ctx.clear_credential();
        assert!(ctx.credential().is_none());
    }

    #[test]
    fn subscribers_see_commits_in_order() {
        let ctx = Context::open_in_memory().unwrap();
        let rx = ctx.subscribe();

        ctx.store()
            .upsert(Entity::synced("a", 1, Default::default()))
            .unwrap();
        ctx.store().delete(&EntityId::new("a")).unwrap();

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert!(first.sequence < second.sequence);
        assert!(second.entity.is_none());
    }
}
