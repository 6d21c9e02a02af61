//! The sync pass: drains the pending-operation queue against the remote API.

use crate::error::{SyncError, SyncResult};
use mirrorsync_core::{Context, WriteTxn};
use mirrorsync_protocol::{
    Entity, EntityId, OperationKind, PendingOperation, RemoteApi, RemoteError,
};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Observable status of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStatus {
    /// No pass has run, or the last pass was cancelled.
    Idle,
    /// A pass is draining the queue.
    Syncing,
    /// The last pass resolved every operation it saw.
    Succeeded,
    /// The last pass left at least one operation queued after a failure.
    Failed,
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Idle => write!(f, "idle"),
            SyncStatus::Syncing => write!(f, "syncing"),
            SyncStatus::Succeeded => write!(f, "succeeded"),
            SyncStatus::Failed => write!(f, "failed"),
        }
    }
}

/// How a pass ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassOutcome {
    /// Nothing failed.
    Succeeded,
    /// At least one operation failed and stays queued.
    Failed,
    /// No credential was set; nothing was attempted.
    Skipped,
    /// Another pass was already running.
    Coalesced,
    /// The pass stopped at a cancellation request.
    Cancelled,
}

/// Summary of one pass.
#[derive(Debug, Clone)]
pub struct SyncPassResult {
    /// How the pass ended.
    pub outcome: PassOutcome,
    /// Operations confirmed by the server.
    pub synced: u64,
    /// Version conflicts resolved by adopting the server copy.
    pub conflicts_resolved: u64,
    /// Operations dropped without a retry (target gone or superseded).
    pub dropped: u64,
    /// Updates left queued behind their entity's create.
    pub deferred: u64,
    /// Operations that failed and stay queued.
    pub failed: u64,
    /// Message of the last failure.
    pub last_error: Option<String>,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl SyncPassResult {
    fn new(outcome: PassOutcome) -> Self {
        Self {
            outcome,
            synced: 0,
            conflicts_resolved: 0,
            dropped: 0,
            deferred: 0,
            failed: 0,
            last_error: None,
            duration: Duration::ZERO,
        }
    }

    /// Returns true if the scheduler does not need to retry.
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, PassOutcome::Succeeded | PassOutcome::Skipped)
    }
}

/// Counters across passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that processed a non-empty queue or found it empty.
    pub passes: u64,
    /// Operations confirmed by the server.
    pub operations_synced: u64,
    /// Conflicts resolved.
    pub conflicts_resolved: u64,
    /// Operations dropped.
    pub operations_dropped: u64,
    /// Failed operation attempts.
    pub failures: u64,
    /// Last failure message.
    pub last_error: Option<String>,
    /// When the last pass finished.
    pub last_pass_time: Option<Instant>,
}

enum OpOutcome {
    Synced,
    Resolved,
    Dropped(&'static str),
    Deferred,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Drains the pending-operation queue of one context.
///
/// A pass is synchronous and blocks on remote calls; the scheduler runs
/// it on the blocking pool. Each operation's remote result and its local
/// effects land in one journal batch, so cancellation between operations
/// never leaves a half-applied operation.
pub struct SyncEngine<R: RemoteApi> {
    ctx: Arc<Context>,
    remote: R,
    running: AtomicBool,
    cancelled: AtomicBool,
    stats: RwLock<SyncStats>,
    status: watch::Sender<SyncStatus>,
}

impl<R: RemoteApi> SyncEngine<R> {
    /// Creates an engine over a context and a remote API.
    pub fn new(ctx: Arc<Context>, remote: R) -> Self {
        let (status, _) = watch::channel(SyncStatus::Idle);
        Self {
            ctx,
            remote,
            running: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            stats: RwLock::new(SyncStats::default()),
            status,
        }
    }

    /// Returns the context.
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Returns the remote API.
    pub fn remote(&self) -> &R {
        &self.remote
    }

    /// Returns the current status.
    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Subscribes to status transitions.
    pub fn subscribe_status(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Returns the counters.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// Returns true while a pass runs.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Asks the running pass to stop before its next operation.
    ///
    /// With no pass running the request holds for the next one. The pass
    /// that stops on it consumes it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Withdraws a cancellation request no pass has consumed yet.
    pub fn clear_cancel(&self) {
        self.cancelled.store(false, Ordering::SeqCst);
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_status(&self, status: SyncStatus) {
        self.status.send_replace(status);
    }

    /// Runs one pass over the queue.
    ///
    /// Failures of individual operations are counted in the result and
    /// leave those operations queued; they never abort the pass.
    pub fn run_pass(&self) -> SyncPassResult {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("sync pass already running");
            return SyncPassResult::new(PassOutcome::Coalesced);
        }
        let _running = RunningGuard(&self.running);
        let start = Instant::now();

        let Some(token) = self.ctx.credential() else {
            debug!("no credential, skipping sync pass");
            return SyncPassResult::new(PassOutcome::Skipped);
        };

        let snapshot = self.ctx.queue().all_ordered();
        let mut result = SyncPassResult::new(PassOutcome::Succeeded);
        if snapshot.is_empty() {
            self.record(&result);
            return result;
        }

        info!(operations = snapshot.len(), "sync pass started");
        self.set_status(SyncStatus::Syncing);

        for queued in snapshot {
            if self.check_cancelled().is_err() {
                info!("sync pass cancelled");
                self.clear_cancel();
                result.outcome = PassOutcome::Cancelled;
                break;
            }

            // Earlier operations in this pass may have retargeted or removed it.
            let Some(op) = self.ctx.queue().get(queued.id) else {
                continue;
            };

            match self.process(&token, &op) {
                Ok(OpOutcome::Synced) => result.synced += 1,
                Ok(OpOutcome::Resolved) => result.conflicts_resolved += 1,
                Ok(OpOutcome::Dropped(reason)) => {
                    debug!(op_id = op.id, kind = %op.kind, entity = %op.entity_id, reason, "operation dropped");
                    result.dropped += 1;
                }
                Ok(OpOutcome::Deferred) => result.deferred += 1,
                Err(err) => {
                    warn!(
                        op_id = op.id,
                        kind = %op.kind,
                        entity = %op.entity_id,
                        error = %err,
                        "operation failed, keeping it queued"
                    );
                    result.failed += 1;
                    result.last_error = Some(err.to_string());
                }
            }
        }

        if result.outcome != PassOutcome::Cancelled && result.failed > 0 {
            result.outcome = PassOutcome::Failed;
        }
        result.duration = start.elapsed();
        self.record(&result);

        self.set_status(match result.outcome {
            PassOutcome::Succeeded => SyncStatus::Succeeded,
            PassOutcome::Failed => SyncStatus::Failed,
            _ => SyncStatus::Idle,
        });
        info!(
            outcome = ?result.outcome,
            synced = result.synced,
            conflicts = result.conflicts_resolved,
            dropped = result.dropped,
            failed = result.failed,
            remaining = self.ctx.queue().len(),
            "sync pass finished"
        );
        result
    }

    fn record(&self, result: &SyncPassResult) {
        let mut stats = self.stats.write();
        stats.passes += 1;
        stats.operations_synced += result.synced;
        stats.conflicts_resolved += result.conflicts_resolved;
        stats.operations_dropped += result.dropped;
        stats.failures += result.failed;
        if result.last_error.is_some() {
            stats.last_error.clone_from(&result.last_error);
        }
        stats.last_pass_time = Some(Instant::now());
    }

    fn process(&self, token: &str, op: &PendingOperation) -> SyncResult<OpOutcome> {
        match op.kind {
            OperationKind::Create => self.push_create(token, op),
            OperationKind::Update => self.push_update(token, op),
            OperationKind::Delete => {
                // The row is already gone locally; remote deletion is not propagated.
                self.ctx.queue().remove(op.id)?;
                Ok(OpOutcome::Dropped("delete resolved locally"))
            }
        }
    }

    fn push_create(&self, token: &str, op: &PendingOperation) -> SyncResult<OpOutcome> {
        let Some((local, revision)) = self.ctx.store().get_with_revision(&op.entity_id) else {
            self.ctx.queue().remove(op.id)?;
            return Ok(OpOutcome::Dropped("target missing"));
        };

        let server = self.remote.create(token, &local)?;
        debug!(local = %local.id, server = %server.id, version = server.version, "entity created remotely");

        self.ctx.write(|txn| {
            txn.remove_operation(op.id);
            let Some(current) = txn.entity(&local.id).cloned() else {
                warn!(local = %local.id, server = %server.id, "entity deleted while its create was in flight");
                return Ok(());
            };
            let edited = txn.committed_revision(&local.id) != Some(revision);

            if server.id != local.id {
                txn.delete_entity(&local.id);
                txn.retarget_operations(&local.id, &server.id);
            }

            if edited && current.needs_sync {
                txn.put_entity(adopt_identity(current, &server));
                let has_update = txn
                    .operations_for(&server.id)
                    .iter()
                    .any(|queued| queued.kind == OperationKind::Update);
                if !has_update {
                    txn.enqueue(&server.id, OperationKind::Update);
                }
            } else {
                settle(txn, server.clone());
            }
            Ok(())
        })?;
        Ok(OpOutcome::Synced)
    }

    fn push_update(&self, token: &str, op: &PendingOperation) -> SyncResult<OpOutcome> {
        let Some((local, revision)) = self.ctx.store().get_with_revision(&op.entity_id) else {
            self.ctx.queue().remove(op.id)?;
            return Ok(OpOutcome::Dropped("target missing"));
        };
        if local.id.is_temporary() {
            debug!(entity = %local.id, "update waits for its create");
            return Ok(OpOutcome::Deferred);
        }
        if !local.needs_sync {
            self.ctx.queue().remove(op.id)?;
            return Ok(OpOutcome::Dropped("superseded"));
        }

        match self.remote.update(token, &local.id, &local, local.version) {
            Ok(server) => {
                self.apply_update(op.id, &local.id, revision, server)?;
                Ok(OpOutcome::Synced)
            }
            Err(RemoteError::Conflict { message }) => {
                info!(entity = %local.id, base_version = local.version, %message, "version conflict, adopting server copy");
                match self.remote.read(token, &local.id) {
                    Ok(server) => {
                        self.apply_update(op.id, &local.id, revision, server)?;
                        Ok(OpOutcome::Resolved)
                    }
                    Err(RemoteError::NotFound) => self.drop_gone(&local.id),
                    Err(err) => Err(err.into()),
                }
            }
            Err(RemoteError::NotFound) => self.drop_gone(&local.id),
            Err(err) => Err(err.into()),
        }
    }

    fn apply_update(
        &self,
        op_id: u64,
        id: &EntityId,
        revision: u64,
        server: Entity,
    ) -> SyncResult<()> {
        self.ctx.write(|txn| {
            let Some(current) = txn.entity(id).cloned() else {
                txn.remove_operation(op_id);
                return Ok(());
            };
            let edited = txn.committed_revision(id) != Some(revision);
            if edited && current.needs_sync {
                // The coalesced UPDATE stays queued and carries the newer edit.
                txn.put_entity(adopt_identity(current, &server));
                return Ok(());
            }
            txn.remove_operation(op_id);
            settle(txn, server);
            Ok(())
        })?;
        Ok(())
    }

    fn drop_gone(&self, id: &EntityId) -> SyncResult<OpOutcome> {
        self.ctx.write(|txn| {
            txn.remove_operations_for(id);
            txn.delete_entity(id);
            Ok(())
        })?;
        Ok(OpOutcome::Dropped("gone on server"))
    }
}

/// Keeps local fields but takes the server's identity and version.
fn adopt_identity(current: Entity, server: &Entity) -> Entity {
    Entity {
        id: server.id.clone(),
        version: server.version,
        owner: server.owner.clone().or(current.owner),
        fields: current.fields,
        needs_sync: true,
    }
}

/// Stores the server copy unless a clean row already holds a newer version.
fn settle(txn: &mut WriteTxn<'_>, mut server: Entity) {
    if let Some(existing) = txn.entity(&server.id) {
        if !existing.needs_sync && existing.version > server.version {
            return;
        }
    }
    server.needs_sync = false;
    txn.put_entity(server);
}

#[cfg(test)]
mod tests {
    use super::*;
    use mirrorsync_protocol::OperationKind;
    use mirrorsync_testkit::{game, MemoryRemote, RemoteCall};

    const TOKEN: &str = "u1";

    fn setup() -> (Arc<Context>, Arc<MemoryRemote>, SyncEngine<Arc<MemoryRemote>>) {
        let ctx = Arc::new(Context::open_in_memory().unwrap());
        ctx.set_credential(TOKEN);
        let remote = Arc::new(MemoryRemote::new());
        let engine = SyncEngine::new(Arc::clone(&ctx), Arc::clone(&remote));
        (ctx, remote, engine)
    }

    fn create_local(ctx: &Context, name: &str) -> EntityId {
        let entity = game(name, 10);
        let id = entity.id.clone();
        ctx.write(|txn| {
            txn.put_entity(entity);
            txn.enqueue(&id, OperationKind::Create);
            Ok(())
        })
        .unwrap();
        id
    }

    fn edit_local(ctx: &Context, id: &EntityId, price: i64) {
        ctx.write(|txn| {
            let mut entity = txn.entity(id).cloned().unwrap();
            entity.set_field("price", price);
            entity.needs_sync = true;
            txn.put_entity(entity);
            txn.enqueue(id, OperationKind::Update);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn create_adopts_server_id() {
        let (ctx, remote, engine) = setup();
        let temp = create_local(&ctx, "Half-Life");

        let result = engine.run_pass();
        assert_eq!(result.outcome, PassOutcome::Succeeded);
        assert_eq!(result.synced, 1);

        assert!(ctx.store().get(&temp).is_none());
        let synced = ctx.store().list(&Default::default());
        assert_eq!(synced.len(), 1);
        assert!(!synced[0].id.is_temporary());
        assert_eq!(synced[0].version, 1);
        assert!(!synced[0].needs_sync);
        assert!(ctx.queue().is_empty());
        assert_eq!(remote.call_count(), 1);
        assert_eq!(engine.status(), SyncStatus::Succeeded);
    }

    #[test]
    fn update_superseded_by_create_result() {
        let (ctx, remote, engine) = setup();
        let temp = create_local(&ctx, "Portal");
        edit_local(&ctx, &temp, 20);

        let result = engine.run_pass();
        assert_eq!(result.synced, 1);
        assert_eq!(result.dropped, 1);
        assert_eq!(remote.calls(), vec![RemoteCall::Create]);

        let entity = &ctx.store().list(&Default::default())[0];
        assert_eq!(entity.version, 1);
        assert_eq!(entity.field("price"), Some(&20.into()));
        assert!(ctx.queue().is_empty());
    }

    #[test]
    fn missing_credential_is_a_silent_noop() {
        let (ctx, remote, engine) = setup();
        ctx.clear_credential();
        create_local(&ctx, "Doom");

        let result = engine.run_pass();
        assert_eq!(result.outcome, PassOutcome::Skipped);
        assert!(result.is_success());
        assert_eq!(remote.call_count(), 0);
        assert_eq!(ctx.queue().len(), 1);
        assert_eq!(engine.status(), SyncStatus::Idle);
    }

    #[test]
    fn empty_queue_emits_no_status() {
        let (_ctx, _remote, engine) = setup();
        let result = engine.run_pass();
        assert_eq!(result.outcome, PassOutcome::Succeeded);
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert_eq!(engine.stats().passes, 1);
    }

    #[test]
    fn create_for_missing_entity_is_dropped_without_call() {
        let (ctx, remote, engine) = setup();
        ctx.queue()
            .enqueue(&EntityId::temporary(), OperationKind::Create)
            .unwrap();

        let result = engine.run_pass();
        assert_eq!(result.dropped, 1);
        assert_eq!(remote.call_count(), 0);
        assert!(ctx.queue().is_empty());
    }

    #[test]
    fn transient_failure_keeps_operation() {
        let (ctx, remote, engine) = setup();
        create_local(&ctx, "Quake");
        remote.fail_next(RemoteError::Server { status: 503 });

        let result = engine.run_pass();
        assert_eq!(result.outcome, PassOutcome::Failed);
        assert_eq!(result.failed, 1);
        assert_eq!(ctx.queue().len(), 1);
        assert_eq!(engine.status(), SyncStatus::Failed);
        assert!(engine.stats().last_error.unwrap().contains("503"));

        let retry = engine.run_pass();
        assert_eq!(retry.outcome, PassOutcome::Succeeded);
        assert!(ctx.queue().is_empty());
    }

    #[test]
    fn clean_entity_update_is_dropped_without_call() {
        let (ctx, remote, engine) = setup();
        let id = EntityId::new("srv-9");
        ctx.write(|txn| {
            txn.put_entity(Entity::synced("srv-9", 3, Default::default()));
            txn.enqueue(&id, OperationKind::Update);
            Ok(())
        })
        .unwrap();

        let result = engine.run_pass();
        assert_eq!(result.dropped, 1);
        assert_eq!(remote.call_count(), 0);
        assert!(ctx.queue().is_empty());
    }

    #[test]
    fn conflict_adopts_server_copy() {
        let (ctx, remote, engine) = setup();
        let server = remote.seed(game("Portal", 10).with_owner(TOKEN));
        remote.edit_as(TOKEN, &server.id, |e| {
            e.set_field("price", 15);
        });

        let mut local = server.clone();
        local.set_field("price", 12);
        local.needs_sync = true;
        ctx.write(|txn| {
            txn.put_entity(local.clone());
            txn.enqueue(&local.id, OperationKind::Update);
            Ok(())
        })
        .unwrap();

        let result = engine.run_pass();
        assert_eq!(result.conflicts_resolved, 1);
        let resolved = ctx.store().get(&server.id).unwrap();
        assert_eq!(resolved.version, 2);
        assert_eq!(resolved.field("price"), Some(&15.into()));
        assert!(!resolved.needs_sync);
        assert!(ctx.queue().is_empty());
    }

    #[test]
    fn not_found_removes_local_row() {
        let (ctx, _remote, engine) = setup();
        let id = EntityId::new("ghost");
        let mut entity = Entity::synced("ghost", 1, Default::default());
        entity.needs_sync = true;
        ctx.write(|txn| {
            txn.put_entity(entity);
            txn.enqueue(&id, OperationKind::Update);
            Ok(())
        })
        .unwrap();

        let result = engine.run_pass();
        assert_eq!(result.dropped, 1);
        assert!(ctx.store().get(&id).is_none());
        assert!(ctx.queue().is_empty());
    }

    #[test]
    fn delete_resolves_locally() {
        let (ctx, remote, engine) = setup();
        ctx.queue()
            .enqueue(&EntityId::new("srv-1"), OperationKind::Delete)
            .unwrap();

        let result = engine.run_pass();
        assert!(result.is_success());
        assert_eq!(remote.call_count(), 0);
        assert!(ctx.queue().is_empty());
    }

    #[test]
    fn edit_during_create_is_preserved() {
        let (ctx, remote, engine) = setup();
        let temp = create_local(&ctx, "Hades");

        let hook_ctx = Arc::clone(&ctx);
        let hook_id = temp.clone();
        remote.on_call(move |call| {
            if matches!(call, RemoteCall::Create) {
                hook_ctx
                    .write(|txn| {
                        let mut entity = txn.entity(&hook_id).cloned().unwrap();
                        entity.set_field("price", 99);
                        txn.put_entity(entity);
                        Ok(())
                    })
                    .unwrap();
            }
        });

        let result = engine.run_pass();
        assert_eq!(result.synced, 1);

        let entity = &ctx.store().list(&Default::default())[0];
        assert!(!entity.id.is_temporary());
        assert_eq!(entity.version, 1);
        assert!(entity.needs_sync);
        assert_eq!(entity.field("price"), Some(&99.into()));

        let queued = ctx.queue().all_ordered();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].kind, OperationKind::Update);
        assert_eq!(queued[0].entity_id, entity.id);
    }

    #[test]
    fn concurrent_pass_is_coalesced() {
        let (ctx, remote, engine) = setup();
        create_local(&ctx, "Celeste");
        engine.running.store(true, Ordering::Release);

        assert_eq!(engine.run_pass().outcome, PassOutcome::Coalesced);
        assert_eq!(remote.call_count(), 0);

        engine.running.store(false, Ordering::Release);
        assert_eq!(engine.run_pass().outcome, PassOutcome::Succeeded);
        assert!(!engine.is_running());
    }

    #[test]
    fn cancel_mid_pass_stops_between_operations() {
        let ctx = Arc::new(Context::open_in_memory().unwrap());
        ctx.set_credential(TOKEN);
        let remote = Arc::new(MemoryRemote::new());
        let engine = Arc::new(SyncEngine::new(Arc::clone(&ctx), Arc::clone(&remote)));
        let first = create_local(&ctx, "Tetris");
        let second = create_local(&ctx, "Lumines");

        let hook_engine = Arc::downgrade(&engine);
        remote.on_call(move |call| {
            if *call == RemoteCall::Create {
                if let Some(engine) = hook_engine.upgrade() {
                    engine.cancel();
                }
            }
        });

        let result = engine.run_pass();
        assert_eq!(result.outcome, PassOutcome::Cancelled);
        assert_eq!(result.synced, 1);
        assert!(!result.is_success());
        assert_eq!(engine.status(), SyncStatus::Idle);
        assert_eq!(remote.call_count(), 1);

        // The first create is fully applied, the second untouched.
        assert!(ctx.store().get(&first).is_none());
        let synced = ctx.store().get(&EntityId::new("srv-1")).unwrap();
        assert!(!synced.needs_sync);
        assert_eq!(synced.version, 1);
        assert!(ctx.store().get(&second).unwrap().needs_sync);
        let queued = ctx.queue().all_ordered();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].entity_id, second);
        assert!(engine.check_cancelled().is_ok());
    }

    #[test]
    fn cancel_before_pass_holds_until_cleared() {
        let (ctx, remote, engine) = setup();
        create_local(&ctx, "Tetris");

        engine.cancel();
        assert_eq!(engine.run_pass().outcome, PassOutcome::Cancelled);
        assert_eq!(remote.call_count(), 0);
        assert_eq!(ctx.queue().len(), 1);

        engine.cancel();
        engine.clear_cancel();
        assert_eq!(engine.run_pass().outcome, PassOutcome::Succeeded);
        assert!(ctx.queue().is_empty());
    }

    #[test]
    fn status_transitions_are_observable() {
        let (ctx, _remote, engine) = setup();
        let mut status = engine.subscribe_status();
        create_local(&ctx, "Braid");

        engine.run_pass();
        assert!(status.has_changed().unwrap());
        assert_eq!(*status.borrow_and_update(), SyncStatus::Succeeded);
    }
}
