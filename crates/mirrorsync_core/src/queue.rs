//! Durable pending-operation queue.

use crate::context::Context;
use crate::error::CoreResult;
use mirrorsync_protocol::{EntityId, OperationKind, PendingOperation};

/// FIFO queue of local mutations awaiting the server.
///
/// Enqueued operations are durable once `enqueue` returns (with
/// `sync_on_commit`). A queued UPDATE absorbs later UPDATEs for the same
/// entity; see [`WriteTxn::enqueue`](crate::WriteTxn::enqueue).
#[derive(Clone, Copy)]
pub struct PendingOperationQueue<'a> {
    ctx: &'a Context,
}

impl<'a> PendingOperationQueue<'a> {
    pub(crate) fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Queues an operation and returns it.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal write fails.
    pub fn enqueue(&self, entity_id: &EntityId, kind: OperationKind) -> CoreResult<PendingOperation> {
        self.ctx.write(|txn| Ok(txn.enqueue(entity_id, kind)))
    }

    /// Returns every operation in enqueue order.
    #[must_use]
    pub fn all_ordered(&self) -> Vec<PendingOperation> {
        self.ctx.read(|state| state.ordered_operations())
    }

    /// Returns one operation by id.
    #[must_use]
    pub fn get(&self, op_id: u64) -> Option<PendingOperation> {
        self.ctx.read(|state| state.operations.get(&op_id).cloned())
    }

    /// Returns the operations targeting one entity, in enqueue order.
    #[must_use]
    pub fn for_entity(&self, entity_id: &EntityId) -> Vec<PendingOperation> {
        self.all_ordered()
            .into_iter()
            .filter(|op| &op.entity_id == entity_id)
            .collect()
    }

    /// Removes one operation. Returns false if it was not queued.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal write fails.
    pub fn remove(&self, op_id: u64) -> CoreResult<bool> {
        self.ctx.write(|txn| Ok(txn.remove_operation(op_id)))
    }

    /// Removes every operation targeting an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal write fails.
    pub fn remove_by_entity(&self, entity_id: &EntityId) -> CoreResult<usize> {
        self.ctx.write(|txn| Ok(txn.remove_operations_for(entity_id)))
    }

    /// Removes every operation.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal write fails.
    pub fn clear(&self) -> CoreResult<usize> {
        self.ctx.write(|txn| {
            let ids: Vec<u64> = txn.operations().iter().map(|op| op.id).collect();
            for id in &ids {
                txn.remove_operation(*id);
            }
            Ok(ids.len())
        })
    }

    /// Returns the number of queued operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ctx.read(|state| state.operations.len())
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
