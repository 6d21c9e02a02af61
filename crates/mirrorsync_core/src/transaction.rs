//! Write transactions.

use crate::journal::{Batch, Counters, Mutation};
use crate::state::MirrorState;
use mirrorsync_protocol::{Entity, EntityId, OperationKind, PendingOperation};
use std::collections::HashMap;

/// A staged set of mutations against the mirror.
///
/// Obtained through [`Context::write`](crate::Context::write). Reads see the
/// committed state overlaid with this transaction's own writes. Nothing is
/// visible to other readers until the closure returns `Ok` and the batch
/// is durable in the journal.
pub struct WriteTxn<'a> {
    base: &'a MirrorState,
    entities: HashMap<EntityId, Option<Entity>>,
    operations: HashMap<u64, Option<PendingOperation>>,
    counters: Counters,
    mutations: Vec<Mutation>,
    now_millis: u64,
}

impl<'a> WriteTxn<'a> {
    pub(crate) fn new(base: &'a MirrorState, now_millis: u64) -> Self {
        Self {
            base,
            entities: HashMap::new(),
            operations: HashMap::new(),
            counters: base.counters,
            mutations: Vec::new(),
            now_millis,
        }
    }

    /// Converts the staged writes into a batch, or `None` if nothing changed.
    pub(crate) fn into_batch(self) -> Option<Batch> {
        if self.mutations.is_empty() {
            return None;
        }
        Some(Batch {
            sequence: self.base.sequence + 1,
            counters: self.counters,
            mutations: self.mutations,
        })
    }

    /// Returns an entity row.
    #[must_use]
    pub fn entity(&self, id: &EntityId) -> Option<&Entity> {
        match self.entities.get(id) {
            Some(staged) => staged.as_ref(),
            None => self.base.entities.get(id),
        }
    }

    /// Returns the committed revision of an entity row.
    ///
    /// The revision changes on every committed write of the row, so a
    /// caller can tell whether a row was touched since it was read.
    #[must_use]
    pub fn committed_revision(&self, id: &EntityId) -> Option<u64> {
        self.base.revision(id)
    }

    /// Returns every entity row.
    #[must_use]
    pub fn entities(&self) -> Vec<Entity> {
        let mut rows: Vec<Entity> = self
            .base
            .entities
            .values()
            .filter(|e| !self.entities.contains_key(&e.id))
            .cloned()
            .collect();
        rows.extend(self.entities.values().flatten().cloned());
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    /// Inserts or replaces an entity row.
    pub fn put_entity(&mut self, entity: Entity) {
        self.entities.insert(entity.id.clone(), Some(entity.clone()));
        self.mutations.push(Mutation::PutEntity(entity));
    }

    /// Removes an entity row. Returns false if it did not exist.
    pub fn delete_entity(&mut self, id: &EntityId) -> bool {
        if self.entity(id).is_none() {
            return false;
        }
        self.entities.insert(id.clone(), None);
        self.mutations.push(Mutation::DeleteEntity(id.clone()));
        true
    }

    /// Returns a queued operation.
    #[must_use]
    pub fn operation(&self, op_id: u64) -> Option<&PendingOperation> {
        match self.operations.get(&op_id) {
            Some(staged) => staged.as_ref(),
            None => self.base.operations.get(&op_id),
        }
    }

    /// Returns every queued operation in FIFO order.
    #[must_use]
    pub fn operations(&self) -> Vec<PendingOperation> {
        let mut ops: Vec<PendingOperation> = self
            .base
            .operations
            .values()
            .filter(|op| !self.operations.contains_key(&op.id))
            .cloned()
            .collect();
        ops.extend(self.operations.values().flatten().cloned());
        ops.sort_by_key(|op| (op.sequence, op.id));
        ops
    }

    /// Returns the queued operations targeting one entity, in FIFO order.
    #[must_use]
    pub fn operations_for(&self, entity_id: &EntityId) -> Vec<PendingOperation> {
        self.operations()
            .into_iter()
            .filter(|op| &op.entity_id == entity_id)
            .collect()
    }

    /// Queues an operation.
    ///
    /// An UPDATE for an entity that already has a queued UPDATE replaces
    /// it in place: the slot keeps its id and sequence and only the
    /// timestamp moves forward.
    pub fn enqueue(&mut self, entity_id: &EntityId, kind: OperationKind) -> PendingOperation {
        if kind == OperationKind::Update {
            let existing = self
                .operations_for(entity_id)
                .into_iter()
                .find(|op| op.kind == OperationKind::Update);
            if let Some(mut op) = existing {
                op.enqueued_at = self.now_millis;
                self.put_operation(op.clone());
                return op;
            }
        }

        let op = PendingOperation {
            id: self.counters.next_operation_id.max(1),
            entity_id: entity_id.clone(),
            kind,
            sequence: self.counters.next_sequence.max(1),
            enqueued_at: self.now_millis,
        };
        self.counters.next_operation_id = op.id + 1;
        self.counters.next_sequence = op.sequence + 1;
        self.put_operation(op.clone());
        op
    }

    fn put_operation(&mut self, op: PendingOperation) {
        self.operations.insert(op.id, Some(op.clone()));
        self.mutations.push(Mutation::PutOperation(op));
    }

    /// Removes a queued operation. Returns false if it did not exist.
    pub fn remove_operation(&mut self, op_id: u64) -> bool {
        if self.operation(op_id).is_none() {
            return false;
        }
        self.operations.insert(op_id, None);
        self.mutations.push(Mutation::RemoveOperation(op_id));
        true
    }

    /// Removes every queued operation targeting an entity.
    pub fn remove_operations_for(&mut self, entity_id: &EntityId) -> usize {
        let ids: Vec<u64> = self
            .operations_for(entity_id)
            .iter()
            .map(|op| op.id)
            .collect();
        for id in &ids {
            self.remove_operation(*id);
        }
        ids.len()
    }

    /// Points every queued operation for `from` at `to`, keeping ids and
    /// sequences.
    pub fn retarget_operations(&mut self, from: &EntityId, to: &EntityId) -> usize {
        let ops = self.operations_for(from);
        let count = ops.len();
        for mut op in ops {
            op.entity_id = to.clone();
            self.put_operation(op);
        }
        count
    }

    /// Returns the number of staged mutations.
    #[must_use]
    pub fn staged(&self) -> usize {
        self.mutations.len()
    }
}
