//! In-memory image of the mirror, rebuilt from the journal.

use crate::change_feed::ChangeEvent;
use crate::journal::{Batch, Counters, Mutation};
use mirrorsync_protocol::{Entity, EntityId, PendingOperation};
use std::collections::{BTreeMap, HashMap};

/// Committed state of a context.
#[derive(Debug, Default)]
pub(crate) struct MirrorState {
    pub(crate) entities: BTreeMap<EntityId, Entity>,
    pub(crate) operations: BTreeMap<u64, PendingOperation>,
    pub(crate) counters: Counters,
    pub(crate) sequence: u64,
    /// Local write revision per entity row; not persisted.
    revisions: HashMap<EntityId, u64>,
    revision_clock: u64,
}

impl MirrorState {
    /// Applies a committed batch and returns the entity change events.
    pub(crate) fn apply(&mut self, batch: &Batch) -> Vec<ChangeEvent> {
        let mut events = Vec::new();
        for mutation in &batch.mutations {
            match mutation {
                Mutation::PutEntity(entity) => {
                    self.revision_clock += 1;
                    self.revisions.insert(entity.id.clone(), self.revision_clock);
                    self.entities.insert(entity.id.clone(), entity.clone());
                    events.push(ChangeEvent::upserted(batch.sequence, entity.clone()));
                }
                Mutation::DeleteEntity(id) => {
                    self.revisions.remove(id);
                    if self.entities.remove(id).is_some() {
                        events.push(ChangeEvent::deleted(batch.sequence, id.clone()));
                    }
                }
                Mutation::PutOperation(op) => {
                    self.operations.insert(op.id, op.clone());
                }
                Mutation::RemoveOperation(op_id) => {
                    self.operations.remove(op_id);
                }
            }
        }

        self.sequence = self.sequence.max(batch.sequence);
        self.counters.next_operation_id = self
            .counters
            .next_operation_id
            .max(batch.counters.next_operation_id);
        self.counters.next_sequence = self
            .counters
            .next_sequence
            .max(batch.counters.next_sequence);
        events
    }

    /// Returns the revision of an entity row.
    pub(crate) fn revision(&self, id: &EntityId) -> Option<u64> {
        self.revisions.get(id).copied()
    }

    /// Operations in FIFO order.
    pub(crate) fn ordered_operations(&self) -> Vec<PendingOperation> {
        let mut ops: Vec<_> = self.operations.values().cloned().collect();
        ops.sort_by_key(|op| (op.sequence, op.id));
        ops
    }

    /// Encodes the full state as one batch.
    pub(crate) fn snapshot(&self) -> Batch {
        let mutations = self
            .entities
            .values()
            .cloned()
            .map(Mutation::PutEntity)
            .chain(self.operations.values().cloned().map(Mutation::PutOperation))
            .collect();
        Batch {
            sequence: self.sequence,
            counters: self.counters,
            mutations,
        }
    }
}
