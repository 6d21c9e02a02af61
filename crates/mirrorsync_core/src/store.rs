//! Local entity store.

use crate::change_feed::ChangeEvent;
use crate::context::Context;
use crate::error::{CoreError, CoreResult};
use crate::filter::EntityFilter;
use mirrorsync_protocol::{Entity, EntityId};
use std::sync::mpsc::Receiver;

/// Durable, observable mirror of server entities.
///
/// A thin view over a [`Context`]; every mutation is one journal batch.
/// Multi-step changes that must be atomic with queue updates go through
/// [`Context::write`] instead.
#[derive(Clone, Copy)]
pub struct LocalStore<'a> {
    ctx: &'a Context,
}

impl<'a> LocalStore<'a> {
    pub(crate) fn new(ctx: &'a Context) -> Self {
        Self { ctx }
    }

    /// Returns an entity.
    #[must_use]
    pub fn get(&self, id: &EntityId) -> Option<Entity> {
        self.ctx.read(|state| state.entities.get(id).cloned())
    }

    /// Returns an entity together with its local revision.
    ///
    /// The revision changes on every committed write of the row.
    #[must_use]
    pub fn get_with_revision(&self, id: &EntityId) -> Option<(Entity, u64)> {
        self.ctx.read(|state| {
            let entity = state.entities.get(id)?.clone();
            let revision = state.revision(id)?;
            Some((entity, revision))
        })
    }

    /// Lists entities matching `filter`, ordered by id.
    #[must_use]
    pub fn list(&self, filter: &EntityFilter) -> Vec<Entity> {
        self.ctx.read(|state| {
            state
                .entities
                .values()
                .filter(|e| filter.matches(e))
                .cloned()
                .collect()
        })
    }

    /// Returns the number of entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ctx.read(|state| state.entities.len())
    }

    /// Returns true if the store holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Inserts or replaces an entity.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal write fails.
    pub fn upsert(&self, entity: Entity) -> CoreResult<()> {
        self.ctx.write(|txn| {
            txn.put_entity(entity);
            Ok(())
        })
    }

    /// Removes an entity. Returns false if it did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal write fails.
    pub fn delete(&self, id: &EntityId) -> CoreResult<bool> {
        self.ctx.write(|txn| Ok(txn.delete_entity(id)))
    }

    /// Replaces the row `id` with the server copy and clears `needs_sync`.
    ///
    /// The server copy may carry a different id (a temporary id being
    /// replaced); the old row is removed in the same batch.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal write fails.
    pub fn mark_synced(&self, id: &EntityId, server: Entity) -> CoreResult<()> {
        self.ctx.write(|txn| {
            if &server.id != id {
                txn.delete_entity(id);
            }
            txn.put_entity(Entity {
                needs_sync: false,
                ..server
            });
            Ok(())
        })
    }

    /// Flags an entity as carrying unsynced local edits.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EntityNotFound`] if the entity does not exist.
    pub fn mark_needs_sync(&self, id: &EntityId) -> CoreResult<()> {
        self.ctx.write(|txn| {
            let mut entity = txn
                .entity(id)
                .cloned()
                .ok_or_else(|| CoreError::EntityNotFound(id.clone()))?;
            if !entity.needs_sync {
                entity.needs_sync = true;
                txn.put_entity(entity);
            }
            Ok(())
        })
    }

    /// Subscribes to committed entity changes.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.ctx.subscribe()
    }
}
