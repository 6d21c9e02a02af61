//! Application-facing facade over a context.

use crate::connectivity::ConnectivityMonitor;
use crate::error::{SyncError, SyncResult};
use crate::scheduler::Scheduler;
use mirrorsync_core::{ChangeEvent, Context, CoreError, EntityFilter};
use mirrorsync_protocol::{Entity, EntityId, ListQuery, OperationKind, RemoteApi};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::mpsc::Receiver;
use std::sync::Arc;
use tracing::{debug, info};

/// Default page size for [`Repository::refresh`].
pub const DEFAULT_PAGE_SIZE: u64 = 50;

/// Result of a refresh from the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    /// Entities received.
    pub fetched: u64,
    /// Local rows written.
    pub stored: u64,
    /// Local rows removed because the server no longer lists them.
    pub removed: u64,
    /// Whether local edits forced insert-only mode.
    pub preserved_local: bool,
}

/// Optimistic local mutations plus server refresh.
///
/// Every mutation writes the store and queues its operation in one
/// atomic write, then nudges the attached scheduler if the network is up.
pub struct Repository {
    ctx: Arc<Context>,
    scheduler: Option<Arc<dyn Scheduler>>,
    connectivity: Option<Arc<ConnectivityMonitor>>,
}

impl Repository {
    /// Creates a repository over a context.
    pub fn new(ctx: Arc<Context>) -> Self {
        Self {
            ctx,
            scheduler: None,
            connectivity: None,
        }
    }

    /// Attaches a scheduler to nudge after mutations.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Attaches the monitor consulted before nudging the scheduler.
    #[must_use]
    pub fn with_connectivity(mut self, monitor: Arc<ConnectivityMonitor>) -> Self {
        self.connectivity = Some(monitor);
        self
    }

    /// Returns the context.
    pub fn context(&self) -> &Arc<Context> {
        &self.ctx
    }

    /// Creates an entity locally under a temporary id and queues a CREATE.
    ///
    /// The owner stays unset; the server assigns it and the create result
    /// brings it back.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn create(&self, fields: Map<String, Value>) -> SyncResult<Entity> {
        let entity = Entity::new_local(fields);
        let created = entity.clone();
        self.ctx.write(|txn| {
            txn.put_entity(entity);
            txn.enqueue(&created.id, OperationKind::Create);
            Ok(())
        })?;
        debug!(entity = %created.id, "entity created locally");
        self.nudge();
        Ok(created)
    }

    /// Stores an edit locally and queues an UPDATE.
    ///
    /// Only the fields of `entity` are taken; id, version and owner stay
    /// those of the stored row. An entity still waiting for its CREATE
    /// needs no UPDATE: the CREATE sends its current fields.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::EntityNotFound`] if the entity does not exist
    /// locally, or an error if the write fails.
    pub fn update(&self, entity: Entity) -> SyncResult<Entity> {
        let updated = self.ctx.write(|txn| {
            let Some(stored) = txn.entity(&entity.id).cloned() else {
                return Err(CoreError::EntityNotFound(entity.id.clone()));
            };
            let updated = Entity {
                fields: entity.fields,
                needs_sync: true,
                ..stored
            };
            txn.put_entity(updated.clone());
            let create_pending = txn
                .operations_for(&updated.id)
                .iter()
                .any(|op| op.kind == OperationKind::Create);
            if !create_pending {
                txn.enqueue(&updated.id, OperationKind::Update);
            }
            Ok(updated)
        })?;
        debug!(entity = %updated.id, "entity edited locally");
        self.nudge();
        Ok(updated)
    }

    /// Removes an entity locally.
    ///
    /// If the entity never reached the server its queued operations are
    /// discarded; otherwise a DELETE is queued. Returns false if the
    /// entity did not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn delete(&self, id: &EntityId) -> SyncResult<bool> {
        let removed = self.ctx.write(|txn| {
            if !txn.delete_entity(id) {
                return Ok(false);
            }
            if id.is_temporary() {
                txn.remove_operations_for(id);
            } else {
                txn.enqueue(id, OperationKind::Delete);
            }
            Ok(true)
        })?;
        if removed {
            debug!(entity = %id, "entity deleted locally");
            self.nudge();
        }
        Ok(removed)
    }

    /// Returns an entity.
    pub fn get(&self, id: &EntityId) -> Option<Entity> {
        self.ctx.store().get(id)
    }

    /// Lists entities matching `filter`.
    pub fn list(&self, filter: &EntityFilter) -> Vec<Entity> {
        self.ctx.store().list(filter)
    }

    /// Subscribes to store changes.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        self.ctx.subscribe()
    }

    /// Pulls the caller's entities from the server.
    ///
    /// With operations queued, only entities missing locally are
    /// inserted so unsynced edits survive. With an empty queue the local
    /// mirror is replaced by the server's set.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotAuthenticated`] without a credential, a
    /// remote error if any page fails (nothing is written then), or a
    /// store error.
    pub fn refresh<R: RemoteApi + ?Sized>(
        &self,
        remote: &R,
        page_size: u64,
    ) -> SyncResult<RefreshSummary> {
        let token = self.ctx.credential().ok_or(SyncError::NotAuthenticated)?;
        let page_size = page_size.max(1);

        let mut fetched = Vec::new();
        let mut skip = 0;
        loop {
            let page = remote.list(&token, &ListQuery::page(skip, page_size))?;
            let received = page.items.len() as u64;
            fetched.extend(page.items);
            skip += received;
            if received == 0 || skip >= page.total {
                break;
            }
        }

        let summary = self.ctx.write(|txn| {
            // Decided under the write lock so a create committed while the
            // list was in flight is never swept away.
            let preserve_local = !txn.operations().is_empty();
            let mut summary = RefreshSummary {
                fetched: fetched.len() as u64,
                preserved_local: preserve_local,
                ..RefreshSummary::default()
            };
            let server_ids: BTreeSet<EntityId> = fetched.iter().map(|e| e.id.clone()).collect();

            if !preserve_local {
                for local in txn.entities() {
                    if !server_ids.contains(&local.id) && txn.delete_entity(&local.id) {
                        summary.removed += 1;
                    }
                }
            }
            for mut entity in fetched {
                if let Some(existing) = txn.entity(&entity.id) {
                    if preserve_local {
                        continue;
                    }
                    // A live event may have merged a newer copy meanwhile.
                    if !existing.needs_sync && existing.version > entity.version {
                        continue;
                    }
                }
                entity.needs_sync = false;
                txn.put_entity(entity);
                summary.stored += 1;
            }
            Ok(summary)
        })?;

        info!(
            fetched = summary.fetched,
            stored = summary.stored,
            removed = summary.removed,
            preserved_local = summary.preserved_local,
            "refreshed from server"
        );
        Ok(summary)
    }

    /// Drops every queued operation and marks every entity clean.
    ///
    /// Returns the number of operations dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    pub fn clear_pending(&self) -> SyncResult<usize> {
        let dropped = self.ctx.write(|txn| {
            let ops = txn.operations();
            for op in &ops {
                txn.remove_operation(op.id);
            }
            for mut entity in txn.entities() {
                if entity.needs_sync {
                    entity.needs_sync = false;
                    txn.put_entity(entity);
                }
            }
            Ok(ops.len())
        })?;
        info!(dropped, "pending operations cleared");
        Ok(dropped)
    }

    fn nudge(&self) {
        let Some(scheduler) = &self.scheduler else {
            return;
        };
        let online = self
            .connectivity
            .as_ref()
            .map_or(true, |monitor| monitor.is_online());
        if online {
            scheduler.trigger_now();
        }
    }
}
