//! Context fixtures and entity builders.

use mirrorsync_core::{Config, Context};
use mirrorsync_protocol::{Entity, EntityId, OperationKind};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// A context with automatic cleanup.
pub struct TestContext {
    /// The context.
    pub ctx: Arc<Context>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestContext {
    /// Creates an in-memory context.
    pub fn memory() -> Self {
        Self {
            ctx: Arc::new(Context::open_in_memory().expect("Failed to open in-memory context")),
            temp_dir: None,
        }
    }

    /// Creates a file-backed context in a fresh temporary directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ctx = Context::open(&temp_dir.path().join("store"))
            .expect("Failed to open file context");
        Self {
            ctx: Arc::new(ctx),
            temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-backed.
    pub fn path(&self) -> Option<PathBuf> {
        self.temp_dir.as_ref().map(|d| d.path().join("store"))
    }

    /// Closes the context and opens it again from disk.
    ///
    /// # Panics
    ///
    /// Panics for in-memory contexts or if another handle to the context
    /// is still alive.
    pub fn reopen(self) -> Self {
        let path = self.path().expect("Only file contexts can be reopened");
        let Self { ctx, temp_dir } = self;
        drop(Arc::try_unwrap(ctx).ok().expect("Context is still shared"));
        Self {
            ctx: Arc::new(Context::open(&path).expect("Failed to reopen context")),
            temp_dir,
        }
    }

    /// Reopens with a custom configuration.
    pub fn reopen_with_config(self, config: Config) -> Self {
        let path = self.path().expect("Only file contexts can be reopened");
        let Self { ctx, temp_dir } = self;
        drop(Arc::try_unwrap(ctx).ok().expect("Context is still shared"));
        Self {
            ctx: Arc::new(
                Context::open_with_config(&path, config).expect("Failed to reopen context"),
            ),
            temp_dir,
        }
    }
}

impl std::ops::Deref for TestContext {
    type Target = Context;

    fn deref(&self) -> &Self::Target {
        &self.ctx
    }
}

/// Builds an unsynced game with a temporary id.
pub fn game(name: &str, price: i64) -> Entity {
    let mut fields = Map::new();
    fields.insert("name".into(), Value::from(name));
    fields.insert("price".into(), Value::from(price));
    fields.insert("launchDate".into(), Value::from("2024-01-01"));
    fields.insert("isCracked".into(), Value::from(false));
    Entity::new_local(fields)
}

/// Builds a synced game as the server would return it.
pub fn synced_game(id: &str, version: u64, owner: &str, name: &str, price: i64) -> Entity {
    let mut entity = game(name, price);
    entity.id = EntityId::new(id);
    entity.version = version;
    entity.owner = Some(owner.to_string());
    entity.needs_sync = false;
    entity
}

/// Writes an entity and queues a CREATE for it, as an offline create does.
pub fn create_offline(ctx: &Context, entity: Entity) -> EntityId {
    let id = entity.id.clone();
    ctx.write(|txn| {
        txn.put_entity(entity);
        txn.enqueue(&id, OperationKind::Create);
        Ok(())
    })
    .expect("Failed to write offline create");
    id
}

/// Applies `edit` to a local entity, marks it dirty and queues an UPDATE.
pub fn edit_offline(ctx: &Context, id: &EntityId, edit: impl FnOnce(&mut Entity)) {
    ctx.write(|txn| {
        let mut entity = txn.entity(id).cloned().expect("Entity to edit must exist");
        edit(&mut entity);
        entity.needs_sync = true;
        txn.put_entity(entity);
        txn.enqueue(id, OperationKind::Update);
        Ok(())
    })
    .expect("Failed to write offline edit");
}
