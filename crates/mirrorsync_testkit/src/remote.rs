//! In-memory server double.

use crate::push::MemoryPushConnector;
use mirrorsync_protocol::{
    Entity, EntityId, ListQuery, Page, RemoteApi, RemoteError, RemoteResult,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// One call received by a [`MemoryRemote`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    /// `create`.
    Create,
    /// `update` with its target and base version.
    Update {
        /// Target id.
        id: EntityId,
        /// Base version sent by the client.
        base_version: u64,
    },
    /// `read`.
    Read {
        /// Target id.
        id: EntityId,
    },
    /// `list`.
    List {
        /// Items skipped.
        skip: u64,
    },
}

type CallHook = Arc<dyn Fn(&RemoteCall) + Send + Sync>;

#[derive(Default)]
struct ServerState {
    entities: BTreeMap<EntityId, Entity>,
    next_id: u64,
    calls: Vec<RemoteCall>,
    failures: VecDeque<RemoteError>,
    offline: bool,
}

impl ServerState {
    fn assign_id(&mut self) -> EntityId {
        self.next_id += 1;
        EntityId::new(format!("srv-{}", self.next_id))
    }
}

/// An in-memory implementation of the server's REST surface.
///
/// The bearer token doubles as the user id: entities created with token
/// `u1` are owned by `u1`, and other tokens get `Forbidden` on them.
/// Versions start at 1 and bump on every accepted update; an update whose
/// base version differs from the stored one gets `Conflict`.
#[derive(Default)]
pub struct MemoryRemote {
    state: Mutex<ServerState>,
    push: Option<MemoryPushConnector>,
    hook: Mutex<Option<CallHook>>,
}

impl MemoryRemote {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty server that broadcasts changes through `push`.
    pub fn with_push(push: MemoryPushConnector) -> Self {
        Self {
            push: Some(push),
            ..Self::default()
        }
    }

    /// Stores an entity directly, as if another client had created it.
    ///
    /// A temporary id is replaced by a server id and version 0 becomes 1.
    pub fn seed(&self, entity: Entity) -> Entity {
        let mut state = self.state.lock();
        let mut stored = entity;
        if stored.id.is_temporary() {
            stored.id = state.assign_id();
        }
        stored.version = stored.version.max(1);
        stored.needs_sync = false;
        state.entities.insert(stored.id.clone(), stored.clone());
        stored
    }

    /// Edits an entity as `token`, bumping its version and broadcasting
    /// the change. Returns the new copy, or `None` if it does not exist.
    pub fn edit_as(
        &self,
        token: &str,
        id: &EntityId,
        edit: impl FnOnce(&mut Entity),
    ) -> Option<Entity> {
        let updated = {
            let mut state = self.state.lock();
            let entity = state.entities.get_mut(id)?;
            edit(entity);
            entity.version += 1;
            entity.owner.get_or_insert_with(|| token.to_string());
            entity.clone()
        };
        self.broadcast(&updated, "updated");
        Some(updated)
    }

    /// Removes an entity on the server and broadcasts the deletion.
    pub fn remove(&self, id: &EntityId) -> bool {
        let removed = self.state.lock().entities.remove(id);
        match removed {
            Some(entity) => {
                if let (Some(push), Some(owner)) = (&self.push, &entity.owner) {
                    let frame = json!({"type": "deleted", "payload": {"id": id.as_str()}});
                    push.broadcast(owner, &frame.to_string());
                }
                true
            }
            None => false,
        }
    }

    /// Returns the stored copy of an entity.
    pub fn entity(&self, id: &EntityId) -> Option<Entity> {
        self.state.lock().entities.get(id).cloned()
    }

    /// Returns every stored entity.
    pub fn entities(&self) -> Vec<Entity> {
        self.state.lock().entities.values().cloned().collect()
    }

    /// Returns the calls received so far.
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.state.lock().calls.clone()
    }

    /// Returns the number of calls received so far.
    pub fn call_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Forgets the call log.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Makes the next call fail with `error`. Queued failures are consumed
    /// in order.
    pub fn fail_next(&self, error: RemoteError) {
        self.state.lock().failures.push_back(error);
    }

    /// Makes every call fail with a network error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Runs `hook` at the start of every call, before the server acts.
    ///
    /// The hook runs without the server lock held, so it may touch the
    /// client's store to simulate edits racing an in-flight request.
    pub fn on_call(&self, hook: impl Fn(&RemoteCall) + Send + Sync + 'static) {
        *self.hook.lock() = Some(Arc::new(hook));
    }

    fn begin(&self, call: RemoteCall) -> RemoteResult<()> {
        let injected = {
            let mut state = self.state.lock();
            state.calls.push(call.clone());
            if state.offline {
                Some(RemoteError::Network("server unreachable".into()))
            } else {
                state.failures.pop_front()
            }
        };
        let hook = self.hook.lock().clone();
        if let Some(hook) = hook {
            hook(&call);
        }
        match injected {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn broadcast(&self, entity: &Entity, kind: &str) {
        if let (Some(push), Some(owner)) = (&self.push, &entity.owner) {
            let frame = json!({"type": kind, "payload": entity.to_wire()});
            push.broadcast(owner, &frame.to_string());
        }
    }
}

fn check_token(token: &str) -> RemoteResult<()> {
    if token.is_empty() {
        Err(RemoteError::Unauthorized)
    } else {
        Ok(())
    }
}

fn check_owner(entity: &Entity, token: &str) -> RemoteResult<()> {
    match &entity.owner {
        Some(owner) if owner != token => Err(RemoteError::Forbidden),
        _ => Ok(()),
    }
}

impl RemoteApi for MemoryRemote {
    fn create(&self, token: &str, entity: &Entity) -> RemoteResult<Entity> {
        self.begin(RemoteCall::Create)?;
        check_token(token)?;

        let created = {
            let mut state = self.state.lock();
            let created = Entity {
                id: state.assign_id(),
                version: 1,
                owner: Some(token.to_string()),
                fields: entity.fields.clone(),
                needs_sync: false,
            };
            state.entities.insert(created.id.clone(), created.clone());
            created
        };
        self.broadcast(&created, "created");
        Ok(created)
    }

    fn update(
        &self,
        token: &str,
        id: &EntityId,
        entity: &Entity,
        base_version: u64,
    ) -> RemoteResult<Entity> {
        self.begin(RemoteCall::Update {
            id: id.clone(),
            base_version,
        })?;
        check_token(token)?;

        let updated = {
            let mut state = self.state.lock();
            let stored = state.entities.get_mut(id).ok_or(RemoteError::NotFound)?;
            check_owner(stored, token)?;
            if stored.version != base_version {
                return Err(RemoteError::Conflict {
                    message: format!(
                        "version {base_version} does not match existing version {}",
                        stored.version
                    ),
                });
            }
            stored.fields = entity.fields.clone();
            stored.version += 1;
            stored.clone()
        };
        self.broadcast(&updated, "updated");
        Ok(updated)
    }

    fn read(&self, token: &str, id: &EntityId) -> RemoteResult<Entity> {
        self.begin(RemoteCall::Read { id: id.clone() })?;
        check_token(token)?;

        let state = self.state.lock();
        let stored = state.entities.get(id).ok_or(RemoteError::NotFound)?;
        check_owner(stored, token)?;
        Ok(stored.clone())
    }

    fn list(&self, token: &str, query: &ListQuery) -> RemoteResult<Page> {
        self.begin(RemoteCall::List { skip: query.skip })?;
        check_token(token)?;

        let state = self.state.lock();
        let needle = query.q.as_ref().map(|q| q.to_lowercase());
        let matching: Vec<&Entity> = state
            .entities
            .values()
            .filter(|e| e.owner.as_deref() == Some(token))
            .filter(|e| match &needle {
                Some(needle) => e.fields.values().any(|v| match v {
                    Value::String(s) => s.to_lowercase().contains(needle.as_str()),
                    _ => false,
                }),
                None => true,
            })
            .collect();

        let total = matching.len() as u64;
        let skip = usize::try_from(query.skip).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .and_then(|l| usize::try_from(l).ok())
            .unwrap_or(usize::MAX);
        let items = matching.into_iter().skip(skip).take(limit).cloned().collect();
        Ok(Page { items, total })
    }
}
