//! Push channel messages.
//!
//! Frames are JSON text of the form `{"type": ..., "payload": ...}`. The
//! server sends `created`, `updated` and `deleted` events; the client sends
//! exactly one `authorization` frame after connecting.

use crate::entity::{Entity, EntityId};
use crate::error::{ProtocolError, ProtocolResult};
use serde_json::{json, Value};
use std::fmt;

/// Keys under which some servers nest the entity inside `payload`.
const ENVELOPE_KEYS: [&str; 2] = ["entity", "game"];

/// Builds the authorization frame sent right after a push connection opens.
#[must_use]
pub fn authorization_frame(token: &str) -> String {
    json!({
        "type": "authorization",
        "payload": { "token": token },
    })
    .to_string()
}

/// The type tag of a [`LiveEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveEventKind {
    /// An entity was created on the server.
    Created,
    /// An entity was updated on the server.
    Updated,
    /// An entity was deleted on the server.
    Deleted,
}

impl LiveEventKind {
    fn parse(tag: &str) -> ProtocolResult<Self> {
        match tag {
            "created" => Ok(Self::Created),
            "updated" => Ok(Self::Updated),
            "deleted" => Ok(Self::Deleted),
            other => Err(ProtocolError::UnknownEventType(other.to_string())),
        }
    }
}

impl fmt::Display for LiveEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        })
    }
}

/// A server-originated change received over the push channel.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// A new entity.
    Created(Entity),
    /// A new version of an existing entity.
    Updated(Entity),
    /// An entity removed on the server.
    Deleted(EntityId),
}

impl LiveEvent {
    /// Parses one text frame.
    ///
    /// The payload may be the entity itself or wrap it under an `entity`
    /// key. Delete payloads only need an `id` (or `_id`).
    ///
    /// # Errors
    ///
    /// Returns an error for invalid JSON, a missing `type` or `payload`,
    /// an unknown type, or an entity without an id.
    pub fn parse(frame: &str) -> ProtocolResult<Self> {
        let value: Value = serde_json::from_str(frame)?;
        let Value::Object(mut top) = value else {
            return Err(ProtocolError::invalid_structure("frame must be a JSON object"));
        };

        let kind = match top.get("type") {
            Some(Value::String(tag)) => LiveEventKind::parse(tag)?,
            _ => return Err(ProtocolError::MissingField("type")),
        };

        let payload = match top.remove("payload") {
            Some(Value::Object(payload)) => payload,
            Some(Value::Null) | None => return Err(ProtocolError::MissingField("payload")),
            Some(_) => {
                return Err(ProtocolError::invalid_structure("payload must be an object"))
            }
        };

        let mut payload = Value::Object(payload);
        if payload.get("_id").is_none() {
            for key in ENVELOPE_KEYS {
                if let Some(inner @ Value::Object(_)) = payload.get_mut(key).map(Value::take) {
                    payload = inner;
                    break;
                }
            }
        }

        match kind {
            LiveEventKind::Created => Ok(Self::Created(Entity::from_wire(payload)?)),
            LiveEventKind::Updated => Ok(Self::Updated(Entity::from_wire(payload)?)),
            LiveEventKind::Deleted => {
                let id = ["_id", "id"]
                    .iter()
                    .find_map(|key| payload.get(*key).and_then(Value::as_str))
                    .filter(|id| !id.trim().is_empty())
                    .ok_or(ProtocolError::MissingField("id"))?;
                Ok(Self::Deleted(EntityId::new(id)))
            }
        }
    }

    /// Returns the event type.
    #[must_use]
    pub fn kind(&self) -> LiveEventKind {
        match self {
            Self::Created(_) => LiveEventKind::Created,
            Self::Updated(_) => LiveEventKind::Updated,
            Self::Deleted(_) => LiveEventKind::Deleted,
        }
    }

    /// Returns the id of the affected entity.
    #[must_use]
    pub fn entity_id(&self) -> &EntityId {
        match self {
            Self::Created(entity) | Self::Updated(entity) => &entity.id,
            Self::Deleted(id) => id,
        }
    }
}
