//! Entities and their identifiers.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Prefix reserved for locally generated identifiers.
pub const TEMP_ID_PREFIX: &str = "temp_";

const WIRE_ID: &str = "_id";
const WIRE_VERSION: &str = "version";
const WIRE_OWNER: &str = "userId";

/// Identifier of a mirrored entity.
///
/// Server ids are opaque strings. Ids minted on the device before the
/// server has seen the entity carry the [`TEMP_ID_PREFIX`] and are replaced
/// by the server id once the create round-trips.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(String);

impl EntityId {
    /// Wraps a server-assigned id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh temporary id (`temp_<uuid>`).
    #[must_use]
    pub fn temporary() -> Self {
        Self(format!("{TEMP_ID_PREFIX}{}", Uuid::new_v4()))
    }

    /// Returns true if this id was generated locally and has not yet been
    /// replaced by a server id.
    #[must_use]
    pub fn is_temporary(&self) -> bool {
        self.0.starts_with(TEMP_ID_PREFIX)
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&self.0)
    }
}

impl From<&str> for EntityId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for EntityId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A locally mirrored copy of a server entity.
///
/// The serde derive is the journal representation. The JSON shape the
/// server speaks is produced by [`Entity::to_wire`] and read back by
/// [`Entity::from_wire`]; `needs_sync` never leaves the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    /// Server id, or a temporary id for never-synced entities.
    pub id: EntityId,
    /// Server-assigned version. Zero until the first create succeeds.
    pub version: u64,
    /// Owning user, as reported by the server.
    pub owner: Option<String>,
    /// Domain fields.
    pub fields: Map<String, Value>,
    /// True while the local copy carries edits the server has not seen.
    pub needs_sync: bool,
}

impl Entity {
    /// Creates a never-synced entity under a fresh temporary id.
    #[must_use]
    pub fn new_local(fields: Map<String, Value>) -> Self {
        Self {
            id: EntityId::temporary(),
            version: 0,
            owner: None,
            fields,
            needs_sync: true,
        }
    }

    /// Creates a synced entity, as received from the server.
    #[must_use]
    pub fn synced(id: impl Into<EntityId>, version: u64, fields: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            version,
            owner: None,
            fields,
            needs_sync: false,
        }
    }

    /// Sets the owner.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Sets a single domain field.
    #[must_use]
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Returns a domain field.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Replaces a domain field, returning the previous value.
    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(name.into(), value.into())
    }

    /// Encodes the entity as the server's JSON object.
    ///
    /// Temporary ids are omitted so the server assigns its own.
    #[must_use]
    pub fn to_wire(&self) -> Value {
        let mut object = self.fields.clone();
        if !self.id.is_temporary() {
            object.insert(WIRE_ID.into(), Value::String(self.id.0.clone()));
        }
        object.insert(WIRE_VERSION.into(), Value::from(self.version));
        if let Some(owner) = &self.owner {
            object.insert(WIRE_OWNER.into(), Value::String(owner.clone()));
        }
        Value::Object(object)
    }

    /// Decodes a server JSON object.
    ///
    /// A missing `version` decodes as 0. The resulting entity is synced.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not an object, the id is missing
    /// or blank, or `version` / `userId` have the wrong type.
    pub fn from_wire(value: Value) -> ProtocolResult<Self> {
        let Value::Object(mut object) = value else {
            return Err(ProtocolError::invalid_structure("entity must be a JSON object"));
        };

        let id = match object.remove(WIRE_ID) {
            Some(Value::String(id)) if !id.trim().is_empty() => EntityId(id),
            Some(Value::String(_)) | None => return Err(ProtocolError::MissingField(WIRE_ID)),
            Some(other) => {
                return Err(ProtocolError::invalid_structure(format!(
                    "`_id` must be a string, got {other}"
                )))
            }
        };

        let version = match object.remove(WIRE_VERSION) {
            None | Some(Value::Null) => 0,
            Some(Value::Number(n)) => n
                .as_u64()
                .or_else(|| n.as_f64().filter(|f| *f >= 0.0 && f.fract() == 0.0).map(|f| f as u64))
                .ok_or_else(|| {
                    ProtocolError::invalid_structure(format!("invalid version {n}"))
                })?,
            Some(other) => {
                return Err(ProtocolError::invalid_structure(format!(
                    "`version` must be a number, got {other}"
                )))
            }
        };

        let owner = match object.remove(WIRE_OWNER) {
            None | Some(Value::Null) => None,
            Some(Value::String(owner)) => Some(owner),
            Some(other) => {
                return Err(ProtocolError::invalid_structure(format!(
                    "`userId` must be a string, got {other}"
                )))
            }
        };

        Ok(Self {
            id,
            version,
            owner,
            fields: object,
            needs_sync: false,
        })
    }
}
