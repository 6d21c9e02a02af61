//! Queued outbound operations.

use crate::entity::EntityId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of a queued operation.
///
/// Operations carry no payload: the entity's local state at drain time is
/// what gets sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// The entity was created locally and has never reached the server.
    Create,
    /// The entity was edited locally.
    Update,
    /// The entity was deleted locally.
    Delete,
}

impl OperationKind {
    /// Returns the upper-case name used in logs and CLI output.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Create => "CREATE",
            OperationKind::Update => "UPDATE",
            OperationKind::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A local mutation not yet acknowledged by the server.
///
/// # Fields
///
/// - `id`: local operation id, never reused
/// - `entity_id`: the entity the operation targets
/// - `kind`: create, update or delete
/// - `sequence`: FIFO ordering key
/// - `enqueued_at`: unix millis of the latest enqueue, informational
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOperation {
    /// Local operation id.
    pub id: u64,
    /// Target entity.
    pub entity_id: EntityId,
    /// Operation kind.
    pub kind: OperationKind,
    /// Enqueue order.
    pub sequence: u64,
    /// Unix millis of the latest enqueue.
    pub enqueued_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_names() {
        assert_eq!(OperationKind::Create.to_string(), "CREATE");
        assert_eq!(OperationKind::Update.as_str(), "UPDATE");
        assert_eq!(OperationKind::Delete.as_str(), "DELETE");
    }
}
