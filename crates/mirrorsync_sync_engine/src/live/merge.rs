//! Merge rule for server-originated changes.

use mirrorsync_core::{Context, CoreResult, WriteTxn};
use mirrorsync_protocol::{Entity, LiveEvent};
use std::fmt;

/// What a live event did to the local mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The server copy was stored.
    Applied,
    /// The local copy is newer; the event was ignored.
    Stale,
    /// The local row was removed.
    Removed,
    /// Nothing to do: the row was absent, or it holds an unsynced local
    /// edit that a delete must not discard.
    Ignored,
}

impl fmt::Display for MergeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MergeOutcome::Applied => write!(f, "applied"),
            MergeOutcome::Stale => write!(f, "stale"),
            MergeOutcome::Removed => write!(f, "removed"),
            MergeOutcome::Ignored => write!(f, "ignored"),
        }
    }
}

/// Merges one event into a write transaction.
///
/// Created and updated events win when there is no local copy or their
/// version is at least the local one; the stored row is then clean. The
/// pending queue is not consulted: an UPDATE left behind is dropped by
/// the next pass because its entity no longer needs sync.
pub fn merge_event(txn: &mut WriteTxn<'_>, event: LiveEvent) -> MergeOutcome {
    match event {
        LiveEvent::Created(incoming) | LiveEvent::Updated(incoming) => {
            if let Some(local) = txn.entity(&incoming.id) {
                if incoming.version < local.version {
                    return MergeOutcome::Stale;
                }
            }
            txn.put_entity(Entity {
                needs_sync: false,
                ..incoming
            });
            MergeOutcome::Applied
        }
        LiveEvent::Deleted(id) => match txn.entity(&id) {
            None => MergeOutcome::Ignored,
            Some(local) if local.needs_sync => MergeOutcome::Ignored,
            Some(_) => {
                txn.delete_entity(&id);
                txn.remove_operations_for(&id);
                MergeOutcome::Removed
            }
        },
    }
}

/// Merges one event into the context as a single write.
///
/// # Errors
///
/// Returns an error if the journal write fails.
pub fn apply_live_event(ctx: &Context, event: LiveEvent) -> CoreResult<MergeOutcome> {
    ctx.write(|txn| Ok(merge_event(txn, event)))
}
