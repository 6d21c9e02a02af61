//! Change feed for observing committed entity changes.
//!
//! Subscribers receive an event for every entity row written or removed,
//! after the batch is durable and applied. Delivery never blocks the
//! writer: each subscriber owns an unbounded channel.

use mirrorsync_protocol::{Entity, EntityId};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::mpsc::{self, Receiver, Sender};

/// Type of change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// An entity row was inserted or replaced.
    Upserted,
    /// An entity row was removed.
    Deleted,
}

/// A committed change to one entity row.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Commit sequence of the batch.
    pub sequence: u64,
    /// Affected entity.
    pub entity_id: EntityId,
    /// Type of change.
    pub kind: ChangeKind,
    /// New row for upserts.
    pub entity: Option<Entity>,
}

impl ChangeEvent {
    /// Creates an upsert event.
    pub fn upserted(sequence: u64, entity: Entity) -> Self {
        Self {
            sequence,
            entity_id: entity.id.clone(),
            kind: ChangeKind::Upserted,
            entity: Some(entity),
        }
    }

    /// Creates a delete event.
    pub fn deleted(sequence: u64, entity_id: EntityId) -> Self {
        Self {
            sequence,
            entity_id,
            kind: ChangeKind::Deleted,
            entity: None,
        }
    }
}

/// Distributes committed changes to subscribers.
pub struct ChangeFeed {
    subscribers: RwLock<Vec<Sender<ChangeEvent>>>,
    history: RwLock<VecDeque<ChangeEvent>>,
    max_history: usize,
}

impl ChangeFeed {
    /// Creates a change feed keeping at most `max_history` events.
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            history: RwLock::new(VecDeque::new()),
            max_history,
        }
    }

    /// Subscribes to all future events.
    pub fn subscribe(&self) -> Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits the events of one commit, in order.
    ///
    /// Disconnected subscribers are dropped.
    pub fn emit_batch(&self, events: Vec<ChangeEvent>) {
        if events.is_empty() {
            return;
        }

        {
            let mut history = self.history.write();
            history.extend(events.iter().cloned());
            while history.len() > self.max_history {
                history.pop_front();
            }
        }

        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| events.iter().all(|event| tx.send(event.clone()).is_ok()));
    }

    /// Returns events with a sequence greater than `cursor`, up to `limit`.
    pub fn poll(&self, cursor: u64, limit: usize) -> Vec<ChangeEvent> {
        self.history
            .read()
            .iter()
            .filter(|e| e.sequence > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::with_max_history(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn upsert(sequence: u64, id: &str) -> ChangeEvent {
        ChangeEvent::upserted(sequence, Entity::synced(id, 1, Default::default()))
    }

    #[test]
    fn emit_and_receive() {
        let feed = ChangeFeed::default();
        let rx = feed.subscribe();

        feed.emit_batch(vec![upsert(1, "a"), ChangeEvent::deleted(1, "b".into())]);

        assert_eq!(rx.recv_timeout(Duration::from_millis(100)).unwrap(), upsert(1, "a"));
        let second = rx.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(second.kind, ChangeKind::Deleted);
        assert_eq!(second.entity_id.as_str(), "b");
    }

    #[test]
    fn disconnected_subscribers_are_pruned() {
        let feed = ChangeFeed::default();
        let rx = feed.subscribe();
        let _kept = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 2);

        drop(rx);
        feed.emit_batch(vec![upsert(1, "a")]);
        assert_eq!(feed.subscriber_count(), 1);
    }

    #[test]
    fn history_is_bounded() {
        let feed = ChangeFeed::with_max_history(3);
        for seq in 1..=5 {
            feed.emit_batch(vec![upsert(seq, "a")]);
        }

        let events = feed.poll(0, 10);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].sequence, 3);
        assert_eq!(feed.poll(4, 10).len(), 1);
    }
}
