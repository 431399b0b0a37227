//! Creation notifications
//!
//! Events are fire-and-forget: publishing never fails and never blocks the
//! factory. Subscribers that fall behind lose the oldest events and must
//! catch up from the ledger. Delivery may repeat, so subscribers deduplicate
//! on `sequence` with an [`EventCursor`].

use clonefab_ledger::LedgerEntry;
use clonefab_types::{Identity, ParamSet};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Notification published by the factory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum FactoryEvent {
    /// An instance was deployed, initialized and recorded
    InstanceCreated {
        /// New instance
        instance: Identity,
        /// Owner assigned at initialization
        owner: Identity,
        /// Initialization parameters
        params: ParamSet,
        /// Ledger sequence of the creation
        sequence: u64,
    },
}

impl FactoryEvent {
    /// Event announcing `entry`
    #[must_use]
    pub fn from_entry(entry: &LedgerEntry) -> Self {
        Self::InstanceCreated {
            instance: entry.instance,
            owner: entry.creator,
            params: entry.params.clone(),
            sequence: entry.sequence,
        }
    }

    /// Ledger sequence the event refers to
    #[inline]
    #[must_use]
    pub fn sequence(&self) -> u64 {
        match self {
            Self::InstanceCreated { sequence, .. } => *sequence,
        }
    }
}

/// Bounded fan-out of [`FactoryEvent`]s
#[derive(Debug)]
pub struct EventBus {
    sender: broadcast::Sender<FactoryEvent>,
}

impl EventBus {
    /// Create bus keeping at most `capacity` undelivered events per subscriber
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Announce `event` to current subscribers
    pub fn publish(&self, event: FactoryEvent) {
        // No subscribers is not an error.
        let delivered = self.sender.send(event).unwrap_or(0);
        tracing::trace!(delivered, "event published");
    }

    /// Receive every event published from now on
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<FactoryEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers
    #[inline]
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Cursor rejected an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CursorError {
    /// Events between `expected` and `found` were never seen
    #[error("event gap: expected sequence {expected}, found {found}")]
    Gap {
        /// Next sequence the cursor was waiting for
        expected: u64,
        /// Sequence actually received
        found: u64,
    },
}

/// In-order, at-most-once view over an at-least-once event stream
#[derive(Debug, Clone, Default)]
pub struct EventCursor {
    next: u64,
}

impl EventCursor {
    /// Cursor expecting sequence 0 first
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cursor expecting `sequence` next
    #[inline]
    #[must_use]
    pub fn starting_at(sequence: u64) -> Self {
        Self { next: sequence }
    }

    /// Next sequence the cursor accepts
    #[inline]
    #[must_use]
    pub fn next_sequence(&self) -> u64 {
        self.next
    }

    /// Returns `Ok(true)` for a new in-order event and `Ok(false)` for a
    /// re-announcement
    ///
    /// # Errors
    /// Returns [`CursorError::Gap`] if the event skips ahead. The cursor does
    /// not move.
    pub fn accept(&mut self, event: &FactoryEvent) -> Result<bool, CursorError> {
        let found = event.sequence();
        if found < self.next {
            return Ok(false);
        }
        if found > self.next {
            return Err(CursorError::Gap {
                expected: self.next,
                found,
            });
        }
        self.next += 1;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn event(sequence: u64) -> FactoryEvent {
        FactoryEvent::InstanceCreated {
            instance: Identity::derive(&Identity::named("deployer"), sequence + 1),
            owner: Identity::named("alice"),
            params: ParamSet::new("ClonedToken", "CTKN"),
            sequence,
        }
    }

    #[test]
    fn json_carries_event_tag() {
        let value = serde_json::to_value(event(0)).unwrap();
        assert_eq!(value["event"], "InstanceCreated");
        assert_eq!(value["sequence"], 0);
        assert_eq!(value["params"]["name"], "ClonedToken");
        assert_eq!(value["owner"], Identity::named("alice").to_string());
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let bus = EventBus::new(4);
        bus.publish(event(0));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn subscribers_see_events_in_order() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.publish(event(0));
        bus.publish(event(1));

        assert_eq!(rx.try_recv().unwrap().sequence(), 0);
        assert_eq!(rx.try_recv().unwrap().sequence(), 1);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[test]
    fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut rx = bus.subscribe();
        for seq in 0..5 {
            bus.publish(event(seq));
        }
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Lagged(3))));
        assert_eq!(rx.try_recv().unwrap().sequence(), 3);
    }

    #[test]
    fn cursor_drops_duplicates() {
        let mut cursor = EventCursor::new();
        assert_eq!(cursor.accept(&event(0)), Ok(true));
        assert_eq!(cursor.accept(&event(0)), Ok(false));
        assert_eq!(cursor.accept(&event(1)), Ok(true));
        assert_eq!(cursor.next_sequence(), 2);
    }

    #[test]
    fn cursor_reports_gap() {
        let mut cursor = EventCursor::starting_at(1);
        assert_eq!(
            cursor.accept(&event(3)),
            Err(CursorError::Gap {
                expected: 1,
                found: 3
            })
        );
        assert_eq!(cursor.next_sequence(), 1);
    }
}
