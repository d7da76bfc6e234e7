//! Change notification.
//!
//! Subscribers register a callback per room and receive every committed
//! snapshot in commit order. Notifications are never coalesced. A
//! [`Subscription`] is a guard: dropping it unregisters the callback before
//! the next notification.

use std::{
    fmt,
    sync::{Arc, Weak},
};

use crate::{event::RoomId, snapshot::Snapshot};

/// Callback invoked with every committed snapshot.
pub type Callback = Box<dyn FnMut(&Arc<Snapshot>) + Send>;

/// Identifier of one subscription within a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// Live subscription. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes it"]
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    room_id: RoomId,
    _alive: Arc<()>,
}

impl Subscription {
    /// Subscription identifier.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Room this subscription watches.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Unsubscribe explicitly.
    pub fn cancel(self) {}
}

struct Entry {
    id: SubscriptionId,
    alive: Weak<()>,
    callback: Callback,
}

/// Observer list for one room.
#[derive(Default)]
pub struct Observers {
    entries: Vec<Entry>,
    next_id: u64,
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids: Vec<_> = self.entries.iter().map(|e| e.id).collect();
        f.debug_struct("Observers").field("subscriptions", &ids).finish()
    }
}

impl Observers {
    /// Create an empty observer list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback.
    pub fn subscribe(&mut self, room_id: RoomId, callback: Callback) -> Subscription {
        self.next_id += 1;
        let id = SubscriptionId(self.next_id);
        let alive = Arc::new(());

        self.entries.push(Entry { id, alive: Arc::downgrade(&alive), callback });
        tracing::debug!(room_id = %room_id, subscription = %id, "subscribed");

        Subscription { id, room_id, _alive: alive }
    }

    /// Deliver a snapshot to every live subscriber, in registration order.
    ///
    /// Returns the number of callbacks invoked.
    pub fn notify(&mut self, snapshot: &Arc<Snapshot>) -> usize {
        self.entries.retain(|entry| entry.alive.strong_count() > 0);
        for entry in &mut self.entries {
            (entry.callback)(snapshot);
        }
        self.entries.len()
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.alive.strong_count() > 0).count()
    }

    /// No live subscriptions.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
