//! Recorded snapshot history.
//!
//! A [`SnapshotLog`] is shared between the test and any number of subscriber
//! callbacks. Invariants read the history instead of live state, so a check
//! always sees a consistent sequence.

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
};

use huddle_core::{Callback, RoomId, Snapshot};

/// Snapshots observed per room, in delivery order.
#[derive(Debug, Clone, Default)]
pub struct SnapshotLog {
    rooms: Arc<Mutex<BTreeMap<RoomId, Vec<Arc<Snapshot>>>>>,
}

impl SnapshotLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one snapshot.
    pub fn record(&self, snapshot: &Arc<Snapshot>) {
        let mut rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms.entry(snapshot.room_id.clone()).or_default().push(Arc::clone(snapshot));
    }

    /// Subscriber callback that records into this log.
    pub fn recorder(&self) -> Callback {
        let log = self.clone();
        Box::new(move |snapshot| log.record(snapshot))
    }

    /// History of one room.
    pub fn history(&self, room_id: &RoomId) -> Vec<Arc<Snapshot>> {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms.get(room_id).cloned().unwrap_or_default()
    }

    /// Histories of every room, ordered by room id.
    pub fn rooms(&self) -> Vec<(RoomId, Vec<Arc<Snapshot>>)> {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms.iter().map(|(id, history)| (id.clone(), history.clone())).collect()
    }

    /// Most recent snapshot of a room.
    pub fn latest(&self, room_id: &RoomId) -> Option<Arc<Snapshot>> {
        self.history(room_id).last().cloned()
    }

    /// Room sequence values observed for a room.
    pub fn room_seqs(&self, room_id: &RoomId) -> Vec<u64> {
        self.history(room_id).iter().map(|s| s.room_seq).collect()
    }

    /// Total snapshots recorded.
    pub fn len(&self) -> usize {
        let rooms = self.rooms.lock().unwrap_or_else(PoisonError::into_inner);
        rooms.values().map(Vec::len).sum()
    }

    /// Nothing recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
