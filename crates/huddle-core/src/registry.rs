//! Room directory.
//!
//! Maps room ids to whatever owns each room. The synchronous driver stores
//! [`RoomSession`](crate::RoomSession)s directly; the async runtime stores
//! handles to room actors. Membership itself lives in each room's
//! [`Room`](crate::Room) store, never here.

use std::{
    collections::{HashMap, hash_map::Entry},
    sync::Arc,
};

use crate::{error::SessionError, event::RoomId, snapshot::Snapshot};

/// Something the directory can read a snapshot from.
pub trait RoomSlot {
    /// Latest committed snapshot of the room.
    fn snapshot(&self) -> Arc<Snapshot>;
}

/// Authoritative room id → room mapping.
#[derive(Debug)]
pub struct SessionRegistry<S> {
    rooms: HashMap<RoomId, S>,
}

impl<S> Default for SessionRegistry<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> SessionRegistry<S> {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self { rooms: HashMap::new() }
    }

    /// Register a new room.
    ///
    /// # Errors
    ///
    /// `RoomAlreadyExists` if the id is taken.
    pub fn create_room(&mut self, room_id: RoomId, slot: S) -> Result<&mut S, SessionError> {
        match self.rooms.entry(room_id) {
            Entry::Occupied(entry) => {
                Err(SessionError::RoomAlreadyExists(entry.key().clone()))
            },
            Entry::Vacant(entry) => Ok(entry.insert(slot)),
        }
    }

    /// Check if a room exists.
    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.rooms.contains_key(room_id)
    }

    /// Look up a room.
    pub fn get(&self, room_id: &RoomId) -> Option<&S> {
        self.rooms.get(room_id)
    }

    /// Look up a room mutably.
    pub fn get_mut(&mut self, room_id: &RoomId) -> Option<&mut S> {
        self.rooms.get_mut(room_id)
    }

    /// Look up a room or fail with `RoomNotFound`.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` if the room does not exist.
    pub fn require_mut(&mut self, room_id: &RoomId) -> Result<&mut S, SessionError> {
        self.rooms.get_mut(room_id).ok_or_else(|| SessionError::RoomNotFound(room_id.clone()))
    }

    /// Remove a room, returning its slot.
    pub fn remove(&mut self, room_id: &RoomId) -> Option<S> {
        self.rooms.remove(room_id)
    }

    /// Number of rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Ids of all rooms, in no particular order.
    pub fn room_ids(&self) -> impl Iterator<Item = &RoomId> {
        self.rooms.keys()
    }

    /// Iterate over all rooms mutably.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&RoomId, &mut S)> {
        self.rooms.iter_mut()
    }
}

impl<S: RoomSlot> SessionRegistry<S> {
    /// Latest snapshot of a room.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` if the room does not exist.
    pub fn get_snapshot(&self, room_id: &RoomId) -> Result<Arc<Snapshot>, SessionError> {
        self.rooms
            .get(room_id)
            .map(RoomSlot::snapshot)
            .ok_or_else(|| SessionError::RoomNotFound(room_id.clone()))
    }
}
