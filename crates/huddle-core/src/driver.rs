//! Synchronous session driver.
//!
//! Owns the room directory and every [`RoomSession`] in one thread. Used by
//! deterministic tests and by embedders that bring their own event loop. The
//! async runtime in `huddle-server` offers the same operations with one task
//! per room.
//!
//! Facade commands carry no sequence number: they are stamped with the
//! participant's next expected sequence and routed through the sequencer like
//! network events.

use std::sync::Arc;

use crate::{
    config::SessionConfig,
    env::Environment,
    error::SessionError,
    event::{Event, EventKind, MediaField, MediaState, ParticipantId, RoomId},
    observer::{Callback, Subscription},
    registry::SessionRegistry,
    session::{Delivery, RoomAction, RoomSession},
    snapshot::Snapshot,
};

/// Single-threaded coordinator over many rooms.
///
/// Generic over `E` (Environment) for virtual time in tests.
#[derive(Debug)]
pub struct SessionDriver<E: Environment> {
    env: E,
    config: SessionConfig,
    registry: SessionRegistry<RoomSession<E>>,
    actions: Vec<RoomAction>,
}

impl<E: Environment> SessionDriver<E> {
    /// Create a driver with no rooms.
    pub fn new(env: E, config: SessionConfig) -> Self {
        Self { env, config, registry: SessionRegistry::new(), actions: Vec::new() }
    }

    /// Environment handle.
    pub fn env(&self) -> &E {
        &self.env
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Room directory.
    pub fn registry(&self) -> &SessionRegistry<RoomSession<E>> {
        &self.registry
    }

    /// Number of live rooms.
    pub fn room_count(&self) -> usize {
        self.registry.room_count()
    }

    /// Create an empty room. It stays open until its first participant
    /// joins and later leaves.
    ///
    /// # Errors
    ///
    /// `RoomAlreadyExists` if the id is taken.
    pub fn create_room(&mut self, room_id: RoomId) -> Result<Arc<Snapshot>, SessionError> {
        let session = RoomSession::new(room_id.clone(), &self.config, &self.env);
        let session = self.registry.create_room(room_id, session)?;
        Ok(session.snapshot())
    }

    /// Latest snapshot of a room.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` if the room does not exist.
    pub fn get_snapshot(&self, room_id: &RoomId) -> Result<Arc<Snapshot>, SessionError> {
        self.registry.get_snapshot(room_id)
    }

    /// Join a room, creating it on first join.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if the participant is already active,
    /// `InvalidEvent` for an empty display name.
    pub fn join(
        &mut self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        display_name: &str,
    ) -> Result<Arc<Snapshot>, SessionError> {
        let media = MediaState::default();
        let kind = EventKind::Join { display_name: display_name.to_string(), media };
        self.command(room_id, participant_id, kind, true)
    }

    /// Leave a room.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` or `ParticipantNotFound`.
    pub fn leave(
        &mut self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
    ) -> Result<(), SessionError> {
        self.command(room_id, participant_id, EventKind::Leave { forced: false }, false)?;
        Ok(())
    }

    /// Set one media flag.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` or `ParticipantNotFound`.
    pub fn set_media_state(
        &mut self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        field: MediaField,
        value: bool,
    ) -> Result<Arc<Snapshot>, SessionError> {
        self.command(room_id, participant_id, EventKind::MediaToggle { field, value }, false)
    }

    /// Post a chat message.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`, `ParticipantNotFound` or `InvalidEvent`.
    pub fn send_chat(
        &mut self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        text: &str,
    ) -> Result<Arc<Snapshot>, SessionError> {
        let kind = EventKind::Chat { text: text.to_string() };
        self.command(room_id, participant_id, kind, false)
    }

    /// Register a callback for every committed snapshot of a room.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` if the room does not exist.
    pub fn subscribe(
        &mut self,
        room_id: &RoomId,
        callback: Callback,
    ) -> Result<Subscription, SessionError> {
        Ok(self.registry.require_mut(room_id)?.subscribe(callback))
    }

    /// Deliver a client-sequenced event. A join for an unknown room creates
    /// the room.
    ///
    /// # Errors
    ///
    /// Whatever the room session rejects the event with.
    pub fn deliver(&mut self, event: Event) -> Result<Delivery, SessionError> {
        let room_id = event.room_id.clone();
        let created = event.kind.is_join() && !self.registry.contains(&room_id);
        if created {
            self.create_room(room_id.clone())?;
        }

        let session = self.registry.require_mut(&room_id)?;
        let result = session.deliver(event, &self.env);
        if created && result.is_err() {
            session.discard_if_unused();
        }
        self.collect(&room_id);
        result
    }

    /// Advance every room: reorder timeouts, presence scans, retirement.
    ///
    /// Returns the side effects produced since the last call.
    pub fn tick(&mut self) -> Vec<RoomAction> {
        let mut ids: Vec<RoomId> = self.registry.room_ids().cloned().collect();
        ids.sort();

        for room_id in ids {
            if let Some(session) = self.registry.get_mut(&room_id) {
                session.tick(&self.env);
            }
            self.collect(&room_id);
        }

        self.take_actions()
    }

    /// Earliest instant at which any room needs a tick.
    pub fn next_wakeup(&self) -> Option<E::Instant> {
        self.registry.room_ids().filter_map(|id| self.registry.get(id)?.next_wakeup()).min()
    }

    /// Drain side effects accumulated by operations since the last call.
    pub fn take_actions(&mut self) -> Vec<RoomAction> {
        std::mem::take(&mut self.actions)
    }

    fn command(
        &mut self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        kind: EventKind,
        create: bool,
    ) -> Result<Arc<Snapshot>, SessionError> {
        let created = create && !self.registry.contains(room_id);
        if created {
            self.create_room(room_id.clone())?;
        }

        let session = self.registry.require_mut(room_id)?;
        let result = session.command(participant_id.clone(), kind, &self.env);
        if created && result.is_err() {
            session.discard_if_unused();
        }
        let fallback = session.snapshot();
        self.collect(room_id);

        match result? {
            Delivery::Applied(snapshot) => Ok(snapshot),
            Delivery::Buffered | Delivery::Stale | Delivery::Ignored => Ok(fallback),
        }
    }

    /// Move a room's actions into the driver log and retire it if vacated.
    fn collect(&mut self, room_id: &RoomId) {
        let Some(session) = self.registry.get_mut(room_id) else {
            return;
        };
        self.actions.extend(session.take_actions());

        if session.is_vacated() {
            self.registry.remove(room_id);
            tracing::info!(room_id = %room_id, "room destroyed");
        }
    }
}
