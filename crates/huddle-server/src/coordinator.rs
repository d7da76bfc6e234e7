//! Async session coordinator.
//!
//! Same operations as [`huddle_core::SessionDriver`], with one [`RoomActor`]
//! per room so rooms run in parallel. The room directory lock is only held
//! for lookups and inserts, never while waiting on a room.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use huddle_core::{
    Callback, Delivery, Event, EventKind, MediaField, MediaState, ParticipantId, RoomId,
    RoomSlot, SessionConfig, SessionError, SessionRegistry, Snapshot, Subscription,
};
use tokio::sync::{RwLock, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    actor::{Directory, RoomActor, RoomCommand, RoomHandle, Spawn},
    config::{DEFAULT_MAILBOX_CAPACITY, ServerConfig},
    error::CoordinatorError,
};

/// Multi-room coordinator backed by one actor per room.
///
/// Shared between connections behind an `Arc`. Every method takes `&self`.
#[derive(Debug)]
pub struct Coordinator {
    config: SessionConfig,
    mailbox_capacity: usize,
    rooms: Directory,
    cancel_token: CancellationToken,
    next_generation: AtomicU64,
}

impl Coordinator {
    /// Create a coordinator with no rooms.
    pub fn new(config: SessionConfig) -> Self {
        Self::with_mailbox_capacity(config, DEFAULT_MAILBOX_CAPACITY)
    }

    /// Create a coordinator from the runtime configuration.
    pub fn from_config(config: &ServerConfig) -> Self {
        Self::with_mailbox_capacity(config.session(), config.mailbox_capacity)
    }

    fn with_mailbox_capacity(config: SessionConfig, mailbox_capacity: usize) -> Self {
        Self {
            config,
            mailbox_capacity: mailbox_capacity.max(1),
            rooms: Arc::new(RwLock::new(SessionRegistry::new())),
            cancel_token: CancellationToken::new(),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Session configuration handed to new rooms.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Number of live rooms.
    pub async fn room_count(&self) -> usize {
        let rooms = self.rooms.read().await;
        rooms.room_ids().filter(|id| rooms.get(id).is_some_and(|h| !h.is_closed())).count()
    }

    /// Create an empty room.
    ///
    /// The room stays open until its first participant joins and later
    /// leaves.
    ///
    /// # Errors
    ///
    /// `RoomAlreadyExists` if a live room has the id, `Unavailable` after
    /// shutdown.
    pub async fn create_room(&self, room_id: RoomId) -> Result<Arc<Snapshot>, CoordinatorError> {
        self.ensure_running()?;
        let mut rooms = self.rooms.write().await;
        if rooms.get(&room_id).is_some_and(|h| !h.is_closed()) {
            return Err(SessionError::RoomAlreadyExists(room_id).into());
        }
        let handle = self.spawn_locked(&mut rooms, room_id, None);
        Ok(handle.snapshot())
    }

    /// Latest snapshot of a room. Never waits on the room's actor.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` if the room does not exist.
    pub async fn get_snapshot(&self, room_id: &RoomId) -> Result<Arc<Snapshot>, CoordinatorError> {
        let handle = self.lookup(room_id).await?;
        Ok(handle.snapshot())
    }

    /// Join a room, creating it on first join.
    ///
    /// A join that lands on a room retiring at that moment is retried once on
    /// a fresh room.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` if the participant is already active,
    /// `InvalidEvent` for an empty display name.
    pub async fn join(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        display_name: &str,
    ) -> Result<Arc<Snapshot>, CoordinatorError> {
        let media = MediaState::default();
        let kind = EventKind::Join { display_name: display_name.to_string(), media };

        let delivery = match self.command(room_id, participant_id, kind.clone(), true).await {
            Err(CoordinatorError::RoomClosed(_)) => {
                warn!(
                    room_id = %room_id,
                    participant = %participant_id,
                    "room retired during join, retrying"
                );
                self.command(room_id, participant_id, kind, true).await
            },
            other => other,
        }?;
        self.snapshot_of(room_id, delivery).await
    }

    /// Leave a room.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` or `ParticipantNotFound`.
    pub async fn leave(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
    ) -> Result<(), CoordinatorError> {
        let kind = EventKind::Leave { forced: false };
        self.command(room_id, participant_id, kind, false).await.map_err(not_found)?;
        Ok(())
    }

    /// Set one media flag.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` or `ParticipantNotFound`.
    pub async fn set_media_state(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        field: MediaField,
        value: bool,
    ) -> Result<Arc<Snapshot>, CoordinatorError> {
        let kind = EventKind::MediaToggle { field, value };
        let delivery = self.command(room_id, participant_id, kind, false).await.map_err(not_found)?;
        self.snapshot_of(room_id, delivery).await
    }

    /// Post a chat message.
    ///
    /// # Errors
    ///
    /// `RoomNotFound`, `ParticipantNotFound` or `InvalidEvent`.
    pub async fn send_chat(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        text: &str,
    ) -> Result<Arc<Snapshot>, CoordinatorError> {
        let kind = EventKind::Chat { text: text.to_string() };
        let delivery = self.command(room_id, participant_id, kind, false).await.map_err(not_found)?;
        self.snapshot_of(room_id, delivery).await
    }

    /// Register a callback for every committed snapshot of a room.
    ///
    /// The callback runs on the room's task and must not block.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` if the room does not exist.
    pub async fn subscribe(
        &self,
        room_id: &RoomId,
        callback: Callback,
    ) -> Result<Subscription, CoordinatorError> {
        let handle = self.lookup(room_id).await?;
        handle.subscribe(callback, false).await.map_err(not_found)
    }

    /// Like [`subscribe`](Self::subscribe), but the callback first receives
    /// the snapshot current at registration, in order with later commits.
    ///
    /// # Errors
    ///
    /// `RoomNotFound` if the room does not exist.
    pub async fn follow(
        &self,
        room_id: &RoomId,
        callback: Callback,
    ) -> Result<Subscription, CoordinatorError> {
        let handle = self.lookup(room_id).await?;
        handle.subscribe(callback, true).await.map_err(not_found)
    }

    /// Deliver a client-sequenced event. A join for an unknown room creates
    /// the room.
    ///
    /// # Errors
    ///
    /// Whatever the room session rejects the event with.
    pub async fn deliver(&self, event: Event) -> Result<Delivery, CoordinatorError> {
        let room_id = event.room_id.clone();
        let create = event.kind.is_join();

        let result = if create {
            match self.route(&room_id, true, deliver_command(event.clone())).await {
                Err(CoordinatorError::RoomClosed(_)) => {
                    self.route(&room_id, true, deliver_command(event)).await
                },
                other => other,
            }
        } else {
            self.route(&room_id, false, deliver_command(event)).await
        };
        result.map_err(not_found)
    }

    /// Stop every room actor. Later calls fail with `Unavailable`.
    pub async fn shutdown(&self) {
        info!("coordinator shutting down");
        self.cancel_token.cancel();
        let mut rooms = self.rooms.write().await;
        let ids: Vec<RoomId> = rooms.room_ids().cloned().collect();
        for room_id in ids {
            rooms.remove(&room_id);
        }
    }

    /// Resolves once [`shutdown`](Self::shutdown) has been called.
    pub async fn stopped(&self) {
        self.cancel_token.cancelled().await;
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    async fn command(
        &self,
        room_id: &RoomId,
        participant_id: &ParticipantId,
        kind: EventKind,
        create: bool,
    ) -> Result<Delivery, CoordinatorError> {
        let participant_id = participant_id.clone();
        let make = move |respond_to| RoomCommand::Command { participant_id, kind, respond_to };
        self.route(room_id, create, make).await
    }

    /// Send one request to a room, spawning the room first if `create` is
    /// set and no live room has the id.
    async fn route(
        &self,
        room_id: &RoomId,
        create: bool,
        make: impl FnOnce(oneshot::Sender<Result<Delivery, SessionError>>) -> RoomCommand,
    ) -> Result<Delivery, CoordinatorError> {
        self.ensure_running()?;
        let (respond_to, response) = oneshot::channel();
        let command = make(respond_to);

        let handle = match self.live(room_id).await {
            Some(handle) => {
                handle.send(command).await?;
                handle
            },
            None if create => {
                let mut rooms = self.rooms.write().await;
                let existing = rooms.get(room_id).filter(|h| !h.is_closed()).cloned();
                match existing {
                    Some(handle) => {
                        drop(rooms);
                        handle.send(command).await?;
                        handle
                    },
                    None => self.spawn_locked(&mut rooms, room_id.clone(), Some(command)),
                }
            },
            None => return Err(SessionError::RoomNotFound(room_id.clone()).into()),
        };

        match response.await {
            Ok(result) => Ok(result?),
            Err(_) => {
                let err = handle.closed();
                self.forget(&handle).await;
                Err(err)
            },
        }
    }

    /// Spawn a room actor and register it. The caller holds the write lock,
    /// so the actor cannot retire before its entry exists.
    fn spawn_locked(
        &self,
        rooms: &mut SessionRegistry<RoomHandle>,
        room_id: RoomId,
        initial: Option<RoomCommand>,
    ) -> RoomHandle {
        if rooms.remove(&room_id).is_some() {
            debug!(room_id = %room_id, "replacing retired room");
        }

        let spawn = Spawn {
            room_id: room_id.clone(),
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            config: self.config.clone(),
            mailbox_capacity: self.mailbox_capacity,
            directory: Arc::clone(&self.rooms),
            cancel_token: self.cancel_token.child_token(),
        };
        let (handle, _task) = RoomActor::spawn(spawn, initial);

        // The slot was vacated above
        let _ = rooms.create_room(room_id, handle.clone());
        handle
    }

    async fn live(&self, room_id: &RoomId) -> Option<RoomHandle> {
        let rooms = self.rooms.read().await;
        rooms.get(room_id).filter(|h| !h.is_closed()).cloned()
    }

    async fn lookup(&self, room_id: &RoomId) -> Result<RoomHandle, CoordinatorError> {
        self.ensure_running()?;
        self.live(room_id).await.ok_or_else(|| SessionError::RoomNotFound(room_id.clone()).into())
    }

    /// Drop a directory entry whose actor has stopped, unless it was already
    /// replaced.
    async fn forget(&self, handle: &RoomHandle) {
        let mut rooms = self.rooms.write().await;
        if rooms.get(handle.room_id()).is_some_and(|h| h.generation() == handle.generation()) {
            rooms.remove(handle.room_id());
        }
    }

    async fn snapshot_of(
        &self,
        room_id: &RoomId,
        delivery: Delivery,
    ) -> Result<Arc<Snapshot>, CoordinatorError> {
        match delivery {
            Delivery::Applied(snapshot) => Ok(snapshot),
            Delivery::Buffered | Delivery::Stale | Delivery::Ignored => {
                self.get_snapshot(room_id).await
            },
        }
    }

    fn ensure_running(&self) -> Result<(), CoordinatorError> {
        if self.cancel_token.is_cancelled() {
            return Err(CoordinatorError::Unavailable("runtime is shutting down".to_string()));
        }
        Ok(())
    }
}

fn deliver_command(
    event: Event,
) -> impl FnOnce(oneshot::Sender<Result<Delivery, SessionError>>) -> RoomCommand {
    move |respond_to| RoomCommand::Deliver { event, respond_to }
}

/// Outside joins, a room that retired mid-request no longer exists.
fn not_found(err: CoordinatorError) -> CoordinatorError {
    match err {
        CoordinatorError::RoomClosed(room_id) => SessionError::RoomNotFound(room_id).into(),
        other => other,
    }
}
