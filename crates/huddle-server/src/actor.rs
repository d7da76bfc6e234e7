//! `RoomActor` - one Tokio task per room.
//!
//! Each `RoomActor`:
//! - Owns the room's [`RoomSession`]; nothing else can touch it
//! - Processes commands from its mailbox one at a time
//! - Wakes itself for reorder deadlines, presence scans and the grace period
//! - Publishes every committed snapshot on a `watch` channel for lock-free
//!   reads
//!
//! # Retirement
//!
//! When the session reports the room vacated the actor closes its mailbox,
//! removes its own directory entry and exits. Commands still queued are
//! dropped, so their callers see [`CoordinatorError::RoomClosed`].

use std::sync::Arc;

use huddle_core::{
    Callback, Delivery, Event, EventKind, ParticipantId, RoomAction, RoomId, RoomSession,
    RoomSlot, SessionConfig, SessionError, SessionRegistry, Snapshot, Subscription,
};
use tokio::{
    sync::{RwLock, mpsc, oneshot, watch},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{error::CoordinatorError, system_env::SystemEnv};

/// Shared room directory.
pub(crate) type Directory = Arc<RwLock<SessionRegistry<RoomHandle>>>;

type Reply<T> = oneshot::Sender<T>;

/// Messages accepted by a room actor.
pub(crate) enum RoomCommand {
    /// Client-sequenced event from the network
    Deliver { event: Event, respond_to: Reply<Result<Delivery, SessionError>> },
    /// Facade command, stamped with the participant's next sequence number
    Command {
        participant_id: ParticipantId,
        kind: EventKind,
        respond_to: Reply<Result<Delivery, SessionError>>,
    },
    /// Register a change callback, optionally invoking it with the current
    /// snapshot first
    Subscribe { callback: Callback, replay: bool, respond_to: Reply<Subscription> },
}

/// Handle to a `RoomActor`.
///
/// Cheap to clone. All clones address the same mailbox.
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    generation: u64,
    sender: mpsc::Sender<RoomCommand>,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    cancel_token: CancellationToken,
}

impl std::fmt::Debug for RoomCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Deliver { event, .. } => f.debug_tuple("Deliver").field(event).finish(),
            Self::Command { participant_id, kind, .. } => {
                f.debug_tuple("Command").field(participant_id).field(kind).finish()
            },
            Self::Subscribe { replay, .. } => f.debug_tuple("Subscribe").field(replay).finish(),
        }
    }
}

impl RoomHandle {
    /// Room this handle addresses.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Distinguishes successive actors for the same room id.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The actor has retired or stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    /// Stop the actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Receiver that always holds the latest committed snapshot.
    pub fn watch(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.snapshots.clone()
    }

    /// Submit a client-sequenced event.
    pub async fn deliver(&self, event: Event) -> Result<Delivery, CoordinatorError> {
        let delivery =
            self.request(|respond_to| RoomCommand::Deliver { event, respond_to }).await??;
        Ok(delivery)
    }

    /// Submit a facade command.
    pub async fn command(
        &self,
        participant_id: ParticipantId,
        kind: EventKind,
    ) -> Result<Delivery, CoordinatorError> {
        let delivery = self
            .request(|respond_to| RoomCommand::Command { participant_id, kind, respond_to })
            .await??;
        Ok(delivery)
    }

    /// Register a change callback.
    pub async fn subscribe(
        &self,
        callback: Callback,
        replay: bool,
    ) -> Result<Subscription, CoordinatorError> {
        self.request(|respond_to| RoomCommand::Subscribe { callback, replay, respond_to }).await
    }

    pub(crate) async fn send(&self, command: RoomCommand) -> Result<(), CoordinatorError> {
        self.sender.send(command).await.map_err(|_| self.closed())
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> RoomCommand,
    ) -> Result<T, CoordinatorError> {
        let (respond_to, response) = oneshot::channel();
        self.send(make(respond_to)).await?;
        response.await.map_err(|_| self.closed())
    }

    /// Error for a mailbox that no longer answers.
    pub(crate) fn closed(&self) -> CoordinatorError {
        if self.cancel_token.is_cancelled() {
            CoordinatorError::Unavailable("runtime is shutting down".to_string())
        } else {
            CoordinatorError::RoomClosed(self.room_id.clone())
        }
    }
}

impl RoomSlot for RoomHandle {
    fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshots.borrow())
    }
}

/// Per-room actor owning a [`RoomSession`].
pub(crate) struct RoomActor {
    session: RoomSession<SystemEnv>,
    env: SystemEnv,
    generation: u64,
    receiver: mpsc::Receiver<RoomCommand>,
    snapshots: watch::Sender<Arc<Snapshot>>,
    directory: Directory,
    cancel_token: CancellationToken,
    commands: u64,
}

/// Everything needed to start one actor.
pub(crate) struct Spawn {
    pub room_id: RoomId,
    pub generation: u64,
    pub config: SessionConfig,
    pub mailbox_capacity: usize,
    pub directory: Directory,
    pub cancel_token: CancellationToken,
}

impl RoomActor {
    /// Spawn the actor, handling `initial` before anything else in its
    /// mailbox.
    pub(crate) fn spawn(
        spawn: Spawn,
        initial: Option<RoomCommand>,
    ) -> (RoomHandle, JoinHandle<()>) {
        let env = SystemEnv::new();
        let session = RoomSession::new(spawn.room_id.clone(), &spawn.config, &env);
        let (sender, receiver) = mpsc::channel(spawn.mailbox_capacity);
        let (snapshot_tx, snapshot_rx) = watch::channel(session.snapshot());

        let actor = Self {
            session,
            env,
            generation: spawn.generation,
            receiver,
            snapshots: snapshot_tx,
            directory: spawn.directory,
            cancel_token: spawn.cancel_token.clone(),
            commands: 0,
        };

        let task = tokio::spawn(actor.run(initial));
        let handle = RoomHandle {
            room_id: spawn.room_id,
            generation: spawn.generation,
            sender,
            snapshots: snapshot_rx,
            cancel_token: spawn.cancel_token,
        };

        (handle, task)
    }

    async fn run(mut self, initial: Option<RoomCommand>) {
        let room_id = self.session.room_id().clone();
        debug!(room_id = %room_id, generation = self.generation, "room actor started");

        if let Some(command) = initial {
            // Spawned for a join: if it was refused the room has no purpose
            self.handle(command);
            self.session.discard_if_unused();
            self.publish();
        }

        while !self.session.is_vacated() {
            let wakeup = self.session.next_wakeup();

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(room_id = %room_id, "room actor cancelled");
                    break;
                }

                () = sleep_until(wakeup) => {
                    self.session.tick(&self.env);
                    self.publish();
                }

                command = self.receiver.recv() => match command {
                    Some(command) => self.handle(command),
                    None => {
                        debug!(room_id = %room_id, "mailbox closed, exiting");
                        break;
                    },
                }
            }
        }

        if self.session.is_vacated() {
            self.retire().await;
        }

        debug!(
            room_id = %room_id,
            room_seq = self.session.snapshot().room_seq,
            commands = self.commands,
            "room actor stopped"
        );
    }

    fn handle(&mut self, command: RoomCommand) {
        self.commands += 1;
        match command {
            RoomCommand::Deliver { event, respond_to } => {
                let result = self.session.deliver(event, &self.env);
                self.publish();
                let _ = respond_to.send(result);
            },
            RoomCommand::Command { participant_id, kind, respond_to } => {
                let result = self.session.command(participant_id, kind, &self.env);
                self.publish();
                let _ = respond_to.send(result);
            },
            RoomCommand::Subscribe { mut callback, replay, respond_to } => {
                if replay {
                    callback(&self.session.snapshot());
                }
                let subscription = self.session.subscribe(callback);
                let _ = respond_to.send(subscription);
            },
        }
    }

    /// Push the latest committed snapshot to readers.
    fn publish(&mut self) {
        let mut latest = None;
        for action in self.session.take_actions() {
            match action {
                RoomAction::Committed(snapshot) => latest = Some(snapshot),
                RoomAction::Vacated { room_id } => {
                    debug!(room_id = %room_id, "room vacated");
                },
                RoomAction::GapSkipped { .. }
                | RoomAction::Rejected { .. }
                | RoomAction::Ignored { .. }
                | RoomAction::ForcedLeave { .. } => {},
            }
        }

        if let Some(snapshot) = latest {
            self.snapshots.send_replace(snapshot);
        }
    }

    async fn retire(&mut self) {
        self.receiver.close();

        {
            let mut directory = self.directory.write().await;
            let room_id = self.session.room_id();
            if directory.get(room_id).is_some_and(|h| h.generation == self.generation) {
                directory.remove(room_id);
            }
        }

        let mut dropped = 0;
        while self.receiver.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            warn!(
                room_id = %self.session.room_id(),
                dropped,
                "room retired with queued commands"
            );
        }
        info!(room_id = %self.session.room_id(), "room destroyed");
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
