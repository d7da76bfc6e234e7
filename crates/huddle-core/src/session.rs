//! One room's serialized session.
//!
//! Wires the sequencer, state machine, store, presence monitor and observers
//! for a single room. Every mutation of the room happens inside a call on
//! [`RoomSession`], so a room is a single-threaded event loop no matter which
//! driver owns it.
//!
//! Pure state machine: time comes in through [`Environment`], side effects go
//! out as [`RoomAction`]s collected in an outbox the driver drains.

use std::{sync::Arc, time::Duration};

use crate::{
    config::SessionConfig,
    env::Environment,
    error::SessionError,
    event::{Event, EventKind, ParticipantId, RoomId},
    observer::{Callback, Observers, Subscription},
    participant::{Mutation, Transition, transition},
    presence::PresenceMonitor,
    registry::RoomSlot,
    room::{Applied, Room},
    sequencer::{Disposition, EventSequencer, MAX_CLIENT_SEQ, SequencerAction},
    snapshot::Snapshot,
};

/// Fate of an event handed to [`RoomSession::deliver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Applied; latest snapshot attached
    Applied(Arc<Snapshot>),
    /// Held until the gap before it fills or times out
    Buffered,
    /// Already applied (duplicate), no effect
    Stale,
    /// Addressed to a participant that already left, dropped
    Ignored,
}

impl Delivery {
    /// Stable name used in wire acks.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied(_) => "applied",
            Self::Buffered => "buffered",
            Self::Stale => "stale",
            Self::Ignored => "ignored",
        }
    }

    /// Snapshot attached to an applied delivery.
    pub fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        match self {
            Self::Applied(snapshot) => Some(snapshot),
            _ => None,
        }
    }
}

/// Side effects for the driver, in the order they happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomAction {
    /// A change committed. Observers have already been notified.
    Committed(Arc<Snapshot>),

    /// Sequence numbers were declared lost
    GapSkipped {
        /// Participant whose events were lost
        participant_id: ParticipantId,
        /// First missing sequence number
        first: u64,
        /// Last missing sequence number (inclusive)
        last: u64,
    },

    /// A buffered event was released later and then rejected
    Rejected {
        /// Originating participant
        participant_id: ParticipantId,
        /// Sequence number of the rejected event
        seq: u64,
        /// Why it was rejected
        error: SessionError,
    },

    /// Event for a departed participant was dropped
    Ignored {
        /// Originating participant
        participant_id: ParticipantId,
        /// Sequence number of the dropped event
        seq: u64,
    },

    /// Presence monitor removed a silent participant
    ForcedLeave {
        /// Participant that timed out
        participant_id: ParticipantId,
    },

    /// Room has been empty for the grace period; the driver should retire it
    Vacated {
        /// Room to retire
        room_id: RoomId,
    },
}

enum Outcome {
    Applied,
    Ignored,
}

/// Serialized state of one room.
///
/// Generic over `E` (Environment) so the same session runs under real time
/// and virtual time.
pub struct RoomSession<E: Environment> {
    room: Room<E::Instant>,
    sequencer: EventSequencer<E::Instant>,
    presence: PresenceMonitor<E::Instant>,
    observers: Observers,
    room_grace: Duration,
    vacated: bool,
    outbox: Vec<RoomAction>,
}

impl<E: Environment> std::fmt::Debug for RoomSession<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("room_id", self.room.id())
            .field("room_seq", &self.room.room_seq())
            .field("active", &self.room.active_count())
            .field("observers", &self.observers)
            .finish_non_exhaustive()
    }
}

impl<E: Environment> RoomSession<E> {
    /// Create a session for an empty room.
    pub fn new(room_id: RoomId, config: &SessionConfig, env: &E) -> Self {
        tracing::info!(room_id = %room_id, "room created");
        let now = env.now();
        Self {
            room: Room::new(room_id, now, config),
            sequencer: EventSequencer::new(config),
            presence: PresenceMonitor::new(config, now),
            observers: Observers::new(),
            room_grace: config.room_grace,
            vacated: false,
            outbox: Vec::new(),
        }
    }

    /// Room identifier.
    pub fn room_id(&self) -> &RoomId {
        self.room.id()
    }

    /// Underlying store (read-only).
    pub fn room(&self) -> &Room<E::Instant> {
        &self.room
    }

    /// Underlying sequencer (read-only).
    pub fn sequencer(&self) -> &EventSequencer<E::Instant> {
        &self.sequencer
    }

    /// Latest committed snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.room.snapshot()
    }

    /// Whether the room has been retired.
    pub fn is_vacated(&self) -> bool {
        self.vacated
    }

    /// Register a change callback.
    pub fn subscribe(&mut self, callback: Callback) -> Subscription {
        self.observers.subscribe(self.room.id().clone(), callback)
    }

    /// Drain side effects accumulated since the last call.
    pub fn take_actions(&mut self) -> Vec<RoomAction> {
        std::mem::take(&mut self.outbox)
    }

    /// Submit a client-sequenced event.
    ///
    /// # Errors
    ///
    /// Errors from the state machine or store for the delivered event itself.
    /// Buffered events released along with it report failures as
    /// [`RoomAction::Rejected`] instead. Sequence numbers above
    /// [`MAX_CLIENT_SEQ`] are `InvalidEvent`.
    pub fn deliver(&mut self, event: Event, env: &E) -> Result<Delivery, SessionError> {
        if &event.room_id != self.room.id() {
            return Err(SessionError::RoomNotFound(event.room_id));
        }
        if event.seq > MAX_CLIENT_SEQ {
            return Err(SessionError::InvalidEvent(format!(
                "sequence number {} is reserved",
                event.seq
            )));
        }
        self.sequence(event, env)
    }

    /// Submit a command on behalf of a participant, stamped with their next
    /// expected sequence number.
    ///
    /// # Errors
    ///
    /// Same as [`deliver`](Self::deliver). `InvalidEvent` once the
    /// participant's sequence space is used up.
    pub fn command(
        &mut self,
        participant_id: ParticipantId,
        kind: EventKind,
        env: &E,
    ) -> Result<Delivery, SessionError> {
        let Some(seq) = self.sequencer.next_local_seq(&participant_id) else {
            return Err(SessionError::InvalidEvent("sequence numbers exhausted".to_string()));
        };
        let event = Event::new(self.room.id().clone(), participant_id, seq, kind);
        self.deliver(event, env)
    }

    /// Retire a room nobody has joined yet. Used when the join that created
    /// it was refused.
    pub fn discard_if_unused(&mut self) {
        if self.vacated || !self.room.is_pristine() {
            return;
        }
        self.vacated = true;
        tracing::info!(room_id = %self.room.id(), "unused room discarded");
        self.outbox.push(RoomAction::Vacated { room_id: self.room.id().clone() });
    }

    /// Run one event through the sequencer and apply what it releases.
    fn sequence(&mut self, event: Event, env: &E) -> Result<Delivery, SessionError> {
        let now = env.now();
        let participant_id = event.participant_id.clone();
        let seq = event.seq;
        let status = self.room.status_of(&participant_id);

        let sequenced = self.sequencer.ingest(event, status, now);
        let mut own = None;

        for action in sequenced.actions {
            match action {
                SequencerAction::Release(released) => {
                    let is_own = released.participant_id == participant_id && released.seq == seq;
                    let result = self.apply(&released, env);
                    if is_own {
                        own = Some(result);
                    } else if let Err(error) = result {
                        self.reject(released, error);
                    }
                },
                SequencerAction::GapSkipped { participant_id, first, last } => {
                    self.gap_skipped(participant_id, first, last);
                },
            }
        }

        self.check_vacancy(now);

        match sequenced.disposition {
            Disposition::Stale => Ok(Delivery::Stale),
            Disposition::Buffered => Ok(Delivery::Buffered),
            Disposition::Released => match own {
                Some(Err(error)) => Err(error),
                Some(Ok(Outcome::Ignored)) => Ok(Delivery::Ignored),
                Some(Ok(Outcome::Applied)) | None => Ok(Delivery::Applied(self.room.snapshot())),
            },
        }
    }

    /// Advance time: expire reorder gaps, run a presence scan if one is due
    /// and check whether the room should be retired.
    pub fn tick(&mut self, env: &E) {
        let now = env.now();

        for action in self.sequencer.expire(now) {
            match action {
                SequencerAction::Release(event) => {
                    if let Err(error) = self.apply(&event, env) {
                        self.reject(event, error);
                    }
                },
                SequencerAction::GapSkipped { participant_id, first, last } => {
                    self.gap_skipped(participant_id, first, last);
                },
            }
        }

        if self.presence.is_due(now) {
            let leaves = self.presence.scan(&self.room, &self.sequencer, now);
            for leave in leaves {
                let participant_id = leave.participant_id.clone();
                if let Err(error) = self.sequence(leave, env) {
                    tracing::warn!(
                        room_id = %self.room.id(),
                        participant = %participant_id,
                        error = %error,
                        "forced leave rejected"
                    );
                }
            }
        }

        self.check_vacancy(now);
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_wakeup(&self) -> Option<E::Instant> {
        let vacancy = self
            .room
            .vacant_since()
            .filter(|_| !self.vacated)
            .map(|since| since + self.room_grace);
        [self.sequencer.next_deadline(), Some(self.presence.next_scan()), vacancy]
            .into_iter()
            .flatten()
            .min()
    }

    fn apply(&mut self, event: &Event, env: &E) -> Result<Outcome, SessionError> {
        let participant_id = &event.participant_id;
        let status = self.room.status_of(participant_id);

        let mutation = match transition(participant_id, status, &event.kind) {
            Ok(Transition::Apply(mutation)) => mutation,
            Ok(Transition::Drop) => {
                tracing::debug!(
                    room_id = %self.room.id(),
                    participant = %participant_id,
                    seq = event.seq,
                    event = event.kind.name(),
                    "dropping event for departed participant"
                );
                let participant_id = participant_id.clone();
                self.outbox.push(RoomAction::Ignored { participant_id, seq: event.seq });
                return Ok(Outcome::Ignored);
            },
            Err(_) if status.is_none() => {
                return Err(SessionError::ParticipantNotFound {
                    room: self.room.id().clone(),
                    participant: participant_id.clone(),
                });
            },
            Err(error) => return Err(error),
        };

        let forced = matches!(mutation, Mutation::Depart { forced: true });
        let now = env.now();
        let wall_ms = env.wall_clock_millis();
        let applied = self.room.apply_participant_mutation(participant_id, mutation, now, wall_ms)?;

        if let Applied::Committed(snapshot) = applied {
            self.observers.notify(&snapshot);
            self.outbox.push(RoomAction::Committed(snapshot));
            if forced {
                let participant_id = participant_id.clone();
                self.outbox.push(RoomAction::ForcedLeave { participant_id });
            }
        }

        Ok(Outcome::Applied)
    }

    fn reject(&mut self, event: Event, error: SessionError) {
        tracing::warn!(
            room_id = %self.room.id(),
            participant = %event.participant_id,
            seq = event.seq,
            error = %error,
            "buffered event rejected"
        );
        self.outbox.push(RoomAction::Rejected {
            participant_id: event.participant_id,
            seq: event.seq,
            error,
        });
    }

    fn gap_skipped(&mut self, participant_id: ParticipantId, first: u64, last: u64) {
        tracing::warn!(
            room_id = %self.room.id(),
            participant = %participant_id,
            first,
            last,
            "sequence gap declared lost, dropped events"
        );
        self.outbox.push(RoomAction::GapSkipped { participant_id, first, last });
    }

    fn check_vacancy(&mut self, now: E::Instant) {
        if self.vacated || !self.room.is_expired(now, self.room_grace) {
            return;
        }
        self.vacated = true;
        tracing::info!(room_id = %self.room.id(), "room empty past grace period, retiring");
        self.outbox.push(RoomAction::Vacated { room_id: self.room.id().clone() });
    }
}

impl<E: Environment> RoomSlot for RoomSession<E> {
    fn snapshot(&self) -> Arc<Snapshot> {
        self.room.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::{
        event::{MediaField, MediaState},
        participant::LifecycleState,
    };

    #[derive(Clone, Default)]
    struct TestEnv {
        now: Arc<Mutex<Duration>>,
    }

    impl TestEnv {
        fn advance(&self, by: Duration) {
            *self.now.lock().unwrap() += by;
        }
    }

    impl Environment for TestEnv {
        type Instant = Duration;

        fn now(&self) -> Duration {
            *self.now.lock().unwrap()
        }

        fn wall_clock_millis(&self) -> u64 {
            1_700_000_000_000 + self.now().as_millis() as u64
        }
    }

    fn session(env: &TestEnv) -> RoomSession<TestEnv> {
        RoomSession::new(RoomId::new("r1"), &SessionConfig::default(), env)
    }

    fn event(pid: &str, seq: u64, kind: EventKind) -> Event {
        Event::new(RoomId::new("r1"), ParticipantId::new(pid), seq, kind)
    }

    fn join(pid: &str, seq: u64) -> Event {
        let display_name = pid.to_uppercase();
        event(pid, seq, EventKind::Join { display_name, media: MediaState::default() })
    }

    fn committed(actions: &[RoomAction]) -> Vec<u64> {
        actions
            .iter()
            .filter_map(|a| match a {
                RoomAction::Committed(s) => Some(s.room_seq),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn join_commits_and_notifies() {
        let env = TestEnv::default();
        let mut session = session(&env);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = session.subscribe(Box::new(move |s| sink.lock().unwrap().push(s.room_seq)));

        let delivery = session.deliver(join("alice", 1), &env).unwrap();

        let snapshot = delivery.snapshot().unwrap();
        assert_eq!(snapshot.room_seq, 1);
        assert!(snapshot.contains(&ParticipantId::new("alice")));
        assert_eq!(committed(&session.take_actions()), [1]);
        assert_eq!(*seen.lock().unwrap(), [1]);
    }

    #[test]
    fn wrong_room_is_rejected() {
        let env = TestEnv::default();
        let mut session = session(&env);
        let stray =
            Event::new(RoomId::new("other"), ParticipantId::new("a"), 1, EventKind::Heartbeat);

        assert!(matches!(session.deliver(stray, &env), Err(SessionError::RoomNotFound(_))));
    }

    #[test]
    fn unknown_participant_non_join_is_not_found() {
        let env = TestEnv::default();
        let mut session = session(&env);
        session.deliver(join("alice", 1), &env).unwrap();

        let result = session.deliver(event("bob", 1, EventKind::Heartbeat), &env);
        assert!(matches!(result, Err(SessionError::ParticipantNotFound { .. })));
        assert_eq!(session.snapshot().room_seq, 1);
    }

    #[test]
    fn heartbeat_does_not_commit() {
        let env = TestEnv::default();
        let mut session = session(&env);
        session.deliver(join("alice", 1), &env).unwrap();
        session.take_actions();

        let delivery = session.deliver(event("alice", 2, EventKind::Heartbeat), &env).unwrap();
        assert_eq!(delivery.as_str(), "applied");
        assert!(session.take_actions().is_empty());
        assert_eq!(session.snapshot().room_seq, 1);
    }

    #[test]
    fn command_uses_next_local_seq() {
        let env = TestEnv::default();
        let mut session = session(&env);
        session.deliver(join("alice", 10), &env).unwrap();

        let toggle = EventKind::MediaToggle { field: MediaField::AudioOn, value: false };
        session.command(ParticipantId::new("alice"), toggle, &env).unwrap();

        assert_eq!(session.sequencer().last_applied(&ParticipantId::new("alice")), Some(11));
        let view = session.snapshot().participant(&ParticipantId::new("alice")).cloned().unwrap();
        assert!(!view.audio_on);
    }

    #[test]
    fn buffered_event_rejected_on_release_is_reported() {
        let env = TestEnv::default();
        let mut session = session(&env);
        session.deliver(join("alice", 1), &env).unwrap();

        // Seq 3 is a second join: invalid once released behind seq 2.
        assert_eq!(session.deliver(join("alice", 3), &env).unwrap(), Delivery::Buffered);
        session.deliver(event("alice", 2, EventKind::Heartbeat), &env).unwrap();

        let rejected = session
            .take_actions()
            .into_iter()
            .any(|a| matches!(a, RoomAction::Rejected { seq: 3, .. }));
        assert!(rejected);
    }

    #[test]
    fn tick_skips_expired_gap() {
        let env = TestEnv::default();
        let mut session = session(&env);
        session.deliver(join("alice", 1), &env).unwrap();

        let toggle = EventKind::MediaToggle { field: MediaField::VideoOn, value: false };
        session.deliver(event("alice", 3, toggle), &env).unwrap();
        session.take_actions();

        env.advance(Duration::from_secs(2));
        session.tick(&env);

        let actions = session.take_actions();
        let skipped =
            |a: &RoomAction| matches!(a, RoomAction::GapSkipped { first: 2, last: 2, .. });
        assert!(actions.iter().any(skipped));
        assert!(!session.snapshot().participants[0].video_on);
    }

    #[test]
    fn silent_participant_is_forced_out_once() {
        let env = TestEnv::default();
        let mut session = session(&env);
        session.deliver(join("alice", 1), &env).unwrap();
        session.deliver(join("bob", 1), &env).unwrap();
        session.take_actions();

        env.advance(Duration::from_secs(20));
        session.deliver(event("bob", 2, EventKind::Heartbeat), &env).unwrap();
        env.advance(Duration::from_secs(11));
        session.tick(&env);
        env.advance(Duration::from_secs(1));
        session.tick(&env);

        let forced: Vec<_> = session
            .take_actions()
            .into_iter()
            .filter_map(|a| match a {
                RoomAction::ForcedLeave { participant_id } => Some(participant_id),
                _ => None,
            })
            .collect();
        assert_eq!(forced, [ParticipantId::new("alice")]);
        assert!(!session.snapshot().contains(&ParticipantId::new("alice")));
        assert!(session.snapshot().contains(&ParticipantId::new("bob")));
    }

    #[test]
    fn last_leave_vacates_with_zero_grace() {
        let env = TestEnv::default();
        let mut session = session(&env);
        session.deliver(join("alice", 1), &env).unwrap();
        session.deliver(event("alice", 2, EventKind::Leave { forced: false }), &env).unwrap();

        assert!(session.is_vacated());
        let actions = session.take_actions();
        assert!(matches!(actions.last(), Some(RoomAction::Vacated { .. })));
    }

    #[test]
    fn grace_period_keeps_empty_room() {
        let env = TestEnv::default();
        let config =
            SessionConfig { room_grace: Duration::from_secs(5), ..SessionConfig::default() };
        let mut session = RoomSession::new(RoomId::new("r1"), &config, &env);
        session.deliver(join("alice", 1), &env).unwrap();
        session.deliver(event("alice", 2, EventKind::Leave { forced: false }), &env).unwrap();
        assert!(!session.is_vacated());

        env.advance(Duration::from_secs(4));
        session.tick(&env);
        assert!(!session.is_vacated());

        env.advance(Duration::from_secs(1));
        session.tick(&env);
        assert!(session.is_vacated());
    }

    #[test]
    fn next_wakeup_tracks_reorder_deadline() {
        let env = TestEnv::default();
        let mut session = session(&env);
        session.deliver(join("alice", 1), &env).unwrap();
        session.tick(&env);
        assert_eq!(session.next_wakeup(), Some(Duration::from_secs(1)));

        session.deliver(event("alice", 5, EventKind::Heartbeat), &env).unwrap();
        env.advance(Duration::from_millis(500));
        session.tick(&env);
        assert_eq!(session.next_wakeup(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn chat_through_command() {
        let env = TestEnv::default();
        let mut session = session(&env);
        session.deliver(join("alice", 1), &env).unwrap();

        let chat = EventKind::Chat { text: "hello".to_string() };
        let delivery = session.command(ParticipantId::new("alice"), chat, &env).unwrap();

        let snapshot = delivery.snapshot().unwrap();
        assert_eq!(snapshot.chat.len(), 1);
        assert_eq!(snapshot.chat[0].sender_name, "ALICE");
        assert_eq!(snapshot.chat[0].sent_at_ms, 1_700_000_000_000);
    }

    #[test]
    fn reserved_sequence_number_is_invalid() {
        let env = TestEnv::default();
        let mut session = session(&env);

        let result = session.deliver(join("alice", u64::MAX), &env);
        assert!(matches!(result, Err(SessionError::InvalidEvent(_))));
        assert_eq!(session.room().status_of(&ParticipantId::new("alice")), None);

        session.deliver(join("alice", 1), &env).unwrap();
        session.deliver(event("alice", 2, EventKind::Leave { forced: false }), &env).unwrap();
        let late = session.deliver(event("alice", u64::MAX, EventKind::Heartbeat), &env);
        assert!(matches!(late, Err(SessionError::InvalidEvent(_))));
    }

    #[test]
    fn top_client_sequence_still_allows_leaving() {
        let env = TestEnv::default();
        let config =
            SessionConfig { room_grace: Duration::from_secs(60), ..SessionConfig::default() };
        let mut session = RoomSession::new(RoomId::new("r1"), &config, &env);
        session.deliver(join("alice", MAX_CLIENT_SEQ), &env).unwrap();
        session.deliver(join("bob", 1), &env).unwrap();

        // The forced leave takes the one sequence number clients cannot use
        env.advance(Duration::from_secs(31));
        session.deliver(event("bob", 2, EventKind::Heartbeat), &env).unwrap();
        session.tick(&env);
        let status = session.room().status_of(&ParticipantId::new("alice"));
        assert_eq!(status, Some(LifecycleState::Left));

        let chat = EventKind::Chat { text: "hi".to_string() };
        let exhausted = session.command(ParticipantId::new("alice"), chat, &env);
        assert!(matches!(exhausted, Err(SessionError::InvalidEvent(_))));
        let media = MediaState::default();
        let kind = EventKind::Join { display_name: "ALICE".to_string(), media };
        let rejoin = session.command(ParticipantId::new("alice"), kind, &env);
        assert!(matches!(rejoin, Err(SessionError::InvalidEvent(_))));
    }

    #[test]
    fn refused_first_join_can_be_retried_with_same_seq() {
        let env = TestEnv::default();
        let mut session = session(&env);

        let kind = EventKind::Join { display_name: String::new(), media: MediaState::default() };
        let unnamed = event("alice", 1, kind);
        assert!(matches!(session.deliver(unnamed, &env), Err(SessionError::InvalidEvent(_))));

        let delivery = session.deliver(join("alice", 1), &env).unwrap();
        assert!(delivery.snapshot().unwrap().contains(&ParticipantId::new("alice")));
    }

    #[test]
    fn unused_room_is_discarded_only_before_first_join() {
        let env = TestEnv::default();
        let mut session = session(&env);

        // Created but never joined: no grace clock runs
        env.advance(Duration::from_secs(3_600));
        session.tick(&env);
        assert!(!session.is_vacated());
        assert_eq!(session.next_wakeup(), Some(Duration::from_secs(3_601)));

        session.deliver(join("alice", 1), &env).unwrap();
        session.discard_if_unused();
        assert!(!session.is_vacated());

        let mut fresh = RoomSession::new(RoomId::new("r2"), &SessionConfig::default(), &env);
        fresh.discard_if_unused();
        assert!(fresh.is_vacated());
        assert!(matches!(fresh.take_actions().as_slice(), [RoomAction::Vacated { .. }]));
    }
}
