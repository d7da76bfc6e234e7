//! Per-room participant store.
//!
//! The room owns every [`Participant`] in it and the room sequence counter.
//! Each committed change mutates exactly one participant (or appends one chat
//! message), bumps the counter and publishes a fresh [`Snapshot`] in the same
//! step, so a reader can never see a snapshot whose `room_seq` disagrees with
//! its contents.
//!
//! Participants that left stay in the store as tombstones so late events can
//! be recognised and dropped. They are never counted or shown.

use std::{
    collections::{HashMap, VecDeque},
    ops::Sub,
    sync::Arc,
    time::Duration,
};

use crate::{
    config::SessionConfig,
    error::SessionError,
    event::{MediaState, ParticipantId, RoomId},
    participant::{LifecycleState, Mutation, Participant},
    snapshot::{ChatMessage, ParticipantView, Snapshot},
};

/// Result of applying a mutation to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// A change committed; the new snapshot is attached
    Committed(Arc<Snapshot>),
    /// Liveness refreshed, nothing committed
    Touched,
    /// Value already matched, nothing committed
    Unchanged,
}

/// One room: participants, chat log, sequence counter.
///
/// Generic over `I` (Instant type) to support virtual time in tests.
#[derive(Debug)]
pub struct Room<I> {
    id: RoomId,
    created_at: I,
    participants: HashMap<ParticipantId, Participant<I>>,
    room_seq: u64,
    chat: VecDeque<ChatMessage>,
    chat_history_limit: usize,
    max_chat_length: usize,
    /// Set once the last active participant leaves, cleared on the next join
    vacant_since: Option<I>,
    snapshot: Arc<Snapshot>,
}

impl<I> Room<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create an empty room.
    pub fn new(id: RoomId, now: I, config: &SessionConfig) -> Self {
        let snapshot = Arc::new(Snapshot::empty(id.clone()));
        Self {
            id,
            created_at: now,
            participants: HashMap::new(),
            room_seq: 0,
            chat: VecDeque::new(),
            chat_history_limit: config.chat_history_limit,
            max_chat_length: config.max_chat_length,
            vacant_since: None,
            snapshot,
        }
    }

    /// Room identifier.
    pub fn id(&self) -> &RoomId {
        &self.id
    }

    /// When the room was created.
    pub fn created_at(&self) -> I {
        self.created_at
    }

    /// Current room sequence counter.
    pub fn room_seq(&self) -> u64 {
        self.room_seq
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        Arc::clone(&self.snapshot)
    }

    /// Participant record, including departed instances.
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant<I>> {
        self.participants.get(id)
    }

    /// Lifecycle state of a participant, `None` if never seen.
    pub fn status_of(&self, id: &ParticipantId) -> Option<LifecycleState> {
        self.participants.get(id).map(Participant::state)
    }

    /// Whether nobody has ever been admitted.
    pub fn is_pristine(&self) -> bool {
        self.participants.is_empty()
    }

    /// Participants currently in the call.
    pub fn active_participants(&self) -> impl Iterator<Item = &Participant<I>> {
        self.participants.values().filter(|p| p.is_active())
    }

    /// Number of participants in [`LifecycleState::Active`].
    pub fn active_count(&self) -> usize {
        self.active_participants().count()
    }

    /// Instant the last active participant left, while the room stays empty.
    pub fn vacant_since(&self) -> Option<I> {
        self.vacant_since
    }

    /// Whether the room has been empty for at least `grace`.
    pub fn is_expired(&self, now: I, grace: Duration) -> bool {
        match self.vacant_since {
            Some(since) => now >= since && now - since >= grace,
            None => false,
        }
    }

    /// Apply one validated mutation to one participant.
    ///
    /// Only the state-machine path calls this. `wall_ms` stamps chat messages.
    ///
    /// # Errors
    ///
    /// - `ParticipantNotFound` if the mutation needs an active instance and
    ///   there is none
    /// - `InvalidTransition` if an admit targets an active instance
    /// - `InvalidEvent` for an empty display name or invalid chat text
    pub fn apply_participant_mutation(
        &mut self,
        id: &ParticipantId,
        mutation: Mutation,
        now: I,
        wall_ms: u64,
    ) -> Result<Applied, SessionError> {
        match mutation {
            Mutation::Admit { display_name, media } => self.admit(id, display_name, media, now),
            Mutation::SetMedia { field, value } => {
                let participant = self.active_mut(id)?;
                if !participant.set_media(field, value) {
                    return Ok(Applied::Unchanged);
                }
                Ok(self.commit())
            },
            Mutation::Touch => {
                self.active_mut(id)?.touch(now);
                Ok(Applied::Touched)
            },
            Mutation::Depart { forced } => {
                self.active_mut(id)?.depart();
                if self.active_count() == 0 {
                    self.vacant_since = Some(now);
                }
                tracing::debug!(room_id = %self.id, participant = %id, forced, "participant left");
                Ok(self.commit())
            },
            Mutation::Chat { text } => self.append_chat(id, text, wall_ms),
        }
    }

    /// Append a chat message from an active participant.
    ///
    /// The log keeps the most recent `chat_history_limit` messages.
    ///
    /// # Errors
    ///
    /// - `InvalidEvent` if the text is blank or longer than `max_chat_length`
    ///   characters
    /// - `ParticipantNotFound` if the sender is not active
    pub fn append_chat(
        &mut self,
        sender: &ParticipantId,
        text: String,
        wall_ms: u64,
    ) -> Result<Applied, SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::InvalidEvent("chat text is empty".to_string()));
        }
        let length = text.chars().count();
        if length > self.max_chat_length {
            return Err(SessionError::InvalidEvent(format!(
                "chat text is {length} characters, limit is {}",
                self.max_chat_length
            )));
        }

        let sender_name = self.active_mut(sender)?.display_name().to_string();
        self.chat.push_back(ChatMessage {
            room_seq: self.room_seq + 1,
            sender: sender.clone(),
            sender_name,
            text,
            sent_at_ms: wall_ms,
        });
        while self.chat.len() > self.chat_history_limit {
            self.chat.pop_front();
        }

        Ok(self.commit())
    }

    fn admit(
        &mut self,
        id: &ParticipantId,
        display_name: String,
        media: MediaState,
        now: I,
    ) -> Result<Applied, SessionError> {
        if display_name.trim().is_empty() {
            return Err(SessionError::InvalidEvent("display name is empty".to_string()));
        }
        if self.participants.get(id).is_some_and(Participant::is_active) {
            return Err(SessionError::InvalidTransition {
                participant: id.clone(),
                state: LifecycleState::Active,
                event: "join",
            });
        }

        let join_seq = self.room_seq + 1;
        let mut participant = Participant::joining(id.clone(), display_name, now, join_seq);
        participant.confirm(media);
        self.participants.insert(id.clone(), participant);
        self.vacant_since = None;

        tracing::debug!(room_id = %self.id, participant = %id, "participant joined");
        Ok(self.commit())
    }

    fn active_mut(&mut self, id: &ParticipantId) -> Result<&mut Participant<I>, SessionError> {
        match self.participants.get_mut(id) {
            Some(participant) if participant.is_active() => Ok(participant),
            _ => Err(SessionError::ParticipantNotFound {
                room: self.id.clone(),
                participant: id.clone(),
            }),
        }
    }

    /// Bump the counter and publish. Called once per committed change.
    fn commit(&mut self) -> Applied {
        self.room_seq += 1;

        let mut participants: Vec<ParticipantView> = self
            .active_participants()
            .map(|p| {
                let media = p.media();
                ParticipantView {
                    id: p.id().clone(),
                    display_name: p.display_name().to_string(),
                    video_on: media.video_on,
                    audio_on: media.audio_on,
                    screen_sharing: media.screen_sharing,
                    state: p.state(),
                    join_seq: p.join_seq(),
                }
            })
            .collect();
        participants.sort_by_key(|p| p.join_seq);

        let snapshot = Arc::new(Snapshot {
            room_id: self.id.clone(),
            room_seq: self.room_seq,
            participants,
            chat: self.chat.iter().cloned().collect(),
        });

        debug_assert_eq!(snapshot.active_count(), self.active_count());
        self.snapshot = Arc::clone(&snapshot);
        Applied::Committed(snapshot)
    }
}
