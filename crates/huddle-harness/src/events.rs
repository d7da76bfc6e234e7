//! Event builders for tests.
//!
//! A [`Client`] plays one participant: it numbers its events the way a real
//! client would, so tests can build realistic streams and then duplicate,
//! drop or shuffle them.

use huddle_core::{Event, EventKind, MediaField, MediaState, ParticipantId, RoomId};
use rand::{SeedableRng, seq::SliceRandom};
use rand_chacha::ChaCha8Rng;

/// Simulated client producing sequenced events for one participant.
#[derive(Debug, Clone)]
pub struct Client {
    room_id: RoomId,
    participant_id: ParticipantId,
    display_name: String,
    next_seq: u64,
}

impl Client {
    /// Client whose first event carries sequence number 1.
    pub fn new(room_id: &str, participant_id: &str) -> Self {
        Self {
            room_id: RoomId::new(room_id),
            participant_id: ParticipantId::new(participant_id),
            display_name: participant_id.to_string(),
            next_seq: 1,
        }
    }

    /// Use a custom display name for joins.
    pub fn with_display_name(mut self, display_name: &str) -> Self {
        self.display_name = display_name.to_string();
        self
    }

    /// Participant this client speaks for.
    pub fn participant_id(&self) -> &ParticipantId {
        &self.participant_id
    }

    /// Room this client talks to.
    pub fn room_id(&self) -> &RoomId {
        &self.room_id
    }

    /// Sequence number the next event will carry.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Skip sequence numbers, as if events were lost in transit.
    pub fn skip(&mut self, count: u64) {
        self.next_seq = self.next_seq.saturating_add(count);
    }

    /// Build an event with the next sequence number.
    pub fn event(&mut self, kind: EventKind) -> Event {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.saturating_add(1);
        Event::new(self.room_id.clone(), self.participant_id.clone(), seq, kind)
    }

    /// Join with default media.
    pub fn join(&mut self) -> Event {
        self.join_with(MediaState::default())
    }

    /// Join with explicit media flags.
    pub fn join_with(&mut self, media: MediaState) -> Event {
        let display_name = self.display_name.clone();
        self.event(EventKind::Join { display_name, media })
    }

    /// Voluntary leave.
    pub fn leave(&mut self) -> Event {
        self.event(EventKind::Leave { forced: false })
    }

    /// Flip one media flag.
    pub fn toggle(&mut self, field: MediaField, value: bool) -> Event {
        self.event(EventKind::MediaToggle { field, value })
    }

    /// Liveness signal.
    pub fn heartbeat(&mut self) -> Event {
        self.event(EventKind::Heartbeat)
    }

    /// Chat message.
    pub fn chat(&mut self, text: &str) -> Event {
        self.event(EventKind::Chat { text: text.to_string() })
    }
}

/// Shuffle events deterministically.
pub fn shuffled(mut events: Vec<Event>, seed: u64) -> Vec<Event> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    events.shuffle(&mut rng);
    events
}

/// Interleave each event with a duplicate of itself.
pub fn duplicated(events: &[Event]) -> Vec<Event> {
    events.iter().flat_map(|event| [event.clone(), event.clone()]).collect()
}
