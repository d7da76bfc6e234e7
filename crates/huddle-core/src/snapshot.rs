//! Immutable room views handed to readers and subscribers.

use serde::{Deserialize, Serialize};

use crate::{
    event::{ParticipantId, RoomId},
    participant::LifecycleState,
};

/// Point-in-time copy of a room.
///
/// Never patched in place; every committed change produces a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    /// Room this snapshot describes
    pub room_id: RoomId,
    /// Room sequence counter at the time of the snapshot
    pub room_seq: u64,
    /// Active participants, ordered by join sequence
    pub participants: Vec<ParticipantView>,
    /// In-session chat log, oldest first
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub chat: Vec<ChatMessage>,
}

impl Snapshot {
    /// Snapshot of a room with no participants.
    pub fn empty(room_id: RoomId) -> Self {
        Self { room_id, room_seq: 0, participants: Vec::new(), chat: Vec::new() }
    }

    /// Number of participants shown.
    pub fn active_count(&self) -> usize {
        self.participants.len()
    }

    /// Look up a participant by id.
    pub fn participant(&self, id: &ParticipantId) -> Option<&ParticipantView> {
        self.participants.iter().find(|p| &p.id == id)
    }

    /// Whether `id` is shown in this snapshot.
    pub fn contains(&self, id: &ParticipantId) -> bool {
        self.participant(id).is_some()
    }
}

/// One participant as seen by readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    /// Participant identifier
    pub id: ParticipantId,
    /// Display name
    pub display_name: String,
    /// Camera on
    pub video_on: bool,
    /// Microphone on
    pub audio_on: bool,
    /// Sharing screen
    pub screen_sharing: bool,
    /// Lifecycle state (always `active` for shown participants)
    pub state: LifecycleState,
    /// Room sequence value at which this instance joined
    #[serde(skip)]
    pub join_seq: u64,
}

/// A chat message committed to a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Room sequence value at which the message committed
    pub room_seq: u64,
    /// Sender
    pub sender: ParticipantId,
    /// Sender display name at send time
    pub sender_name: String,
    /// Message body
    pub text: String,
    /// Milliseconds since the Unix epoch
    pub sent_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case_without_empty_chat() {
        let snapshot = Snapshot {
            room_id: RoomId::new("r1"),
            room_seq: 3,
            participants: vec![ParticipantView {
                id: ParticipantId::new("alice"),
                display_name: "Alice".to_string(),
                video_on: true,
                audio_on: false,
                screen_sharing: false,
                state: LifecycleState::Active,
                join_seq: 1,
            }],
            chat: Vec::new(),
        };

        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["roomId"], "r1");
        assert_eq!(json["roomSeq"], 3);
        assert_eq!(json["participants"][0]["displayName"], "Alice");
        assert_eq!(json["participants"][0]["audioOn"], false);
        assert_eq!(json["participants"][0]["state"], "active");
        assert!(json.get("chat").is_none());
        assert!(json["participants"][0].get("joinSeq").is_none());
    }

    #[test]
    fn lookup_by_id() {
        let mut snapshot = Snapshot::empty(RoomId::new("r1"));
        assert_eq!(snapshot.active_count(), 0);

        snapshot.participants.push(ParticipantView {
            id: ParticipantId::new("bob"),
            display_name: "Bob".to_string(),
            video_on: true,
            audio_on: true,
            screen_sharing: true,
            state: LifecycleState::Active,
            join_seq: 2,
        });

        assert!(snapshot.contains(&ParticipantId::new("bob")));
        assert!(!snapshot.contains(&ParticipantId::new("carol")));
    }
}
