//! Identifiers and inbound events.
//!
//! Events are the only way state changes. They carry a per-participant
//! sequence number chosen by the originating client and an arrival number
//! stamped by the room's sequencer.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Externally assigned room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap a room identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Participant identifier, unique within a room and stable across reconnects.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap a participant identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ParticipantId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One of the orthogonal media flags on an active participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MediaField {
    /// Camera on/off
    VideoOn,
    /// Microphone on/off
    AudioOn,
    /// Screen share on/off
    ScreenSharing,
}

impl fmt::Display for MediaField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VideoOn => "videoOn",
            Self::AudioOn => "audioOn",
            Self::ScreenSharing => "screenSharing",
        };
        f.write_str(name)
    }
}

/// Media flags of a participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaState {
    /// Camera is publishing
    pub video_on: bool,
    /// Microphone is publishing
    pub audio_on: bool,
    /// Screen is being shared
    pub screen_sharing: bool,
}

impl Default for MediaState {
    /// Camera and microphone on, no screen share.
    fn default() -> Self {
        Self { video_on: true, audio_on: true, screen_sharing: false }
    }
}

impl MediaState {
    /// Current value of a flag.
    pub fn get(&self, field: MediaField) -> bool {
        match field {
            MediaField::VideoOn => self.video_on,
            MediaField::AudioOn => self.audio_on,
            MediaField::ScreenSharing => self.screen_sharing,
        }
    }

    /// Set a flag, returning `true` if the value changed.
    pub fn set(&mut self, field: MediaField, value: bool) -> bool {
        let slot = match field {
            MediaField::VideoOn => &mut self.video_on,
            MediaField::AudioOn => &mut self.audio_on,
            MediaField::ScreenSharing => &mut self.screen_sharing,
        };
        let changed = *slot != value;
        *slot = value;
        changed
    }
}

/// What an event asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// Enter the room (or re-enter after leaving)
    Join {
        /// Name shown to other participants
        display_name: String,
        /// Initial media flags
        media: MediaState,
    },
    /// Leave the room
    Leave {
        /// Synthesized by the presence monitor after a heartbeat timeout
        forced: bool,
    },
    /// Flip one media flag
    MediaToggle {
        /// Flag to change
        field: MediaField,
        /// New value
        value: bool,
    },
    /// Liveness signal
    Heartbeat,
    /// In-call chat message
    Chat {
        /// Message body
        text: String,
    },
}

impl EventKind {
    /// Short name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join { .. } => "join",
            Self::Leave { forced: false } => "leave",
            Self::Leave { forced: true } => "forced-leave",
            Self::MediaToggle { .. } => "media-toggle",
            Self::Heartbeat => "heartbeat",
            Self::Chat { .. } => "chat",
        }
    }

    /// Join events may address a participant the room does not know yet.
    pub fn is_join(&self) -> bool {
        matches!(self, Self::Join { .. })
    }

    /// Leave events are never held in the reorder buffer.
    pub fn is_leave(&self) -> bool {
        matches!(self, Self::Leave { .. })
    }
}

/// An inbound membership or media-state event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Target room
    pub room_id: RoomId,
    /// Originating participant
    pub participant_id: ParticipantId,
    /// Per-participant sequence number assigned by the client
    pub seq: u64,
    /// Per-room arrival number assigned by the sequencer (0 until stamped)
    pub arrival: u64,
    /// Payload
    pub kind: EventKind,
}

impl Event {
    /// Create an unstamped event.
    pub fn new(
        room_id: RoomId,
        participant_id: ParticipantId,
        seq: u64,
        kind: EventKind,
    ) -> Self {
        Self { room_id, participant_id, seq, arrival: 0, kind }
    }
}
