//! Newline-delimited JSON wire format.
//!
//! One JSON object per line in each direction. Inbound lines are client
//! events, outbound lines are acks, errors and room snapshots.
//!
//! ```text
//! → {"roomId":"standup","participantId":"p1","kind":"join","seq":1,"payload":{"displayName":"A"}}
//! ← {"type":"ack","roomId":"standup","participantId":"p1","seq":1,"outcome":"applied"}
//! ← {"type":"snapshot","roomId":"standup","roomSeq":1,"participants":[...]}
//! ```

use std::sync::Arc;

use huddle_core::{
    Delivery, Event, EventKind, MediaField, MediaState, ParticipantId, RoomId, Snapshot,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::CoordinatorError;

/// Errors decoding an inbound line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Not valid JSON, or missing/mistyped envelope fields
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Envelope is fine but the payload does not match the kind
    #[error("invalid {kind} payload: {reason}")]
    Payload {
        /// Event kind the payload was for
        kind: &'static str,
        /// Decoder message
        reason: String,
    },

    /// Identifier field is empty
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// Line longer than the transport accepts
    #[error("message exceeds {0} bytes")]
    TooLong(usize),
}

impl WireError {
    /// Wire error code.
    pub fn code(&self) -> &'static str {
        "InvalidEvent"
    }
}

/// Inbound event kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InboundKind {
    /// Enter a room
    Join,
    /// Leave a room
    Leave,
    /// Change one media flag
    MediaToggle,
    /// Liveness signal
    Heartbeat,
    /// Chat message
    Chat,
}

impl InboundKind {
    fn name(self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::MediaToggle => "mediaToggle",
            Self::Heartbeat => "heartbeat",
            Self::Chat => "chat",
        }
    }
}

/// Inbound envelope, before the payload is interpreted.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    /// Target room
    pub room_id: RoomId,
    /// Originating participant
    pub participant_id: ParticipantId,
    /// Event kind
    pub kind: InboundKind,
    /// Per-participant sequence number
    pub seq: u64,
    /// Kind-specific payload
    #[serde(default)]
    pub payload: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct JoinPayload {
    display_name: String,
    video_on: Option<bool>,
    audio_on: Option<bool>,
    screen_sharing: Option<bool>,
}

#[derive(Deserialize)]
struct TogglePayload {
    field: MediaField,
    value: bool,
}

#[derive(Deserialize)]
struct ChatPayload {
    text: String,
}

impl InboundEvent {
    /// Interpret the payload and build a core event.
    pub fn into_event(self) -> Result<Event, WireError> {
        if self.room_id.as_str().is_empty() {
            return Err(WireError::EmptyField("roomId"));
        }
        if self.participant_id.as_str().is_empty() {
            return Err(WireError::EmptyField("participantId"));
        }

        let kind = match self.kind {
            InboundKind::Join => {
                let payload: JoinPayload = payload(self.kind, self.payload)?;
                let defaults = MediaState::default();
                EventKind::Join {
                    display_name: payload.display_name,
                    media: MediaState {
                        video_on: payload.video_on.unwrap_or(defaults.video_on),
                        audio_on: payload.audio_on.unwrap_or(defaults.audio_on),
                        screen_sharing: payload.screen_sharing.unwrap_or(defaults.screen_sharing),
                    },
                }
            },
            InboundKind::Leave => EventKind::Leave { forced: false },
            InboundKind::MediaToggle => {
                let TogglePayload { field, value } = payload(self.kind, self.payload)?;
                EventKind::MediaToggle { field, value }
            },
            InboundKind::Heartbeat => EventKind::Heartbeat,
            InboundKind::Chat => {
                let ChatPayload { text } = payload(self.kind, self.payload)?;
                EventKind::Chat { text }
            },
        };

        Ok(Event::new(self.room_id, self.participant_id, self.seq, kind))
    }
}

fn payload<T: serde::de::DeserializeOwned>(
    kind: InboundKind,
    value: serde_json::Value,
) -> Result<T, WireError> {
    serde_json::from_value(value)
        .map_err(|e| WireError::Payload { kind: kind.name(), reason: e.to_string() })
}

/// Decode one inbound line into a core event.
pub fn decode_line(line: &str) -> Result<Event, WireError> {
    let inbound: InboundEvent =
        serde_json::from_str(line).map_err(|e| WireError::Malformed(e.to_string()))?;
    inbound.into_event()
}

/// Outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Outbound {
    /// Room state after a commit
    Snapshot(Arc<Snapshot>),

    /// Fate of one inbound event
    #[serde(rename_all = "camelCase")]
    Ack {
        /// Room the event addressed
        room_id: RoomId,
        /// Sender of the event
        participant_id: ParticipantId,
        /// Sequence number of the event
        seq: u64,
        /// `applied`, `buffered`, `stale` or `ignored`
        outcome: &'static str,
    },

    /// Rejected inbound line
    Error {
        /// Stable error code
        code: &'static str,
        /// Human-readable description
        message: String,
    },
}

impl Outbound {
    /// Ack for a delivered event.
    pub fn ack(event: &Event, delivery: &Delivery) -> Self {
        Self::Ack {
            room_id: event.room_id.clone(),
            participant_id: event.participant_id.clone(),
            seq: event.seq,
            outcome: delivery.as_str(),
        }
    }

    /// Error reply for a line that failed to decode.
    pub fn wire_error(err: &WireError) -> Self {
        Self::Error { code: err.code(), message: err.to_string() }
    }

    /// Error reply for an event the coordinator rejected.
    pub fn coordinator_error(err: &CoordinatorError) -> Self {
        Self::Error { code: err.code(), message: err.to_string() }
    }

    /// Encode as one line without the trailing newline.
    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            // Serializing these types only fails on a broken writer
            format!(r#"{{"type":"error","code":"Internal","message":"{e}"}}"#)
        })
    }
}
