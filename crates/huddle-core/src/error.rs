//! Error types for the session core.
//!
//! Every rejection is a typed value returned to the caller. Stale and
//! dropped events are not errors: stale events are reported as
//! [`Delivery::Stale`](crate::Delivery::Stale) and sequence gaps as
//! [`RoomAction::GapSkipped`](crate::RoomAction::GapSkipped).

use thiserror::Error;

use crate::{
    event::{ParticipantId, RoomId},
    participant::LifecycleState,
};

/// Coarse classification used at API boundaries (wire error codes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Room or participant does not exist
    NotFound,
    /// Duplicate room creation
    AlreadyExists,
    /// Event not valid for the participant's current state
    InvalidTransition,
    /// Event payload failed validation
    InvalidEvent,
}

impl ErrorKind {
    /// Stable name used in wire error codes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::InvalidTransition => "InvalidTransition",
            Self::InvalidEvent => "InvalidEvent",
        }
    }
}

/// Errors produced by the registry, state machine and sequencer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Room does not exist
    #[error("room not found: {0}")]
    RoomNotFound(RoomId),

    /// Participant is unknown to the room and the event is not a join
    #[error("participant {participant} not found in room {room}")]
    ParticipantNotFound {
        /// Room that was addressed
        room: RoomId,
        /// Unknown participant
        participant: ParticipantId,
    },

    /// Room already exists
    #[error("room already exists: {0}")]
    RoomAlreadyExists(RoomId),

    /// Event is not defined for the participant's current lifecycle state
    #[error(
        "invalid transition: cannot apply {event} to participant {participant} in state {state}"
    )]
    InvalidTransition {
        /// Participant the event addressed
        participant: ParticipantId,
        /// State the participant was in
        state: LifecycleState,
        /// Event name
        event: &'static str,
    },

    /// Event payload failed validation
    #[error("invalid event: {0}")]
    InvalidEvent(String),
}

impl SessionError {
    /// Boundary classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RoomNotFound(_) | Self::ParticipantNotFound { .. } => ErrorKind::NotFound,
            Self::RoomAlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::InvalidEvent(_) => ErrorKind::InvalidEvent,
        }
    }
}
