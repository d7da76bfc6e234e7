//! Participant lifecycle state machine.
//!
//! [`transition`] is a total function over (state, event): every
//! combination either yields a [`Transition`] or an explicit
//! [`SessionError::InvalidTransition`]. The state machine never touches the
//! registry itself; it tells the registry which [`Mutation`] to apply.
//!
//! # State Machine
//!
//! ```text
//!            Join           confirmed         Leave / HeartbeatTimeout
//! (none) ─────────> ┌─────────┐ ────────> ┌────────┐ ────────> ┌─────────┐ ──> ┌──────┐
//!                   │ Joining │           │ Active │           │ Leaving │     │ Left │
//!                   └─────────┘           └────────┘           └─────────┘     └──────┘
//!                                          │      ↑                               │
//!                                          └──────┘                               │
//!                               MediaToggle / Heartbeat / Chat                    │
//!                                                                                 │
//!  Join on a Left participant starts a fresh instance <───────────────────────────┘
//! ```
//!
//! Muted, video-off and sharing are flags on `Active`, not separate states.

use std::{fmt, ops::Sub, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    error::SessionError,
    event::{EventKind, MediaField, MediaState, ParticipantId},
};

/// Lifecycle state of one participant instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LifecycleState {
    /// Join received, not yet confirmed
    Joining,
    /// In the call
    Active,
    /// Leave accepted, teardown in progress
    Leaving,
    /// Gone (terminal for this instance)
    Left,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Joining => "joining",
            Self::Active => "active",
            Self::Leaving => "leaving",
            Self::Left => "left",
        };
        f.write_str(name)
    }
}

/// Change the registry applies to exactly one participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Create a fresh instance and confirm it
    Admit {
        /// Display name from the join payload
        display_name: String,
        /// Initial media flags from the join payload
        media: MediaState,
    },
    /// Update one media flag
    SetMedia {
        /// Flag to change
        field: MediaField,
        /// New value
        value: bool,
    },
    /// Refresh liveness (not a committed change)
    Touch,
    /// Leave the room
    Depart {
        /// Heartbeat timeout rather than explicit leave
        forced: bool,
    },
    /// Append a chat message on behalf of the participant
    Chat {
        /// Message body
        text: String,
    },
}

/// Outcome of [`transition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Apply this mutation
    Apply(Mutation),
    /// Drop the event (addressed to a participant that already left)
    Drop,
}

/// Decide what an event does to a participant in `state`.
///
/// `state` is `None` when the room has never seen this participant.
///
/// # Errors
///
/// - `ParticipantNotFound` for a non-join event to an unknown participant
///   (reported by the caller, which knows the room id)
/// - `InvalidTransition` for any combination not in the table above
pub fn transition(
    participant: &ParticipantId,
    state: Option<LifecycleState>,
    kind: &EventKind,
) -> Result<Transition, SessionError> {
    use LifecycleState::{Active, Joining, Leaving, Left};

    let invalid = |state: LifecycleState| SessionError::InvalidTransition {
        participant: participant.clone(),
        state,
        event: kind.name(),
    };

    match (state, kind) {
        (None | Some(Left | Joining), EventKind::Join { display_name, media }) => {
            let display_name = display_name.clone();
            Ok(Transition::Apply(Mutation::Admit { display_name, media: *media }))
        },
        (Some(Left), _) => Ok(Transition::Drop),

        (Some(Active), EventKind::MediaToggle { field, value }) => {
            Ok(Transition::Apply(Mutation::SetMedia { field: *field, value: *value }))
        },
        (Some(Active), EventKind::Heartbeat) => Ok(Transition::Apply(Mutation::Touch)),
        (Some(Active), EventKind::Leave { forced }) => {
            Ok(Transition::Apply(Mutation::Depart { forced: *forced }))
        },
        (Some(Active), EventKind::Chat { text }) => {
            Ok(Transition::Apply(Mutation::Chat { text: text.clone() }))
        },

        (Some(state @ (Active | Joining | Leaving)), _) => Err(invalid(state)),

        // The caller maps this to ParticipantNotFound with the room id.
        (None, _) => Err(invalid(Left)),
    }
}

/// One participant instance owned by the registry.
///
/// Generic over the instant type to support virtual time in tests.
#[derive(Debug, Clone)]
pub struct Participant<I> {
    id: ParticipantId,
    display_name: String,
    media: MediaState,
    state: LifecycleState,
    last_heartbeat: I,
    join_seq: u64,
}

impl<I> Participant<I>
where
    I: Copy + Ord + Sub<Output = Duration>,
{
    /// Create an instance in [`LifecycleState::Joining`].
    pub fn joining(id: ParticipantId, display_name: String, now: I, join_seq: u64) -> Self {
        Self {
            id,
            display_name,
            media: MediaState::default(),
            state: LifecycleState::Joining,
            last_heartbeat: now,
            join_seq,
        }
    }

    /// Confirm the join, moving to [`LifecycleState::Active`].
    pub fn confirm(&mut self, media: MediaState) {
        debug_assert_eq!(self.state, LifecycleState::Joining);
        self.media = media;
        self.state = LifecycleState::Active;
    }

    /// Participant identifier.
    pub fn id(&self) -> &ParticipantId {
        &self.id
    }

    /// Name shown to other participants.
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Current media flags.
    pub fn media(&self) -> MediaState {
        self.media
    }

    /// Current lifecycle state.
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Counted in the room's membership.
    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }

    /// Last time a heartbeat (or the join) was applied.
    pub fn last_heartbeat(&self) -> I {
        self.last_heartbeat
    }

    /// Room sequence value at which this instance joined.
    pub fn join_seq(&self) -> u64 {
        self.join_seq
    }

    /// Time since the last heartbeat.
    pub fn silence(&self, now: I) -> Duration {
        if now > self.last_heartbeat { now - self.last_heartbeat } else { Duration::ZERO }
    }

    /// Update one media flag. Returns `true` if the value changed.
    pub fn set_media(&mut self, field: MediaField, value: bool) -> bool {
        debug_assert!(self.is_active());
        self.media.set(field, value)
    }

    /// Refresh liveness.
    pub fn touch(&mut self, now: I) {
        debug_assert!(self.is_active());
        if now > self.last_heartbeat {
            self.last_heartbeat = now;
        }
    }

    /// Leave: `Active → Leaving → Left`.
    pub fn depart(&mut self) {
        debug_assert!(self.is_active());
        self.state = LifecycleState::Leaving;
        tracing::trace!(participant = %self.id, "participant leaving");
        self.state = LifecycleState::Left;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid() -> ParticipantId {
        ParticipantId::new("p1")
    }

    fn join() -> EventKind {
        EventKind::Join { display_name: "Ada".to_string(), media: MediaState::default() }
    }

    #[test]
    fn join_admits_unknown_and_left_participants() {
        for state in [None, Some(LifecycleState::Left), Some(LifecycleState::Joining)] {
            let step = transition(&pid(), state, &join()).unwrap();
            assert!(matches!(step, Transition::Apply(Mutation::Admit { .. })), "state {state:?}");
        }
    }

    #[test]
    fn join_on_active_is_invalid() {
        let err = transition(&pid(), Some(LifecycleState::Active), &join()).unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition { state: LifecycleState::Active, event: "join", .. }
        ));
    }

    #[test]
    fn events_to_left_participant_are_dropped() {
        let kinds = [
            EventKind::Heartbeat,
            EventKind::Leave { forced: true },
            EventKind::MediaToggle { field: MediaField::AudioOn, value: false },
            EventKind::Chat { text: "late".to_string() },
        ];

        for kind in kinds {
            let step = transition(&pid(), Some(LifecycleState::Left), &kind).unwrap();
            assert_eq!(step, Transition::Drop);
        }
    }

    #[test]
    fn active_accepts_toggle_heartbeat_leave() {
        let active = Some(LifecycleState::Active);
        let toggle = EventKind::MediaToggle { field: MediaField::VideoOn, value: false };

        assert_eq!(
            transition(&pid(), active, &toggle).unwrap(),
            Transition::Apply(Mutation::SetMedia { field: MediaField::VideoOn, value: false })
        );
        assert_eq!(
            transition(&pid(), active, &EventKind::Heartbeat).unwrap(),
            Transition::Apply(Mutation::Touch)
        );
        assert_eq!(
            transition(&pid(), active, &EventKind::Leave { forced: false }).unwrap(),
            Transition::Apply(Mutation::Depart { forced: false })
        );
    }

    #[test]
    fn transient_states_reject_non_join() {
        for state in [LifecycleState::Joining, LifecycleState::Leaving] {
            let result = transition(&pid(), Some(state), &EventKind::Heartbeat);
            assert!(matches!(result, Err(SessionError::InvalidTransition { .. })));
        }
    }

    #[test]
    fn unknown_participant_non_join_is_rejected() {
        let result = transition(&pid(), None, &EventKind::Heartbeat);
        assert!(result.is_err());
    }

    #[test]
    fn lifecycle_walks_to_left() {
        let start = Duration::from_secs(1);
        let mut participant = Participant::joining(pid(), "Ada".to_string(), start, 1);
        assert_eq!(participant.state(), LifecycleState::Joining);

        participant.confirm(MediaState::default());
        assert!(participant.is_active());

        assert!(participant.set_media(MediaField::AudioOn, false));
        participant.touch(Duration::from_secs(5));
        assert_eq!(participant.silence(Duration::from_secs(7)), Duration::from_secs(2));

        participant.depart();
        assert_eq!(participant.state(), LifecycleState::Left);
        assert!(!participant.is_active());
    }
}
