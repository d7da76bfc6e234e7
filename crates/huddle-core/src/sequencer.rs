//! Per-room event sequencer.
//!
//! Orders and de-duplicates inbound events per participant. Each participant
//! has a cursor holding the last applied sequence number and a bounded
//! reorder buffer for events that arrived ahead of a gap.
//!
//! Flow: stamp the arrival number, classify against the cursor (stale,
//! next, ahead), release whatever became contiguous, return the releases in
//! application order. The sequencer never applies anything itself.
//!
//! Gaps are not waited on forever. A gap is declared lost when:
//!
//! - the events behind it have waited `reorder_buffer_timeout` ([`expire`])
//! - the buffer for that participant overflows `max_buffered_events`
//! - a Leave is buffered behind it (a leave is never held)
//!
//! Clients may use sequence numbers up to [`MAX_CLIENT_SEQ`]. The last value
//! is kept for the presence monitor's synthetic leave.
//!
//! [`expire`]: EventSequencer::expire

use std::{
    collections::{BTreeMap, HashMap},
    ops::{Add, Sub},
    time::Duration,
};

use crate::{
    config::SessionConfig,
    event::{Event, ParticipantId},
    participant::LifecycleState,
};

/// Highest sequence number a client or facade command may carry.
pub const MAX_CLIENT_SEQ: u64 = u64::MAX - 1;

/// What the sequencer decided about the event passed to
/// [`EventSequencer::ingest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Released for application (possibly along with buffered events)
    Released,
    /// Held in the reorder buffer
    Buffered,
    /// Sequence number already applied or already buffered
    Stale,
}

/// Work for the caller, in application order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequencerAction {
    /// Apply this event
    Release(Event),

    /// A run of sequence numbers was declared lost
    GapSkipped {
        /// Participant whose events were lost
        participant_id: ParticipantId,
        /// First missing sequence number
        first: u64,
        /// Last missing sequence number (inclusive)
        last: u64,
    },
}

/// Result of ingesting one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequenced {
    /// Fate of the ingested event
    pub disposition: Disposition,
    /// Releases and gap reports, in order
    pub actions: Vec<SequencerAction>,
}

#[derive(Debug, Clone)]
struct Pending<I> {
    event: Event,
    buffered_at: I,
}

#[derive(Debug, Clone)]
struct Cursor<I> {
    last_applied: u64,
    pending: BTreeMap<u64, Pending<I>>,
}

impl<I: Copy + Ord> Cursor<I> {
    fn at(seq: u64) -> Self {
        Self { last_applied: seq, pending: BTreeMap::new() }
    }

    fn oldest_buffered_at(&self) -> Option<I> {
        self.pending.values().map(|p| p.buffered_at).min()
    }

    /// Release every buffered event that is now contiguous.
    fn drain_contiguous(&mut self, out: &mut Vec<SequencerAction>) {
        while let Some(entry) = self.pending.first_entry() {
            if Some(*entry.key()) != self.last_applied.checked_add(1) {
                break;
            }
            let (seq, pending) = entry.remove_entry();
            self.last_applied = seq;
            out.push(SequencerAction::Release(pending.event));
        }
    }

    /// Declare the gap before the first buffered event lost and release
    /// through it.
    fn skip_first_gap(&mut self, participant_id: &ParticipantId, out: &mut Vec<SequencerAction>) {
        let Some(&first) = self.pending.keys().next() else {
            return;
        };
        debug_assert!(first > self.last_applied.saturating_add(1));

        out.push(SequencerAction::GapSkipped {
            participant_id: participant_id.clone(),
            first: self.last_applied.saturating_add(1),
            last: first.saturating_sub(1),
        });
        self.last_applied = first.saturating_sub(1);
        self.drain_contiguous(out);
    }
}

/// Orders events for one room.
///
/// Generic over `I` (Instant type) to support virtual time in tests.
#[derive(Debug, Clone)]
pub struct EventSequencer<I> {
    cursors: HashMap<ParticipantId, Cursor<I>>,
    next_arrival: u64,
    reorder_buffer_timeout: Duration,
    max_buffered_events: usize,
}

impl<I> EventSequencer<I>
where
    I: Copy + Ord + Add<Duration, Output = I> + Sub<Output = Duration>,
{
    /// Create a sequencer with no cursors.
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            cursors: HashMap::new(),
            next_arrival: 1,
            reorder_buffer_timeout: config.reorder_buffer_timeout,
            max_buffered_events: config.max_buffered_events,
        }
    }

    /// Classify an inbound event and return what became applicable.
    ///
    /// `status` is the participant's lifecycle state in the room, `None` if
    /// the room has never admitted them. A Join for an unknown or departed
    /// participant establishes a new baseline and is released at once.
    pub fn ingest(
        &mut self,
        mut event: Event,
        status: Option<LifecycleState>,
        now: I,
    ) -> Sequenced {
        event.arrival = self.next_arrival;
        self.next_arrival += 1;

        let participant_id = event.participant_id.clone();
        let seq = event.seq;
        let mut actions = Vec::new();

        let departed = matches!(status, None | Some(LifecycleState::Left));
        if status.is_none() {
            // A cursor without a room record belongs to a join the room refused
            self.cursors.remove(&participant_id);
        }
        let Some(cursor) = self.cursors.get_mut(&participant_id) else {
            if event.kind.is_join() {
                self.cursors.insert(participant_id, Cursor::at(seq));
            }
            // Non-join events for strangers go straight to the state machine,
            // which rejects them.
            actions.push(SequencerAction::Release(event));
            return Sequenced { disposition: Disposition::Released, actions };
        };

        if seq <= cursor.last_applied || cursor.pending.contains_key(&seq) {
            tracing::trace!(
                participant = %participant_id,
                seq,
                last = cursor.last_applied,
                "stale event"
            );
            return Sequenced { disposition: Disposition::Stale, actions };
        }

        if departed {
            // New baseline: a rejoin, or a late event for an instance that is
            // gone. Buffered events older than it belong to the old instance.
            cursor.pending = match seq.checked_add(1) {
                Some(next) => cursor.pending.split_off(&next),
                None => BTreeMap::new(),
            };
            cursor.last_applied = seq;
            actions.push(SequencerAction::Release(event));
            cursor.drain_contiguous(&mut actions);
            return Sequenced { disposition: Disposition::Released, actions };
        }

        if cursor.last_applied.checked_add(1) == Some(seq) {
            cursor.last_applied = seq;
            actions.push(SequencerAction::Release(event));
            cursor.drain_contiguous(&mut actions);
            return Sequenced { disposition: Disposition::Released, actions };
        }

        let is_leave = event.kind.is_leave();
        cursor.pending.insert(seq, Pending { event, buffered_at: now });

        if is_leave {
            while cursor.last_applied < seq {
                cursor.skip_first_gap(&participant_id, &mut actions);
            }
        } else if cursor.pending.len() > self.max_buffered_events {
            cursor.skip_first_gap(&participant_id, &mut actions);
        }

        let disposition = if cursor.pending.contains_key(&seq) {
            Disposition::Buffered
        } else {
            Disposition::Released
        };

        if disposition == Disposition::Buffered {
            tracing::trace!(
                participant = %participant_id,
                seq,
                last = cursor.last_applied,
                "event buffered"
            );
        }

        Sequenced { disposition, actions }
    }

    /// Skip every gap whose buffered events have waited too long.
    pub fn expire(&mut self, now: I) -> Vec<SequencerAction> {
        let timeout = self.reorder_buffer_timeout;
        let mut actions = Vec::new();

        let mut ids: Vec<ParticipantId> = self
            .cursors
            .iter()
            .filter(|(_, cursor)| !cursor.pending.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();

        for id in ids {
            let Some(cursor) = self.cursors.get_mut(&id) else {
                continue;
            };
            while let Some(oldest) = cursor.oldest_buffered_at() {
                if now < oldest + timeout {
                    break;
                }
                cursor.skip_first_gap(&id, &mut actions);
            }
        }

        actions
    }

    /// Next sequence number the participant is expected to send, `None` once
    /// the sequence space is used up.
    pub fn next_local_seq(&self, participant_id: &ParticipantId) -> Option<u64> {
        match self.cursors.get(participant_id) {
            Some(cursor) => cursor.last_applied.checked_add(1),
            None => Some(1),
        }
    }

    /// Last applied sequence number for a participant.
    pub fn last_applied(&self, participant_id: &ParticipantId) -> Option<u64> {
        self.cursors.get(participant_id).map(|cursor| cursor.last_applied)
    }

    /// Number of events waiting in the participant's reorder buffer.
    pub fn buffered(&self, participant_id: &ParticipantId) -> usize {
        self.cursors.get(participant_id).map_or(0, |cursor| cursor.pending.len())
    }

    /// Earliest instant at which [`expire`](Self::expire) has work.
    pub fn next_deadline(&self) -> Option<I> {
        self.cursors
            .values()
            .filter_map(Cursor::oldest_buffered_at)
            .min()
            .map(|oldest| oldest + self.reorder_buffer_timeout)
    }
}
