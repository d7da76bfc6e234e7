//! Standard invariant checks.
//!
//! These invariants capture behavioral properties that must always hold.
//! They verify WHAT must be true, not specific test scenarios.

use std::collections::HashSet;

use huddle_core::LifecycleState;

use super::{Invariant, InvariantResult, SnapshotLog, Violation};

/// Room sequence strictly increases across observed snapshots.
///
/// Subscribers see every commit exactly once and in order, so two snapshots
/// with the same or a decreasing `room_seq` indicate a lost serialization.
pub struct RoomSeqMonotonic;

impl Invariant for RoomSeqMonotonic {
    fn name(&self) -> &'static str {
        "room_seq_monotonic"
    }

    fn check(&self, log: &SnapshotLog) -> InvariantResult {
        for (room_id, history) in log.rooms() {
            for window in history.windows(2) {
                if window[1].room_seq <= window[0].room_seq {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "room {}: room_seq went {} → {}",
                            room_id, window[0].room_seq, window[1].room_seq
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Snapshots only show active participants, each at most once.
///
/// The active count is therefore the number of participants shown.
pub struct ActiveOnly;

impl Invariant for ActiveOnly {
    fn name(&self) -> &'static str {
        "active_only"
    }

    fn check(&self, log: &SnapshotLog) -> InvariantResult {
        for (room_id, history) in log.rooms() {
            for snapshot in &history {
                let mut seen = HashSet::new();
                for participant in &snapshot.participants {
                    if participant.state != LifecycleState::Active {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "room {} seq {}: participant {} shown in state {}",
                                room_id, snapshot.room_seq, participant.id, participant.state
                            ),
                        });
                    }
                    if !seen.insert(&participant.id) {
                        return Err(Violation {
                            invariant: self.name(),
                            message: format!(
                                "room {} seq {}: participant {} shown twice",
                                room_id, snapshot.room_seq, participant.id
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Participants are listed by join sequence, and no one joined in the future.
pub struct JoinOrdering;

impl Invariant for JoinOrdering {
    fn name(&self) -> &'static str {
        "join_ordering"
    }

    fn check(&self, log: &SnapshotLog) -> InvariantResult {
        for (room_id, history) in log.rooms() {
            for snapshot in &history {
                let join_seqs: Vec<u64> =
                    snapshot.participants.iter().map(|p| p.join_seq).collect();
                let sorted = join_seqs.windows(2).all(|w| w[0] < w[1]);
                let bounded = join_seqs.iter().all(|&seq| seq <= snapshot.room_seq);

                if !sorted || !bounded {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "room {} seq {}: join sequences {:?}",
                            room_id, snapshot.room_seq, join_seqs
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Chat messages are oldest first and never newer than their snapshot.
pub struct ChatOrdering;

impl Invariant for ChatOrdering {
    fn name(&self) -> &'static str {
        "chat_ordering"
    }

    fn check(&self, log: &SnapshotLog) -> InvariantResult {
        for (room_id, history) in log.rooms() {
            for snapshot in &history {
                let seqs: Vec<u64> = snapshot.chat.iter().map(|m| m.room_seq).collect();
                let ordered = seqs.windows(2).all(|w| w[0] < w[1]);
                let bounded = seqs.iter().all(|&seq| seq <= snapshot.room_seq);

                if !ordered || !bounded {
                    return Err(Violation {
                        invariant: self.name(),
                        message: format!(
                            "room {} seq {}: chat sequences {:?}",
                            room_id, snapshot.room_seq, seqs
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}
