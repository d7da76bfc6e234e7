//! Presence monitor.
//!
//! Detects silent disconnects. On a fixed cadence it compares each active
//! participant's last heartbeat against the timeout and synthesizes a forced
//! `Leave` for every participant that has gone quiet. The leave carries the
//! participant's next expected sequence number, so the sequencer releases it
//! immediately instead of treating it as stale.
//!
//! The monitor only produces events. Submission goes through the room's
//! sequencer like any network event, inside the same serialized step, so a
//! heartbeat racing the synthetic leave can never produce a second leave.

use std::{
    ops::{Add, Sub},
    time::Duration,
};

use crate::{
    config::SessionConfig,
    event::{Event, EventKind},
    room::Room,
    sequencer::EventSequencer,
};

/// Scans a room for participants whose heartbeats stopped.
#[derive(Debug, Clone)]
pub struct PresenceMonitor<I> {
    heartbeat_timeout: Duration,
    scan_interval: Duration,
    next_scan: I,
}

impl<I> PresenceMonitor<I>
where
    I: Copy + Ord + Add<Duration, Output = I> + Sub<Output = Duration>,
{
    /// Create a monitor whose first scan is due one interval after `now`.
    pub fn new(config: &SessionConfig, now: I) -> Self {
        Self {
            heartbeat_timeout: config.heartbeat_timeout,
            scan_interval: config.presence_scan_interval,
            next_scan: now + config.presence_scan_interval,
        }
    }

    /// Silence threshold.
    pub fn heartbeat_timeout(&self) -> Duration {
        self.heartbeat_timeout
    }

    /// When the next scan is due.
    pub fn next_scan(&self) -> I {
        self.next_scan
    }

    /// Whether a scan is due at `now`.
    pub fn is_due(&self, now: I) -> bool {
        now >= self.next_scan
    }

    /// Synthesize forced leaves for every silent participant.
    ///
    /// Schedules the next scan one interval after `now`. Returned events are
    /// ordered by join sequence.
    pub fn scan(&mut self, room: &Room<I>, sequencer: &EventSequencer<I>, now: I) -> Vec<Event> {
        self.next_scan = now + self.scan_interval;

        let mut stale: Vec<_> = room
            .active_participants()
            .filter(|p| p.silence(now) > self.heartbeat_timeout)
            .collect();
        stale.sort_by_key(|p| p.join_seq());

        stale
            .into_iter()
            .filter_map(|participant| {
                let seq = sequencer.next_local_seq(participant.id())?;
                tracing::info!(
                    room_id = %room.id(),
                    participant = %participant.id(),
                    silence_ms = participant.silence(now).as_millis() as u64,
                    seq,
                    "heartbeat timeout, forcing leave"
                );
                Some(Event::new(
                    room.id().clone(),
                    participant.id().clone(),
                    seq,
                    EventKind::Leave { forced: true },
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        event::{MediaState, ParticipantId, RoomId},
        participant::Mutation,
    };

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn setup() -> (Room<Duration>, EventSequencer<Duration>, PresenceMonitor<Duration>) {
        let config = SessionConfig { heartbeat_timeout: secs(30), ..SessionConfig::default() };
        let mut room = Room::new(RoomId::new("r1"), secs(0), &config);
        let mut sequencer = EventSequencer::new(&config);

        for id in ["a", "b"] {
            let pid = ParticipantId::new(id);
            let join = Event::new(
                RoomId::new("r1"),
                pid.clone(),
                1,
                EventKind::Join { display_name: id.to_string(), media: MediaState::default() },
            );
            sequencer.ingest(join, None, secs(0));
            let admit =
                Mutation::Admit { display_name: id.to_string(), media: MediaState::default() };
            room.apply_participant_mutation(&pid, admit, secs(0), 0).unwrap();
        }

        (room, sequencer, PresenceMonitor::new(&config, secs(0)))
    }

    #[test]
    fn silent_participant_gets_forced_leave() {
        let (mut room, sequencer, mut monitor) = setup();
        room.apply_participant_mutation(&ParticipantId::new("b"), Mutation::Touch, secs(20), 0)
            .unwrap();

        let events = monitor.scan(&room, &sequencer, secs(31));

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].participant_id, ParticipantId::new("a"));
        assert_eq!(events[0].seq, 2);
        assert_eq!(events[0].kind, EventKind::Leave { forced: true });
    }

    #[test]
    fn exactly_at_timeout_is_not_stale() {
        let (room, sequencer, mut monitor) = setup();
        assert!(monitor.scan(&room, &sequencer, secs(30)).is_empty());
    }

    #[test]
    fn scan_schedules_next() {
        let (room, sequencer, mut monitor) = setup();
        assert!(!monitor.is_due(secs(0)));
        assert!(monitor.is_due(secs(1)));

        monitor.scan(&room, &sequencer, secs(5));
        assert_eq!(monitor.next_scan(), secs(6));
        assert!(!monitor.is_due(secs(5)));
        assert!(monitor.is_due(secs(6)));
    }
}
