//! Coordinator behavior on the Tokio runtime.
//!
//! Tests run with a paused clock: Tokio advances time whenever every task is
//! idle, so heartbeat timeouts and grace periods elapse instantly and in a
//! fixed order.

use std::{sync::Arc, time::Duration};

use huddle_core::{Delivery, MediaField, ParticipantId, RoomId, SessionConfig, SessionError};
use huddle_harness::{Client, InvariantRegistry, SnapshotLog, duplicated, shuffled};
use huddle_server::{Coordinator, CoordinatorError};

fn coordinator() -> Coordinator {
    Coordinator::new(SessionConfig::default())
}

fn with_grace(grace: Duration) -> Coordinator {
    Coordinator::new(SessionConfig { room_grace: grace, ..SessionConfig::default() })
}

fn room() -> RoomId {
    RoomId::new("standup")
}

fn pid(id: &str) -> ParticipantId {
    ParticipantId::new(id)
}

/// Let room actors run their pending wakeups.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn join_creates_room_and_shows_participant() {
    let coordinator = coordinator();

    let snapshot = coordinator.join(&room(), &pid("p1"), "Ada").await.unwrap();

    let p1 = snapshot.participant(&pid("p1")).unwrap();
    assert_eq!(p1.display_name, "Ada");
    assert!(p1.video_on && p1.audio_on && !p1.screen_sharing);
    assert_eq!(coordinator.room_count().await, 1);
}

#[tokio::test(start_paused = true)]
async fn media_and_chat_commit_new_snapshots() {
    let coordinator = coordinator();
    let joined = coordinator.join(&room(), &pid("p1"), "Ada").await.unwrap();

    let muted =
        coordinator.set_media_state(&room(), &pid("p1"), MediaField::AudioOn, false).await.unwrap();
    assert!(!muted.participant(&pid("p1")).unwrap().audio_on);
    assert!(muted.room_seq > joined.room_seq);

    let chatted = coordinator.send_chat(&room(), &pid("p1"), "hello").await.unwrap();
    let message = chatted.chat.last().unwrap();
    assert_eq!(message.text, "hello");
    assert_eq!(message.sender, pid("p1"));
    assert_eq!(message.sender_name, "Ada");

    let current = coordinator.get_snapshot(&room()).await.unwrap();
    assert_eq!(current, chatted);
}

#[tokio::test(start_paused = true)]
async fn last_leave_destroys_room() {
    let coordinator = coordinator();
    coordinator.join(&room(), &pid("p1"), "Ada").await.unwrap();
    coordinator.join(&room(), &pid("p2"), "Grace").await.unwrap();

    coordinator.leave(&room(), &pid("p1")).await.unwrap();
    settle().await;
    let snapshot = coordinator.get_snapshot(&room()).await.unwrap();
    assert_eq!(snapshot.participants.len(), 1);

    coordinator.leave(&room(), &pid("p2")).await.unwrap();
    settle().await;

    assert_eq!(coordinator.room_count().await, 0);
    let err = coordinator.get_snapshot(&room()).await.unwrap_err();
    assert_eq!(err, CoordinatorError::Session(SessionError::RoomNotFound(room())));
}

#[tokio::test(start_paused = true)]
async fn rejoin_after_destruction_starts_fresh_room() {
    let coordinator = coordinator();
    coordinator.join(&room(), &pid("p1"), "Ada").await.unwrap();
    coordinator.leave(&room(), &pid("p1")).await.unwrap();
    settle().await;
    assert_eq!(coordinator.room_count().await, 0);

    let snapshot = coordinator.join(&room(), &pid("p1"), "Ada").await.unwrap();

    assert!(snapshot.contains(&pid("p1")));
    assert_eq!(snapshot.room_seq, 1);
}

#[tokio::test(start_paused = true)]
async fn grace_period_keeps_empty_room() {
    let coordinator = with_grace(Duration::from_secs(5));
    coordinator.join(&room(), &pid("p1"), "Ada").await.unwrap();
    coordinator.leave(&room(), &pid("p1")).await.unwrap();

    tokio::time::sleep(Duration::from_secs(4)).await;
    let snapshot = coordinator.get_snapshot(&room()).await.unwrap();
    assert!(snapshot.participants.is_empty());

    // A join inside the grace period keeps the room
    coordinator.join(&room(), &pid("p2"), "Grace").await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(coordinator.room_count().await, 1);

    coordinator.leave(&room(), &pid("p2")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(coordinator.room_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn create_room_rejects_duplicates_and_waits_for_first_join() {
    let coordinator = with_grace(Duration::from_secs(5));

    let snapshot = coordinator.create_room(room()).await.unwrap();
    assert_eq!(snapshot.room_seq, 0);

    let err = coordinator.create_room(room()).await.unwrap_err();
    assert_eq!(err, CoordinatorError::Session(SessionError::RoomAlreadyExists(room())));
    assert_eq!(err.code(), "AlreadyExists");

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(coordinator.room_count().await, 1);

    coordinator.join(&room(), &pid("p1"), "Ada").await.unwrap();
    coordinator.leave(&room(), &pid("p1")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(coordinator.room_count().await, 0);
    coordinator.create_room(room()).await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn created_room_with_default_config_accepts_subscribers_and_joins() {
    let coordinator = coordinator();
    coordinator.create_room(room()).await.unwrap();

    let log = SnapshotLog::new();
    let _subscription = coordinator.subscribe(&room(), log.recorder()).await.unwrap();
    settle().await;

    coordinator.join(&room(), &pid("p1"), "Ada").await.unwrap();
    assert_eq!(log.room_seqs(&room()), [1]);
}

#[tokio::test(start_paused = true)]
async fn refused_join_does_not_leave_a_room_behind() {
    let coordinator = coordinator();

    let err = coordinator.join(&room(), &pid("p1"), "").await.unwrap_err();
    assert_eq!(err.code(), "InvalidEvent");
    settle().await;
    assert_eq!(coordinator.room_count().await, 0);

    let mut late = Client::new("standup", "p1");
    late.skip(u64::MAX - 1);
    let err = coordinator.deliver(late.join()).await.unwrap_err();
    assert_eq!(err.code(), "InvalidEvent");
    settle().await;
    assert_eq!(coordinator.room_count().await, 0);
}

#[tokio::test(start_paused = true)]
async fn facade_errors_carry_kinds() {
    let coordinator = coordinator();

    let err = coordinator.leave(&room(), &pid("p1")).await.unwrap_err();
    assert_eq!(err.code(), "NotFound");

    coordinator.join(&room(), &pid("p1"), "Ada").await.unwrap();

    let err = coordinator.join(&room(), &pid("p1"), "Ada").await.unwrap_err();
    assert_eq!(err.code(), "InvalidTransition");

    let err = coordinator.leave(&room(), &pid("ghost")).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Session(SessionError::ParticipantNotFound { .. })
    ));

    let err = coordinator.send_chat(&room(), &pid("p1"), "   ").await.unwrap_err();
    assert_eq!(err.code(), "InvalidEvent");

    let err = coordinator.join(&room(), &pid("p2"), "").await.unwrap_err();
    assert_eq!(err.code(), "InvalidEvent");
}

#[tokio::test(start_paused = true)]
async fn silent_participant_is_forced_out() {
    let coordinator = coordinator();
    let mut quiet = Client::new("standup", "quiet");
    let mut steady = Client::new("standup", "steady");

    coordinator.deliver(quiet.join()).await.unwrap();
    coordinator.deliver(steady.join()).await.unwrap();

    for _ in 0..35 {
        tokio::time::sleep(Duration::from_secs(1)).await;
        coordinator.deliver(steady.heartbeat()).await.unwrap();
    }

    let snapshot = coordinator.get_snapshot(&room()).await.unwrap();
    assert!(!snapshot.contains(quiet.participant_id()));
    assert!(snapshot.contains(steady.participant_id()));

    // The synthetic leave took seq 2, so the next late event carries seq 3
    quiet.skip(1);
    let late = coordinator.deliver(quiet.heartbeat()).await.unwrap();
    assert_eq!(late, Delivery::Ignored);
}

#[tokio::test(start_paused = true)]
async fn reordered_events_apply_in_sequence() {
    let coordinator = coordinator();
    let mut p1 = Client::new("standup", "p1");

    coordinator.deliver(p1.join()).await.unwrap();
    let mute = p1.toggle(MediaField::VideoOn, false);
    let unmute = p1.toggle(MediaField::VideoOn, true);

    assert_eq!(coordinator.deliver(unmute).await.unwrap(), Delivery::Buffered);
    assert!(matches!(coordinator.deliver(mute.clone()).await.unwrap(), Delivery::Applied(_)));

    let snapshot = coordinator.get_snapshot(&room()).await.unwrap();
    assert!(snapshot.participant(p1.participant_id()).unwrap().video_on);
    assert_eq!(coordinator.deliver(mute).await.unwrap(), Delivery::Stale);
}

#[tokio::test(start_paused = true)]
async fn lost_event_is_skipped_after_reorder_timeout() {
    let coordinator = coordinator();
    let mut p1 = Client::new("standup", "p1");

    coordinator.deliver(p1.join()).await.unwrap();
    p1.skip(1);
    let share = p1.toggle(MediaField::ScreenSharing, true);
    assert_eq!(coordinator.deliver(share).await.unwrap(), Delivery::Buffered);

    tokio::time::sleep(Duration::from_secs(3)).await;

    let snapshot = coordinator.get_snapshot(&room()).await.unwrap();
    assert!(snapshot.participant(p1.participant_id()).unwrap().screen_sharing);
}

#[tokio::test(start_paused = true)]
async fn shuffled_duplicated_stream_converges() {
    let coordinator = coordinator();
    let mut p1 = Client::new("standup", "p1");

    coordinator.deliver(p1.join()).await.unwrap();
    let events = vec![
        p1.toggle(MediaField::AudioOn, false),
        p1.toggle(MediaField::VideoOn, false),
        p1.toggle(MediaField::AudioOn, true),
        p1.toggle(MediaField::ScreenSharing, true),
        p1.toggle(MediaField::VideoOn, true),
    ];

    for event in shuffled(duplicated(&events), 7) {
        coordinator.deliver(event).await.unwrap();
    }

    let snapshot = coordinator.get_snapshot(&room()).await.unwrap();
    let view = snapshot.participant(p1.participant_id()).unwrap();
    assert!(view.audio_on && view.video_on && view.screen_sharing);
}

#[tokio::test(start_paused = true)]
async fn subscribers_see_every_commit_in_order() {
    let coordinator = Arc::new(with_grace(Duration::from_secs(60)));
    coordinator.create_room(room()).await.unwrap();

    let log = SnapshotLog::new();
    let _subscription = coordinator.subscribe(&room(), log.recorder()).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let coordinator = Arc::clone(&coordinator);
        tasks.push(tokio::spawn(async move {
            let id = pid(&format!("p{i}"));
            coordinator.join(&room(), &id, "member").await.unwrap();
            coordinator.set_media_state(&room(), &id, MediaField::VideoOn, false).await.unwrap();
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let seqs = log.room_seqs(&room());
    assert_eq!(seqs, (1..=32).collect::<Vec<u64>>());
    assert_eq!(log.latest(&room()).unwrap().participants.len(), 16);
    InvariantRegistry::standard().assert_all(&log, "concurrent joins");
}

#[tokio::test(start_paused = true)]
async fn dropped_subscription_stops_notifications() {
    let coordinator = with_grace(Duration::from_secs(60));
    coordinator.create_room(room()).await.unwrap();

    let log = SnapshotLog::new();
    let subscription = coordinator.subscribe(&room(), log.recorder()).await.unwrap();
    coordinator.join(&room(), &pid("p1"), "Ada").await.unwrap();
    subscription.cancel();
    coordinator.join(&room(), &pid("p2"), "Grace").await.unwrap();

    assert_eq!(log.room_seqs(&room()), [1]);
}

#[tokio::test(start_paused = true)]
async fn follow_replays_current_snapshot_first() {
    let coordinator = coordinator();
    coordinator.join(&room(), &pid("p1"), "Ada").await.unwrap();

    let log = SnapshotLog::new();
    let _subscription = coordinator.follow(&room(), log.recorder()).await.unwrap();
    coordinator.join(&room(), &pid("p2"), "Grace").await.unwrap();

    assert_eq!(log.room_seqs(&room()), [1, 2]);
}

#[tokio::test(start_paused = true)]
async fn rooms_are_independent() {
    let coordinator = Arc::new(coordinator());

    let mut tasks = Vec::new();
    for i in 0..8 {
        let coordinator = Arc::clone(&coordinator);
        tasks.push(tokio::spawn(async move {
            let room_id = RoomId::new(format!("room-{i}"));
            for p in 0..4 {
                coordinator.join(&room_id, &pid(&format!("p{p}")), "member").await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(coordinator.room_count().await, 8);
    for i in 0..8 {
        let snapshot = coordinator.get_snapshot(&RoomId::new(format!("room-{i}"))).await.unwrap();
        assert_eq!(snapshot.participants.len(), 4);
        assert_eq!(snapshot.room_seq, 4);
    }
}

#[tokio::test(start_paused = true)]
async fn shutdown_makes_coordinator_unavailable() {
    let coordinator = coordinator();
    coordinator.join(&room(), &pid("p1"), "Ada").await.unwrap();

    coordinator.shutdown().await;

    assert!(coordinator.is_shut_down());
    assert_eq!(coordinator.room_count().await, 0);
    let err = coordinator.join(&room(), &pid("p2"), "Grace").await.unwrap_err();
    assert_eq!(err.code(), "Unavailable");
    let err = coordinator.get_snapshot(&room()).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Unavailable(_)));
}
