//! Integration tests for the room page lifecycle: entry gate, mount,
//! connection attach, phase transitions, view selection and teardown.
//!
//! Uses the channel-fed `MockTransport` from `tests/common` so each test
//! decides exactly when the coordinator's messages arrive.

mod common;

use std::sync::Arc;

use room_session_client::{
    ChannelConfig, EntryGate, EventChannel, GameCategory, InvalidPhase, Mount, PageProps,
    RoomController, RoomIdx, RoomSession, RoomStatus, RoomView,
};

use common::{
    credentials, init_tracing, settle, wait_for_status, MockTransport, RecordingNotifier,
    StubVerifier,
};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn mount_room(
    room: &str,
    session: &Arc<RoomSession>,
    notifier: &Arc<RecordingNotifier>,
) -> RoomController {
    init_tracing();
    let props = PageProps::login(&RoomIdx::new(room));
    match RoomController::mount(&props, Arc::clone(session), Arc::clone(notifier) as _) {
        Mount::Room(controller) => controller,
        Mount::Redirect(route) => panic!("expected the room to mount, got redirect to {route}"),
    }
}

fn open_channel() -> (EventChannel, common::MockHandle) {
    let (transport, handle) = MockTransport::new();
    (
        EventChannel::open(transport, ChannelConfig::default()),
        handle,
    )
}

// ════════════════════════════════════════════════════════════════════
// Full scenarios
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn logged_in_visitor_plays_through_a_game() {
    init_tracing();
    let gate = EntryGate::new(StubVerifier::accepting("good"));
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());

    let props = gate.admit(credentials("good"), Some("42"), &session).await;
    assert_eq!(
        serde_json::to_value(&props).unwrap(),
        serde_json::json!({"message": "Login", "roomIdx": "42"})
    );

    let mut room = mount_room(&props.room_idx, &session, &notifier);
    assert_eq!(session.room_idx(), Some(&RoomIdx::new("42")));
    assert_eq!(room.render(), RoomView::Ready);

    // The ready view picks a game and hands over its connection.
    session.select_game_category(GameCategory::new("AiPainting"));
    let (channel, coordinator) = open_channel();
    room.attach(channel).await;
    assert!(room.is_connected());

    coordinator.push_alert("gameStart");
    wait_for_status(&session, RoomStatus::GameStart).await;
    assert_eq!(
        room.render(),
        RoomView::InGame {
            category: GameCategory::new("AiPainting")
        }
    );

    coordinator.push_alert("gameEnd");
    wait_for_status(&session, RoomStatus::GameEnd).await;
    assert_eq!(room.render(), RoomView::Result);

    room.unmount().await;
    assert_eq!(coordinator.close_count(), 1);
    assert_eq!(notifier.exit_count(), 1);
    assert_eq!(notifier.exits.lock().unwrap()[0], RoomIdx::new("42"));
}

#[tokio::test]
async fn rejected_visitor_is_redirected_without_a_connection() {
    let gate = EntryGate::new(StubVerifier::accepting("good"));
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());

    let props = gate.admit(credentials("expired"), Some("42"), &session).await;
    assert_eq!(
        serde_json::to_value(&props).unwrap(),
        serde_json::json!({"message": "notLogin", "roomIdx": ""})
    );

    let mount = RoomController::mount(&props, Arc::clone(&session), Arc::clone(&notifier) as _);
    assert!(matches!(mount, Mount::Redirect("/")));
    assert!(session.room_idx().is_none());
    assert!(!session.is_logged_in());
    assert_eq!(notifier.exit_count(), 0);
}

// ════════════════════════════════════════════════════════════════════
// Gate correctness
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn gate_result_matches_verification_outcome() {
    let gate = EntryGate::new(StubVerifier::accepting("good"));

    for (token, route) in [
        ("good", Some("1")),
        ("good", Some("room-x")),
        ("good", None),
        ("bad", Some("1")),
        ("", None),
    ] {
        let session = RoomSession::new();
        let props = gate.admit(credentials(token), route, &session).await;
        if token == "good" {
            assert!(props.is_admitted());
            assert_eq!(props.room_idx, route.unwrap_or("noRoom"));
        } else {
            assert!(!props.is_admitted());
            assert_eq!(props.room_idx, "");
        }
        assert_eq!(session.is_logged_in(), props.is_admitted());
    }
}

// ════════════════════════════════════════════════════════════════════
// Single connection / single room assignment
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn re_renders_neither_reassign_the_room_nor_reconnect() {
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut room = mount_room("42", &session, &notifier);

    for _ in 0..10 {
        room.render();
    }
    let (channel, _coordinator) = open_channel();
    room.attach(channel).await;
    let connection = room.connection_id();
    for _ in 0..10 {
        room.render();
    }

    assert!(connection.is_some());
    assert_eq!(room.connection_id(), connection);
    // Already assigned: a second assignment is refused.
    assert!(!session.assign_room(RoomIdx::new("other")));
    assert_eq!(session.room_idx(), Some(&RoomIdx::new("42")));

    room.unmount().await;
}

#[tokio::test]
async fn replacing_the_connection_tears_down_the_old_one() {
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut room = mount_room("7", &session, &notifier);

    let (first, first_coordinator) = open_channel();
    room.attach(first).await;
    let (second, second_coordinator) = open_channel();
    room.attach(second).await;

    assert_eq!(first_coordinator.close_count(), 1);
    assert_eq!(notifier.exit_count(), 1);
    assert_eq!(second_coordinator.close_count(), 0);

    // Only the new connection drives the phase.
    first_coordinator.push_alert("gameEnd");
    second_coordinator.push_alert("gameStart");
    wait_for_status(&session, RoomStatus::GameStart).await;
    settle().await;
    assert_eq!(session.status(), RoomStatus::GameStart);

    room.unmount().await;
    assert_eq!(second_coordinator.close_count(), 1);
    assert_eq!(notifier.exit_count(), 2);
}

#[tokio::test]
async fn alerts_queued_during_replacement_are_not_lost() {
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut room = mount_room("7", &session, &notifier);

    let (first, _first_coordinator) = MockTransport::new();
    room.attach_transport(first, ChannelConfig::default()).await;

    let (second, second_coordinator) = MockTransport::new();
    second_coordinator.push_alert("gameEnd");
    room.attach_transport(second, ChannelConfig::default()).await;

    wait_for_status(&session, RoomStatus::GameEnd).await;
    assert_eq!(notifier.exit_count(), 1);

    room.unmount().await;
}

#[tokio::test]
async fn alerts_sent_before_attach_survive_a_slow_hand_over() {
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut room = mount_room("7", &session, &notifier);

    let (first, _first_coordinator) = open_channel();
    room.attach(first).await;

    // Queued on the replacement before it is handed over.
    let (second, second_coordinator) = open_channel();
    second_coordinator.push_alert("gameStart");
    settle().await;
    room.attach(second).await;

    wait_for_status(&session, RoomStatus::GameStart).await;
    room.unmount().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn first_attach_on_worker_runtime_sees_early_alert() {
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut room = mount_room("42", &session, &notifier);

    let (channel, coordinator) = open_channel();
    coordinator.push_alert("gameEnd");
    settle().await;
    room.attach(channel).await;

    wait_for_status(&session, RoomStatus::GameEnd).await;
    room.unmount().await;
    assert_eq!(notifier.exit_count(), 1);
}

// ════════════════════════════════════════════════════════════════════
// Transition ordering
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn last_game_alert_wins_and_other_types_are_ignored() {
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut room = mount_room("42", &session, &notifier);
    let (channel, coordinator) = open_channel();
    room.attach(channel).await;

    let mut history = session.watch_status();
    let recorder = tokio::spawn(async move {
        let mut seen = Vec::new();
        while history.changed().await.is_ok() {
            let status = history.borrow_and_update().clone();
            let done = status == RoomStatus::Unrecognized("done".into());
            seen.push(status);
            if done {
                break;
            }
        }
        seen
    });

    coordinator.push_alert("gameStart");
    coordinator.push(r#"{"type":"chat","author":"admin","message":"hi","status":"gameEnd"}"#);
    coordinator.push(r#"{"type":"playerCnt","playerCnt":3}"#);
    coordinator.push_alert("gameStart");
    coordinator.push_alert("gameEnd");
    coordinator.push_alert("ready");
    coordinator.push_alert("done");

    wait_for_status(&session, RoomStatus::Unrecognized("done".into())).await;
    let seen = tokio::time::timeout(std::time::Duration::from_secs(2), recorder)
        .await
        .unwrap()
        .unwrap();

    // Watch receivers may coalesce writes, but every observed value must be
    // an alert in delivery order and the last one must be the final alert.
    let alerts = [
        RoomStatus::GameStart,
        RoomStatus::GameStart,
        RoomStatus::GameEnd,
        RoomStatus::Ready,
        RoomStatus::Unrecognized("done".into()),
    ];
    let mut cursor = 0;
    for status in &seen {
        let offset = alerts[cursor..]
            .iter()
            .position(|a| a == status)
            .unwrap_or_else(|| panic!("{status:?} out of order in {seen:?}"));
        cursor += offset;
    }
    assert_eq!(seen.last(), alerts.last());
    assert!(matches!(
        room.render(),
        RoomView::Invalid {
            reason: InvalidPhase::UnrecognizedStatus(_)
        }
    ));

    room.unmount().await;
}

#[tokio::test]
async fn malformed_messages_are_dropped_without_closing() {
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut room = mount_room("42", &session, &notifier);
    let (channel, coordinator) = open_channel();
    room.attach(channel).await;

    coordinator.push("not json at all");
    coordinator.push(r#"{"type":"gameAlert"}"#);
    coordinator.push(r#"{"type":"gameAlert","status":{"nested":true}}"#);
    coordinator.push("[]");
    coordinator.push_alert("gameEnd");

    wait_for_status(&session, RoomStatus::GameEnd).await;
    assert!(room.is_connected());

    room.unmount().await;
}

#[tokio::test]
async fn game_start_without_category_shows_placeholder() {
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut room = mount_room("42", &session, &notifier);
    let (channel, coordinator) = open_channel();
    room.attach(channel).await;

    coordinator.push_alert("gameStart");
    wait_for_status(&session, RoomStatus::GameStart).await;

    let view = room.render();
    assert_eq!(
        view,
        RoomView::Invalid {
            reason: InvalidPhase::MissingGameCategory
        }
    );
    assert_eq!(view.fallback_message(), Some("Something wrong!!!"));

    room.unmount().await;
}

// ════════════════════════════════════════════════════════════════════
// Cleanup
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn unmount_stops_dispatch_and_cleans_up_once() {
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut room = mount_room("42", &session, &notifier);
    let (channel, coordinator) = open_channel();
    room.attach(channel).await;

    room.unmount().await;
    coordinator.push_alert("gameEnd");
    settle().await;

    assert_eq!(session.status(), RoomStatus::Ready);
    assert_eq!(coordinator.close_count(), 1);
    assert_eq!(notifier.exit_count(), 1);
}

#[tokio::test]
async fn unmount_without_connection_sends_no_exit_call() {
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let room = mount_room("42", &session, &notifier);

    room.unmount().await;
    assert_eq!(notifier.exit_count(), 0);
}

#[tokio::test]
async fn dropping_the_controller_spawns_cleanup_on_current_thread_runtime() {
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut room = mount_room("42", &session, &notifier);
    let (channel, coordinator) = open_channel();
    room.attach(channel).await;

    drop(room);
    settle().await;

    assert_eq!(coordinator.close_count(), 1);
    assert_eq!(notifier.exit_count(), 1);
}

#[test]
fn dropping_the_controller_cleans_up_before_runtime_shutdown() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());

    let coordinator = runtime.block_on(async {
        let mut room = mount_room("42", &session, &notifier);
        let (channel, coordinator) = open_channel();
        room.attach(channel).await;
        drop(room);
        coordinator
    });
    drop(runtime);

    assert_eq!(coordinator.close_count(), 1);
    assert_eq!(notifier.exit_count(), 1);
}

#[tokio::test]
async fn failed_exit_call_does_not_block_cleanup() {
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::failing());
    let mut room = mount_room("42", &session, &notifier);
    let (channel, coordinator) = open_channel();
    room.attach(channel).await;

    room.unmount().await;
    assert_eq!(coordinator.close_count(), 1);
    assert_eq!(notifier.exit_count(), 1);
}

#[tokio::test]
async fn coordinator_disconnect_keeps_last_phase() {
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut room = mount_room("42", &session, &notifier);
    let (channel, coordinator) = open_channel();
    room.attach(channel).await;

    coordinator.push_alert("gameEnd");
    wait_for_status(&session, RoomStatus::GameEnd).await;
    let common::MockHandle { feed, .. } = coordinator;
    drop(feed);
    settle().await;

    assert!(!room.is_connected());
    assert_eq!(room.render(), RoomView::Result);

    room.unmount().await;
    assert_eq!(notifier.exit_count(), 1);
}

#[tokio::test]
async fn send_forwards_to_the_connection() {
    let session = Arc::new(RoomSession::new());
    let notifier = Arc::new(RecordingNotifier::default());
    let mut room = mount_room("42", &session, &notifier);
    let (channel, coordinator) = open_channel();
    room.attach(channel).await;

    room.send(r#"{"type":"gameStart"}"#.into()).unwrap();
    settle().await;
    assert_eq!(coordinator.sent(), vec![r#"{"type":"gameStart"}"#.to_string()]);

    room.unmount().await;
}
