#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! End-to-end session tests.
//!
//! Several [`RoomSession`]s share one in-memory [`Hub`](common::Hub) and are
//! driven through create/join/match, convergence, game start, host handover
//! and teardown.

mod common;

use imposter_room::protocol::{self, GameMessage};
use imposter_room::state::{IMPOSTER_WORD, UNKNOWN_WORD};
use imposter_room::{
    MessageChannel, Phase, RoomSession, RoomState, RoomTransport, SessionError, SessionEvent,
};
use tokio::sync::mpsc;

use common::{init_tracing, next_event_matching, start_peer, wait_for, Hub};

type Peer = (RoomSession, mpsc::Receiver<SessionEvent>);

fn roster(state: &RoomState) -> Vec<(u64, u8)> {
    state.players.iter().map(|p| (p.id, p.slot_index)).collect()
}

// ════════════════════════════════════════════════════════════════════
// Coded rooms
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_room_seats_creator_as_host() {
    init_tracing();
    let hub = Hub::new();
    let (mut host, mut events) = start_peer(&hub, 1, "Ada");

    let joined = host.create_room().await.expect("create_room");
    assert_eq!(joined.local_id, 1);
    assert_eq!(joined.room_code.len(), 4);
    assert!(joined.room_code.bytes().all(|b| b.is_ascii_digit()));
    assert!(host.is_connected());
    assert!(!host.is_connecting());

    let ev = next_event_matching(&mut events, |e| matches!(e, SessionEvent::Connected { .. })).await;
    assert_eq!(
        ev,
        SessionEvent::Connected {
            room_code: joined.room_code.clone(),
            local_id: 1
        }
    );

    let state = host.room_state().await.expect("room state");
    assert!(state.is_host());
    assert_eq!(state.phase, Phase::Lobby);
    assert_eq!(roster(&state), vec![(1, 0)]);
    assert_eq!(state.players[0].name, "Ada");
    assert_eq!(host.local_word().await.as_deref(), Some(UNKNOWN_WORD));

    host.leave().await;
}

#[tokio::test]
async fn three_peers_converge_on_host_seating() {
    init_tracing();
    let hub = Hub::new();
    let (mut host, _host_events) = start_peer(&hub, 10, "Host");
    let (mut bea, _bea_events) = start_peer(&hub, 20, "Bea");
    let (mut cy, _cy_events) = start_peer(&hub, 30, "Cy");

    let code = host.create_room().await.unwrap().room_code;
    bea.join_room(&code).await.unwrap();
    cy.join_room(&code).await.unwrap();

    let full = |s: &RoomState| {
        s.players.len() == 3 && s.players.iter().all(|p| !p.name.starts_with("Player "))
    };
    let host_state = wait_for(&host, "host roster", full).await;
    assert_eq!(roster(&host_state), vec![(10, 0), (20, 1), (30, 2)]);

    for guest in [&bea, &cy] {
        let state = wait_for(guest, "guest converged", |s| {
            s.players == host_state.players && s.host_id == Some(10)
        })
        .await;
        assert!(!state.is_host());
        assert_eq!(state.room_code, code);
    }

    let names: Vec<_> = host_state.players.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["Host", "Bea", "Cy"]);

    host.leave().await;
    bea.leave().await;
    cy.leave().await;
}

#[tokio::test]
async fn join_room_rejects_malformed_code() {
    let hub = Hub::new();
    let (mut peer, _events) = start_peer(&hub, 1, "Ada");
    for bad in ["", "123", "12345", "12a4"] {
        let err = peer.join_room(bad).await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidRoomCode(_)), "{bad:?} gave {err:?}");
    }
    assert!(!peer.is_connected());
    peer.leave().await;
}

#[tokio::test]
async fn concurrent_connect_calls_are_ignored() {
    let hub = Hub::new();
    let (mut peer, _events) = start_peer(&hub, 1, "Ada");

    let (first, second) = tokio::join!(peer.create_room(), peer.create_room());
    assert!(first.is_ok());
    assert!(matches!(second, Err(SessionError::ConnectInProgress)));

    // Once connected, further connects are refused.
    assert!(matches!(
        peer.join_quick_match().await,
        Err(SessionError::AlreadyInRoom)
    ));
    peer.leave().await;
}

#[tokio::test]
async fn transport_failure_surfaces_and_does_not_retry() {
    init_tracing();
    let hub = Hub::new();
    hub.fail_joins(true);
    let (mut peer, mut events) = start_peer(&hub, 1, "Ada");

    let err = peer.create_room().await.unwrap_err();
    assert!(matches!(err, SessionError::TransportJoin(_)));
    assert!(!peer.is_connected());
    assert!(!peer.is_connecting());
    let ev = next_event_matching(&mut events, |e| matches!(e, SessionEvent::ConnectFailed { .. })).await;
    assert!(matches!(ev, SessionEvent::ConnectFailed { reason } if reason.contains("hub refused join")));
    assert!(peer.room_state().await.is_none());

    // The caller may try again once the transport recovers.
    hub.fail_joins(false);
    peer.create_room().await.expect("second attempt");
    assert!(peer.is_connected());
    peer.leave().await;
}

#[tokio::test]
async fn publish_failure_during_join_aborts_connect() {
    let hub = Hub::new();
    let (mut host, _host_events) = start_peer(&hub, 1, "Host");
    let code = host.create_room().await.unwrap().room_code;

    hub.fail_sends(true);
    let (mut guest, _guest_events) = start_peer(&hub, 2, "Guest");
    let err = guest.join_room(&code).await.unwrap_err();
    assert!(matches!(err, SessionError::TransportSend(_)));
    assert!(!guest.is_connected());
    // The failed joiner left the media room and dropped its subscription.
    assert_eq!(hub.members(&code), vec![1]);
    assert!(!hub.is_subscribed(2));

    hub.fail_sends(false);
    guest.join_room(&code).await.expect("retry after publish recovers");
    assert!(hub.is_subscribed(2));
    wait_for(&host, "guest seated after retry", |s| s.contains(2)).await;

    host.leave().await;
    guest.leave().await;
    assert!(!hub.is_subscribed(1));
    assert!(!hub.is_subscribed(2));
}

// ════════════════════════════════════════════════════════════════════
// Presence
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn catch_up_scan_seats_silent_earlier_peer() {
    let hub = Hub::new();
    let (mut host, _host_events) = start_peer(&hub, 1, "Host");
    let code = host.create_room().await.unwrap().room_code;
    // The host's messages never arrive; only transport membership does.
    hub.mute(1);

    let (mut guest, _guest_events) = start_peer(&hub, 2, "Guest");
    guest.join_room(&code).await.unwrap();

    let state = wait_for(&guest, "placeholder for host", |s| s.contains(1)).await;
    let host_entry = state.player(1).unwrap();
    assert!(host_entry.name.starts_with("Player "));
    assert!(host_entry.is_connected);
    assert_eq!(state.players.len(), 2);

    host.leave().await;
    guest.leave().await;
}

#[tokio::test]
async fn leaving_peer_is_removed_everywhere() {
    let hub = Hub::new();
    let (mut host, _host_events) = start_peer(&hub, 1, "Host");
    let (mut guest, mut guest_events) = start_peer(&hub, 2, "Guest");
    let code = host.create_room().await.unwrap().room_code;
    guest.join_room(&code).await.unwrap();
    wait_for(&host, "guest seated", |s| s.players.len() == 2).await;

    guest.leave().await;
    let ev = next_event_matching(&mut guest_events, |e| matches!(e, SessionEvent::Disconnected { .. })).await;
    assert!(matches!(ev, SessionEvent::Disconnected { reason: Some(_) }));
    assert!(!guest.is_connected());
    assert!(guest.room_state().await.is_none());

    let state = wait_for(&host, "guest removed", |s| s.players.len() == 1).await;
    assert_eq!(roster(&state), vec![(1, 0)]);
    host.leave().await;
}

#[tokio::test]
async fn malformed_payload_is_dropped() {
    init_tracing();
    let hub = Hub::new();
    let (mut host, _events) = start_peer(&hub, 1, "Host");
    let code = host.create_room().await.unwrap().room_code;
    let before = host.room_state().await;

    hub.inject(&code, 99, b"{\"type\":\"launchMissiles\"}");
    hub.inject(&code, 99, b"\xff\xfe");
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    assert!(host.is_connected());
    assert_eq!(host.room_state().await, before);
    host.leave().await;
}

#[tokio::test]
async fn peer_volume_passes_through() {
    let hub = Hub::new();
    hub.set_volume(7, 0.25);
    let (mut peer, _events) = start_peer(&hub, 1, "Ada");
    peer.create_room().await.unwrap();
    assert_eq!(peer.peer_volume(7).await, Some(0.25));
    assert_eq!(peer.peer_volume(8).await, None);
    peer.leave().await;
}

// ════════════════════════════════════════════════════════════════════
// Rounds
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn host_starts_round_and_peers_see_their_words() {
    let hub = Hub::new();
    let (mut host, _host_events) = start_peer(&hub, 1, "Host");
    let (mut guest, _guest_events) = start_peer(&hub, 2, "Guest");
    let code = host.create_room().await.unwrap().room_code;
    guest.join_room(&code).await.unwrap();
    wait_for(&guest, "guest synced", |s| s.host_id == Some(1) && s.players.len() == 2).await;

    host.start_game().unwrap();
    let host_state = wait_for(&host, "host playing", |s| s.phase == Phase::Playing).await;
    let guest_state = wait_for(&guest, "guest playing", |s| s.phase == Phase::Playing).await;
    assert_eq!(host_state.secret_word, guest_state.secret_word);
    assert_eq!(host_state.imposter_id, guest_state.imposter_id);

    let secret = host_state.secret_word.clone().unwrap();
    let words = [
        host.local_word().await.unwrap(),
        guest.local_word().await.unwrap(),
    ];
    assert_eq!(words.iter().filter(|w| w.as_str() == IMPOSTER_WORD).count(), 1);
    assert_eq!(words.iter().filter(|w| **w == secret).count(), 1);

    host.reveal().unwrap();
    wait_for(&guest, "guest revealing", |s| s.phase == Phase::Revealing).await;
    host.return_to_lobby().unwrap();
    let lobby = wait_for(&guest, "guest back in lobby", |s| s.phase == Phase::Lobby).await;
    assert!(lobby.secret_word.is_none());
    assert!(lobby.imposter_id.is_none());

    host.leave().await;
    guest.leave().await;
}

#[tokio::test]
async fn guest_cannot_start_or_reset() {
    let hub = Hub::new();
    let (mut host, _host_events) = start_peer(&hub, 1, "Host");
    let (mut guest, _guest_events) = start_peer(&hub, 2, "Guest");
    let code = host.create_room().await.unwrap().room_code;
    guest.join_room(&code).await.unwrap();
    wait_for(&guest, "guest synced", |s| s.host_id == Some(1) && s.players.len() == 2).await;

    guest.start_game().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(host.room_state().await.unwrap().phase, Phase::Lobby);
    assert_eq!(guest.room_state().await.unwrap().phase, Phase::Lobby);

    host.start_game().unwrap();
    wait_for(&guest, "guest playing", |s| s.phase == Phase::Playing).await;
    guest.return_to_lobby().unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(guest.room_state().await.unwrap().phase, Phase::Playing);

    host.leave().await;
    guest.leave().await;
}

// ════════════════════════════════════════════════════════════════════
// Quick match
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn quick_match_elects_lowest_and_auto_starts_at_four() {
    init_tracing();
    let hub = Hub::new();
    let mut peers = Vec::new();
    for (id, name) in [(300, "C"), (100, "A"), (400, "D"), (200, "B")] {
        let (session, events) = start_peer(&hub, id, name);
        session.join_quick_match().await.unwrap();
        peers.push((session, events));
    }

    for (session, _) in &peers {
        let state = wait_for(session, "round auto-started", |s| s.phase == Phase::Playing).await;
        assert_eq!(state.host_id, Some(100));
        assert_eq!(state.players.len(), 4);
        assert_eq!(state.room_code, "qm-test");
    }

    for (session, _) in &mut peers {
        session.leave().await;
    }
}

#[tokio::test]
async fn quick_match_hands_host_to_next_lowest() {
    let hub = Hub::new();
    let (mut first, _first_events) = start_peer(&hub, 5, "First");
    let (mut second, _second_events) = start_peer(&hub, 9, "Second");
    first.join_quick_match().await.unwrap();
    second.join_quick_match().await.unwrap();
    wait_for(&second, "second sees first as host", |s| {
        s.host_id == Some(5) && s.players.len() == 2
    })
    .await;

    first.leave().await;
    let state = wait_for(&second, "second took over", |s| s.is_host() && s.players.len() == 1).await;
    assert_eq!(state.host_id, Some(9));

    second.leave().await;
}

/// Seat three peers through quick match, then let `late` join while its
/// transport roster is still empty.
async fn quick_match_with_late_joiner(
    early: [u64; 3],
    late: u64,
) -> Vec<Peer> {
    init_tracing();
    let hub = Hub::new();
    let mut peers = Vec::new();
    for id in early {
        let (session, events) = start_peer(&hub, id, &format!("P{id}"));
        session.join_quick_match().await.unwrap();
        peers.push((session, events));
    }
    let lowest = early.iter().copied().min().unwrap();
    wait_for(&peers[0].0, "early peers settled", |s| {
        s.players.len() == 3 && s.host_id == Some(lowest)
    })
    .await;

    // Shorter than the settle delay, so the catch-up scan sees everyone.
    hub.delay_rosters(std::time::Duration::from_millis(10));
    let (session, events) = start_peer(&hub, late, &format!("P{late}"));
    session.join_quick_match().await.unwrap();
    peers.push((session, events));
    peers
}

async fn assert_converged_round(
    peers: &mut [Peer],
    host: u64,
) {
    let mut rosters = Vec::new();
    for (session, _) in peers.iter() {
        let state = wait_for(session, "round auto-started", |s| s.phase == Phase::Playing).await;
        assert_eq!(state.host_id, Some(host));
        assert_eq!(state.players.len(), 4);
        assert!(state.local_player().is_some());
        assert_ne!(session.local_word().await.as_deref(), Some(UNKNOWN_WORD));
        rosters.push(roster(&state));
    }
    assert!(rosters.windows(2).all(|w| w[0] == w[1]), "{rosters:?}");
    for (session, _) in peers.iter_mut() {
        session.leave().await;
    }
}

#[tokio::test]
async fn late_joiner_with_empty_roster_does_not_hijack_host() {
    let mut peers = quick_match_with_late_joiner([100, 200, 300], 400).await;
    assert_converged_round(&mut peers, 100).await;
}

#[tokio::test]
async fn late_lowest_joiner_with_empty_roster_takes_over() {
    let mut peers = quick_match_with_late_joiner([200, 300, 400], 100).await;
    assert_converged_round(&mut peers, 100).await;
}

#[tokio::test]
async fn quick_match_below_four_does_not_start() {
    let hub = Hub::new();
    let (mut a, _a_events) = start_peer(&hub, 1, "A");
    let (mut b, _b_events) = start_peer(&hub, 2, "B");
    let (mut c, _c_events) = start_peer(&hub, 3, "C");
    for s in [&a, &b, &c] {
        s.join_quick_match().await.unwrap();
    }
    wait_for(&a, "three seated", |s| s.players.len() == 3).await;
    tokio::time::sleep(std::time::Duration::from_millis(300)).await;
    assert_eq!(a.room_state().await.unwrap().phase, Phase::Lobby);

    a.leave().await;
    b.leave().await;
    c.leave().await;
}

// ════════════════════════════════════════════════════════════════════
// Wire
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn host_answers_raw_request_sync() {
    let hub = Hub::new();
    let (mut host, _events) = start_peer(&hub, 1, "Host");
    let code = host.create_room().await.unwrap().room_code;

    // A listener that only speaks the wire format.
    let (mut transport, mut channel) = hub.peer(50);
    transport.join(&code).await.unwrap();
    channel.subscribe(&code, 50).await.unwrap();
    channel
        .send(protocol::encode(&GameMessage::RequestSync).unwrap())
        .await
        .unwrap();

    let reply = tokio::time::timeout(std::time::Duration::from_secs(2), async {
        loop {
            let inbound = channel.recv().await.unwrap().unwrap();
            if let Ok(GameMessage::StateSync(snapshot)) = protocol::decode(&inbound.payload) {
                return (inbound.from, snapshot);
            }
        }
    })
    .await
    .expect("stateSync reply");
    assert_eq!(reply.0, 1);
    assert_eq!(reply.1.host_id, 1);
    assert!(reply.1.players.iter().any(|p| p.id == 1));

    host.leave().await;
}
