#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for room session integration tests.
//!
//! Provides an in-memory [`Hub`] that plays both external collaborators: a
//! media room that assigns ids and reports membership, and a broadcast
//! channel that fans payloads out to everyone else in the room.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use async_trait::async_trait;
use imposter_room::{
    InboundMessage, MessageChannel, PeerId, RoomSession, RoomState, RoomTransport, SessionConfig,
    SessionError, SessionEvent, TransportEvent,
};
use tokio::sync::mpsc;
use tokio::time::Instant;

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ── Hub ─────────────────────────────────────────────────────────────

struct Member {
    id: PeerId,
    events: mpsc::UnboundedSender<TransportEvent>,
    messages: Option<mpsc::UnboundedSender<InboundMessage>>,
}

#[derive(Default)]
struct HubInner {
    rooms: HashMap<String, Vec<Member>>,
    fail_joins: bool,
    fail_sends: bool,
    muted: Vec<PeerId>,
    volumes: HashMap<PeerId, f32>,
    subscribed: HashSet<PeerId>,
    roster_delay: Option<Duration>,
}

/// In-memory room server shared by every peer of a test.
#[derive(Clone, Default)]
pub struct Hub {
    inner: Arc<StdMutex<HubInner>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collaborators for a peer the transport will admit as `id`.
    pub fn peer(&self, id: PeerId) -> (HubTransport, HubChannel) {
        (
            HubTransport {
                hub: self.clone(),
                id,
                room: None,
                events: None,
                roster_visible_at: None,
            },
            HubChannel {
                hub: self.clone(),
                id,
                room: None,
                messages: None,
            },
        )
    }

    /// Make every subsequent `join` fail.
    pub fn fail_joins(&self, fail: bool) {
        self.inner.lock().unwrap().fail_joins = fail;
    }

    /// Make every subsequent `send` fail.
    pub fn fail_sends(&self, fail: bool) {
        self.inner.lock().unwrap().fail_sends = fail;
    }

    /// Silently drop everything `id` publishes.
    pub fn mute(&self, id: PeerId) {
        self.inner.lock().unwrap().muted.push(id);
    }

    /// Newly joined peers see only themselves in `participants()` until
    /// `delay` has passed. Existing members still hear about them at once.
    pub fn delay_rosters(&self, delay: Duration) {
        self.inner.lock().unwrap().roster_delay = Some(delay);
    }

    /// Whether `id` currently holds an open message-channel subscription.
    pub fn is_subscribed(&self, id: PeerId) -> bool {
        self.inner.lock().unwrap().subscribed.contains(&id)
    }

    pub fn set_volume(&self, id: PeerId, volume: f32) {
        self.inner.lock().unwrap().volumes.insert(id, volume);
    }

    /// Deliver a raw payload to everyone in `room` as if `from` sent it.
    pub fn inject(&self, room: &str, from: PeerId, payload: &[u8]) {
        let inner = self.inner.lock().unwrap();
        fan_out(&inner, room, from, payload);
    }

    /// Ids currently in `room`.
    pub fn members(&self, room: &str) -> Vec<PeerId> {
        let inner = self.inner.lock().unwrap();
        inner
            .rooms
            .get(room)
            .map(|members| members.iter().map(|m| m.id).collect())
            .unwrap_or_default()
    }
}

fn fan_out(inner: &HubInner, room: &str, from: PeerId, payload: &[u8]) {
    let Some(members) = inner.rooms.get(room) else {
        return;
    };
    for member in members.iter().filter(|m| m.id != from) {
        if let Some(tx) = &member.messages {
            let _ = tx.send(InboundMessage {
                from,
                payload: payload.to_vec(),
            });
        }
    }
}

// ── Transport ───────────────────────────────────────────────────────

/// Membership half of a hub peer.
pub struct HubTransport {
    hub: Hub,
    id: PeerId,
    room: Option<String>,
    events: Option<mpsc::UnboundedReceiver<TransportEvent>>,
    roster_visible_at: Option<Instant>,
}

#[async_trait]
impl RoomTransport for HubTransport {
    async fn join(&mut self, room: &str) -> Result<PeerId, SessionError> {
        let mut inner = self.hub.inner.lock().unwrap();
        if inner.fail_joins {
            return Err(SessionError::TransportJoin("hub refused join".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let members = inner.rooms.entry(room.to_string()).or_default();
        // Only peers already inside hear about the newcomer.
        for member in members.iter() {
            let _ = member.events.send(TransportEvent::PeerAppeared(self.id));
        }
        members.push(Member {
            id: self.id,
            events: tx,
            messages: None,
        });
        self.room = Some(room.to_string());
        self.events = Some(rx);
        self.roster_visible_at = inner.roster_delay.map(|delay| Instant::now() + delay);
        Ok(self.id)
    }

    async fn leave(&mut self) -> Result<(), SessionError> {
        let Some(room) = self.room.take() else {
            return Ok(());
        };
        let mut inner = self.hub.inner.lock().unwrap();
        if let Some(members) = inner.rooms.get_mut(&room) {
            members.retain(|m| m.id != self.id);
            for member in members.iter() {
                let _ = member.events.send(TransportEvent::PeerDisappeared(self.id));
            }
        }
        Ok(())
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        match self.events.as_mut() {
            Some(rx) => rx.recv().await,
            None => std::future::pending().await,
        }
    }

    fn participants(&self) -> Vec<PeerId> {
        if self
            .roster_visible_at
            .is_some_and(|visible_at| Instant::now() < visible_at)
        {
            return vec![self.id];
        }
        self.room
            .as_deref()
            .map(|room| self.hub.members(room))
            .unwrap_or_default()
    }

    fn volume(&self, peer: PeerId) -> Option<f32> {
        self.hub.inner.lock().unwrap().volumes.get(&peer).copied()
    }
}

// ── Channel ─────────────────────────────────────────────────────────

/// Broadcast half of a hub peer.
pub struct HubChannel {
    hub: Hub,
    id: PeerId,
    room: Option<String>,
    messages: Option<mpsc::UnboundedReceiver<InboundMessage>>,
}

#[async_trait]
impl MessageChannel for HubChannel {
    async fn subscribe(&mut self, room: &str, local_id: PeerId) -> Result<(), SessionError> {
        let mut inner = self.hub.inner.lock().unwrap();
        let member = inner
            .rooms
            .get_mut(room)
            .and_then(|members| members.iter_mut().find(|m| m.id == local_id))
            .ok_or_else(|| SessionError::TransportJoin("not in room".into()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        member.messages = Some(tx);
        inner.subscribed.insert(local_id);
        self.room = Some(room.to_string());
        self.messages = Some(rx);
        Ok(())
    }

    async fn send(&mut self, payload: Vec<u8>) -> Result<(), SessionError> {
        let inner = self.hub.inner.lock().unwrap();
        if inner.fail_sends {
            return Err(SessionError::TransportSend("hub refused publish".into()));
        }
        if inner.muted.contains(&self.id) {
            return Ok(());
        }
        let Some(room) = &self.room else {
            return Err(SessionError::TransportClosed);
        };
        fan_out(&inner, room, self.id, &payload);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<InboundMessage, SessionError>> {
        match self.messages.as_mut() {
            Some(rx) => rx.recv().await.map(Ok),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), SessionError> {
        self.room = None;
        self.messages = None;
        self.hub.inner.lock().unwrap().subscribed.remove(&self.id);
        Ok(())
    }
}

// ── Session helpers ─────────────────────────────────────────────────

/// Config with delays short enough for tests.
pub fn fast_config(name: &str) -> SessionConfig {
    SessionConfig::new(name)
        .with_settle_delay(Duration::from_millis(20))
        .with_auto_start_delay(Duration::from_millis(150))
        .with_quick_match_channel("qm-test")
}

/// Start a session for peer `id` on `hub`.
pub fn start_peer(
    hub: &Hub,
    id: PeerId,
    name: &str,
) -> (RoomSession, mpsc::Receiver<SessionEvent>) {
    let (transport, channel) = hub.peer(id);
    RoomSession::start(transport, channel, fast_config(name))
}

/// Poll `session` until its room state satisfies `pred`, or panic after two
/// seconds.
pub async fn wait_for<F>(session: &RoomSession, what: &str, pred: F) -> RoomState
where
    F: Fn(&RoomState) -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if let Some(state) = session.room_state().await {
            if pred(&state) {
                return state;
            }
        }
        if tokio::time::Instant::now() >= deadline {
            panic!(
                "timed out waiting for {what}; last state: {:?}",
                session.room_state().await
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Receive events until one matches `pred`, or panic after two seconds.
pub async fn next_event_matching<F>(
    events: &mut mpsc::Receiver<SessionEvent>,
    pred: F,
) -> SessionEvent
where
    F: Fn(&SessionEvent) -> bool,
{
    let found = tokio::time::timeout(Duration::from_secs(2), async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;
    match found {
        Ok(Some(event)) => event,
        Ok(None) => panic!("event channel closed before a matching event"),
        Err(_) => panic!("timed out waiting for event"),
    }
}
