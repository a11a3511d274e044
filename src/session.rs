//! Async room session.
//!
//! [`RoomSession`] is a thin handle that talks to a single background task
//! over an unbounded MPSC channel. That task owns the transport, the message
//! channel and the [`SessionController`], so every change to the room state
//! happens on one logical thread. Events are emitted on a bounded channel
//! returned from [`RoomSession::start`].
//!
//! # Example
//!
//! ```rust,ignore
//! let config = SessionConfig::new("Ada");
//! let (session, mut events) = RoomSession::start(audio_room, broadcast, config);
//!
//! let joined = session.create_room().await?;
//! println!("share code {}", joined.room_code);
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::StateChanged(state) => { /* render */ }
//!         SessionEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::{Instant, Sleep};
use tracing::{debug, error, info, warn};

use crate::controller::{Effect, RoomTarget, SessionController};
use crate::error::{Result, SessionError};
use crate::event::SessionEvent;
use crate::protocol::{self, GameMessage};
use crate::state::{PeerId, RoomState};
use crate::transport::{MessageChannel, RoomTransport, TransportEvent};

/// Well-known channel shared by all anonymous-match participants.
pub const DEFAULT_QUICK_MATCH_CHANNEL: &str = "imposter-quickmatch";

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default delay before scanning participants that were present before us.
const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Default quick-match auto-start debounce.
const DEFAULT_AUTO_START_DELAY: Duration = Duration::from_secs(2);

/// Built-in secret words.
pub const DEFAULT_WORDS: &[&str] = &[
    "lighthouse",
    "volcano",
    "library",
    "submarine",
    "carnival",
    "glacier",
    "bakery",
    "orchestra",
    "pyramid",
    "hospital",
    "airport",
    "circus",
    "castle",
    "jungle",
    "museum",
    "spaceship",
    "beach",
    "casino",
    "farm",
    "subway",
];

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`RoomSession`].
///
/// The only required field is `player_name`; all others have defaults.
///
/// # Example
///
/// ```
/// use imposter_room::session::SessionConfig;
/// use std::time::Duration;
///
/// let config = SessionConfig::new("Ada")
///     .with_auto_start_delay(Duration::from_millis(500))
///     .with_event_channel_capacity(64);
/// assert_eq!(config.player_name, "Ada");
/// assert_eq!(config.event_channel_capacity, 64);
/// ```
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Display name announced in `playerJoined`.
    pub player_name: String,
    /// Channel name used by [`RoomSession::join_quick_match`].
    pub quick_match_channel: String,
    /// Delay before the one-time scan of pre-existing participants.
    ///
    /// Defaults to **1 second**.
    pub settle_delay: Duration,
    /// Debounce between reaching four players and auto-starting a quick match.
    ///
    /// Defaults to **2 seconds**.
    pub auto_start_delay: Duration,
    /// Words a round's secret is drawn from. Never empty.
    pub word_list: Vec<String>,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer falls behind, events are dropped with a warning so
    /// the session loop never blocks. `Disconnected` is always delivered.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Time the session loop gets to leave cleanly on [`RoomSession::leave`]
    /// before it is aborted.
    ///
    /// Defaults to **1 second**.
    pub shutdown_timeout: Duration,
}

impl SessionConfig {
    /// Create a configuration for `player_name` with default values.
    pub fn new(player_name: impl Into<String>) -> Self {
        Self {
            player_name: player_name.into(),
            quick_match_channel: DEFAULT_QUICK_MATCH_CHANNEL.to_string(),
            settle_delay: DEFAULT_SETTLE_DELAY,
            auto_start_delay: DEFAULT_AUTO_START_DELAY,
            word_list: default_words(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_quick_match_channel(mut self, channel: impl Into<String>) -> Self {
        self.quick_match_channel = channel.into();
        self
    }

    #[must_use]
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    #[must_use]
    pub fn with_auto_start_delay(mut self, delay: Duration) -> Self {
        self.auto_start_delay = delay;
        self
    }

    /// Replace the word list. An empty list keeps the built-in words.
    #[must_use]
    pub fn with_word_list<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let words: Vec<String> = words.into_iter().map(Into::into).collect();
        if !words.is_empty() {
            self.word_list = words;
        }
        self
    }

    /// Set the capacity of the bounded event channel. Values below 1 are
    /// clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

fn default_words() -> Vec<String> {
    DEFAULT_WORDS.iter().map(|w| (*w).to_string()).collect()
}

/// Returned by the connect calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomJoined {
    pub room_code: String,
    pub local_id: PeerId,
}

/// A fresh four-digit room code.
pub fn generate_room_code() -> String {
    format!("{:04}", rand::thread_rng().gen_range(0..10_000u16))
}

/// `true` for exactly four ASCII digits.
pub fn is_valid_room_code(code: &str) -> bool {
    code.len() == 4 && code.bytes().all(|b| b.is_ascii_digit())
}

// ── Shared state ────────────────────────────────────────────────────

enum Command {
    Connect {
        target: RoomTarget,
        reply: oneshot::Sender<Result<RoomJoined>>,
    },
    StartGame,
    Reveal,
    ReturnToLobby,
    PeerVolume {
        peer: PeerId,
        reply: oneshot::Sender<Option<f32>>,
    },
}

/// State shared between the handle and the session loop.
struct SharedState {
    connecting: AtomicBool,
    connected: AtomicBool,
    room: Mutex<Option<RoomState>>,
}

impl SharedState {
    fn new() -> Self {
        Self {
            connecting: AtomicBool::new(false),
            connected: AtomicBool::new(false),
            room: Mutex::new(None),
        }
    }
}

// ── Session handle ──────────────────────────────────────────────────

/// Handle to a running room session. See the [module docs](self).
pub struct RoomSession {
    cmd_tx: mpsc::UnboundedSender<Command>,
    shared: Arc<SharedState>,
    quick_match_channel: String,
    task: Option<tokio::task::JoinHandle<()>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    shutdown_timeout: Duration,
}

impl RoomSession {
    /// Spawn the session loop and return a handle plus event receiver.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        transport: impl RoomTransport,
        channel: impl MessageChannel,
        config: SessionConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        Self::start_with(transport, channel, SessionController::new(config))
    }

    /// Like [`start`](Self::start) but with a prepared controller, e.g. one
    /// built with [`SessionController::with_seed`].
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start_with(
        transport: impl RoomTransport,
        channel: impl MessageChannel,
        controller: SessionController,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let config = controller.config().clone();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<Command>();
        let (event_tx, event_rx) = mpsc::channel::<SessionEvent>(config.event_channel_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let shared = Arc::new(SharedState::new());
        let task = tokio::spawn(session_loop(
            transport,
            channel,
            controller,
            cmd_rx,
            event_tx,
            Arc::clone(&shared),
            shutdown_rx,
        ));

        let session = Self {
            cmd_tx,
            shared,
            quick_match_channel: config.quick_match_channel,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout: config.shutdown_timeout,
        };
        (session, event_rx)
    }

    // ── Connect calls ───────────────────────────────────────────────

    /// Create a coded room with a random four-digit code and become its host.
    ///
    /// # Errors
    ///
    /// - [`SessionError::ConnectInProgress`] if another connect call is running
    /// - [`SessionError::TransportJoin`] / [`SessionError::TransportSend`] if
    ///   the transport fails; the session is idle again afterwards
    pub async fn create_room(&self) -> Result<RoomJoined> {
        self.connect(RoomTarget::Create {
            room_code: generate_room_code(),
        })
        .await
    }

    /// Join an existing coded room.
    ///
    /// # Errors
    ///
    /// [`SessionError::InvalidRoomCode`] for anything but four ASCII digits,
    /// otherwise as for [`create_room`](Self::create_room).
    pub async fn join_room(&self, room_code: &str) -> Result<RoomJoined> {
        if !is_valid_room_code(room_code) {
            return Err(SessionError::InvalidRoomCode(room_code.to_string()));
        }
        self.connect(RoomTarget::Join {
            room_code: room_code.to_string(),
        })
        .await
    }

    /// Join anonymous matchmaking on the shared quick-match channel.
    ///
    /// # Errors
    ///
    /// As for [`create_room`](Self::create_room).
    pub async fn join_quick_match(&self) -> Result<RoomJoined> {
        self.connect(RoomTarget::QuickMatch {
            channel: self.quick_match_channel.clone(),
        })
        .await
    }

    async fn connect(&self, target: RoomTarget) -> Result<RoomJoined> {
        if self
            .shared
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("connect ignored, another attempt is in flight");
            return Err(SessionError::ConnectInProgress);
        }
        let (reply, response) = oneshot::channel();
        let result = match self.cmd_tx.send(Command::Connect { target, reply }) {
            Ok(()) => response.await.unwrap_or(Err(SessionError::NotConnected)),
            Err(_) => Err(SessionError::NotConnected),
        };
        self.shared.connecting.store(false, Ordering::Release);
        result
    }

    // ── Game actions ────────────────────────────────────────────────

    /// Ask the session to start a round. Ignored unless the local peer is host
    /// of a lobby with at least two players.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] if the session loop has exited.
    pub fn start_game(&self) -> Result<()> {
        self.send(Command::StartGame)
    }

    /// Move a running round to the reveal phase. Host only.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] if the session loop has exited.
    pub fn reveal(&self) -> Result<()> {
        self.send(Command::Reveal)
    }

    /// End the round and go back to the lobby. Host only.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::NotConnected`] if the session loop has exited.
    pub fn return_to_lobby(&self) -> Result<()> {
        self.send(Command::ReturnToLobby)
    }

    /// Best-effort speaking amplitude for `peer`, as sampled by the transport.
    pub async fn peer_volume(&self, peer: PeerId) -> Option<f32> {
        let (reply, response) = oneshot::channel();
        self.cmd_tx.send(Command::PeerVolume { peer, reply }).ok()?;
        response.await.ok().flatten()
    }

    /// Leave the room and stop the session loop.
    ///
    /// Announces `playerLeft` on a best-effort basis. After this call the event
    /// receiver yields `Disconnected` followed by `None`.
    pub async fn leave(&mut self) {
        debug!("RoomSession: leave requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("session loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("session loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("session loop aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.connected.store(false, Ordering::Release);
    }

    // ── State accessors ─────────────────────────────────────────────

    /// Returns `true` while the session holds a room.
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Returns `true` while a create/join/match call is in flight.
    pub fn is_connecting(&self) -> bool {
        self.shared.connecting.load(Ordering::Acquire)
    }

    /// Copy of the current room state.
    pub async fn room_state(&self) -> Option<RoomState> {
        self.shared.room.lock().await.clone()
    }

    /// Word the local player should see, if in a room.
    pub async fn local_word(&self) -> Option<String> {
        self.shared
            .room
            .lock()
            .await
            .as_ref()
            .map(|state| state.local_word().to_string())
    }

    fn send(&self, command: Command) -> Result<()> {
        self.cmd_tx
            .send(command)
            .map_err(|_| SessionError::NotConnected)
    }
}

impl std::fmt::Debug for RoomSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoomSession")
            .field("connected", &self.is_connected())
            .field("connecting", &self.is_connecting())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for RoomSession {
    fn drop(&mut self) {
        // No executor to drive a graceful leave from `Drop`; abort instead.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Timers ──────────────────────────────────────────────────────────

/// The two one-shot delays owned by the session loop. Both die with it.
struct Timers {
    auto_start: Pin<Box<Sleep>>,
    auto_start_armed: bool,
    catch_up: Pin<Box<Sleep>>,
    catch_up_armed: bool,
}

impl Timers {
    fn new() -> Self {
        Self {
            auto_start: Box::pin(tokio::time::sleep(Duration::ZERO)),
            auto_start_armed: false,
            catch_up: Box::pin(tokio::time::sleep(Duration::ZERO)),
            catch_up_armed: false,
        }
    }

    fn arm_auto_start(&mut self, delay: Duration) {
        self.auto_start.as_mut().reset(Instant::now() + delay);
        self.auto_start_armed = true;
    }

    fn arm_catch_up(&mut self, delay: Duration) {
        self.catch_up.as_mut().reset(Instant::now() + delay);
        self.catch_up_armed = true;
    }

    fn disarm_all(&mut self) {
        self.auto_start_armed = false;
        self.catch_up_armed = false;
    }
}

// ── Session loop ────────────────────────────────────────────────────

/// Background loop multiplexing commands, membership events, inbound
/// messages and timers via `tokio::select!`.
///
/// Exits when:
/// - the shutdown signal fires or the handle is dropped
/// - the transport or message channel closes
/// - the message channel reports a receive error
async fn session_loop<T: RoomTransport, M: MessageChannel>(
    mut transport: T,
    mut channel: M,
    mut controller: SessionController,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    event_tx: mpsc::Sender<SessionEvent>,
    shared: Arc<SharedState>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    debug!("session loop started");
    let mut timers = Timers::new();
    let mut published: Option<RoomState> = None;

    loop {
        let connected = controller.is_connected();
        let effects = tokio::select! {
            // Branch 1: command from the handle
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Connect { target, reply }) => {
                        let result = connect(&mut transport, &mut channel, &mut controller, &mut timers, &target).await;
                        match &result {
                            Ok(joined) => {
                                shared.connected.store(true, Ordering::Release);
                                emit_event(&event_tx, SessionEvent::Connected {
                                    room_code: joined.room_code.clone(),
                                    local_id: joined.local_id,
                                });
                            }
                            // A refused re-entrant call leaves the session as it was.
                            Err(SessionError::ConnectInProgress | SessionError::AlreadyInRoom) => {}
                            Err(e) => {
                                emit_event(&event_tx, SessionEvent::ConnectFailed { reason: e.to_string() });
                            }
                        }
                        let _ = reply.send(result);
                        Vec::new()
                    }
                    Some(Command::StartGame) => controller.start_game(),
                    Some(Command::Reveal) => controller.reveal(),
                    Some(Command::ReturnToLobby) => controller.return_to_lobby(),
                    Some(Command::PeerVolume { peer, reply }) => {
                        let _ = reply.send(transport.volume(peer));
                        Vec::new()
                    }
                    // Command channel closed, the handle was dropped.
                    None => {
                        debug!("command channel closed, shutting down session loop");
                        teardown(&mut transport, &mut channel, &mut controller, &mut timers).await;
                        publish(&controller, &shared, &event_tx, &mut published).await;
                        emit_disconnected(&event_tx, &shared, Some("session dropped".into())).await;
                        break;
                    }
                }
            }

            // Branch 2: leave requested
            _ = &mut shutdown_rx => {
                debug!("leave signal received");
                teardown(&mut transport, &mut channel, &mut controller, &mut timers).await;
                publish(&controller, &shared, &event_tx, &mut published).await;
                emit_disconnected(&event_tx, &shared, Some("left room".into())).await;
                break;
            }

            // Branch 3: transport membership
            event = transport.next_event(), if connected => {
                match event {
                    Some(TransportEvent::PeerAppeared(id)) => {
                        debug!(peer = id, "peer appeared");
                        controller.peer_appeared(id)
                    }
                    Some(TransportEvent::PeerDisappeared(id)) => {
                        debug!(peer = id, "peer disappeared");
                        controller.peer_disappeared(id)
                    }
                    None => {
                        warn!("transport closed");
                        teardown(&mut transport, &mut channel, &mut controller, &mut timers).await;
                        publish(&controller, &shared, &event_tx, &mut published).await;
                        emit_disconnected(&event_tx, &shared, Some("transport closed".into())).await;
                        break;
                    }
                }
            }

            // Branch 4: inbound protocol message
            inbound = channel.recv(), if connected => {
                match inbound {
                    Some(Ok(message)) => match protocol::decode(&message.payload) {
                        Ok(decoded) => controller.handle_message(message.from, decoded),
                        Err(e) => {
                            warn!(from = message.from, "dropping undecodable message: {e}");
                            Vec::new()
                        }
                    },
                    Some(Err(e)) => {
                        error!("message channel receive error: {e}");
                        teardown(&mut transport, &mut channel, &mut controller, &mut timers).await;
                        publish(&controller, &shared, &event_tx, &mut published).await;
                        emit_disconnected(&event_tx, &shared, Some(format!("receive error: {e}"))).await;
                        break;
                    }
                    None => {
                        warn!("message channel closed");
                        teardown(&mut transport, &mut channel, &mut controller, &mut timers).await;
                        publish(&controller, &shared, &event_tx, &mut published).await;
                        emit_disconnected(&event_tx, &shared, Some("message channel closed".into())).await;
                        break;
                    }
                }
            }

            // Branch 5: quick-match auto-start debounce elapsed
            () = &mut timers.auto_start, if timers.auto_start_armed => {
                timers.auto_start_armed = false;
                controller.auto_start_fired()
            }

            // Branch 6: settle delay elapsed, scan pre-existing participants
            () = &mut timers.catch_up, if timers.catch_up_armed => {
                timers.catch_up_armed = false;
                controller.catch_up(&transport.participants())
            }
        };

        // Broadcast failures outside of connect are logged and dropped.
        let _ = run_effects(&mut channel, &mut timers, effects).await;
        publish(&controller, &shared, &event_tx, &mut published).await;
    }

    debug!("session loop exited");
}

/// Enter a room. On any transport failure the channel is closed, the room is
/// left again and the controller returns to idle; there is no retry.
async fn connect<T: RoomTransport, M: MessageChannel>(
    transport: &mut T,
    channel: &mut M,
    controller: &mut SessionController,
    timers: &mut Timers,
    target: &RoomTarget,
) -> Result<RoomJoined> {
    controller.begin_connect()?;
    match establish(transport, channel, controller, timers, target).await {
        Ok(joined) => {
            info!(room = %joined.room_code, local = joined.local_id, "joined room");
            Ok(joined)
        }
        Err(e) => {
            warn!(room = target.room_name(), "connect failed: {e}");
            timers.disarm_all();
            controller.connect_failed();
            if let Err(close_err) = channel.close().await {
                debug!("message channel close after failed connect: {close_err}");
            }
            if let Err(leave_err) = transport.leave().await {
                debug!("transport leave after failed connect: {leave_err}");
            }
            Err(e)
        }
    }
}

async fn establish<T: RoomTransport, M: MessageChannel>(
    transport: &mut T,
    channel: &mut M,
    controller: &mut SessionController,
    timers: &mut Timers,
    target: &RoomTarget,
) -> Result<RoomJoined> {
    let room = target.room_name();
    let local_id = transport.join(room).await?;
    channel.subscribe(room, local_id).await?;
    let participants = transport.participants();
    let effects = controller.connected(target, local_id, &participants);
    run_effects(channel, timers, effects).await?;
    Ok(RoomJoined {
        room_code: room.to_string(),
        local_id,
    })
}

/// Leave the room (if any), announcing it, and release both collaborators.
async fn teardown<T: RoomTransport, M: MessageChannel>(
    transport: &mut T,
    channel: &mut M,
    controller: &mut SessionController,
    timers: &mut Timers,
) {
    let was_connected = controller.is_connected();
    let effects = controller.leave();
    let _ = run_effects(channel, timers, effects).await;
    timers.disarm_all();
    if !was_connected {
        return;
    }
    if let Err(e) = channel.close().await {
        debug!("message channel close: {e}");
    }
    if let Err(e) = transport.leave().await {
        debug!("transport leave: {e}");
    }
}

/// Carry out controller effects in order. Every effect is attempted; the
/// first broadcast failure is returned.
async fn run_effects<M: MessageChannel>(
    channel: &mut M,
    timers: &mut Timers,
    effects: Vec<Effect>,
) -> Result<()> {
    let mut first_error = None;
    for effect in effects {
        match effect {
            Effect::Broadcast(message) => {
                if let Err(e) = broadcast(channel, &message).await {
                    warn!(kind = message.kind(), "broadcast failed: {e}");
                    first_error.get_or_insert(e);
                }
            }
            Effect::ScheduleAutoStart(delay) => timers.arm_auto_start(delay),
            Effect::CancelAutoStart => timers.auto_start_armed = false,
            Effect::ScheduleCatchUp(delay) => timers.arm_catch_up(delay),
        }
    }
    first_error.map_or(Ok(()), Err)
}

async fn broadcast<M: MessageChannel>(channel: &mut M, message: &GameMessage) -> Result<()> {
    debug!(kind = message.kind(), "broadcasting");
    let payload = protocol::encode(message)?;
    channel.send(payload).await
}

/// Mirror the controller's state into the shared slot and emit
/// `StateChanged` when it differs from what was last published.
async fn publish(
    controller: &SessionController,
    shared: &SharedState,
    event_tx: &mpsc::Sender<SessionEvent>,
    published: &mut Option<RoomState>,
) {
    let current = controller.state();
    if current == published.as_ref() {
        return;
    }
    *published = current.cloned();
    *shared.room.lock().await = published.clone();
    if let Some(state) = published.as_ref() {
        emit_event(event_tx, SessionEvent::StateChanged(state.clone()));
    }
}

/// Emit an event. If the channel is full, log a warning and drop the event
/// so the session loop never blocks.
fn emit_event(event_tx: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit [`Disconnected`](SessionEvent::Disconnected) and update shared state.
///
/// Uses a blocking `send().await` because `Disconnected` is always the last
/// event and must never be dropped.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<SessionEvent>,
    shared: &SharedState,
    reason: Option<String>,
) {
    shared.connected.store(false, Ordering::Release);
    if event_tx
        .send(SessionEvent::Disconnected { reason })
        .await
        .is_err()
    {
        debug!("event channel closed, receiver dropped");
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = SessionConfig::new("Ada");
        assert_eq!(config.player_name, "Ada");
        assert_eq!(config.quick_match_channel, DEFAULT_QUICK_MATCH_CHANNEL);
        assert_eq!(config.settle_delay, Duration::from_secs(1));
        assert_eq!(config.auto_start_delay, Duration::from_secs(2));
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.word_list.len(), DEFAULT_WORDS.len());
    }

    #[test]
    fn config_builder_methods() {
        let config = SessionConfig::new("Ada")
            .with_quick_match_channel("qm-test")
            .with_settle_delay(Duration::from_millis(10))
            .with_auto_start_delay(Duration::from_millis(20))
            .with_word_list(["kite"])
            .with_shutdown_timeout(Duration::from_secs(5));
        assert_eq!(config.quick_match_channel, "qm-test");
        assert_eq!(config.settle_delay, Duration::from_millis(10));
        assert_eq!(config.auto_start_delay, Duration::from_millis(20));
        assert_eq!(config.word_list, vec!["kite".to_string()]);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
    }

    #[test]
    fn empty_word_list_keeps_defaults() {
        let config = SessionConfig::new("Ada").with_word_list(Vec::<String>::new());
        assert_eq!(config.word_list.len(), DEFAULT_WORDS.len());
    }

    #[test]
    fn event_channel_capacity_is_clamped_to_one() {
        let config = SessionConfig::new("Ada").with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[test]
    fn room_codes_are_four_digits() {
        for _ in 0..100 {
            let code = generate_room_code();
            assert!(is_valid_room_code(&code), "bad code {code}");
        }
        assert!(is_valid_room_code("0042"));
        assert!(!is_valid_room_code("042"));
        assert!(!is_valid_room_code("12a4"));
        assert!(!is_valid_room_code("12345"));
        assert!(!is_valid_room_code("١٢٣٤"));
    }
}
