//! The session state machine, free of I/O.
//!
//! [`SessionController`] owns the local [`RoomState`] and turns every input
//! (membership event, inbound message, user action, timer) into a state
//! transition plus a list of [`Effect`]s for the async shell to carry out.
//! Nothing in here awaits, sends, or sleeps, so whole rooms can be simulated
//! by shuttling effects between controllers by hand.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};
use crate::host::{HostAuthority, RoomKind};
use crate::presence::{self, Announcement};
use crate::protocol::GameMessage;
use crate::session::SessionConfig;
use crate::slot::{next_available_slot, MAX_PLAYERS};
use crate::state::{PeerId, Phase, Player, RoomState};

/// Minimum party size for a round.
pub const MIN_PLAYERS: usize = 2;

/// Side effects requested by the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Publish a message to the room.
    Broadcast(GameMessage),
    /// Arm the quick-match auto-start timer.
    ScheduleAutoStart(Duration),
    /// Disarm the auto-start timer.
    CancelAutoStart,
    /// Arm the one-shot catch-up scan of pre-existing participants.
    ScheduleCatchUp(Duration),
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    /// Terminal.
    Disconnected,
}

/// Which kind of room a connect call targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomTarget {
    /// Create a coded room; the local peer becomes its permanent host.
    Create { room_code: String },
    /// Join an existing coded room.
    Join { room_code: String },
    /// Join the shared anonymous matchmaking channel.
    QuickMatch { channel: String },
}

impl RoomTarget {
    pub fn room_name(&self) -> &str {
        match self {
            Self::Create { room_code } | Self::Join { room_code } => room_code,
            Self::QuickMatch { channel } => channel,
        }
    }

    pub fn kind(&self) -> RoomKind {
        match self {
            Self::Create { .. } | Self::Join { .. } => RoomKind::Coded,
            Self::QuickMatch { .. } => RoomKind::QuickMatch,
        }
    }
}

#[derive(Debug)]
struct ActiveRoom {
    state: RoomState,
    authority: HostAuthority,
    auto_start_pending: bool,
}

/// Pure session core. See the [module docs](self).
#[derive(Debug)]
pub struct SessionController {
    config: SessionConfig,
    connection: ConnectionState,
    room: Option<ActiveRoom>,
    rng: StdRng,
}

impl SessionController {
    pub fn new(config: SessionConfig) -> Self {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Controller with a seeded RNG, for reproducible word/imposter picks.
    pub fn with_seed(config: SessionConfig, seed: u64) -> Self {
        Self::with_rng(config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(config: SessionConfig, rng: StdRng) -> Self {
        Self {
            config,
            connection: ConnectionState::Idle,
            room: None,
            rng,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn connection(&self) -> ConnectionState {
        self.connection
    }

    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Connected
    }

    /// Current room state, if connected.
    pub fn state(&self) -> Option<&RoomState> {
        self.room.as_ref().map(|room| &room.state)
    }

    pub fn room_kind(&self) -> Option<RoomKind> {
        self.room.as_ref().map(|room| room.authority.kind())
    }

    pub fn auto_start_pending(&self) -> bool {
        self.room.as_ref().is_some_and(|room| room.auto_start_pending)
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Claims the single in-flight connect slot.
    ///
    /// # Errors
    ///
    /// - [`SessionError::ConnectInProgress`] while another connect is running
    /// - [`SessionError::AlreadyInRoom`] once connected
    /// - [`SessionError::NotConnected`] after the session was torn down
    pub fn begin_connect(&mut self) -> Result<()> {
        match self.connection {
            ConnectionState::Idle => {
                self.connection = ConnectionState::Connecting;
                Ok(())
            }
            ConnectionState::Connecting => Err(SessionError::ConnectInProgress),
            ConnectionState::Connected => Err(SessionError::AlreadyInRoom),
            ConnectionState::Disconnected => Err(SessionError::NotConnected),
        }
    }

    /// Releases the in-flight slot after a failed connect. No retry.
    pub fn connect_failed(&mut self) {
        if self.connection != ConnectionState::Disconnected {
            self.connection = ConnectionState::Idle;
        }
        self.room = None;
    }

    /// Seeds a fresh room after the transport admitted us as `local_id`.
    ///
    /// `participants` is whatever the transport already reports. It only
    /// feeds the quick-match election here. Placeholders for those peers are
    /// seated by the delayed [`catch_up`](Self::catch_up).
    pub fn connected(
        &mut self,
        target: &RoomTarget,
        local_id: PeerId,
        participants: &[PeerId],
    ) -> Vec<Effect> {
        let kind = target.kind();
        let host_id = match target {
            RoomTarget::Create { .. } => Some(local_id),
            RoomTarget::Join { .. } | RoomTarget::QuickMatch { .. } => None,
        };
        let mut state = RoomState::new(target.room_name(), local_id, host_id);
        let mut authority = HostAuthority::new(kind, local_id);
        if kind == RoomKind::QuickMatch {
            for id in participants {
                authority.peer_connected(*id);
            }
        }

        let slot = next_available_slot(&state).unwrap_or(0);
        state.add_player(Player::new(local_id, slot, self.config.player_name.clone()));

        info!(
            room = %state.room_code,
            local = local_id,
            host = ?state.host_id,
            "connected to room"
        );
        self.connection = ConnectionState::Connected;
        self.room = Some(ActiveRoom {
            state,
            authority,
            auto_start_pending: false,
        });

        let mut effects = Vec::new();
        if !matches!(target, RoomTarget::Create { .. }) {
            effects.push(Effect::Broadcast(GameMessage::RequestSync));
            if let Some(announce) = self.state().and_then(GameMessage::announce) {
                effects.push(Effect::Broadcast(announce));
            }
            effects.push(Effect::ScheduleCatchUp(self.config.settle_delay));
        }
        if kind == RoomKind::QuickMatch {
            effects.extend(self.membership_changed(false, true));
        }
        effects
    }

    /// Tears the room down. Announces our departure when we were in one.
    pub fn leave(&mut self) -> Vec<Effect> {
        let mut effects = Vec::new();
        if let Some(room) = self.room.take() {
            debug!(room = %room.state.room_code, "leaving room");
            effects.push(Effect::Broadcast(GameMessage::PlayerLeft {
                user_id: room.state.local_id,
            }));
            if room.auto_start_pending {
                effects.push(Effect::CancelAutoStart);
            }
        }
        self.connection = ConnectionState::Disconnected;
        effects
    }

    // ── Membership ──────────────────────────────────────────────────

    /// The transport saw `id` join.
    pub fn peer_appeared(&mut self, id: PeerId) -> Vec<Effect> {
        let Some(room) = self.room.as_mut() else {
            return Vec::new();
        };
        if id == room.state.local_id {
            return Vec::new();
        }
        let joined = room.authority.peer_connected(id);
        let changed = presence::peer_appeared(&mut room.state, id).changed();
        self.membership_changed(changed, joined)
    }

    /// The transport saw `id` leave.
    pub fn peer_disappeared(&mut self, id: PeerId) -> Vec<Effect> {
        let Some(room) = self.room.as_mut() else {
            return Vec::new();
        };
        if id == room.state.local_id {
            return Vec::new();
        }
        let left = room.authority.peer_disconnected(id);
        let changed = presence::peer_left(&mut room.state, id).changed();
        self.membership_changed(changed, left)
    }

    /// Delayed scan of participants that were present before we joined.
    pub fn catch_up(&mut self, participants: &[PeerId]) -> Vec<Effect> {
        let Some(room) = self.room.as_mut() else {
            return Vec::new();
        };
        let local = room.state.local_id;
        let mut joined = false;
        for id in participants.iter().filter(|id| **id != local) {
            joined |= room.authority.peer_connected(*id);
        }
        let seated = presence::catch_up(&mut room.state, participants);
        debug!(seated, "catch-up scan finished");
        self.membership_changed(seated > 0, joined)
    }

    /// Common tail of every membership change: quick-match re-election, host
    /// rebroadcast, and auto-start evaluation.
    fn membership_changed(&mut self, roster_changed: bool, connected_changed: bool) -> Vec<Effect> {
        let auto_start_delay = self.config.auto_start_delay;
        let Some(room) = self.room.as_mut() else {
            return Vec::new();
        };
        let mut effects = Vec::new();
        let was_host = room.state.is_host();
        let took_over = connected_changed && room.authority.reelect(&mut room.state);
        if took_over {
            info!(local = room.state.local_id, "took over as quick-match host");
            // Everyone the transport reports must be in the snapshot we are
            // about to send.
            let local = room.state.local_id;
            for id in room.authority.connected().iter().filter(|id| **id != local) {
                presence::peer_appeared(&mut room.state, *id);
            }
        } else if was_host && !room.state.is_host() {
            // Our roster was built while we believed we were alone.
            info!(host = ?room.state.host_id, "lost quick-match host to a lower id");
            effects.push(Effect::Broadcast(GameMessage::RequestSync));
        }
        if room.state.is_host() && (roster_changed || took_over) {
            effects.extend(GameMessage::state_sync(&room.state).map(Effect::Broadcast));
        }
        if room.authority.kind() == RoomKind::QuickMatch
            && !room.auto_start_pending
            && auto_start_ready(&room.state)
        {
            debug!(delay = ?auto_start_delay, "scheduling auto-start");
            room.auto_start_pending = true;
            effects.push(Effect::ScheduleAutoStart(auto_start_delay));
        }
        effects
    }

    // ── Inbound protocol ────────────────────────────────────────────

    /// Applies a message broadcast by `from`.
    pub fn handle_message(&mut self, from: PeerId, message: GameMessage) -> Vec<Effect> {
        let Some(room) = self.room.as_mut() else {
            return Vec::new();
        };
        if from == room.state.local_id {
            return Vec::new();
        }
        debug!(from, kind = message.kind(), "inbound message");

        match message {
            GameMessage::PlayerJoined {
                user_id,
                name,
                slot_index,
                color_tag,
            } => {
                if user_id == room.state.local_id {
                    return Vec::new();
                }
                let changed = presence::player_joined(
                    &mut room.state,
                    Announcement {
                        user_id,
                        name,
                        slot_index,
                        color_tag,
                    },
                )
                .changed();
                self.membership_changed(changed, false)
            }
            GameMessage::PlayerLeft { user_id } => {
                if user_id == room.state.local_id {
                    return Vec::new();
                }
                let left = room.authority.peer_disconnected(user_id);
                let changed = presence::peer_left(&mut room.state, user_id).changed();
                self.membership_changed(changed, left)
            }
            GameMessage::GameStarted {
                secret_word,
                imposter_id,
            } => {
                if room.state.start_game(secret_word, imposter_id) {
                    return Vec::new();
                }
                // Our roster is behind the host's; ask for a snapshot.
                warn!(imposter = imposter_id, "gameStarted names an unknown imposter");
                vec![Effect::Broadcast(GameMessage::RequestSync)]
            }
            GameMessage::StateSync(snapshot) => {
                if !snapshot.is_consistent() {
                    warn!(from, "dropping inconsistent stateSync");
                    return Vec::new();
                }
                if let Some(elected) = room.authority.elected() {
                    if snapshot.host_id != elected {
                        warn!(
                            from,
                            claimed = snapshot.host_id,
                            elected,
                            "refusing stateSync from a peer that is not the elected host"
                        );
                        return Vec::new();
                    }
                }
                room.state.apply_state_sync(snapshot);
                let reseated =
                    presence::reseat_local(&mut room.state, &self.config.player_name).changed();
                let mut effects = Vec::new();
                if reseated && !room.state.is_host() {
                    effects.extend(GameMessage::announce(&room.state).map(Effect::Broadcast));
                }
                effects.extend(self.membership_changed(reseated, true));
                effects
            }
            GameMessage::RequestSync => {
                if !room.state.is_host() {
                    return Vec::new();
                }
                GameMessage::state_sync(&room.state)
                    .map(Effect::Broadcast)
                    .into_iter()
                    .collect()
            }
        }
    }

    // ── Local actions ───────────────────────────────────────────────

    /// Starts a round with a random word and imposter. Host only, at least
    /// two players, from the lobby. Anything else is ignored.
    ///
    /// Local state changes first, then `gameStarted` is broadcast.
    pub fn start_game(&mut self) -> Vec<Effect> {
        let Some(room) = self.room.as_mut() else {
            return Vec::new();
        };
        let state = &mut room.state;
        if !state.is_host() || state.players.len() < MIN_PLAYERS || state.phase != Phase::Lobby {
            debug!(
                host = state.is_host(),
                players = state.players.len(),
                phase = ?state.phase,
                "start ignored"
            );
            return Vec::new();
        }
        let Some(secret_word) = self.config.word_list.choose(&mut self.rng).cloned() else {
            warn!("word list is empty");
            return Vec::new();
        };
        let Some(imposter_id) = state.players.choose(&mut self.rng).map(|p| p.id) else {
            return Vec::new();
        };
        if !state.start_game(secret_word.clone(), imposter_id) {
            return Vec::new();
        }
        info!(players = state.players.len(), "round started");

        let mut effects = vec![Effect::Broadcast(GameMessage::GameStarted {
            secret_word,
            imposter_id,
        })];
        if room.auto_start_pending {
            room.auto_start_pending = false;
            effects.push(Effect::CancelAutoStart);
        }
        effects
    }

    /// Reveals the imposter. Host only, while playing.
    pub fn reveal(&mut self) -> Vec<Effect> {
        self.host_transition(RoomState::reveal)
    }

    /// Ends the round. Host only.
    pub fn return_to_lobby(&mut self) -> Vec<Effect> {
        self.host_transition(RoomState::return_to_lobby)
    }

    fn host_transition(&mut self, transition: fn(&mut RoomState) -> bool) -> Vec<Effect> {
        let Some(room) = self.room.as_mut() else {
            return Vec::new();
        };
        if !transition(&mut room.state) {
            return Vec::new();
        }
        GameMessage::state_sync(&room.state)
            .map(Effect::Broadcast)
            .into_iter()
            .collect()
    }

    /// The auto-start delay elapsed. Re-checks everything before starting.
    pub fn auto_start_fired(&mut self) -> Vec<Effect> {
        let Some(room) = self.room.as_mut() else {
            return Vec::new();
        };
        room.auto_start_pending = false;
        if room.authority.kind() != RoomKind::QuickMatch || !auto_start_ready(&room.state) {
            debug!(
                players = room.state.players.len(),
                host = room.state.is_host(),
                "auto-start aborted"
            );
            return Vec::new();
        }
        self.start_game()
    }
}

fn auto_start_ready(state: &RoomState) -> bool {
    state.phase == Phase::Lobby && state.players.len() == MAX_PLAYERS && state.is_host()
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
    use crate::slot::ColorTag;

    fn controller(name: &str) -> SessionController {
        SessionController::with_seed(SessionConfig::new(name), 7)
    }

    fn broadcasts(effects: &[Effect]) -> Vec<GameMessage> {
        effects
            .iter()
            .filter_map(|e| match e {
                Effect::Broadcast(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    fn last_sync(effects: &[Effect]) -> GameMessage {
        broadcasts(effects)
            .into_iter()
            .rev()
            .find(|m| matches!(m, GameMessage::StateSync(_)))
            .expect("expected a stateSync broadcast")
    }

    fn create(id: PeerId) -> SessionController {
        let mut c = controller("Host");
        c.begin_connect().unwrap();
        c.connected(&RoomTarget::Create { room_code: "4821".into() }, id, &[]);
        c
    }

    fn quick_match(id: PeerId, present: &[PeerId]) -> (SessionController, Vec<Effect>) {
        let mut c = controller(&format!("P{id}"));
        c.begin_connect().unwrap();
        let effects = c.connected(
            &RoomTarget::QuickMatch { channel: "qm".into() },
            id,
            present,
        );
        (c, effects)
    }

    #[test]
    fn connect_guard_rejects_reentry() {
        let mut c = controller("A");
        c.begin_connect().unwrap();
        assert!(matches!(c.begin_connect(), Err(SessionError::ConnectInProgress)));
        c.connect_failed();
        assert_eq!(c.connection(), ConnectionState::Idle);
        c.begin_connect().unwrap();
        c.connected(&RoomTarget::Create { room_code: "1000".into() }, 1, &[]);
        assert!(matches!(c.begin_connect(), Err(SessionError::AlreadyInRoom)));
        c.leave();
        assert!(matches!(c.begin_connect(), Err(SessionError::NotConnected)));
    }

    #[test]
    fn creator_is_host_in_seat_zero() {
        let c = create(5);
        let state = c.state().unwrap();
        assert!(state.is_host());
        assert_eq!(state.players[0].id, 5);
        assert_eq!(state.players[0].slot_index, 0);
        assert_eq!(state.players[0].name, "Host");
    }

    #[test]
    fn joiner_requests_sync_and_announces() {
        let mut c = controller("Guest");
        c.begin_connect().unwrap();
        let effects = c.connected(&RoomTarget::Join { room_code: "4821".into() }, 9, &[]);
        let sent = broadcasts(&effects);
        assert_eq!(sent[0], GameMessage::RequestSync);
        assert!(matches!(
            &sent[1],
            GameMessage::PlayerJoined { user_id: 9, name, .. } if name == "Guest"
        ));
        assert!(effects.contains(&Effect::ScheduleCatchUp(c.config().settle_delay)));
        assert_eq!(c.state().unwrap().host_id, None);
    }

    #[test]
    fn coded_room_converges_on_host_snapshot() {
        let mut host = create(1);
        let mut guests: Vec<SessionController> = [(2, "Bea"), (3, "Cy")]
            .into_iter()
            .map(|(id, name)| {
                let mut c = controller(name);
                c.begin_connect().unwrap();
                let joined = c.connected(&RoomTarget::Join { room_code: "4821".into() }, id, &[]);
                // Deliver the guest's requestSync and playerJoined to the host.
                let mut host_out = Vec::new();
                for msg in broadcasts(&joined) {
                    host_out.extend(host.handle_message(id, msg));
                }
                assert!(host_out
                    .iter()
                    .any(|e| matches!(e, Effect::Broadcast(GameMessage::StateSync(_)))));
                c
            })
            .collect();

        // Every guest guessed seat 0; the host reseated them.
        let seats: Vec<_> = host
            .state()
            .unwrap()
            .players
            .iter()
            .map(|p| (p.id, p.slot_index))
            .collect();
        assert_eq!(seats, vec![(1, 0), (2, 1), (3, 2)]);

        let final_sync = GameMessage::state_sync(host.state().unwrap()).unwrap();
        for guest in &mut guests {
            guest.handle_message(1, final_sync.clone());
        }
        let host_players = &host.state().unwrap().players;
        for guest in &guests {
            let state = guest.state().unwrap();
            assert_eq!(&state.players, host_players);
            assert_eq!(state.host_id, Some(1));
            assert!(!state.is_host());
        }
    }

    #[test]
    fn request_sync_answered_only_by_host() {
        let mut host = create(1);
        assert!(matches!(
            broadcasts(&host.handle_message(2, GameMessage::RequestSync))[..],
            [GameMessage::StateSync(_)]
        ));

        let mut guest = controller("G");
        guest.begin_connect().unwrap();
        guest.connected(&RoomTarget::Join { room_code: "4821".into() }, 2, &[]);
        assert!(guest.handle_message(3, GameMessage::RequestSync).is_empty());
    }

    #[test]
    fn own_echo_is_ignored() {
        let mut host = create(1);
        let before = host.state().cloned();
        assert!(host.handle_message(1, GameMessage::RequestSync).is_empty());
        assert!(host
            .handle_message(
                2,
                GameMessage::PlayerLeft { user_id: 1 }
            )
            .is_empty());
        assert_eq!(host.state().cloned(), before);
    }

    #[test]
    fn placeholder_then_announcement_keeps_seat() {
        let mut host = create(1);
        let effects = host.peer_appeared(4);
        assert!(matches!(broadcasts(&effects)[..], [GameMessage::StateSync(_)]));
        assert_eq!(host.state().unwrap().player(4).unwrap().name, "Player 2");

        let effects = host.handle_message(
            4,
            GameMessage::PlayerJoined {
                user_id: 4,
                name: "Dee".into(),
                slot_index: 0,
                color_tag: ColorTag::Red,
            },
        );
        let GameMessage::StateSync(snapshot) = last_sync(&effects) else {
            unreachable!()
        };
        let dee = snapshot.players.iter().find(|p| p.id == 4).unwrap();
        assert_eq!(dee.name, "Dee");
        assert_eq!(dee.slot_index, 1);
        assert_eq!(dee.color_tag, ColorTag::Blue);
    }

    #[test]
    fn start_game_requires_host_and_two_players() {
        let mut host = create(1);
        assert!(host.start_game().is_empty());

        host.peer_appeared(2);
        let effects = host.start_game();
        let sent = broadcasts(&effects);
        let [GameMessage::GameStarted { secret_word, imposter_id }] = &sent[..] else {
            panic!("expected gameStarted, got {effects:?}");
        };
        let state = host.state().unwrap();
        assert_eq!(state.phase, Phase::Playing);
        assert_eq!(state.secret_word.as_ref(), Some(secret_word));
        assert!(state.contains(*imposter_id));
        assert!(host.config().word_list.contains(secret_word));

        // Not from the middle of a round.
        assert!(host.start_game().is_empty());
    }

    #[test]
    fn non_host_start_and_lobby_are_noops() {
        let mut guest = controller("G");
        guest.begin_connect().unwrap();
        guest.connected(&RoomTarget::Join { room_code: "4821".into() }, 2, &[]);
        guest.peer_appeared(1);
        let before = guest.state().cloned();
        assert!(guest.start_game().is_empty());
        assert!(guest.return_to_lobby().is_empty());
        assert!(guest.reveal().is_empty());
        assert_eq!(guest.state().cloned(), before);
    }

    #[test]
    fn game_started_applies_on_guest() {
        let mut guest = controller("G");
        guest.begin_connect().unwrap();
        guest.connected(&RoomTarget::Join { room_code: "4821".into() }, 2, &[]);
        guest.peer_appeared(1);
        guest.handle_message(
            1,
            GameMessage::GameStarted {
                secret_word: "harbor".into(),
                imposter_id: 2,
            },
        );
        let state = guest.state().unwrap();
        assert_eq!(state.phase, Phase::Playing);
        assert_eq!(state.local_word(), crate::state::IMPOSTER_WORD);
    }

    #[test]
    fn game_started_for_unknown_imposter_requests_sync() {
        let mut guest = controller("G");
        guest.begin_connect().unwrap();
        guest.connected(&RoomTarget::Join { room_code: "4821".into() }, 2, &[]);
        let effects = guest.handle_message(
            1,
            GameMessage::GameStarted {
                secret_word: "harbor".into(),
                imposter_id: 77,
            },
        );
        assert_eq!(broadcasts(&effects), vec![GameMessage::RequestSync]);
        assert_eq!(guest.state().unwrap().phase, Phase::Lobby);
    }

    #[test]
    fn reveal_and_return_to_lobby_broadcast_snapshots() {
        let mut host = create(1);
        host.peer_appeared(2);
        host.start_game();
        let GameMessage::StateSync(snap) = last_sync(&host.reveal()) else {
            unreachable!()
        };
        assert_eq!(snap.phase, Phase::Revealing);
        let GameMessage::StateSync(snap) = last_sync(&host.return_to_lobby()) else {
            unreachable!()
        };
        assert_eq!(snap.phase, Phase::Lobby);
        assert!(snap.secret_word.is_none());
    }

    #[test]
    fn quick_match_lowest_id_hosts() {
        let (c, _) = quick_match(300, &[100, 200, 300]);
        assert_eq!(c.state().unwrap().host_id, Some(100));
        let (solo, effects) = quick_match(150, &[]);
        assert_eq!(solo.state().unwrap().host_id, Some(150));
        assert!(broadcasts(&effects)
            .iter()
            .any(|m| matches!(m, GameMessage::StateSync(_))));
    }

    #[test]
    fn quick_match_takeover_when_host_leaves() {
        let (mut c, _) = quick_match(200, &[100]);
        assert!(!c.state().unwrap().is_host());
        let effects = c.peer_disappeared(100);
        assert!(c.state().unwrap().is_host());
        assert!(matches!(broadcasts(&effects)[..], [GameMessage::StateSync(_)]));
    }

    fn full_quick_match() -> SessionController {
        let (mut host, _) = quick_match(10, &[]);
        for id in [20, 30] {
            assert!(host.peer_appeared(id).iter().all(|e| !matches!(e, Effect::ScheduleAutoStart(_))));
        }
        let effects = host.peer_appeared(40);
        assert!(effects.contains(&Effect::ScheduleAutoStart(host.config().auto_start_delay)));
        assert!(host.auto_start_pending());
        host
    }

    #[test]
    fn auto_start_fires_with_four() {
        let mut host = full_quick_match();
        // Churn at the threshold does not schedule twice.
        assert!(host
            .peer_disappeared(40)
            .iter()
            .chain(host.peer_appeared(40).iter())
            .all(|e| !matches!(e, Effect::ScheduleAutoStart(_))));
        let effects = host.auto_start_fired();
        assert!(matches!(broadcasts(&effects)[..], [GameMessage::GameStarted { .. }]));
        assert_eq!(host.state().unwrap().phase, Phase::Playing);
    }

    #[test]
    fn auto_start_revalidates_at_fire_time() {
        let mut host = full_quick_match();
        // A fifth peer finds no seat, then someone leaves.
        host.peer_appeared(50);
        assert_eq!(host.state().unwrap().players.len(), 4);
        host.peer_disappeared(30);
        assert!(host.auto_start_fired().is_empty());
        assert_eq!(host.state().unwrap().phase, Phase::Lobby);
        assert!(!host.auto_start_pending());
    }

    #[test]
    fn coded_rooms_never_auto_start() {
        let mut host = create(1);
        for id in [2, 3, 4] {
            assert!(host
                .peer_appeared(id)
                .iter()
                .all(|e| !matches!(e, Effect::ScheduleAutoStart(_))));
        }
        assert!(host.auto_start_fired().is_empty());
    }

    #[test]
    fn inconsistent_snapshot_is_dropped() {
        let mut guest = controller("G");
        guest.begin_connect().unwrap();
        guest.connected(&RoomTarget::Join { room_code: "4821".into() }, 2, &[]);
        let before = guest.state().cloned();
        let bad = crate::state::SyncSnapshot {
            host_id: 1,
            players: vec![Player::new(1, 0, "A"), Player::new(2, 0, "B")],
            phase: Phase::Lobby,
            secret_word: None,
            imposter_id: None,
        };
        guest.handle_message(1, GameMessage::StateSync(bad));
        assert_eq!(guest.state().cloned(), before);
    }

    #[test]
    fn catch_up_seats_preexisting_peers() {
        let mut guest = controller("G");
        guest.begin_connect().unwrap();
        guest.connected(&RoomTarget::Join { room_code: "4821".into() }, 9, &[]);
        guest.catch_up(&[1, 5, 9]);
        let state = guest.state().unwrap();
        assert_eq!(state.players.len(), 3);
        assert!(state.contains(1) && state.contains(5));
    }

    fn ids(c: &SessionController) -> Vec<PeerId> {
        c.state().unwrap().players.iter().map(|p| p.id).collect()
    }

    #[test]
    fn host_refuses_snapshot_from_newcomer_with_empty_roster() {
        let (mut host, _) = quick_match(100, &[]);
        host.peer_appeared(200);
        assert_eq!(ids(&host), vec![100, 200]);

        // The newcomer's transport has not reported anyone yet, so it
        // elects itself and publishes a roster holding only itself.
        let (mut newcomer, joined) = quick_match(300, &[]);
        assert!(newcomer.state().unwrap().is_host());
        let bogus = last_sync(&joined);

        assert!(host.handle_message(300, bogus).is_empty());
        let state = host.state().unwrap();
        assert_eq!(state.host_id, Some(100));
        assert_eq!(ids(&host), vec![100, 200]);
        assert!(state.local_player().is_some());

        host.peer_appeared(300);
        assert_eq!(ids(&host), vec![100, 200, 300]);
        let start = host.start_game();
        assert!(matches!(broadcasts(&start)[..], [GameMessage::GameStarted { .. }]));
        assert_ne!(host.state().unwrap().local_word(), crate::state::UNKNOWN_WORD);

        // Once the newcomer sees the others it steps down and asks for the
        // real roster, which it then accepts.
        let host_sync = GameMessage::state_sync(host.state().unwrap()).unwrap();
        assert!(newcomer.handle_message(100, host_sync.clone()).is_empty());
        let effects = newcomer.catch_up(&[100, 200, 300]);
        assert!(broadcasts(&effects).contains(&GameMessage::RequestSync));
        assert_eq!(newcomer.state().unwrap().host_id, Some(100));
        newcomer.handle_message(100, host_sync);
        assert_eq!(newcomer.state().unwrap().players, host.state().unwrap().players);
    }

    #[test]
    fn guest_refuses_snapshot_from_unelected_peer() {
        let (mut guest, _) = quick_match(200, &[100, 200]);
        let before = guest.state().cloned();
        let rogue = crate::state::SyncSnapshot {
            host_id: 300,
            players: vec![Player::new(300, 0, "Rogue")],
            phase: Phase::Lobby,
            secret_word: None,
            imposter_id: None,
        };
        assert!(guest.handle_message(300, GameMessage::StateSync(rogue)).is_empty());
        assert_eq!(guest.state().cloned(), before);
    }

    #[test]
    fn snapshot_missing_local_player_reseats_and_announces() {
        let mut guest = controller("Gus");
        guest.begin_connect().unwrap();
        guest.connected(&RoomTarget::Join { room_code: "4821".into() }, 2, &[]);
        let snapshot = crate::state::SyncSnapshot {
            host_id: 1,
            players: vec![Player::new(1, 0, "Host"), Player::new(3, 1, "Cy")],
            phase: Phase::Lobby,
            secret_word: None,
            imposter_id: None,
        };
        let effects = guest.handle_message(1, GameMessage::StateSync(snapshot));
        let state = guest.state().unwrap();
        assert_eq!(state.host_id, Some(1));
        let me = state.local_player().unwrap();
        assert_eq!((me.slot_index, me.name.as_str()), (2, "Gus"));
        assert_eq!(
            broadcasts(&effects),
            vec![GameMessage::PlayerJoined {
                user_id: 2,
                name: "Gus".into(),
                slot_index: 2,
                color_tag: ColorTag::Green,
            }]
        );
    }

    #[test]
    fn takeover_seats_every_connected_peer() {
        let (c, effects) = quick_match(100, &[200, 300]);
        assert_eq!(ids(&c), vec![100, 200, 300]);
        let GameMessage::StateSync(snapshot) = last_sync(&effects) else {
            unreachable!()
        };
        assert_eq!(snapshot.players.len(), 3);
    }

    #[test]
    fn demoted_host_requests_sync() {
        let (mut c, _) = quick_match(300, &[]);
        assert!(c.state().unwrap().is_host());
        let effects = c.peer_appeared(100);
        assert_eq!(c.state().unwrap().host_id, Some(100));
        assert_eq!(broadcasts(&effects), vec![GameMessage::RequestSync]);
    }

    #[test]
    fn snapshot_naming_us_host_arms_auto_start() {
        let (mut c, _) = quick_match(100, &[]);
        assert!(!c.auto_start_pending());
        let snapshot = crate::state::SyncSnapshot {
            host_id: 100,
            players: vec![
                Player::new(100, 0, "A"),
                Player::new(200, 1, "B"),
                Player::new(300, 2, "C"),
                Player::new(400, 3, "D"),
            ],
            phase: Phase::Lobby,
            secret_word: None,
            imposter_id: None,
        };
        let effects = c.handle_message(200, GameMessage::StateSync(snapshot));
        assert!(effects.contains(&Effect::ScheduleAutoStart(c.config().auto_start_delay)));
        assert!(c.auto_start_pending());
    }

    #[test]
    fn leave_announces_and_disconnects() {
        let mut host = create(1);
        let effects = host.leave();
        assert_eq!(
            broadcasts(&effects),
            vec![GameMessage::PlayerLeft { user_id: 1 }]
        );
        assert!(host.state().is_none());
        assert_eq!(host.connection(), ConnectionState::Disconnected);
    }
}
