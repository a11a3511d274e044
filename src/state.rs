//! The replicated room state and its transitions.
//!
//! [`RoomState`] is a plain value owned by one peer. It only changes through
//! the transition methods below, each of which reports whether anything
//! actually changed so the caller can decide whether to rebroadcast.

use serde::{Deserialize, Serialize};

use crate::slot::{color_for, is_valid_slot, ColorTag, SlotIndex, MAX_PLAYERS};

/// Transport-assigned participant identifier, unique per session.
pub type PeerId = u64;

/// Word shown to the imposter instead of the secret word.
pub const IMPOSTER_WORD: &str = "IMPOSTER";

/// Word shown when the local player is not seated or no round is running.
pub const UNKNOWN_WORD: &str = "unknown";

/// Game phase of a room.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    #[default]
    Lobby,
    Playing,
    Revealing,
}

/// One seated participant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PeerId,
    pub slot_index: SlotIndex,
    pub name: String,
    pub is_connected: bool,
    pub color_tag: ColorTag,
}

impl Player {
    /// A connected player whose color follows from its seat.
    pub fn new(id: PeerId, slot_index: SlotIndex, name: impl Into<String>) -> Self {
        Self {
            id,
            slot_index,
            name: name.into(),
            is_connected: true,
            color_tag: color_for(slot_index),
        }
    }

    /// Roster entry for a peer seen by the transport before it announced itself.
    pub fn placeholder(id: PeerId, slot_index: SlotIndex) -> Self {
        Self::new(id, slot_index, placeholder_name(slot_index))
    }
}

/// Display name given to a placeholder in `slot`.
pub fn placeholder_name(slot: SlotIndex) -> String {
    format!("Player {}", u16::from(slot) + 1)
}

/// Everything a host snapshot overwrites.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    pub host_id: PeerId,
    pub players: Vec<Player>,
    pub phase: Phase,
    pub secret_word: Option<String>,
    pub imposter_id: Option<PeerId>,
}

impl SyncSnapshot {
    /// Checks the invariants a snapshot must satisfy before it may replace
    /// local state: at most four players on distinct valid seats, unique ids,
    /// and a secret word present exactly when an imposter is named.
    pub fn is_consistent(&self) -> bool {
        if self.players.len() > MAX_PLAYERS {
            return false;
        }
        let mut seats = [false; MAX_PLAYERS];
        for (i, player) in self.players.iter().enumerate() {
            if !is_valid_slot(player.slot_index) {
                return false;
            }
            match seats.get_mut(usize::from(player.slot_index)) {
                Some(taken) if *taken => return false,
                Some(taken) => *taken = true,
                None => return false,
            }
            if self.players.iter().skip(i + 1).any(|p| p.id == player.id) {
                return false;
            }
        }
        if self.secret_word.is_some() != self.imposter_id.is_some() {
            return false;
        }
        match self.imposter_id {
            Some(imposter) => self.players.iter().any(|p| p.id == imposter),
            None => true,
        }
    }
}

/// One peer's view of the room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomState {
    pub room_code: String,
    /// `None` until a joiner learns the host from a snapshot.
    pub host_id: Option<PeerId>,
    pub local_id: PeerId,
    /// Sorted ascending by `slot_index`.
    pub players: Vec<Player>,
    pub phase: Phase,
    pub secret_word: Option<String>,
    pub imposter_id: Option<PeerId>,
}

impl RoomState {
    /// A fresh, empty lobby.
    pub fn new(room_code: impl Into<String>, local_id: PeerId, host_id: Option<PeerId>) -> Self {
        Self {
            room_code: room_code.into(),
            host_id,
            local_id,
            players: Vec::new(),
            phase: Phase::Lobby,
            secret_word: None,
            imposter_id: None,
        }
    }

    pub fn is_host(&self) -> bool {
        self.host_id == Some(self.local_id)
    }

    pub fn player(&self, id: PeerId) -> Option<&Player> {
        self.players.iter().find(|p| p.id == id)
    }

    pub fn player_mut(&mut self, id: PeerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| p.id == id)
    }

    pub fn contains(&self, id: PeerId) -> bool {
        self.player(id).is_some()
    }

    pub fn local_player(&self) -> Option<&Player> {
        self.player(self.local_id)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= MAX_PLAYERS
    }

    /// Inserts `player` keeping the roster sorted by seat.
    ///
    /// No-op when the id is already seated, the seat is taken or invalid, or
    /// the room is full.
    pub fn add_player(&mut self, player: Player) -> bool {
        if self.contains(player.id)
            || self.is_full()
            || !is_valid_slot(player.slot_index)
            || self.players.iter().any(|p| p.slot_index == player.slot_index)
        {
            return false;
        }
        self.players.push(player);
        self.players.sort_by_key(|p| p.slot_index);
        true
    }

    /// Removes the player with `id`. No-op when absent.
    ///
    /// Removing the imposter mid-round leaves the round without one, so the
    /// secret word and imposter are cleared together.
    pub fn remove_player(&mut self, id: PeerId) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p.id != id);
        if self.players.len() == before {
            return false;
        }
        if self.imposter_id == Some(id) {
            self.imposter_id = None;
            self.secret_word = None;
            self.phase = Phase::Lobby;
        }
        true
    }

    /// Enters [`Phase::Playing`]. The caller enforces the two-player minimum
    /// and host-ness; this only refuses an imposter that is not seated.
    pub fn start_game(&mut self, secret_word: impl Into<String>, imposter_id: PeerId) -> bool {
        if !self.contains(imposter_id) {
            return false;
        }
        self.phase = Phase::Playing;
        self.secret_word = Some(secret_word.into());
        self.imposter_id = Some(imposter_id);
        true
    }

    /// Moves a running round to [`Phase::Revealing`]. Host only.
    pub fn reveal(&mut self) -> bool {
        if !self.is_host() || self.phase != Phase::Playing {
            return false;
        }
        self.phase = Phase::Revealing;
        true
    }

    /// Back to the lobby, clearing the round. Host only.
    pub fn return_to_lobby(&mut self) -> bool {
        if !self.is_host() {
            return false;
        }
        let changed = self.phase != Phase::Lobby || self.secret_word.is_some();
        self.phase = Phase::Lobby;
        self.secret_word = None;
        self.imposter_id = None;
        changed
    }

    /// Overwrites everything but `room_code` and `local_id` with `snapshot`.
    ///
    /// Last applied wins: there is no ordering token, so an older snapshot
    /// delivered late replaces a newer one.
    pub fn apply_state_sync(&mut self, snapshot: SyncSnapshot) -> bool {
        let SyncSnapshot {
            host_id,
            mut players,
            phase,
            secret_word,
            imposter_id,
        } = snapshot;
        players.sort_by_key(|p| p.slot_index);
        let changed = self.host_id != Some(host_id)
            || self.players != players
            || self.phase != phase
            || self.secret_word != secret_word
            || self.imposter_id != imposter_id;
        self.host_id = Some(host_id);
        self.players = players;
        self.phase = phase;
        self.secret_word = secret_word;
        self.imposter_id = imposter_id;
        changed
    }

    /// Snapshot for a `stateSync` broadcast. `None` while the host is unknown.
    pub fn snapshot(&self) -> Option<SyncSnapshot> {
        Some(SyncSnapshot {
            host_id: self.host_id?,
            players: self.players.clone(),
            phase: self.phase,
            secret_word: self.secret_word.clone(),
            imposter_id: self.imposter_id,
        })
    }

    /// The word the local player should see.
    pub fn local_word(&self) -> &str {
        let Some(local) = self.local_player() else {
            return UNKNOWN_WORD;
        };
        if self.imposter_id == Some(local.id) {
            return IMPOSTER_WORD;
        }
        self.secret_word.as_deref().unwrap_or(UNKNOWN_WORD)
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

    fn lobby() -> RoomState {
        RoomState::new("4821", 10, Some(10))
    }

    fn ids(state: &RoomState) -> Vec<PeerId> {
        state.players.iter().map(|p| p.id).collect()
    }

    #[test]
    fn add_player_sorts_by_seat() {
        let mut state = lobby();
        state.add_player(Player::new(30, 2, "C"));
        state.add_player(Player::new(10, 0, "A"));
        state.add_player(Player::new(40, 3, "D"));
        state.add_player(Player::new(20, 1, "B"));
        assert_eq!(ids(&state), vec![10, 20, 30, 40]);
        let seats: Vec<_> = state.players.iter().map(|p| p.slot_index).collect();
        assert_eq!(seats, vec![0, 1, 2, 3]);
    }

    #[test]
    fn add_player_is_idempotent() {
        let mut once = lobby();
        once.add_player(Player::new(20, 1, "B"));
        let mut twice = once.clone();
        assert!(!twice.add_player(Player::new(20, 1, "B")));
        assert_eq!(once, twice);
    }

    #[test]
    fn add_player_rejects_taken_seat_and_full_room() {
        let mut state = lobby();
        assert!(state.add_player(Player::new(1, 0, "A")));
        assert!(!state.add_player(Player::new(2, 0, "B")));
        assert!(!state.add_player(Player::new(3, 7, "C")));
        for (id, slot) in [(2, 1), (3, 2), (4, 3)] {
            assert!(state.add_player(Player::new(id, slot, "x")));
        }
        assert!(state.is_full());
        assert!(!state.add_player(Player::new(5, 0, "E")));
        assert_eq!(state.players.len(), MAX_PLAYERS);
    }

    #[test]
    fn remove_player_is_idempotent_and_commutes() {
        let mut a = lobby();
        a.add_player(Player::new(10, 0, "A"));
        a.add_player(Player::new(20, 1, "B"));
        a.remove_player(20);
        a.add_player(Player::new(30, 2, "C"));

        let mut b = lobby();
        b.add_player(Player::new(10, 0, "A"));
        b.add_player(Player::new(20, 1, "B"));
        b.add_player(Player::new(30, 2, "C"));
        b.remove_player(20);
        assert!(!b.remove_player(20));

        assert_eq!(a, b);
    }

    #[test]
    fn start_and_return_to_lobby() {
        let mut state = lobby();
        state.add_player(Player::new(10, 0, "A"));
        state.add_player(Player::new(20, 1, "B"));
        assert!(state.start_game("lighthouse", 20));
        assert_eq!(state.phase, Phase::Playing);
        assert_eq!(state.secret_word.as_deref(), Some("lighthouse"));
        assert!(state.reveal());
        assert_eq!(state.phase, Phase::Revealing);
        assert!(state.return_to_lobby());
        assert_eq!(state.phase, Phase::Lobby);
        assert!(state.secret_word.is_none());
        assert!(state.imposter_id.is_none());
    }

    #[test]
    fn start_refuses_unseated_imposter() {
        let mut state = lobby();
        state.add_player(Player::new(10, 0, "A"));
        assert!(!state.start_game("lighthouse", 99));
        assert_eq!(state.phase, Phase::Lobby);
    }

    #[test]
    fn imposter_leaving_ends_round_on_any_peer() {
        let mut state = RoomState::new("4821", 20, Some(10));
        for (id, slot) in [(10, 0), (20, 1), (30, 2)] {
            state.add_player(Player::new(id, slot, "x"));
        }
        assert!(state.start_game("lighthouse", 30));

        // A crewmate leaving keeps the round going.
        assert!(state.remove_player(10));
        assert_eq!(state.phase, Phase::Playing);

        assert!(state.remove_player(30));
        assert_eq!(state.phase, Phase::Lobby);
        assert!(state.secret_word.is_none());
        assert!(state.imposter_id.is_none());
        assert_eq!(state.local_word(), UNKNOWN_WORD);
    }

    #[test]
    fn non_host_cannot_return_to_lobby_or_reveal() {
        let mut state = RoomState::new("4821", 20, Some(10));
        state.add_player(Player::new(10, 0, "A"));
        state.add_player(Player::new(20, 1, "B"));
        state.start_game("lighthouse", 10);
        let before = state.clone();
        assert!(!state.reveal());
        assert!(!state.return_to_lobby());
        assert_eq!(state, before);
    }

    #[test]
    fn state_sync_overwrites_but_keeps_identity() {
        let mut state = RoomState::new("4821", 20, None);
        state.add_player(Player::new(20, 0, "B"));
        let snapshot = SyncSnapshot {
            host_id: 10,
            players: vec![Player::new(20, 1, "B"), Player::new(10, 0, "A")],
            phase: Phase::Playing,
            secret_word: Some("anchor".into()),
            imposter_id: Some(10),
        };
        assert!(state.apply_state_sync(snapshot));
        assert_eq!(state.room_code, "4821");
        assert_eq!(state.local_id, 20);
        assert_eq!(state.host_id, Some(10));
        assert_eq!(ids(&state), vec![10, 20]);
        assert_eq!(state.local_word(), "anchor");
    }

    #[test]
    fn stale_sync_regresses_state() {
        let mut state = RoomState::new("4821", 20, None);
        let older = SyncSnapshot {
            host_id: 10,
            players: vec![Player::new(10, 0, "A")],
            phase: Phase::Lobby,
            secret_word: None,
            imposter_id: None,
        };
        let newer = SyncSnapshot {
            players: vec![Player::new(10, 0, "A"), Player::new(20, 1, "B")],
            ..older.clone()
        };
        state.apply_state_sync(newer);
        state.apply_state_sync(older);
        // No ordering token: the late, older snapshot wins.
        assert_eq!(ids(&state), vec![10]);
    }

    #[test]
    fn snapshot_consistency_checks() {
        let good = SyncSnapshot {
            host_id: 10,
            players: vec![Player::new(10, 0, "A"), Player::new(20, 1, "B")],
            phase: Phase::Playing,
            secret_word: Some("anchor".into()),
            imposter_id: Some(20),
        };
        assert!(good.is_consistent());

        let mut dup_seat = good.clone();
        dup_seat.players[1].slot_index = 0;
        assert!(!dup_seat.is_consistent());

        let mut half_round = good.clone();
        half_round.secret_word = None;
        assert!(!half_round.is_consistent());

        let mut ghost_imposter = good;
        ghost_imposter.imposter_id = Some(99);
        assert!(!ghost_imposter.is_consistent());
    }

    #[test]
    fn local_word_variants() {
        let mut state = lobby();
        assert_eq!(state.local_word(), UNKNOWN_WORD);
        state.add_player(Player::new(10, 0, "A"));
        state.add_player(Player::new(20, 1, "B"));
        state.start_game("compass", 20);
        assert_eq!(state.local_word(), "compass");
        state.return_to_lobby();
        state.start_game("compass", 10);
        assert_eq!(state.local_word(), IMPOSTER_WORD);
    }

    #[test]
    fn placeholder_names_are_one_based() {
        let p = Player::placeholder(7, 2);
        assert_eq!(p.name, "Player 3");
        assert_eq!(p.color_tag, ColorTag::Green);
        assert!(p.is_connected);
    }
}
