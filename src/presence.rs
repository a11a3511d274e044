//! Merging transport membership with protocol announcements.
//!
//! A peer can show up twice: once when the transport notices it, and once when
//! its `playerJoined` announcement arrives. Either may come first or not at
//! all. The functions here fold both signals into a single roster entry per
//! peer id.

use tracing::{debug, warn};

use crate::slot::{color_for, is_valid_slot, next_available_slot, ColorTag, SlotIndex};
use crate::state::{PeerId, Player, RoomState};

/// A `playerJoined` announcement, detached from the wire enum.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    pub user_id: PeerId,
    pub name: String,
    pub slot_index: SlotIndex,
    pub color_tag: ColorTag,
}

/// What a reconciliation step did to the roster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    /// A new entry was seated.
    Inserted,
    /// An existing entry was renamed or recolored in place.
    Updated,
    /// An entry was removed.
    Removed,
    /// Nothing changed.
    Unchanged,
    /// No free seat was left.
    RoomFull,
}

impl Reconciled {
    /// Whether the roster changed.
    pub fn changed(self) -> bool {
        matches!(self, Self::Inserted | Self::Updated | Self::Removed)
    }
}

/// The transport reported `id` present.
///
/// Seats a placeholder in the lowest free seat unless the peer is already
/// known.
pub fn peer_appeared(state: &mut RoomState, id: PeerId) -> Reconciled {
    if state.contains(id) {
        return Reconciled::Unchanged;
    }
    let Some(slot) = next_available_slot(state) else {
        warn!(peer = id, "no free seat for placeholder");
        return Reconciled::RoomFull;
    };
    debug!(peer = id, slot, "seating placeholder");
    if state.add_player(Player::placeholder(id, slot)) {
        Reconciled::Inserted
    } else {
        Reconciled::Unchanged
    }
}

/// The transport reported `id` gone, or a `playerLeft` arrived. Both are
/// treated alike.
pub fn peer_left(state: &mut RoomState, id: PeerId) -> Reconciled {
    if state.remove_player(id) {
        debug!(peer = id, "removed from roster");
        Reconciled::Removed
    } else {
        Reconciled::Unchanged
    }
}

/// A `playerJoined` announcement arrived.
///
/// Known peers keep their seat and take the announced name. The host keeps
/// colors tied to seats; other peers copy the announced color. Unknown peers
/// are seated by the host through the allocator, while non-hosts trust the
/// announced seat until the host's next snapshot, falling back to the
/// allocator when that seat is already taken here.
pub fn player_joined(state: &mut RoomState, announcement: Announcement) -> Reconciled {
    let is_host = state.is_host();
    let Announcement {
        user_id,
        name,
        slot_index,
        color_tag,
    } = announcement;

    if let Some(existing) = state.player_mut(user_id) {
        let color = if is_host {
            color_for(existing.slot_index)
        } else {
            color_tag
        };
        if existing.name == name && existing.color_tag == color && existing.is_connected {
            return Reconciled::Unchanged;
        }
        existing.name = name;
        existing.color_tag = color;
        existing.is_connected = true;
        return Reconciled::Updated;
    }

    let requested_free = is_valid_slot(slot_index)
        && !state.players.iter().any(|p| p.slot_index == slot_index);
    let player = if !is_host && requested_free {
        Player {
            id: user_id,
            slot_index,
            name,
            is_connected: true,
            color_tag,
        }
    } else {
        let Some(slot) = next_available_slot(state) else {
            warn!(peer = user_id, "announcement dropped, room full");
            return Reconciled::RoomFull;
        };
        if is_host && slot != slot_index {
            debug!(peer = user_id, requested = slot_index, assigned = slot, "reseating joiner");
        }
        Player::new(user_id, slot, name)
    };

    if state.add_player(player) {
        Reconciled::Inserted
    } else {
        Reconciled::Unchanged
    }
}

/// Puts the local player back after a snapshot left it out.
///
/// Keeps the seat of an already seated local player untouched.
pub fn reseat_local(state: &mut RoomState, name: &str) -> Reconciled {
    let local = state.local_id;
    if state.contains(local) {
        return Reconciled::Unchanged;
    }
    let Some(slot) = next_available_slot(state) else {
        warn!(local, "snapshot left no seat for the local player");
        return Reconciled::RoomFull;
    };
    debug!(local, slot, "reseating local player");
    if state.add_player(Player::new(local, slot, name)) {
        Reconciled::Inserted
    } else {
        Reconciled::Unchanged
    }
}

/// One-time scan of participants the transport already knew about before our
/// own membership feed started. Returns how many placeholders were seated.
pub fn catch_up<'a>(
    state: &mut RoomState,
    participants: impl IntoIterator<Item = &'a PeerId>,
) -> usize {
    let local = state.local_id;
    participants
        .into_iter()
        .filter(|id| **id != local)
        .filter(|id| peer_appeared(state, **id) == Reconciled::Inserted)
        .count()
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

    fn host_state() -> RoomState {
        let mut state = RoomState::new("4821", 1, Some(1));
        state.add_player(Player::new(1, 0, "Host"));
        state
    }

    fn guest_state() -> RoomState {
        let mut state = RoomState::new("4821", 2, Some(1));
        state.add_player(Player::new(1, 0, "Host"));
        state.add_player(Player::new(2, 1, "Guest"));
        state
    }

    fn announce(id: PeerId, name: &str, slot: SlotIndex) -> Announcement {
        Announcement {
            user_id: id,
            name: name.into(),
            slot_index: slot,
            color_tag: color_for(slot),
        }
    }

    #[test]
    fn placeholder_then_announcement_updates_in_place() {
        let mut state = host_state();
        assert_eq!(peer_appeared(&mut state, 7), Reconciled::Inserted);
        assert_eq!(state.player(7).unwrap().name, "Player 2");

        // The joiner guessed seat 0, which the host already holds.
        assert_eq!(
            player_joined(&mut state, announce(7, "Grace", 0)),
            Reconciled::Updated
        );
        let p = state.player(7).unwrap();
        assert_eq!(p.name, "Grace");
        assert_eq!(p.slot_index, 1);
        assert_eq!(p.color_tag, color_for(1));
        assert_eq!(state.players.len(), 2);
    }

    #[test]
    fn announcement_then_transport_event_does_not_duplicate() {
        let mut state = host_state();
        player_joined(&mut state, announce(7, "Grace", 3));
        assert_eq!(peer_appeared(&mut state, 7), Reconciled::Unchanged);
        assert_eq!(state.players.len(), 2);
        // Host ignored the requested seat.
        assert_eq!(state.player(7).unwrap().slot_index, 1);
    }

    #[test]
    fn non_host_trusts_requested_seat() {
        let mut state = guest_state();
        player_joined(&mut state, announce(9, "Lin", 3));
        assert_eq!(state.player(9).unwrap().slot_index, 3);
    }

    #[test]
    fn non_host_falls_back_when_requested_seat_taken() {
        let mut state = guest_state();
        player_joined(&mut state, announce(9, "Lin", 1));
        assert_eq!(state.player(9).unwrap().slot_index, 2);
    }

    #[test]
    fn non_host_copies_announced_color_for_known_peer() {
        let mut state = guest_state();
        peer_appeared(&mut state, 9);
        let mut a = announce(9, "Lin", 2);
        a.color_tag = ColorTag::Yellow;
        player_joined(&mut state, a);
        assert_eq!(state.player(9).unwrap().color_tag, ColorTag::Yellow);
    }

    #[test]
    fn repeated_announcement_is_unchanged() {
        let mut state = host_state();
        player_joined(&mut state, announce(7, "Grace", 1));
        assert_eq!(
            player_joined(&mut state, announce(7, "Grace", 1)),
            Reconciled::Unchanged
        );
    }

    #[test]
    fn full_room_rejects_fifth() {
        let mut state = host_state();
        for id in [2, 3, 4] {
            peer_appeared(&mut state, id);
        }
        assert_eq!(peer_appeared(&mut state, 5), Reconciled::RoomFull);
        assert_eq!(
            player_joined(&mut state, announce(6, "Late", 0)),
            Reconciled::RoomFull
        );
        assert_eq!(state.players.len(), 4);
    }

    #[test]
    fn both_leave_signals_remove() {
        let mut state = host_state();
        peer_appeared(&mut state, 7);
        assert_eq!(peer_left(&mut state, 7), Reconciled::Removed);
        assert_eq!(peer_left(&mut state, 7), Reconciled::Unchanged);
    }

    #[test]
    fn reseat_local_takes_lowest_free_seat() {
        let mut state = guest_state();
        state.remove_player(2);
        assert_eq!(reseat_local(&mut state, "Guest"), Reconciled::Inserted);
        let me = state.local_player().unwrap();
        assert_eq!(me.slot_index, 1);
        assert_eq!(me.name, "Guest");
        assert_eq!(reseat_local(&mut state, "Guest"), Reconciled::Unchanged);
    }

    #[test]
    fn reseat_local_reports_full_room() {
        let mut state = guest_state();
        state.players.clear();
        for (id, slot) in [(1, 0), (3, 1), (4, 2), (5, 3)] {
            state.add_player(Player::placeholder(id, slot));
        }
        assert_eq!(reseat_local(&mut state, "Guest"), Reconciled::RoomFull);
    }

    #[test]
    fn catch_up_skips_self_and_known() {
        let mut state = host_state();
        peer_appeared(&mut state, 5);
        let seated = catch_up(&mut state, &[1, 5, 8, 9]);
        assert_eq!(seated, 2);
        assert_eq!(state.players.len(), 4);
    }
}
