//! Seat allocation and seat colors.
//!
//! Every peer runs the same pure functions here, so two peers that agree on
//! the occupied seats also agree on the next free seat and on each seat's
//! color.

use serde::{Deserialize, Serialize};

use crate::state::RoomState;

/// Maximum party size, and the number of seats.
pub const MAX_PLAYERS: usize = 4;

/// Seat index, `0..MAX_PLAYERS`.
pub type SlotIndex = u8;

/// The four fixed seat colors, in seat order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ColorTag {
    Red,
    Blue,
    Green,
    Yellow,
}

const SEAT_COLORS: [ColorTag; MAX_PLAYERS] =
    [ColorTag::Red, ColorTag::Blue, ColorTag::Green, ColorTag::Yellow];

/// Returns the smallest seat in `0..MAX_PLAYERS` not taken by any player, or
/// `None` when the room is full.
pub fn next_available_slot(state: &RoomState) -> Option<SlotIndex> {
    (0..MAX_PLAYERS as SlotIndex).find(|slot| !state.players.iter().any(|p| p.slot_index == *slot))
}

/// Color for a seat. Out-of-range seats wrap around.
pub fn color_for(slot: SlotIndex) -> ColorTag {
    SEAT_COLORS
        .get(usize::from(slot) % MAX_PLAYERS)
        .copied()
        .unwrap_or(ColorTag::Red)
}

/// Returns `true` when `slot` is a valid seat index.
pub fn is_valid_slot(slot: SlotIndex) -> bool {
    usize::from(slot) < MAX_PLAYERS
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
    use crate::state::Player;

    fn state_with_slots(slots: &[SlotIndex]) -> RoomState {
        let mut state = RoomState::new("1234", 1, Some(1));
        for (i, slot) in slots.iter().enumerate() {
            state.add_player(Player::new(i as u64 + 1, *slot, format!("P{i}")));
        }
        state
    }

    #[test]
    fn empty_room_gets_first_seat() {
        assert_eq!(next_available_slot(&state_with_slots(&[])), Some(0));
    }

    #[test]
    fn fills_the_gap() {
        assert_eq!(next_available_slot(&state_with_slots(&[0, 2])), Some(1));
    }

    #[test]
    fn full_room_has_no_seat() {
        assert_eq!(next_available_slot(&state_with_slots(&[0, 1, 2, 3])), None);
    }

    #[test]
    fn colors_are_fixed_per_seat() {
        assert_eq!(color_for(0), ColorTag::Red);
        assert_eq!(color_for(1), ColorTag::Blue);
        assert_eq!(color_for(2), ColorTag::Green);
        assert_eq!(color_for(3), ColorTag::Yellow);
        assert_eq!(color_for(5), color_for(1));
    }

    #[test]
    fn color_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&ColorTag::Yellow).unwrap(), "\"yellow\"");
    }
}
