//! Which peer is authoritative for a room.

use std::collections::BTreeSet;

use crate::state::{PeerId, RoomState};

/// How the room was entered. Determines how the host is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomKind {
    /// Created or joined by a four-digit code. The creator stays host for the
    /// lifetime of the room.
    Coded,
    /// Anonymous matchmaking on the shared channel. The host is re-elected
    /// after every membership change.
    QuickMatch,
}

/// Quick-match election: the lowest connected transport id wins.
pub fn elect_host<'a>(connected: impl IntoIterator<Item = &'a PeerId>) -> Option<PeerId> {
    connected.into_iter().copied().min()
}

/// Tracks the transport-level connected set and applies the election rule for
/// the room kind.
#[derive(Debug, Clone)]
pub struct HostAuthority {
    kind: RoomKind,
    connected: BTreeSet<PeerId>,
}

impl HostAuthority {
    pub fn new(kind: RoomKind, local_id: PeerId) -> Self {
        Self {
            kind,
            connected: BTreeSet::from([local_id]),
        }
    }

    pub fn kind(&self) -> RoomKind {
        self.kind
    }

    pub fn connected(&self) -> &BTreeSet<PeerId> {
        &self.connected
    }

    /// The host this peer's view of the connected set elects. `None` for
    /// coded rooms, whose host never changes.
    pub fn elected(&self) -> Option<PeerId> {
        match self.kind {
            RoomKind::Coded => None,
            RoomKind::QuickMatch => elect_host(&self.connected),
        }
    }

    pub fn peer_connected(&mut self, id: PeerId) -> bool {
        self.connected.insert(id)
    }

    pub fn peer_disconnected(&mut self, id: PeerId) -> bool {
        self.connected.remove(&id)
    }

    /// Re-derives the host after a membership change.
    ///
    /// Coded rooms keep whatever host they have. Returns `true` when the local
    /// peer has just become host, which obliges it to broadcast a snapshot.
    pub fn reelect(&self, state: &mut RoomState) -> bool {
        let Some(elected) = self.elected() else {
            return false;
        };
        let was_host = state.is_host();
        if state.host_id != Some(elected) {
            tracing::debug!(host = elected, "quick-match host elected");
            state.host_id = Some(elected);
        }
        !was_host && state.is_host()
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
    fn lowest_id_wins() {
        assert_eq!(elect_host(&[300, 100, 200]), Some(100));
        assert_eq!(elect_host(&[150]), Some(150));
        assert_eq!(elect_host(&[]), None);
    }

    #[test]
    fn quick_match_hands_over_when_host_leaves() {
        let mut state = RoomState::new("lobby", 200, None);
        let mut authority = HostAuthority::new(RoomKind::QuickMatch, 200);
        authority.peer_connected(100);
        assert!(!authority.reelect(&mut state));
        assert_eq!(state.host_id, Some(100));

        authority.peer_disconnected(100);
        assert!(authority.reelect(&mut state));
        assert_eq!(state.host_id, Some(200));

        // Already host: no second takeover.
        assert!(!authority.reelect(&mut state));
    }

    #[test]
    fn elected_tracks_connected_set() {
        let mut authority = HostAuthority::new(RoomKind::QuickMatch, 300);
        assert_eq!(authority.elected(), Some(300));
        authority.peer_connected(100);
        assert_eq!(authority.elected(), Some(100));
        authority.peer_disconnected(100);
        assert_eq!(authority.elected(), Some(300));

        let coded = HostAuthority::new(RoomKind::Coded, 300);
        assert_eq!(coded.elected(), None);
    }

    #[test]
    fn coded_room_never_reelects() {
        let mut state = RoomState::new("4821", 200, Some(500));
        let mut authority = HostAuthority::new(RoomKind::Coded, 200);
        authority.peer_connected(100);
        assert!(!authority.reelect(&mut state));
        assert_eq!(state.host_id, Some(500));
    }
}
