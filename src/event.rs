//! Events emitted by a [`RoomSession`](crate::session::RoomSession).

use crate::state::{PeerId, RoomState};

/// Notifications delivered on the session's event channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session entered a room.
    Connected { room_code: String, local_id: PeerId },
    /// A create/join/match attempt failed. The session is idle again.
    ConnectFailed { reason: String },
    /// The local room state changed. Carries a copy for rendering.
    StateChanged(RoomState),
    /// The session ended. Always the last event.
    Disconnected { reason: Option<String> },
}
