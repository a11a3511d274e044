//! Error types for a room session.

use thiserror::Error;

/// Errors surfaced to the caller of a [`RoomSession`](crate::session::RoomSession).
///
/// Only transport-level failures and misuse of the connect calls are reported
/// here. Protocol-level misbehaviour (undecodable payloads, non-host actions)
/// is logged and ignored instead.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Joining the transport room or subscribing to the message channel failed.
    #[error("transport join error: {0}")]
    TransportJoin(String),

    /// Failed to publish a message on the broadcast channel.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// The transport or message channel closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to encode or decode a [`GameMessage`](crate::protocol::GameMessage).
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The room code is not exactly four ASCII digits.
    #[error("invalid room code: {0:?}")]
    InvalidRoomCode(String),

    /// Another create/join/match call is already in flight.
    #[error("a connection attempt is already in progress")]
    ConnectInProgress,

    /// The session already holds a room.
    #[error("already in a room")]
    AlreadyInRoom,

    /// The session loop has exited or the session was never connected.
    #[error("not connected to a room")]
    NotConnected,
}

/// A specialized [`Result`] type for room session operations.
pub type Result<T> = std::result::Result<T, SessionError>;
