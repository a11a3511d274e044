//! Capability interfaces for the two external collaborators.
//!
//! A room session needs two things from its environment:
//!
//! - a [`RoomTransport`] (the audio/session layer) that admits the peer into a
//!   named room, assigns it a numeric id, and reports other participants
//!   appearing and disappearing;
//! - a [`MessageChannel`] that broadcasts opaque payloads to everyone in the
//!   room on a best-effort basis.
//!
//! Neither trait guarantees ordering or delivery. The session only builds and
//! interprets [`GameMessage`](crate::protocol::GameMessage)s; it never assumes
//! a message arrived.
//!
//! # Implementing a transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use imposter_room::error::SessionError;
//! use imposter_room::state::PeerId;
//! use imposter_room::transport::{RoomTransport, TransportEvent};
//!
//! struct MyAudioRoom { /* ... */ }
//!
//! #[async_trait]
//! impl RoomTransport for MyAudioRoom {
//!     async fn join(&mut self, room: &str) -> Result<PeerId, SessionError> {
//!         // Enter the media room and return the id the layer assigned us
//!         # let _ = room;
//!         Ok(1)
//!     }
//!
//!     async fn leave(&mut self) -> Result<(), SessionError> {
//!         Ok(())
//!     }
//!
//!     async fn next_event(&mut self) -> Option<TransportEvent> {
//!         // Yield membership events; None once the room is gone
//!         None
//!     }
//!
//!     fn participants(&self) -> Vec<PeerId> {
//!         Vec::new()
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::SessionError;
use crate::state::PeerId;

/// Membership change observed by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportEvent {
    PeerAppeared(PeerId),
    PeerDisappeared(PeerId),
}

/// A payload received from the broadcast channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub from: PeerId,
    pub payload: Vec<u8>,
}

/// The media/session layer that owns room membership.
///
/// # Cancel Safety
///
/// [`next_event`](RoomTransport::next_event) is polled inside
/// `tokio::select!` and **MUST** be cancel-safe.
#[async_trait]
pub trait RoomTransport: Send + 'static {
    /// Enter `room` and return the local participant id.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportJoin`] if the room cannot be entered.
    async fn join(&mut self, room: &str) -> Result<PeerId, SessionError>;

    /// Leave the current room. Must release resources even on error.
    ///
    /// # Errors
    ///
    /// Returns an error if the leave handshake fails.
    async fn leave(&mut self) -> Result<(), SessionError>;

    /// Next membership event for the joined room.
    ///
    /// Returns `None` once the transport has shut down.
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// Participants the transport currently sees. May include the local id.
    fn participants(&self) -> Vec<PeerId>;

    /// Best-effort speaking amplitude in `0.0..=1.0` for `peer`.
    fn volume(&self, peer: PeerId) -> Option<f32> {
        let _ = peer;
        None
    }
}

/// Best-effort broadcast of string-ish payloads to everyone in a room.
///
/// # Cancel Safety
///
/// [`recv`](MessageChannel::recv) is polled inside `tokio::select!` and
/// **MUST** be cancel-safe. Channel-based implementations are naturally so.
#[async_trait]
pub trait MessageChannel: Send + 'static {
    /// Log in as `local_id` and subscribe to `room`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportJoin`] if the subscription fails.
    async fn subscribe(&mut self, room: &str, local_id: PeerId) -> Result<(), SessionError>;

    /// Broadcast `payload` to every other peer in the room.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::TransportSend`] if the publish fails.
    async fn send(&mut self, payload: Vec<u8>) -> Result<(), SessionError>;

    /// Next inbound payload.
    ///
    /// - `Some(Ok(msg))`: a payload arrived
    /// - `Some(Err(e))`: a receive error occurred
    /// - `None`: the channel closed
    async fn recv(&mut self) -> Option<Result<InboundMessage, SessionError>>;

    /// Unsubscribe and close.
    ///
    /// # Errors
    ///
    /// Returns an error if the graceful close fails.
    async fn close(&mut self) -> Result<(), SessionError>;
}
