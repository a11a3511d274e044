//! # Imposter Room
//!
//! Serverless replicated lobby state for 2–4 player party games.
//!
//! Peers share nothing but a best-effort broadcast channel and a membership
//! feed from their audio/session transport. This crate keeps every peer's
//! view of "who is seated where, and what phase the game is in" converging on
//! the host's, without a server doing the reconciliation.
//!
//! ## Features
//!
//! - **Transport-agnostic**: implement [`RoomTransport`] and [`MessageChannel`]
//!   for any backend
//! - **Wire-compatible**: [`GameMessage`] matches the JSON schema used by the
//!   non-web client exactly
//! - **Pure core**: [`SessionController`] is I/O-free and testable without a
//!   transport
//! - **Event-driven**: receive typed [`SessionEvent`]s via a channel
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! let (mut session, mut events) =
//!     RoomSession::start(audio_room, broadcast, SessionConfig::new("Ada"));
//! let joined = session.join_quick_match().await?;
//! ```

pub mod controller;
pub mod error;
pub mod event;
pub mod host;
pub mod presence;
pub mod protocol;
pub mod session;
pub mod slot;
pub mod state;
pub mod transport;

// Re-export primary types for ergonomic imports.
pub use controller::{Effect, SessionController};
pub use error::SessionError;
pub use event::SessionEvent;
pub use host::RoomKind;
pub use protocol::GameMessage;
pub use session::{RoomJoined, RoomSession, SessionConfig};
pub use slot::ColorTag;
pub use state::{PeerId, Phase, Player, RoomState};
pub use transport::{InboundMessage, MessageChannel, RoomTransport, TransportEvent};
