//! Wire-compatible message schema shared by every peer in a room.
//!
//! Messages are JSON objects tagged by a `"type"` field with camelCase field
//! names, e.g.
//!
//! ```json
//! {"type":"playerJoined","userId":42,"name":"Ada","slotIndex":1,"colorTag":"blue"}
//! ```
//!
//! The tag values and field names are shared with a non-web client and must
//! not change on one side only. There is no version field.

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::slot::{ColorTag, SlotIndex};
use crate::state::{PeerId, RoomState, SyncSnapshot};

/// Messages broadcast between peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GameMessage {
    /// A peer announcing itself with its requested seat.
    PlayerJoined {
        user_id: PeerId,
        name: String,
        slot_index: SlotIndex,
        color_tag: ColorTag,
    },
    /// A peer leaving the room.
    PlayerLeft { user_id: PeerId },
    /// The host started a round.
    GameStarted {
        secret_word: String,
        imposter_id: PeerId,
    },
    /// Full snapshot from the host.
    StateSync(SyncSnapshot),
    /// Ask the host for a [`StateSync`](GameMessage::StateSync).
    RequestSync,
}

impl GameMessage {
    /// Announcement for the local player as currently seated in `state`.
    pub fn announce(state: &RoomState) -> Option<Self> {
        let local = state.local_player()?;
        Some(Self::PlayerJoined {
            user_id: local.id,
            name: local.name.clone(),
            slot_index: local.slot_index,
            color_tag: local.color_tag,
        })
    }

    /// `stateSync` for `state`, if its host is known.
    pub fn state_sync(state: &RoomState) -> Option<Self> {
        state.snapshot().map(Self::StateSync)
    }

    /// Short tag used in log lines.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlayerJoined { .. } => "playerJoined",
            Self::PlayerLeft { .. } => "playerLeft",
            Self::GameStarted { .. } => "gameStarted",
            Self::StateSync(_) => "stateSync",
            Self::RequestSync => "requestSync",
        }
    }
}

/// Serialize a message to the bytes handed to the broadcast channel.
///
/// # Errors
///
/// Returns [`SessionError::Serialization`](crate::SessionError::Serialization)
/// if serde fails, which only happens for programming errors.
pub fn encode(message: &GameMessage) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(message)?)
}

/// Parse bytes received from the broadcast channel.
///
/// # Errors
///
/// Returns [`SessionError::Serialization`](crate::SessionError::Serialization)
/// for payloads that are not valid JSON or do not match the schema.
pub fn decode(payload: &[u8]) -> Result<GameMessage> {
    Ok(serde_json::from_slice(payload)?)
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
    use crate::state::{Phase, Player};

    #[test]
    fn player_joined_wire_shape() {
        let msg = GameMessage::PlayerJoined {
            user_id: 42,
            name: "Ada".into(),
            slot_index: 1,
            color_tag: ColorTag::Blue,
        };
        let value: serde_json::Value = serde_json::from_slice(&encode(&msg).unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "type": "playerJoined",
                "userId": 42,
                "name": "Ada",
                "slotIndex": 1,
                "colorTag": "blue"
            })
        );
    }

    #[test]
    fn request_sync_is_bare_tag() {
        assert_eq!(
            String::from_utf8(encode(&GameMessage::RequestSync).unwrap()).unwrap(),
            r#"{"type":"requestSync"}"#
        );
        assert_eq!(
            decode(br#"{"type":"requestSync"}"#).unwrap(),
            GameMessage::RequestSync
        );
    }

    #[test]
    fn state_sync_is_flat() {
        let msg = GameMessage::StateSync(SyncSnapshot {
            host_id: 1,
            players: vec![Player::new(1, 0, "A")],
            phase: Phase::Playing,
            secret_word: Some("kite".into()),
            imposter_id: Some(1),
        });
        let value: serde_json::Value = serde_json::from_slice(&encode(&msg).unwrap()).unwrap();
        assert_eq!(value["type"], "stateSync");
        assert_eq!(value["hostId"], 1);
        assert_eq!(value["phase"], "playing");
        assert_eq!(value["secretWord"], "kite");
        assert_eq!(value["imposterId"], 1);
        assert_eq!(value["players"][0]["slotIndex"], 0);
        assert_eq!(value["players"][0]["isConnected"], true);
        assert_eq!(value["players"][0]["colorTag"], "red");
    }

    #[test]
    fn lobby_sync_carries_nulls() {
        let json = r#"{"type":"stateSync","hostId":5,"players":[],"phase":"lobby","secretWord":null,"imposterId":null}"#;
        let GameMessage::StateSync(snapshot) = decode(json.as_bytes()).unwrap() else {
            panic!("expected stateSync");
        };
        assert_eq!(snapshot.host_id, 5);
        assert!(snapshot.secret_word.is_none());
        assert!(snapshot.imposter_id.is_none());
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(decode(b"not json").is_err());
        assert!(decode(br#"{"type":"teleport"}"#).is_err());
        assert!(decode(br#"{"type":"playerLeft"}"#).is_err());
        assert!(decode(br#"{"type":"playerJoined","userId":1,"name":"A","slotIndex":0,"colorTag":"purple"}"#).is_err());
    }

    #[test]
    fn announce_uses_local_seat() {
        let mut state = RoomState::new("1111", 9, None);
        assert!(GameMessage::announce(&state).is_none());
        state.add_player(Player::new(9, 2, "Nine"));
        assert_eq!(
            GameMessage::announce(&state),
            Some(GameMessage::PlayerJoined {
                user_id: 9,
                name: "Nine".into(),
                slot_index: 2,
                color_tag: ColorTag::Green,
            })
        );
        assert!(GameMessage::state_sync(&state).is_none());
    }
}
