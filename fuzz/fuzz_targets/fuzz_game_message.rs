#![no_main]

use imposter_room::protocol::{self, GameMessage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Anything a peer can put on the channel goes through this path.
    let Ok(message) = protocol::decode(data) else {
        return;
    };

    // Whatever decodes must encode again and decode to the same value.
    let bytes = protocol::encode(&message).expect("re-encode decoded message");
    let again: GameMessage = serde_json::from_slice(&bytes).expect("decode re-encoded message");
    assert_eq!(message, again);

    if let GameMessage::StateSync(snapshot) = &message {
        let _ = snapshot.is_consistent();
    }
});
