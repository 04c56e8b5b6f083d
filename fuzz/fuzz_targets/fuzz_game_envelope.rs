#![no_main]

use libfuzzer_sys::fuzz_target;

use chess_session_client::protocol::{decode_lobby_list, GameEnvelope};
use chess_session_client::view::LobbyView;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    // Whatever decodes must also reduce without panicking.
    if let Ok(envelope) = GameEnvelope::decode(text) {
        let mut view = LobbyView::new(envelope.lobby_id.clone());
        let _ = view.apply(&envelope, Some("fuzz"));
    }
    let _ = decode_lobby_list(text);
});
