#![no_main]

use libfuzzer_sys::fuzz_target;

use chess_session_client::stomp::Frame;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Ok(frames) = Frame::decode_all(text) {
        for frame in frames {
            // Anything we accepted must encode to something we accept again.
            let encoded = frame.encode();
            let _ = Frame::decode_all(&encoded);
        }
    }
});
