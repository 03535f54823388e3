#![no_main]

use libfuzzer_sys::fuzz_target;
use room_session_client::protocol::{InboundMessage, RoomPhase};

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    // Parsing must never panic, and any accepted alert must map to a phase.
    if let Ok(InboundMessage::GameAlert { status }) = InboundMessage::parse(text) {
        let _ = RoomPhase::derive(&status, None);
    }
});
