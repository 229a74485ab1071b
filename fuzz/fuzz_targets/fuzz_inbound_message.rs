#![no_main]

use libfuzzer_sys::fuzz_target;
use rich_presence_client::protocol::InboundMessage;

fuzz_target!(|data: &[u8]| {
    // Parsing and routing must reject anything malformed without panicking.
    if let Ok(message) = InboundMessage::parse(data) {
        let _ = message.classify();
    }
});
