#![no_main]

use libfuzzer_sys::fuzz_target;
use rich_presence_client::protocol::{encode_into, ActivityArgs, Command, Nonce, RichPresence};

fuzz_target!(|data: &[u8]| {
    let text = String::from_utf8_lossy(data);
    let presence = RichPresence::new()
        .with_state(text.as_ref())
        .with_details(text.as_ref())
        .with_join_secret(text.as_ref());
    let command = Command::SetActivity {
        nonce: Nonce(1),
        args: ActivityArgs {
            pid: 1,
            activity: Some(&presence),
        },
    };

    // Whatever fits in the slot must be valid JSON; overflow is an error, never a panic.
    let mut slot = [0u8; 1024];
    if let Ok(len) = encode_into(&mut slot, &command) {
        if let Some(written) = slot.get(..len) {
            assert!(serde_json::from_slice::<serde_json::Value>(written).is_ok());
        }
    }
});
