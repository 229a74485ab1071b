#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Protocol tests for the rich presence client.
//!
//! Verifies the exact JSON the client writes for each command and that
//! inbound fixtures shaped like real peer output are classified correctly.

use rich_presence_client::error_codes::ErrorCode;
use rich_presence_client::protocol::{
    encode_into, ActivityArgs, Command, InboundEvent, InboundMessage, Nonce, RichPresence,
    Skipped, Subscription, Subscriptions,
};
use rich_presence_client::RpcError;
use serde_json::{json, Value};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

fn encode(command: &Command<'_>) -> Value {
    let mut slot = vec![0u8; 16 * 1024];
    let len = encode_into(&mut slot, command).expect("encode");
    serde_json::from_slice(&slot[..len]).expect("valid JSON")
}

fn classify(frame: &Value) -> Result<InboundEvent<'static>, Skipped> {
    // Leak the fixture so the borrowed event can outlive this helper.
    let bytes: &'static [u8] = Box::leak(serde_json::to_vec(frame).unwrap().into_boxed_slice());
    let message: &'static InboundMessage<'static> =
        Box::leak(Box::new(InboundMessage::parse(bytes).expect("parse")));
    message.classify()
}

// ════════════════════════════════════════════════════════════════════
// Outbound commands
// ════════════════════════════════════════════════════════════════════

#[test]
fn subscribe_commands_for_every_event() {
    let names: Vec<Value> = Subscription::ALL
        .iter()
        .enumerate()
        .map(|(i, &evt)| {
            encode(&Command::Subscribe {
                nonce: Nonce(i as u64 + 1),
                evt,
            })
        })
        .collect();
    assert_eq!(
        names,
        [
            json!({"cmd": "SUBSCRIBE", "nonce": "1", "evt": "PRESENCE_REQUESTED"}),
            json!({"cmd": "SUBSCRIBE", "nonce": "2", "evt": "JOIN_GAME"}),
            json!({"cmd": "SUBSCRIBE", "nonce": "3", "evt": "SPECTATE_GAME"}),
        ]
    );
}

#[test]
fn full_presence_fixture() {
    let presence = RichPresence::new()
        .with_state("In a group")
        .with_details("Competitive | In a match")
        .with_start_timestamp(1_507_665_886)
        .with_end_timestamp(1_507_665_986)
        .with_large_image("map_canyon", Some("Numbani".into()))
        .with_small_image("rogue", Some("Rogue - Level 100".into()))
        .with_party("ae488379-351d-4a4f-ad32-2b9b01c91657", 1, 5)
        .with_match_secret("MmhuZToxMjMxMjM6cWl3amR3MWlqd2Q6")
        .with_join_secret("MTI4NzM0OjFpMmhuZToxMjMxMjM=")
        .with_spectate_secret("MTIzNDV8MTIzNDV8MTMyNDU0")
        .with_instance(true);

    let value = encode(&Command::SetActivity {
        nonce: Nonce(9),
        args: ActivityArgs {
            pid: 9999,
            activity: Some(&presence),
        },
    });

    assert_eq!(
        value,
        json!({
            "cmd": "SET_ACTIVITY",
            "nonce": "9",
            "args": {
                "pid": 9999,
                "activity": {
                    "state": "In a group",
                    "details": "Competitive | In a match",
                    "timestamps": {"start": 1_507_665_886, "end": 1_507_665_986},
                    "assets": {
                        "large_image": "map_canyon",
                        "large_text": "Numbani",
                        "small_image": "rogue",
                        "small_text": "Rogue - Level 100"
                    },
                    "party": {"id": "ae488379-351d-4a4f-ad32-2b9b01c91657", "size": [1, 5]},
                    "secrets": {
                        "match": "MmhuZToxMjMxMjM6cWl3amR3MWlqd2Q6",
                        "join": "MTI4NzM0OjFpMmhuZToxMjMxMjM=",
                        "spectate": "MTIzNDV8MTIzNDV8MTMyNDU0"
                    },
                    "instance": true
                }
            }
        })
    );
}

#[test]
fn minimal_presence_omits_empty_sections() {
    let presence = RichPresence::new().with_details("Main menu").with_party("p", 1, 0);
    let value = encode(&Command::SetActivity {
        nonce: Nonce(1),
        args: ActivityArgs {
            pid: 1,
            activity: Some(&presence),
        },
    });
    assert_eq!(
        value["args"]["activity"],
        json!({"details": "Main menu", "party": {"id": "p"}, "instance": false})
    );
}

#[test]
fn escaped_strings_stay_valid_json() {
    let presence = RichPresence::new().with_state("\"quoted\" \\ \u{1F3AE} line\nbreak");
    let value = encode(&Command::SetActivity {
        nonce: Nonce(1),
        args: ActivityArgs {
            pid: 1,
            activity: Some(&presence),
        },
    });
    assert_eq!(
        value["args"]["activity"]["state"],
        "\"quoted\" \\ \u{1F3AE} line\nbreak"
    );
}

#[test]
fn slot_overflow_is_message_too_large() {
    let presence = RichPresence::new().with_details("x".repeat(512));
    let mut slot = [0u8; 256];
    let err = encode_into(
        &mut slot,
        &Command::SetActivity {
            nonce: Nonce(1),
            args: ActivityArgs {
                pid: 1,
                activity: Some(&presence),
            },
        },
    )
    .unwrap_err();
    assert!(matches!(err, RpcError::MessageTooLarge { capacity: 256 }));
}

// ════════════════════════════════════════════════════════════════════
// Inbound fixtures (shaped like real peer output)
// ════════════════════════════════════════════════════════════════════

#[test]
fn ready_dispatch_is_unrouted() {
    let frame = json!({
        "cmd": "DISPATCH",
        "evt": "READY",
        "data": {
            "v": 1,
            "config": {"cdn_host": "cdn.example.com", "api_endpoint": "//example.com/api"},
            "user": {"id": "53908232506183680", "username": "Mason"}
        }
    });
    assert_eq!(classify(&frame), Err(Skipped::Unrouted));
}

#[test]
fn join_dispatch_carries_secret() {
    let frame = json!({
        "cmd": "DISPATCH",
        "evt": "JOIN_GAME",
        "data": {"secret": "025ed05c71f639de8bfaa0d679d7c94b2fdce12f"}
    });
    assert_eq!(
        classify(&frame),
        Ok(InboundEvent::JoinGame {
            secret: "025ed05c71f639de8bfaa0d679d7c94b2fdce12f"
        })
    );
}

#[test]
fn spectate_dispatch_carries_secret() {
    let frame = json!({"cmd": "DISPATCH", "evt": "SPECTATE_GAME", "data": {"secret": "e7eb30d2ee025ed05c71ea495f770b76454ee4e0"}});
    assert_eq!(
        classify(&frame),
        Ok(InboundEvent::SpectateGame {
            secret: "e7eb30d2ee025ed05c71ea495f770b76454ee4e0"
        })
    );
}

#[test]
fn presence_requested_ignores_extra_data() {
    let frame = json!({
        "cmd": "DISPATCH",
        "evt": "PRESENCE_REQUESTED",
        "data": {"user": {"id": "53908232506183680", "avatar": null}}
    });
    assert_eq!(classify(&frame), Ok(InboundEvent::PresenceRequested));
}

#[test]
fn error_response_with_nonce() {
    let frame = json!({
        "cmd": "SET_ACTIVITY",
        "evt": "ERROR",
        "nonce": "5",
        "data": {"code": 4000, "message": "child \"activity\" fails because [\"state\" is not allowed to be empty]"}
    });
    let Ok(InboundEvent::Error { code, message }) = classify(&frame) else {
        panic!("expected an error event");
    };
    assert_eq!(ErrorCode::from_code(code), Some(ErrorCode::InvalidClientId));
    assert!(message.contains("\"state\""));
}

#[test]
fn successful_response_is_not_an_event() {
    let frame = json!({
        "cmd": "SUBSCRIBE",
        "nonce": "1",
        "evt": null,
        "data": {"evt": "JOIN_GAME"}
    });
    assert_eq!(classify(&frame), Err(Skipped::Response));
}

#[test]
fn malformed_frames_are_skipped() {
    assert_eq!(
        classify(&json!({"cmd": "DISPATCH", "evt": "JOIN_GAME"})),
        Err(Skipped::Malformed)
    );
    assert_eq!(
        classify(&json!({"cmd": "SET_ACTIVITY", "evt": "ERROR", "nonce": "2", "data": {"message": "no code"}})),
        Err(Skipped::Malformed)
    );
    assert_eq!(classify(&json!({"cmd": "DISPATCH"})), Err(Skipped::Malformed));
}

#[test]
fn non_object_payloads_fail_to_parse() {
    assert!(InboundMessage::parse(b"[1, 2, 3]").is_err());
    assert!(InboundMessage::parse(b"{\"evt\": ").is_err());
    assert!(InboundMessage::parse(b"").is_err());
}

// ════════════════════════════════════════════════════════════════════
// Subscription sets
// ════════════════════════════════════════════════════════════════════

#[test]
fn subscription_set_difference_drives_handler_updates() {
    let before: Subscriptions = [Subscription::JoinGame, Subscription::PresenceRequested]
        .into_iter()
        .collect();
    let after: Subscriptions = [Subscription::SpectateGame, Subscription::PresenceRequested]
        .into_iter()
        .collect();

    let added: Vec<_> = after.difference(before).iter().collect();
    let removed: Vec<_> = before.difference(after).iter().collect();
    assert_eq!(added, [Subscription::SpectateGame]);
    assert_eq!(removed, [Subscription::JoinGame]);
}

#[test]
fn subscription_serializes_to_wire_name() {
    for kind in Subscription::ALL {
        assert_eq!(serde_json::to_value(kind).unwrap(), json!(kind.as_str()));
    }
}
