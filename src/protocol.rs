//! JSON wire types exchanged with the presence peer.
//!
//! Outbound requests are [`Command`]s, encoded directly into a send queue
//! slot with [`encode_into`] so that enqueueing never allocates. Inbound
//! frames are parsed into an [`InboundMessage`] that borrows from the frame
//! buffer and is then classified into at most one [`InboundEvent`].
//!
//! Every outbound command carries a `nonce`, a strictly increasing request
//! number. It is only used for diagnostics; responses are not matched back
//! to the request that caused them.

use std::borrow::Cow;
use std::fmt;
use std::io::Cursor;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Result, RpcError};

// ── Outbound ────────────────────────────────────────────────────────

/// Request sequence number, serialized as a decimal string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Nonce(pub u64);

impl Serialize for Nonce {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Peer events the client can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Subscription {
    /// The peer asks the game to re-send its presence.
    PresenceRequested,
    /// The user accepted an invitation to join the game.
    JoinGame,
    /// The user chose to spectate the game.
    SpectateGame,
}

impl Subscription {
    pub const ALL: [Subscription; 3] = [
        Subscription::PresenceRequested,
        Subscription::JoinGame,
        Subscription::SpectateGame,
    ];

    /// Wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PresenceRequested => "PRESENCE_REQUESTED",
            Self::JoinGame => "JOIN_GAME",
            Self::SpectateGame => "SPECTATE_GAME",
        }
    }

    fn bit(self) -> u8 {
        match self {
            Self::PresenceRequested => 0b001,
            Self::JoinGame => 0b010,
            Self::SpectateGame => 0b100,
        }
    }
}

/// A set of [`Subscription`]s, packed so it can live in an atomic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Subscriptions(u8);

impl Subscriptions {
    pub const NONE: Subscriptions = Subscriptions(0);

    pub fn from_bits(bits: u8) -> Self {
        Self(bits & 0b111)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn with(self, kind: Subscription) -> Self {
        Self(self.0 | kind.bit())
    }

    pub fn contains(self, kind: Subscription) -> bool {
        self.0 & kind.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Subscription> {
        Subscription::ALL.into_iter().filter(move |kind| self.contains(*kind))
    }

    /// Kinds present in `self` but not in `other`.
    pub fn difference(self, other: Subscriptions) -> Subscriptions {
        Self(self.0 & !other.0)
    }
}

impl FromIterator<Subscription> for Subscriptions {
    fn from_iter<I: IntoIterator<Item = Subscription>>(iter: I) -> Self {
        iter.into_iter().fold(Self::NONE, Self::with)
    }
}

/// An outbound request to the peer.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "cmd", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Command<'a> {
    /// Start receiving an event.
    Subscribe { nonce: Nonce, evt: Subscription },
    /// Stop receiving an event.
    Unsubscribe { nonce: Nonce, evt: Subscription },
    /// Set (or clear, with `activity: None`) the rich presence of this process.
    SetActivity { nonce: Nonce, args: ActivityArgs<'a> },
}

impl Command<'_> {
    pub fn nonce(&self) -> Nonce {
        match self {
            Self::Subscribe { nonce, .. }
            | Self::Unsubscribe { nonce, .. }
            | Self::SetActivity { nonce, .. } => *nonce,
        }
    }
}

/// Arguments of [`Command::SetActivity`].
#[derive(Debug, Clone, Serialize)]
pub struct ActivityArgs<'a> {
    pub pid: u32,
    pub activity: Option<&'a RichPresence>,
}

/// Encode `command` as JSON into `buffer`, returning the number of bytes
/// written.
///
/// # Errors
///
/// Returns [`RpcError::MessageTooLarge`] if the encoded command does not fit.
pub fn encode_into(buffer: &mut [u8], command: &Command<'_>) -> Result<usize> {
    let capacity = buffer.len();
    let mut cursor = Cursor::new(buffer);
    match serde_json::to_writer(&mut cursor, command) {
        Ok(()) => Ok(usize::try_from(cursor.position()).unwrap_or(capacity)),
        Err(e) if e.is_io() => Err(RpcError::MessageTooLarge { capacity }),
        Err(e) => Err(RpcError::Serialization(e)),
    }
}

// ── Rich presence ───────────────────────────────────────────────────

/// Rich presence descriptor for this process.
///
/// Unset fields are omitted from the wire.
///
/// # Example
///
/// ```
/// use rich_presence_client::RichPresence;
///
/// let presence = RichPresence::new()
///     .with_state("In a match")
///     .with_details("Ranked 2v2")
///     .with_party("party-1234", 1, 2)
///     .with_join_secret("join-abc");
/// assert_eq!(presence.state.as_deref(), Some("In a match"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RichPresence {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(skip_serializing_if = "Timestamps::is_empty")]
    pub timestamps: Timestamps,
    #[serde(skip_serializing_if = "Assets::is_empty")]
    pub assets: Assets,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub party: Option<Party>,
    #[serde(skip_serializing_if = "Secrets::is_empty")]
    pub secrets: Secrets,
    /// Whether this presence describes a specific, joinable game instance.
    pub instance: bool,
}

/// Unix timestamps (seconds) for elapsed/remaining time display.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Timestamps {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl Timestamps {
    fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Image keys and hover texts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Assets {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub large_text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub small_text: Option<String>,
}

impl Assets {
    fn is_empty(&self) -> bool {
        self.large_image.is_none()
            && self.large_text.is_none()
            && self.small_image.is_none()
            && self.small_text.is_none()
    }
}

/// The party the player is in. `size` serializes as `[current, max]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Party {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<[u32; 2]>,
}

/// Secrets the peer hands back through the join/spectate events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Secrets {
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub match_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub join: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub spectate: Option<String>,
}

impl Secrets {
    fn is_empty(&self) -> bool {
        self.match_secret.is_none() && self.join.is_none() && self.spectate.is_none()
    }
}

impl RichPresence {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[must_use]
    pub fn with_start_timestamp(mut self, unix_secs: i64) -> Self {
        self.timestamps.start = Some(unix_secs);
        self
    }

    #[must_use]
    pub fn with_end_timestamp(mut self, unix_secs: i64) -> Self {
        self.timestamps.end = Some(unix_secs);
        self
    }

    #[must_use]
    pub fn with_large_image(mut self, key: impl Into<String>, text: Option<String>) -> Self {
        self.assets.large_image = Some(key.into());
        self.assets.large_text = text;
        self
    }

    #[must_use]
    pub fn with_small_image(mut self, key: impl Into<String>, text: Option<String>) -> Self {
        self.assets.small_image = Some(key.into());
        self.assets.small_text = text;
        self
    }

    /// Set the party id and its current/maximum size. A zero `max` omits the
    /// size.
    #[must_use]
    pub fn with_party(mut self, id: impl Into<String>, size: u32, max: u32) -> Self {
        self.party = Some(Party {
            id: id.into(),
            size: (max > 0).then_some([size, max]),
        });
        self
    }

    #[must_use]
    pub fn with_match_secret(mut self, secret: impl Into<String>) -> Self {
        self.secrets.match_secret = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_join_secret(mut self, secret: impl Into<String>) -> Self {
        self.secrets.join = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_spectate_secret(mut self, secret: impl Into<String>) -> Self {
        self.secrets.spectate = Some(secret.into());
        self
    }

    #[must_use]
    pub fn with_instance(mut self, instance: bool) -> Self {
        self.instance = instance;
        self
    }
}

// ── Inbound ─────────────────────────────────────────────────────────

/// Event name the peer uses for error responses.
pub const ERROR_EVENT: &str = "ERROR";

/// Structured view of an inbound frame. Strings borrow from the frame unless
/// they contain escapes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundMessage<'a> {
    #[serde(borrow, default, deserialize_with = "borrowed_str")]
    pub cmd: Option<Cow<'a, str>>,
    #[serde(borrow, default, deserialize_with = "borrowed_str")]
    pub evt: Option<Cow<'a, str>>,
    #[serde(borrow, default, deserialize_with = "borrowed_str")]
    pub nonce: Option<Cow<'a, str>>,
    #[serde(borrow, default)]
    pub data: Option<InboundData<'a>>,
}

/// The `data` object of an inbound frame; only the fields the client routes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboundData<'a> {
    #[serde(default)]
    pub code: Option<i32>,
    #[serde(borrow, default, deserialize_with = "borrowed_str")]
    pub message: Option<Cow<'a, str>>,
    #[serde(borrow, default, deserialize_with = "borrowed_str")]
    pub secret: Option<Cow<'a, str>>,
}

/// Serde only borrows a `Cow<str>` that is the field type itself, so an
/// optional one goes through this newtype.
#[derive(Deserialize)]
struct BorrowedStr<'a>(#[serde(borrow)] Cow<'a, str>);

fn borrowed_str<'de: 'a, 'a, D>(
    deserializer: D,
) -> std::result::Result<Option<Cow<'a, str>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<BorrowedStr<'de>> = Option::deserialize(deserializer)?;
    Ok(value.map(|BorrowedStr(text)| text))
}

/// What an inbound frame means to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundEvent<'m> {
    /// The peer rejected a request.
    Error { code: i32, message: &'m str },
    PresenceRequested,
    JoinGame { secret: &'m str },
    SpectateGame { secret: &'m str },
}

/// Why a frame produced no [`InboundEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skipped {
    /// A response to one of our requests that needs no routing.
    Response,
    /// An event the client does not route.
    Unrouted,
    /// Expected fields are missing.
    Malformed,
}

impl<'a> InboundMessage<'a> {
    /// Parse a frame payload.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Serialization`] if the payload is not a JSON object
    /// of the expected shape.
    pub fn parse(payload: &'a [u8]) -> Result<Self> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn evt(&self) -> Option<&str> {
        self.evt.as_deref()
    }

    pub fn cmd(&self) -> Option<&str> {
        self.cmd.as_deref()
    }

    /// Decide which event, if any, this frame carries.
    ///
    /// Frames with a nonce are responses and only matter when they report an
    /// error. Frames without one are events named by `evt`.
    pub fn classify(&self) -> std::result::Result<InboundEvent<'_>, Skipped> {
        let data = self.data.as_ref();
        if self.nonce.is_some() {
            if self.evt() != Some(ERROR_EVENT) {
                return Err(Skipped::Response);
            }
            let code = data.and_then(|d| d.code).ok_or(Skipped::Malformed)?;
            let message = data
                .and_then(|d| d.message.as_deref())
                .ok_or(Skipped::Malformed)?;
            return Ok(InboundEvent::Error { code, message });
        }

        let secret = || data.and_then(|d| d.secret.as_deref()).ok_or(Skipped::Malformed);
        match self.evt().ok_or(Skipped::Malformed)? {
            "PRESENCE_REQUESTED" => Ok(InboundEvent::PresenceRequested),
            "JOIN_GAME" => Ok(InboundEvent::JoinGame { secret: secret()? }),
            "SPECTATE_GAME" => Ok(InboundEvent::SpectateGame { secret: secret()? }),
            _ => Err(Skipped::Unrouted),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn encode(command: &Command<'_>) -> Value {
        let mut buffer = [0u8; 1024];
        let len = encode_into(&mut buffer, command).unwrap();
        serde_json::from_slice(&buffer[..len]).unwrap()
    }

    #[test]
    fn subscribe_wire_format() {
        let value = encode(&Command::Subscribe {
            nonce: Nonce(7),
            evt: Subscription::JoinGame,
        });
        assert_eq!(value, json!({"cmd": "SUBSCRIBE", "nonce": "7", "evt": "JOIN_GAME"}));
    }

    #[test]
    fn unsubscribe_wire_format() {
        let value = encode(&Command::Unsubscribe {
            nonce: Nonce(8),
            evt: Subscription::PresenceRequested,
        });
        assert_eq!(
            value,
            json!({"cmd": "UNSUBSCRIBE", "nonce": "8", "evt": "PRESENCE_REQUESTED"})
        );
    }

    #[test]
    fn set_activity_nests_presence() {
        let presence = RichPresence::new()
            .with_state("Playing")
            .with_start_timestamp(1_700_000_000)
            .with_large_image("map", Some("Dust".into()))
            .with_party("p1", 2, 4)
            .with_join_secret("j")
            .with_instance(true);
        let value = encode(&Command::SetActivity {
            nonce: Nonce(3),
            args: ActivityArgs {
                pid: 42,
                activity: Some(&presence),
            },
        });
        assert_eq!(
            value,
            json!({
                "cmd": "SET_ACTIVITY",
                "nonce": "3",
                "args": {
                    "pid": 42,
                    "activity": {
                        "state": "Playing",
                        "timestamps": {"start": 1_700_000_000},
                        "assets": {"large_image": "map", "large_text": "Dust"},
                        "party": {"id": "p1", "size": [2, 4]},
                        "secrets": {"join": "j"},
                        "instance": true
                    }
                }
            })
        );
    }

    #[test]
    fn clearing_presence_sends_null_activity() {
        let value = encode(&Command::SetActivity {
            nonce: Nonce(1),
            args: ActivityArgs {
                pid: 1,
                activity: None,
            },
        });
        assert_eq!(value["args"]["activity"], Value::Null);
    }

    #[test]
    fn encode_reports_small_buffers() {
        let mut buffer = [0u8; 8];
        let err = encode_into(
            &mut buffer,
            &Command::Subscribe {
                nonce: Nonce(1),
                evt: Subscription::SpectateGame,
            },
        )
        .unwrap_err();
        assert!(matches!(err, RpcError::MessageTooLarge { capacity: 8 }));
    }

    #[test]
    fn subscriptions_set_operations() {
        let set: Subscriptions = [Subscription::JoinGame, Subscription::SpectateGame]
            .into_iter()
            .collect();
        assert!(set.contains(Subscription::JoinGame));
        assert!(!set.contains(Subscription::PresenceRequested));
        let only_join = Subscriptions::NONE.with(Subscription::JoinGame);
        assert_eq!(
            set.difference(only_join).iter().collect::<Vec<_>>(),
            vec![Subscription::SpectateGame]
        );
        assert_eq!(Subscriptions::from_bits(set.bits()), set);
    }

    #[test]
    fn classify_join_game() {
        let raw = br#"{"cmd":"DISPATCH","evt":"JOIN_GAME","nonce":null,"data":{"secret":"abc123"}}"#;
        let msg = InboundMessage::parse(raw).unwrap();
        assert_eq!(msg.classify(), Ok(InboundEvent::JoinGame { secret: "abc123" }));
    }

    #[test]
    fn classify_error_response() {
        let raw = br#"{"cmd":"SET_ACTIVITY","evt":"ERROR","nonce":"5","data":{"code":4000,"message":"Invalid payload"}}"#;
        let msg = InboundMessage::parse(raw).unwrap();
        assert_eq!(
            msg.classify(),
            Ok(InboundEvent::Error {
                code: 4000,
                message: "Invalid payload"
            })
        );
    }

    #[test]
    fn classify_skips_plain_responses_and_unknown_events() {
        let ok = InboundMessage::parse(br#"{"cmd":"SUBSCRIBE","nonce":"1","data":{"evt":"JOIN_GAME"}}"#);
        assert_eq!(ok.unwrap().classify(), Err(Skipped::Response));

        let unknown = InboundMessage::parse(br#"{"cmd":"DISPATCH","evt":"READY","data":{"v":1}}"#);
        assert_eq!(unknown.unwrap().classify(), Err(Skipped::Unrouted));
    }

    #[test]
    fn classify_rejects_missing_fields() {
        let no_secret = InboundMessage::parse(br#"{"evt":"SPECTATE_GAME","data":{}}"#).unwrap();
        assert_eq!(no_secret.classify(), Err(Skipped::Malformed));

        let no_code = InboundMessage::parse(br#"{"evt":"ERROR","nonce":"2","data":{"message":"x"}}"#)
            .unwrap();
        assert_eq!(no_code.classify(), Err(Skipped::Malformed));

        let no_evt = InboundMessage::parse(br#"{"data":{"secret":"s"}}"#).unwrap();
        assert_eq!(no_evt.classify(), Err(Skipped::Malformed));
    }

    #[test]
    fn unescaped_fields_borrow_from_the_frame() {
        let frame = br#"{"cmd":"SET_ACTIVITY","evt":"ERROR","nonce":"4","data":{"code":4000,"message":"bad","secret":"abc123"}}"#;
        let msg = InboundMessage::parse(frame).unwrap();
        assert!(matches!(msg.cmd, Some(Cow::Borrowed("SET_ACTIVITY"))));
        assert!(matches!(msg.evt, Some(Cow::Borrowed("ERROR"))));
        assert!(matches!(msg.nonce, Some(Cow::Borrowed("4"))));
        let data = msg.data.as_ref().unwrap();
        assert!(matches!(data.message, Some(Cow::Borrowed("bad"))));
        assert!(matches!(data.secret, Some(Cow::Borrowed("abc123"))));
    }

    #[test]
    fn null_fields_read_as_absent() {
        let msg = InboundMessage::parse(br#"{"cmd":"SUBSCRIBE","evt":null,"nonce":"1","data":{"secret":null}}"#).unwrap();
        assert!(msg.evt.is_none());
        assert!(msg.data.unwrap().secret.is_none());
    }

    #[test]
    fn escaped_strings_are_decoded() {
        let msg = InboundMessage::parse(br#"{"evt":"JOIN_GAME","data":{"secret":"a\"b"}}"#).unwrap();
        assert_eq!(msg.classify(), Ok(InboundEvent::JoinGame { secret: "a\"b" }));
        let secret = msg.data.as_ref().and_then(|d| d.secret.as_ref());
        assert!(matches!(secret, Some(Cow::Owned(_))));
    }

    #[test]
    fn non_object_payloads_fail_to_parse() {
        assert!(InboundMessage::parse(b"[1,2,3]").is_err());
        assert!(InboundMessage::parse(b"not json").is_err());
    }
}
