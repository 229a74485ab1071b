//! Known close and error codes exchanged with the presence peer.
//!
//! Codes below 1000 are produced locally by the transport; `1000`-range codes
//! mirror WebSocket-style close codes, and `4000`-range codes are sent by the
//! peer in `Close` frames and `ERROR` responses. Unknown codes are passed
//! through to the embedder untouched as raw `i32` values.

use std::fmt;

/// Structured close/error codes understood by the client.
///
/// Use [`description()`](ErrorCode::description) for a human-readable explanation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Local transport errors
    PipeClosed,
    ReadCorrupt,

    // Close codes
    NormalClose,
    AbnormalClose,

    // Peer rejections
    InvalidClientId,
    InvalidOrigin,
    RateLimited,
    TokenRevoked,
    InvalidVersion,
    InvalidEncoding,
}

impl ErrorCode {
    /// Numeric wire value of this code.
    pub fn code(self) -> i32 {
        match self {
            Self::PipeClosed => 1,
            Self::ReadCorrupt => 2,
            Self::NormalClose => 1000,
            Self::AbnormalClose => 1006,
            Self::InvalidClientId => 4000,
            Self::InvalidOrigin => 4001,
            Self::RateLimited => 4002,
            Self::TokenRevoked => 4003,
            Self::InvalidVersion => 4004,
            Self::InvalidEncoding => 4005,
        }
    }

    /// Look up a known code from its numeric wire value.
    pub fn from_code(code: i32) -> Option<Self> {
        let known = match code {
            1 => Self::PipeClosed,
            2 => Self::ReadCorrupt,
            1000 => Self::NormalClose,
            1006 => Self::AbnormalClose,
            4000 => Self::InvalidClientId,
            4001 => Self::InvalidOrigin,
            4002 => Self::RateLimited,
            4003 => Self::TokenRevoked,
            4004 => Self::InvalidVersion,
            4005 => Self::InvalidEncoding,
            _ => return None,
        };
        Some(known)
    }

    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::PipeClosed => "The connection to the presence peer was closed.",
            Self::ReadCorrupt => {
                "Data received from the presence peer could not be framed or parsed."
            }
            Self::NormalClose => "The presence peer closed the connection normally.",
            Self::AbnormalClose => "The connection ended without a close handshake.",
            Self::InvalidClientId => {
                "The application id was rejected. Check the id registered with the peer."
            }
            Self::InvalidOrigin => "The connection origin was rejected by the peer.",
            Self::RateLimited => "Too many requests in a short time. Slow down and retry later.",
            Self::TokenRevoked => "The authorization for this application was revoked.",
            Self::InvalidVersion => "The peer does not support the requested RPC version.",
            Self::InvalidEncoding => "The peer does not support the requested encoding.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

impl From<ErrorCode> for i32 {
    fn from(code: ErrorCode) -> Self {
        code.code()
    }
}
