//! Error types for the rich presence client.

use thiserror::Error;

use crate::error_codes::ErrorCode;

/// Errors reported synchronously by the rich presence client.
///
/// Failures that happen on the I/O thread never surface as `RpcError`; they
/// are converted into mailbox events and delivered through
/// [`RpcClient::run_callbacks`](crate::RpcClient::run_callbacks).
#[derive(Debug, Error)]
pub enum RpcError {
    /// The application identifier is empty or longer than the peer accepts.
    #[error("invalid application id: {0}")]
    InvalidApplicationId(String),

    /// An encoded message did not fit into a send queue slot.
    #[error("message exceeds slot capacity of {capacity} bytes")]
    MessageTooLarge {
        /// Capacity of a single send queue slot in bytes.
        capacity: usize,
    },

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The transport reported a failure.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// An I/O error occurred, e.g. while spawning the I/O thread.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for rich presence client operations.
pub type Result<T> = std::result::Result<T, RpcError>;

/// A transport failure, carrying the code and message that end up in the
/// `disconnected` callback.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transport error {code}: {message}")]
pub struct TransportError {
    /// Numeric close or error code. See [`ErrorCode`] for the known values.
    pub code: i32,
    /// Human-readable reason.
    pub message: String,
}

impl TransportError {
    /// Create a transport error with an arbitrary code.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// The channel to the peer is gone.
    pub fn pipe_closed() -> Self {
        Self::new(ErrorCode::PipeClosed.code(), "Pipe closed")
    }

    /// The byte stream from the peer could not be framed or parsed.
    pub fn read_corrupt(detail: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::ReadCorrupt.code(), format!("Read corrupt: {detail}"))
    }

    /// Returns the known [`ErrorCode`] for this error, if any.
    pub fn error_code(&self) -> Option<ErrorCode> {
        ErrorCode::from_code(self.code)
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::UnexpectedEof => Self::pipe_closed(),
            _ => Self::new(ErrorCode::PipeClosed.code(), err.to_string()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_to_pipe_closed() {
        let err = TransportError::from(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
        assert_eq!(err, TransportError::pipe_closed());
        assert_eq!(err.error_code(), Some(ErrorCode::PipeClosed));
    }

    #[test]
    fn read_corrupt_carries_detail() {
        let err = TransportError::read_corrupt("frame too large");
        assert_eq!(err.code, 2);
        assert!(err.message.contains("frame too large"));
    }

    #[test]
    fn rpc_error_display() {
        let err = RpcError::MessageTooLarge { capacity: 16 };
        assert_eq!(err.to_string(), "message exceeds slot capacity of 16 bytes");

        let err = RpcError::from(TransportError::new(4000, "Invalid client ID"));
        assert_eq!(err.to_string(), "transport error 4000: Invalid client ID");
    }
}
