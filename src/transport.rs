//! Transport abstraction between the client and the presence peer.
//!
//! The [`Transport`] trait is a framed, non-blocking message channel. The
//! connection supervisor calls it from a single thread on every tick, so no
//! method may block: "nothing to do right now" is reported as `Ok(None)` or
//! [`OpenStatus::Pending`], never by waiting.
//!
//! Peer discovery, framing and the handshake are transport concerns. The
//! supervisor only sees complete JSON payloads.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use rich_presence_client::error::TransportError;
//! use rich_presence_client::transport::{OpenStatus, Transport};
//!
//! struct MyTransport { /* ... */ }
//!
//! impl Transport for MyTransport {
//!     fn open(&mut self) -> Result<OpenStatus, TransportError> {
//!         // Connect and handshake, returning `Pending` while waiting on the peer.
//!         Ok(OpenStatus::Pending)
//!     }
//!
//!     fn close(&mut self) {
//!         // Release the channel. Must be idempotent.
//!     }
//!
//!     fn is_open(&self) -> bool {
//!         false
//!     }
//!
//!     fn read(&mut self) -> Result<Option<&[u8]>, TransportError> {
//!         // Return one complete payload if one is buffered.
//!         Ok(None)
//!     }
//!
//!     fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
//!         // Frame and send `payload`.
//!         Ok(())
//!     }
//! }
//! ```

use crate::error::TransportError;

/// Progress reported by [`Transport::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenStatus {
    /// The channel is open and the handshake completed.
    Connected,
    /// The attempt is underway; call `open` again later to continue it.
    Pending,
}

/// A framed, non-blocking message channel to the presence peer.
///
/// # Object Safety
///
/// This trait is object-safe; the client stores it as `Box<dyn Transport>`.
pub trait Transport: Send + 'static {
    /// Open the channel, or continue a pending open/handshake.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the attempt failed. The client
    /// schedules a retry with backoff.
    fn open(&mut self) -> Result<OpenStatus, TransportError>;

    /// Close the channel and release its resources. Calling `close` on a
    /// closed transport does nothing.
    fn close(&mut self);

    /// Returns `true` while the channel is open and handshaken.
    fn is_open(&self) -> bool;

    /// Return the next complete inbound payload, or `None` if none is
    /// buffered. The slice is valid until the next call.
    ///
    /// # Errors
    ///
    /// Returns the peer's close code/message or a local I/O failure. The
    /// connection is considered lost.
    fn read(&mut self) -> Result<Option<&[u8]>, TransportError>;

    /// Send one complete payload.
    ///
    /// # Errors
    ///
    /// Any failure is treated as connection loss.
    fn write(&mut self, payload: &[u8]) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn open(&mut self) -> Result<OpenStatus, TransportError> {
        (**self).open()
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    fn read(&mut self) -> Result<Option<&[u8]>, TransportError> {
        (**self).read()
    }

    fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        (**self).write(payload)
    }
}
