#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Shared test utilities for rich presence client integration tests.
//!
//! Provides a scripted [`ScriptedTransport`] and helper functions for
//! constructing the peer's inbound JSON frames.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use rich_presence_client::{OpenStatus, Transport, TransportError};

// ── ScriptedTransport ───────────────────────────────────────────────

/// State shared between a [`ScriptedTransport`] and the test body.
#[derive(Debug, Default)]
pub struct Wire {
    /// Results handed out by successive `open` calls; empty means `Connected`.
    pub opens: VecDeque<Result<OpenStatus, TransportError>>,
    /// Inbound frames (or errors) returned by `read`, in order.
    pub inbound: VecDeque<Result<Vec<u8>, TransportError>>,
    /// Every payload written by the client, decoded as JSON.
    pub sent: Vec<serde_json::Value>,
    pub open: bool,
    pub open_calls: usize,
    pub close_calls: usize,
}

impl Wire {
    /// Queue an inbound JSON frame.
    pub fn push(&mut self, frame: serde_json::Value) {
        self.inbound.push_back(Ok(serde_json::to_vec(&frame).unwrap()));
    }

    /// Make the next `read` fail as if the peer hung up.
    pub fn hang_up(&mut self, code: i32, message: &str) {
        self.inbound.push_back(Err(TransportError::new(code, message)));
    }

    /// `(cmd, evt)` of every sent message.
    pub fn commands(&self) -> Vec<(String, String)> {
        self.sent
            .iter()
            .map(|v| {
                (
                    v["cmd"].as_str().unwrap_or_default().to_owned(),
                    v["evt"].as_str().unwrap_or_default().to_owned(),
                )
            })
            .collect()
    }
}

pub type SharedWire = Arc<StdMutex<Wire>>;

/// A transport whose peer is scripted through a [`SharedWire`].
pub struct ScriptedTransport {
    wire: SharedWire,
    current: Vec<u8>,
}

impl ScriptedTransport {
    /// Create a transport plus the handle used to script and inspect it.
    pub fn new() -> (Self, SharedWire) {
        let wire = Arc::new(StdMutex::new(Wire::default()));
        let transport = Self {
            wire: Arc::clone(&wire),
            current: Vec::new(),
        };
        (transport, wire)
    }
}

impl Transport for ScriptedTransport {
    fn open(&mut self) -> Result<OpenStatus, TransportError> {
        let mut wire = self.wire.lock().unwrap();
        wire.open_calls += 1;
        let result = wire.opens.pop_front().unwrap_or(Ok(OpenStatus::Connected));
        wire.open = matches!(result, Ok(OpenStatus::Connected));
        result
    }

    fn close(&mut self) {
        let mut wire = self.wire.lock().unwrap();
        wire.open = false;
        wire.close_calls += 1;
    }

    fn is_open(&self) -> bool {
        self.wire.lock().unwrap().open
    }

    fn read(&mut self) -> Result<Option<&[u8]>, TransportError> {
        let next = self.wire.lock().unwrap().inbound.pop_front();
        match next {
            Some(Ok(frame)) => {
                self.current = frame;
                Ok(Some(&self.current))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        let value = serde_json::from_slice(payload).expect("client wrote invalid JSON");
        self.wire.lock().unwrap().sent.push(value);
        Ok(())
    }
}

// ── JSON helper functions ───────────────────────────────────────────

/// A `JOIN_GAME` dispatch carrying `secret`.
pub fn join_game_json(secret: &str) -> serde_json::Value {
    serde_json::json!({"cmd": "DISPATCH", "evt": "JOIN_GAME", "data": {"secret": secret}})
}

/// A `SPECTATE_GAME` dispatch carrying `secret`.
pub fn spectate_game_json(secret: &str) -> serde_json::Value {
    serde_json::json!({"cmd": "DISPATCH", "evt": "SPECTATE_GAME", "data": {"secret": secret}})
}

/// A `PRESENCE_REQUESTED` dispatch.
pub fn presence_requested_json() -> serde_json::Value {
    serde_json::json!({"cmd": "DISPATCH", "evt": "PRESENCE_REQUESTED", "data": {"user": {"id": "53908232506183680"}}})
}

/// An error response to the request with `nonce`.
pub fn error_response_json(nonce: u64, code: i32, message: &str) -> serde_json::Value {
    serde_json::json!({
        "cmd": "SET_ACTIVITY",
        "evt": "ERROR",
        "nonce": nonce.to_string(),
        "data": {"code": code, "message": message}
    })
}

/// A successful response to the request with `nonce`.
pub fn ack_json(cmd: &str, nonce: u64) -> serde_json::Value {
    serde_json::json!({"cmd": cmd, "nonce": nonce.to_string(), "data": {}})
}

/// `(cmd, evt)` pair as returned by [`Wire::commands`].
pub fn command(cmd: &str, evt: &str) -> (String, String) {
    (cmd.to_owned(), evt.to_owned())
}
