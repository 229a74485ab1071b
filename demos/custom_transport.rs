//! # Custom Transport Example
//!
//! Shows how to implement the [`Transport`] trait with a simple in-process
//! loopback channel and drive the client in manual I/O mode. This is useful for:
//!
//! - **Testing**: exercise your game's presence logic without a running peer
//! - **Custom backends**: adapt any framed channel (named pipes, TCP, a test harness)
//!
//! ## Running
//!
//! ```sh
//! cargo run --example custom_transport
//! ```

use rich_presence_client::{
    EventHandlers, IoMode, OpenStatus, RichPresence, RpcClient, RpcConfig, Transport,
    TransportError,
};
use tokio::sync::mpsc::{self, error::TryRecvError};

// ─────────────────────────────────────────────────────────────────────
// Step 1: Define a channel-based "loopback" transport
// ─────────────────────────────────────────────────────────────────────

/// A loopback transport that shuttles payloads through in-process channels.
///
/// - The **client half** (`LoopbackTransport`) implements [`Transport`] and is
///   handed to `RpcClient::start`.
/// - The **peer half** (`LoopbackPeer`) reads what the client wrote and
///   injects events as if they came from the chat client.
pub struct LoopbackTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: mpsc::UnboundedReceiver<Vec<u8>>,
    /// The last payload handed out by `read`.
    current: Vec<u8>,
    open: bool,
}

/// The "peer side" of the loopback.
pub struct LoopbackPeer {
    pub rx: mpsc::UnboundedReceiver<Vec<u8>>,
    pub tx: mpsc::UnboundedSender<Vec<u8>>,
}

/// Create a connected `(transport, peer)` pair.
fn loopback_pair() -> (LoopbackTransport, LoopbackPeer) {
    // Client → Peer
    let (client_tx, peer_rx) = mpsc::unbounded_channel();
    // Peer → Client
    let (peer_tx, client_rx) = mpsc::unbounded_channel();

    let transport = LoopbackTransport {
        tx: client_tx,
        rx: client_rx,
        current: Vec::new(),
        open: false,
    };
    let peer = LoopbackPeer {
        rx: peer_rx,
        tx: peer_tx,
    };
    (transport, peer)
}

// ─────────────────────────────────────────────────────────────────────
// Step 2: Implement the Transport trait
// ─────────────────────────────────────────────────────────────────────

impl Transport for LoopbackTransport {
    /// Channels need no handshake, so the first attempt succeeds.
    fn open(&mut self) -> Result<OpenStatus, TransportError> {
        if self.tx.is_closed() {
            return Err(TransportError::pipe_closed());
        }
        self.open = true;
        Ok(OpenStatus::Connected)
    }

    fn close(&mut self) {
        self.open = false;
    }

    fn is_open(&self) -> bool {
        self.open
    }

    /// Never waits: an empty channel is reported as `Ok(None)`.
    fn read(&mut self) -> Result<Option<&[u8]>, TransportError> {
        match self.rx.try_recv() {
            Ok(payload) => {
                self.current = payload;
                Ok(Some(&self.current))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(TransportError::pipe_closed()),
        }
    }

    fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
        self.tx
            .send(payload.to_vec())
            .map_err(|_| TransportError::pipe_closed())
    }
}

// ─────────────────────────────────────────────────────────────────────
// Step 3: Wire together the client and the fake peer
// ─────────────────────────────────────────────────────────────────────

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for readable output.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let (transport, mut peer) = loopback_pair();

    // Manual mode: this thread ticks the connection itself.
    let config = RpcConfig::new("345229890980937739").with_io_mode(IoMode::Manual);
    let handlers = EventHandlers::new()
        .on_ready(|| tracing::info!("Event: Ready"))
        .on_join_game(|secret| tracing::info!("Event: JoinGame secret={secret}"))
        .on_errored(|code, message| tracing::warn!("Event: Errored {code} {message}"));
    let mut client = RpcClient::start(transport, config, handlers)?;

    // The first tick opens the transport and queues the JOIN_GAME subscription.
    client.update_presence(
        &RichPresence::new()
            .with_state("Looking to play")
            .with_details("Loopback demo")
            .with_party("demo-party", 1, 4)
            .with_join_secret("demo-join-secret"),
    );
    client.update_connection();
    client.run_callbacks();

    // ── Fake peer: inspect what the client wrote ────────────────────
    while let Ok(payload) = peer.rx.try_recv() {
        let value: serde_json::Value = serde_json::from_slice(&payload)?;
        tracing::info!("Peer received: {value}");
    }

    // Someone clicked "Ask to Join" on the chat client.
    let join = serde_json::json!({
        "cmd": "DISPATCH",
        "evt": "JOIN_GAME",
        "data": {"secret": "demo-join-secret"}
    });
    peer.tx.send(serde_json::to_vec(&join)?)?;

    client.update_connection();
    client.run_callbacks();

    // ── Clean shutdown ──────────────────────────────────────────────
    client.shutdown();
    tracing::info!("Done. Custom transport works!");
    Ok(())
}
