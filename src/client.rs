//! Embedder-facing rich presence client.
//!
//! [`RpcClient`] owns the connection supervisor, either on a background I/O
//! thread ([`IoMode::Thread`]) or inline for manual polling
//! ([`IoMode::Manual`]). Outbound requests never block: they are encoded into
//! a pre-allocated send queue slot and return `false` when the queue is full.
//! Inbound events are parked in a mailbox until the embedder calls
//! [`RpcClient::run_callbacks`], which runs the registered
//! [`EventHandlers`] on the calling thread.
//!
//! # Example
//!
//! ```rust,no_run
//! use rich_presence_client::{EventHandlers, RichPresence, RpcClient, RpcConfig};
//!
//! # fn main() -> rich_presence_client::Result<()> {
//! let handlers = EventHandlers::new()
//!     .on_ready(|| println!("connected"))
//!     .on_join_game(|secret| println!("join requested: {secret}"));
//! let mut client = RpcClient::connect(RpcConfig::new("345229890980937739"), handlers)?;
//!
//! client.update_presence(&RichPresence::new().with_state("In Menu"));
//!
//! loop {
//!     // ... game frame ...
//!     client.run_callbacks();
//! #   break;
//! }
//!
//! client.shutdown();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::backoff::{Backoff, DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY};
use crate::error::{Result, RpcError};
use crate::handlers::{self, EventHandlers};
#[cfg(feature = "io-thread")]
use crate::io_loop::IoLoop;
use crate::protocol::{RichPresence, Subscription, Subscriptions};
use crate::send_queue::{DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_QUEUE_SLOTS};
use crate::shared::Shared;
use crate::supervisor::ConnectionSupervisor;
use crate::transport::Transport;

/// Default upper bound on the I/O thread's sleep between ticks.
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_millis(500);

/// Longest application id the peer accepts, in bytes.
pub const MAX_APPLICATION_ID_LEN: usize = 64;

/// Smallest accepted send queue slot size.
const MIN_MESSAGE_SIZE: usize = 256;

// ── Configuration ───────────────────────────────────────────────────

/// Who drives the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// A dedicated background thread ticks the connection.
    #[cfg(feature = "io-thread")]
    Thread,
    /// The embedder calls [`RpcClient::update_connection`] at its own cadence.
    Manual,
}

impl Default for IoMode {
    #[cfg(feature = "io-thread")]
    fn default() -> Self {
        Self::Thread
    }

    #[cfg(not(feature = "io-thread"))]
    fn default() -> Self {
        Self::Manual
    }
}

/// Configuration for an [`RpcClient`].
///
/// Only the application id is required.
///
/// # Example
///
/// ```
/// use rich_presence_client::RpcConfig;
/// use std::time::Duration;
///
/// let config = RpcConfig::new("345229890980937739")
///     .with_queue_slots(16)
///     .with_reconnect_delays(Duration::from_secs(1), Duration::from_secs(30));
/// assert_eq!(config.queue_slots, 16);
/// assert_eq!(config.max_message_size, 16 * 1024);
/// ```
#[derive(Debug, Clone)]
pub struct RpcConfig {
    /// Application id sent to the peer during the handshake.
    pub application_id: String,
    pub io_mode: IoMode,
    /// Upper bound on the sleep between I/O ticks. Defaults to **500 ms**.
    pub max_wait: Duration,
    /// First reconnect delay. Defaults to **500 ms**.
    pub reconnect_base_delay: Duration,
    /// Cap on the reconnect delay. Defaults to **60 s**.
    pub reconnect_max_delay: Duration,
    /// Number of send queue slots. Defaults to **8**, clamped to at least 1.
    pub queue_slots: usize,
    /// Capacity of one send queue slot in bytes. Defaults to **16 KiB**,
    /// clamped to at least 256.
    pub max_message_size: usize,
    /// Process id reported with presence updates. Defaults to the current
    /// process.
    pub process_id: u32,
}

impl RpcConfig {
    /// Create a configuration with the given application id and defaults.
    pub fn new(application_id: impl Into<String>) -> Self {
        Self {
            application_id: application_id.into(),
            io_mode: IoMode::default(),
            max_wait: DEFAULT_MAX_WAIT,
            reconnect_base_delay: DEFAULT_BASE_DELAY,
            reconnect_max_delay: DEFAULT_MAX_DELAY,
            queue_slots: DEFAULT_QUEUE_SLOTS,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            process_id: std::process::id(),
        }
    }

    #[must_use]
    pub fn with_io_mode(mut self, io_mode: IoMode) -> Self {
        self.io_mode = io_mode;
        self
    }

    #[must_use]
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Set the first and the largest reconnect delay.
    #[must_use]
    pub fn with_reconnect_delays(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base_delay = base;
        self.reconnect_max_delay = max;
        self
    }

    /// Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_queue_slots(mut self, slots: usize) -> Self {
        self.queue_slots = slots.max(1);
        self
    }

    /// Values below 256 are clamped to 256.
    #[must_use]
    pub fn with_max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes.max(MIN_MESSAGE_SIZE);
        self
    }

    #[must_use]
    pub fn with_process_id(mut self, pid: u32) -> Self {
        self.process_id = pid;
        self
    }

    fn validate(&self) -> Result<()> {
        if self.application_id.is_empty() {
            return Err(RpcError::InvalidApplicationId(
                "application id must not be empty".into(),
            ));
        }
        if self.application_id.len() > MAX_APPLICATION_ID_LEN {
            return Err(RpcError::InvalidApplicationId(format!(
                "application id is {} bytes, at most {MAX_APPLICATION_ID_LEN} allowed",
                self.application_id.len()
            )));
        }
        Ok(())
    }
}

// ── Client ──────────────────────────────────────────────────────────

enum Driver {
    #[cfg(feature = "io-thread")]
    Thread(IoLoop),
    Manual(Box<ConnectionSupervisor>),
    Stopped,
}

/// A rich presence session with the local peer.
///
/// Created with [`RpcClient::start`] (any [`Transport`]) or
/// [`RpcClient::connect`] (the default IPC transport). Dropping the client
/// shuts it down.
pub struct RpcClient {
    shared: Arc<Shared>,
    handlers: EventHandlers,
    driver: Driver,
}

impl RpcClient {
    /// Start a session over `transport`.
    ///
    /// The transport is opened on the first tick, which happens immediately
    /// in thread mode and on the first [`update_connection`](Self::update_connection)
    /// call in manual mode.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidApplicationId`] for an empty or oversized
    /// application id, and [`RpcError::Io`] if the I/O thread or its runtime
    /// cannot be created.
    pub fn start(
        transport: impl Transport,
        config: RpcConfig,
        handlers: EventHandlers,
    ) -> Result<Self> {
        config.validate()?;
        info!(
            application_id = %config.application_id,
            io_mode = ?config.io_mode,
            "starting rich presence client"
        );

        let shared = Arc::new(Shared::new(
            config.queue_slots,
            config.max_message_size.max(MIN_MESSAGE_SIZE),
            config.process_id,
        ));
        shared.swap_subscriptions(handlers.subscriptions());

        let supervisor = ConnectionSupervisor::new(
            Box::new(transport),
            Arc::clone(&shared),
            Backoff::new(config.reconnect_base_delay, config.reconnect_max_delay),
            Instant::now(),
        );
        let driver = match config.io_mode {
            #[cfg(feature = "io-thread")]
            IoMode::Thread => {
                Driver::Thread(IoLoop::spawn(supervisor, Arc::clone(&shared), config.max_wait)?)
            }
            IoMode::Manual => Driver::Manual(Box::new(supervisor)),
        };

        Ok(Self {
            shared,
            handlers,
            driver,
        })
    }

    /// Start a session over the default IPC transport.
    ///
    /// # Errors
    ///
    /// See [`RpcClient::start`].
    #[cfg(all(unix, feature = "transport-ipc"))]
    pub fn connect(config: RpcConfig, handlers: EventHandlers) -> Result<Self> {
        let transport = crate::transports::IpcTransport::new(config.application_id.clone());
        Self::start(transport, config, handlers)
    }

    // ── Outbound ────────────────────────────────────────────────────

    /// Queue a presence update. Returns `false` if it was not accepted.
    pub fn update_presence(&self, presence: &RichPresence) -> bool {
        self.shared.set_activity(Some(presence))
    }

    /// Queue a request to clear the presence.
    pub fn clear_presence(&self) -> bool {
        self.shared.set_activity(None)
    }

    /// Queue a subscription to `kind` on the current connection.
    ///
    /// Kinds with a registered handler are already subscribed on every
    /// connect, so nothing is queued for them and this returns `true`.
    pub fn register_for_event(&self, kind: Subscription) -> bool {
        self.shared.register_for_event(kind)
    }

    /// A cloneable handle for queueing requests from other threads.
    pub fn presence_handle(&self) -> PresenceHandle {
        PresenceHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    // ── Handlers ────────────────────────────────────────────────────

    /// Replace the handler registry.
    ///
    /// While connected, newly handled events are subscribed and events that
    /// lost their handler are unsubscribed.
    pub fn update_handlers(&mut self, handlers: EventHandlers) {
        if self.shared.is_closed() {
            debug!("client shut down, ignoring handler update");
            return;
        }
        let next = handlers.subscriptions();
        self.handlers = handlers;
        let previous = self.shared.swap_subscriptions(next);

        if self.shared.is_connected() {
            for kind in next.difference(previous).iter() {
                if !self.shared.subscribe(kind) {
                    warn!(event = kind.as_str(), "could not queue subscription");
                }
            }
            for kind in previous.difference(next).iter() {
                if !self.shared.unsubscribe(kind) {
                    warn!(event = kind.as_str(), "could not queue unsubscription");
                }
            }
        }
    }

    /// Run the handler of every pending event on the calling thread.
    pub fn run_callbacks(&mut self) {
        handlers::run_callbacks(&self.shared.mailbox, &mut self.handlers);
    }

    // ── Connection ──────────────────────────────────────────────────

    /// Tick the connection in manual mode. In thread mode this wakes the I/O
    /// thread instead.
    pub fn update_connection(&mut self) {
        match &mut self.driver {
            #[cfg(feature = "io-thread")]
            Driver::Thread(io) => io.wake(),
            Driver::Manual(supervisor) => supervisor.tick(Instant::now()),
            Driver::Stopped => {}
        }
    }

    /// Returns `true` while the peer connection is up.
    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Stop the session and close the transport. Calling it again does
    /// nothing.
    ///
    /// Handlers are dropped first, so none runs once shutdown has begun.
    pub fn shutdown(&mut self) {
        if matches!(self.driver, Driver::Stopped) {
            return;
        }
        debug!("RpcClient: shutdown requested");

        self.handlers = EventHandlers::default();
        self.shared.swap_subscriptions(Subscriptions::NONE);
        self.shared.close();

        let supervisor = match std::mem::replace(&mut self.driver, Driver::Stopped) {
            #[cfg(feature = "io-thread")]
            Driver::Thread(io) => io.stop(),
            Driver::Manual(supervisor) => Some(*supervisor),
            Driver::Stopped => None,
        };
        if let Some(mut supervisor) = supervisor {
            supervisor.close();
        }
        info!("rich presence client shut down");
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let driver = match &self.driver {
            #[cfg(feature = "io-thread")]
            Driver::Thread(_) => "thread",
            Driver::Manual(_) => "manual",
            Driver::Stopped => "stopped",
        };
        f.debug_struct("RpcClient")
            .field("connected", &self.is_connected())
            .field("driver", &driver)
            .field("handlers", &self.handlers)
            .finish()
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ── Presence handle ─────────────────────────────────────────────────

/// A `Send + Sync` producer handle sharing the client's send queue.
///
/// Requests made after the client shut down are refused.
#[derive(Debug, Clone)]
pub struct PresenceHandle {
    shared: Arc<Shared>,
}

impl PresenceHandle {
    /// See [`RpcClient::update_presence`].
    pub fn update_presence(&self, presence: &RichPresence) -> bool {
        self.shared.set_activity(Some(presence))
    }

    pub fn clear_presence(&self) -> bool {
        self.shared.set_activity(None)
    }

    /// See [`RpcClient::register_for_event`].
    pub fn register_for_event(&self, kind: Subscription) -> bool {
        self.shared.register_for_event(kind)
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::transport::OpenStatus;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    // ── Mock transport ──────────────────────────────────────────────

    #[derive(Default)]
    struct Wire {
        inbound: VecDeque<Vec<u8>>,
        written: Vec<serde_json::Value>,
        open: bool,
        closes: usize,
    }

    struct MockTransport {
        wire: Arc<StdMutex<Wire>>,
        current: Vec<u8>,
    }

    impl MockTransport {
        fn new() -> (Self, Arc<StdMutex<Wire>>) {
            let wire = Arc::new(StdMutex::new(Wire::default()));
            let transport = Self {
                wire: Arc::clone(&wire),
                current: Vec::new(),
            };
            (transport, wire)
        }
    }

    impl Transport for MockTransport {
        fn open(&mut self) -> std::result::Result<OpenStatus, TransportError> {
            self.wire.lock().unwrap().open = true;
            Ok(OpenStatus::Connected)
        }

        fn close(&mut self) {
            let mut wire = self.wire.lock().unwrap();
            wire.open = false;
            wire.closes += 1;
        }

        fn is_open(&self) -> bool {
            self.wire.lock().unwrap().open
        }

        fn read(&mut self) -> std::result::Result<Option<&[u8]>, TransportError> {
            let next = self.wire.lock().unwrap().inbound.pop_front();
            match next {
                Some(bytes) => {
                    self.current = bytes;
                    Ok(Some(&self.current))
                }
                None => Ok(None),
            }
        }

        fn write(&mut self, payload: &[u8]) -> std::result::Result<(), TransportError> {
            let value = serde_json::from_slice(payload).unwrap();
            self.wire.lock().unwrap().written.push(value);
            Ok(())
        }
    }

    fn manual_config() -> RpcConfig {
        RpcConfig::new("345229890980937739").with_io_mode(IoMode::Manual)
    }

    fn commands(wire: &Arc<StdMutex<Wire>>) -> Vec<(String, String)> {
        wire.lock()
            .unwrap()
            .written
            .iter()
            .map(|v| {
                (
                    v["cmd"].as_str().unwrap_or_default().to_owned(),
                    v["evt"].as_str().unwrap_or_default().to_owned(),
                )
            })
            .collect()
    }

    fn pair(cmd: &str, evt: &str) -> (String, String) {
        (cmd.to_owned(), evt.to_owned())
    }

    // ── Configuration ───────────────────────────────────────────────

    #[test]
    fn config_defaults() {
        let config = RpcConfig::new("app");
        assert_eq!(config.max_wait, Duration::from_millis(500));
        assert_eq!(config.reconnect_base_delay, Duration::from_millis(500));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(60));
        assert_eq!(config.queue_slots, 8);
        assert_eq!(config.max_message_size, 16 * 1024);
        assert_eq!(config.process_id, std::process::id());
        assert_eq!(config.io_mode, IoMode::default());
    }

    #[test]
    fn config_clamps_sizes() {
        let config = RpcConfig::new("app")
            .with_queue_slots(0)
            .with_max_message_size(10);
        assert_eq!(config.queue_slots, 1);
        assert_eq!(config.max_message_size, 256);
    }

    #[test]
    fn empty_application_id_is_rejected() {
        let (transport, _) = MockTransport::new();
        let err = RpcClient::start(
            transport,
            RpcConfig::new("").with_io_mode(IoMode::Manual),
            EventHandlers::new(),
        )
        .unwrap_err();
        assert!(matches!(err, RpcError::InvalidApplicationId(_)));
    }

    #[test]
    fn oversized_application_id_is_rejected() {
        let (transport, _) = MockTransport::new();
        let config = RpcConfig::new("9".repeat(MAX_APPLICATION_ID_LEN + 1))
            .with_io_mode(IoMode::Manual);
        let err = RpcClient::start(transport, config, EventHandlers::new()).unwrap_err();
        assert!(matches!(err, RpcError::InvalidApplicationId(_)));
    }

    // ── Manual mode ─────────────────────────────────────────────────

    #[test]
    fn manual_mode_does_nothing_until_polled() {
        let (transport, wire) = MockTransport::new();
        let mut client =
            RpcClient::start(transport, manual_config(), EventHandlers::new()).unwrap();
        assert!(!client.is_connected());
        assert!(!wire.lock().unwrap().open);

        client.update_connection();
        assert!(client.is_connected());
    }

    #[test]
    fn update_handlers_diffs_subscriptions_while_connected() {
        let (transport, wire) = MockTransport::new();
        let handlers = EventHandlers::new().on_join_game(|_| {});
        let mut client = RpcClient::start(transport, manual_config(), handlers).unwrap();
        client.update_connection();
        client.update_connection();
        assert_eq!(commands(&wire), [pair("SUBSCRIBE", "JOIN_GAME")]);

        client.update_handlers(EventHandlers::new().on_spectate_game(|_| {}));
        client.update_connection();

        assert_eq!(
            commands(&wire),
            [
                pair("SUBSCRIBE", "JOIN_GAME"),
                pair("SUBSCRIBE", "SPECTATE_GAME"),
                pair("UNSUBSCRIBE", "JOIN_GAME"),
            ]
        );
    }

    #[test]
    fn update_handlers_while_disconnected_only_changes_the_mask() {
        let (transport, wire) = MockTransport::new();
        let mut client =
            RpcClient::start(transport, manual_config(), EventHandlers::new()).unwrap();
        client.update_handlers(EventHandlers::new().on_presence_requested(|| {}));
        assert_eq!(client.shared.queue.pending(), 0);

        client.update_connection();
        client.update_connection();
        assert_eq!(
            commands(&wire),
            [pair("SUBSCRIBE", "PRESENCE_REQUESTED")]
        );
    }

    #[test]
    fn clear_presence_sends_null_activity() {
        let (transport, wire) = MockTransport::new();
        let mut client = RpcClient::start(
            transport,
            manual_config().with_process_id(77),
            EventHandlers::new(),
        )
        .unwrap();
        assert!(client.clear_presence());
        client.update_connection();
        client.update_connection();

        let wire = wire.lock().unwrap();
        let written = &wire.written;
        assert_eq!(written.len(), 1);
        assert_eq!(written[0]["cmd"], "SET_ACTIVITY");
        assert_eq!(written[0]["args"]["pid"], 77);
        assert!(written[0]["args"].get("activity").is_none_or(|a| a.is_null()));
    }

    #[test]
    fn presence_handle_shares_the_queue() {
        let (transport, _) = MockTransport::new();
        let client = RpcClient::start(transport, manual_config(), EventHandlers::new()).unwrap();
        let handle = client.presence_handle();

        let producer = std::thread::spawn(move || handle.register_for_event(Subscription::JoinGame));
        assert!(producer.join().unwrap());
        assert_eq!(client.shared.queue.pending(), 1);
    }

    #[test]
    fn shutdown_closes_transport_once_and_silences_handlers() {
        let (transport, wire) = MockTransport::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handlers = EventHandlers::new().on_ready(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let mut client = RpcClient::start(transport, manual_config(), handlers).unwrap();
        client.update_connection();
        let handle = client.presence_handle();

        client.shutdown();
        client.shutdown();
        client.run_callbacks();

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(wire.lock().unwrap().closes, 1);
        assert!(!client.is_connected());
        assert!(!handle.update_presence(&RichPresence::new()));
        drop(client);
        assert_eq!(wire.lock().unwrap().closes, 1);
    }

    #[test]
    fn debug_reports_driver() {
        let (transport, _) = MockTransport::new();
        let mut client =
            RpcClient::start(transport, manual_config(), EventHandlers::new()).unwrap();
        assert!(format!("{client:?}").contains("manual"));
        client.shutdown();
        assert!(format!("{client:?}").contains("stopped"));
    }

    // ── Thread mode ─────────────────────────────────────────────────

    #[cfg(feature = "io-thread")]
    #[test]
    fn thread_mode_connects_and_flushes() {
        let (transport, wire) = MockTransport::new();
        let mut client = RpcClient::start(
            transport,
            RpcConfig::new("345229890980937739").with_max_wait(Duration::from_millis(20)),
            EventHandlers::new(),
        )
        .unwrap();
        assert!(client.update_presence(&RichPresence::new().with_state("Playing")));

        let deadline = Instant::now() + Duration::from_secs(5);
        while wire.lock().unwrap().written.is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(client.is_connected());
        assert_eq!(
            wire.lock().unwrap().written[0]["args"]["activity"]["state"],
            "Playing"
        );

        client.shutdown();
        assert_eq!(wire.lock().unwrap().closes, 1);
    }
}
