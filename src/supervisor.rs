//! Connection lifecycle: reconnect with backoff, inbound routing and
//! outbound draining.
//!
//! [`ConnectionSupervisor::tick`] is the unit of work driven by the I/O loop
//! (or by the embedder in manual-poll mode). One tick either checks whether
//! it is time to (re)connect, or, while connected, drains every readable
//! message into the mailbox and then flushes the send queue. Reads always
//! happen before writes.
//!
//! ```text
//!                 now >= next_connect_at
//!   Disconnected ───────────────────────► open() ──Ok(Connected)──► Connected
//!        ▲  ▲                               │                          │
//!        │  │                        Ok(Pending)                       │ read/write error,
//!        │  │                               ▼                          │ transport not open
//!        │  └──────────Err──────────── Connecting ◄─┐                  │
//!        │                                  │ now >= next_connect_at   │
//!        │                                  └────────┘                 │
//!        └─────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::backoff::Backoff;
use crate::error::TransportError;
use crate::mailbox::{Mailbox, MailboxEvent};
use crate::protocol::{InboundEvent, InboundMessage, Skipped};
use crate::shared::Shared;
use crate::transport::{OpenStatus, Transport};

/// Retry horizon used once `now + delay` no longer fits in an [`Instant`].
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

/// Lifecycle state of the connection to the peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    /// `open` was called and the handshake is still pending.
    Connecting,
    Connected,
}

/// Owns the transport and runs the reconnect state machine.
pub struct ConnectionSupervisor {
    transport: Box<dyn Transport>,
    shared: Arc<Shared>,
    backoff: Backoff,
    state: ConnectionState,
    next_connect_at: Instant,
}

impl ConnectionSupervisor {
    /// Create a supervisor whose first tick at or after `now` opens the
    /// transport.
    pub(crate) fn new(
        transport: Box<dyn Transport>,
        shared: Arc<Shared>,
        backoff: Backoff,
        now: Instant,
    ) -> Self {
        Self {
            transport,
            shared,
            backoff,
            state: ConnectionState::Disconnected,
            next_connect_at: now,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Earliest time of the next open attempt.
    pub fn next_connect_at(&self) -> Instant {
        self.next_connect_at
    }

    /// Run one iteration of connection work.
    pub fn tick(&mut self, now: Instant) {
        match self.state {
            ConnectionState::Connected => self.service_connection(now),
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                if now >= self.next_connect_at {
                    self.attempt_open(now);
                }
            }
        }
    }

    /// Tear the transport down without publishing any event.
    pub fn close(&mut self) {
        debug!(state = ?self.state, "closing transport");
        self.transport.close();
        self.state = ConnectionState::Disconnected;
        self.shared.set_connected(false);
    }

    fn attempt_open(&mut self, now: Instant) {
        // Schedule first so that a failed attempt is never retried instantly.
        self.schedule_reconnect(now);
        match self.transport.open() {
            Ok(OpenStatus::Connected) => self.enter_connected(),
            Ok(OpenStatus::Pending) => {
                if self.state != ConnectionState::Connecting {
                    debug!("transport opened, handshake pending");
                }
                self.state = ConnectionState::Connecting;
            }
            Err(e) if self.state == ConnectionState::Connecting => {
                self.enter_disconnected(now, &e);
            }
            Err(e) => {
                debug!(code = e.code, "connection attempt failed: {}", e.message);
            }
        }
    }

    fn enter_connected(&mut self) {
        info!("connected to presence peer");
        self.backoff.reset();
        self.state = ConnectionState::Connected;
        self.shared.set_connected(true);
        self.shared.mailbox.publish(MailboxEvent::Connected);

        for kind in self.shared.subscriptions().iter() {
            if !self.shared.subscribe(kind) {
                warn!(event = kind.as_str(), "could not queue subscription");
            }
        }
    }

    fn enter_disconnected(&mut self, now: Instant, err: &TransportError) {
        warn!(code = err.code, "connection to presence peer lost: {}", err.message);
        self.transport.close();
        self.state = ConnectionState::Disconnected;
        self.shared.set_connected(false);
        self.shared.mailbox.publish(MailboxEvent::Disconnected {
            code: err.code,
            message: &err.message,
        });
        self.schedule_reconnect(now);
    }

    fn schedule_reconnect(&mut self, now: Instant) {
        let delay = self.backoff.next_delay();
        // An uncapped backoff can outgrow the clock's range.
        self.next_connect_at = now
            .checked_add(delay)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        trace!(?delay, "next connection attempt scheduled");
    }

    fn service_connection(&mut self, now: Instant) {
        if !self.transport.is_open() {
            self.enter_disconnected(now, &TransportError::pipe_closed());
            return;
        }

        let read_failure = loop {
            match self.transport.read() {
                Ok(Some(payload)) => route_inbound(&self.shared.mailbox, payload),
                Ok(None) => break None,
                Err(e) => break Some(e),
            }
        };
        if let Some(e) = read_failure {
            self.enter_disconnected(now, &e);
            return;
        }

        let write_failure = loop {
            let Some(message) = self.shared.queue.drain_one() else {
                break None;
            };
            trace!(len = message.len(), "writing queued message");
            if let Err(e) = self.transport.write(&message) {
                break Some(e);
            }
        };
        if let Some(e) = write_failure {
            self.enter_disconnected(now, &e);
        }
    }
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("state", &self.state)
            .field("backoff", &self.backoff)
            .field("next_connect_at", &self.next_connect_at)
            .finish()
    }
}

/// Parse one inbound payload and publish whatever event it carries.
fn route_inbound(mailbox: &Mailbox, payload: &[u8]) {
    let message = match InboundMessage::parse(payload) {
        Ok(message) => message,
        Err(e) => {
            warn!("failed to parse inbound message: {e}");
            return;
        }
    };

    match message.classify() {
        Ok(event) => {
            debug!(?event, "routing inbound event");
            mailbox.publish(match event {
                InboundEvent::Error { code, message } => MailboxEvent::Errored { code, message },
                InboundEvent::PresenceRequested => MailboxEvent::PresenceRequested,
                InboundEvent::JoinGame { secret } => MailboxEvent::JoinGame { secret },
                InboundEvent::SpectateGame { secret } => MailboxEvent::SpectateGame { secret },
            });
        }
        Err(Skipped::Response) => trace!(cmd = ?message.cmd(), "response received"),
        Err(Skipped::Unrouted) => debug!(evt = ?message.evt(), "ignoring unrouted event"),
        Err(Skipped::Malformed) => {
            warn!(evt = ?message.evt(), "skipping malformed inbound message");
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::mailbox::{Delivery, ErrorInfo, MailboxKind};
    use crate::protocol::{RichPresence, Subscription, Subscriptions};
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    const BASE: Duration = Duration::from_millis(500);
    const MAX: Duration = Duration::from_secs(60);

    // ── Mock transport ──────────────────────────────────────────────

    #[derive(Default)]
    struct Script {
        /// Results returned by successive `open` calls; empty means `Connected`.
        opens: VecDeque<Result<OpenStatus, TransportError>>,
        /// Inbound payloads or errors returned by `read`.
        inbound: VecDeque<Result<Vec<u8>, TransportError>>,
        /// Fail the next write with this error.
        write_error: Option<TransportError>,
        written: Vec<Vec<u8>>,
        open_calls: usize,
        close_calls: usize,
        is_open: bool,
    }

    struct MockTransport {
        script: Arc<StdMutex<Script>>,
        current: Vec<u8>,
    }

    impl Transport for MockTransport {
        fn open(&mut self) -> Result<OpenStatus, TransportError> {
            let mut script = self.script.lock().unwrap();
            script.open_calls += 1;
            let result = script.opens.pop_front().unwrap_or(Ok(OpenStatus::Connected));
            script.is_open = matches!(result, Ok(OpenStatus::Connected));
            result
        }

        fn close(&mut self) {
            let mut script = self.script.lock().unwrap();
            script.close_calls += 1;
            script.is_open = false;
        }

        fn is_open(&self) -> bool {
            self.script.lock().unwrap().is_open
        }

        fn read(&mut self) -> Result<Option<&[u8]>, TransportError> {
            let next = self.script.lock().unwrap().inbound.pop_front();
            match next {
                Some(Ok(bytes)) => {
                    self.current = bytes;
                    Ok(Some(&self.current))
                }
                Some(Err(e)) => Err(e),
                None => Ok(None),
            }
        }

        fn write(&mut self, payload: &[u8]) -> Result<(), TransportError> {
            let mut script = self.script.lock().unwrap();
            if let Some(e) = script.write_error.take() {
                return Err(e);
            }
            script.written.push(payload.to_vec());
            Ok(())
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────

    struct Harness {
        supervisor: ConnectionSupervisor,
        shared: Arc<Shared>,
        script: Arc<StdMutex<Script>>,
        start: Instant,
    }

    fn harness(subscriptions: Subscriptions) -> Harness {
        let script = Arc::new(StdMutex::new(Script::default()));
        let shared = Arc::new(Shared::new(8, 4096, 1234));
        shared.swap_subscriptions(subscriptions);
        let start = Instant::now();
        let transport = MockTransport {
            script: Arc::clone(&script),
            current: Vec::new(),
        };
        let supervisor = ConnectionSupervisor::new(
            Box::new(transport),
            Arc::clone(&shared),
            Backoff::new(BASE, MAX),
            start,
        );
        Harness {
            supervisor,
            shared,
            script,
            start,
        }
    }

    fn push_inbound(h: &Harness, json: serde_json::Value) {
        h.script
            .lock()
            .unwrap()
            .inbound
            .push_back(Ok(serde_json::to_vec(&json).unwrap()));
    }

    fn written_json(h: &Harness) -> Vec<serde_json::Value> {
        h.script
            .lock()
            .unwrap()
            .written
            .iter()
            .map(|bytes| serde_json::from_slice(bytes).unwrap())
            .collect()
    }

    fn connected(subscriptions: Subscriptions) -> Harness {
        let mut h = harness(subscriptions);
        h.supervisor.tick(h.start);
        assert_eq!(h.supervisor.state(), ConnectionState::Connected);
        h
    }

    // ── Connecting ──────────────────────────────────────────────────

    #[test]
    fn first_tick_opens_transport() {
        let h = connected(Subscriptions::NONE);
        assert_eq!(h.script.lock().unwrap().open_calls, 1);
        assert!(h.shared.is_connected());
        assert_eq!(
            h.shared.mailbox.take_if_ready(MailboxKind::Connected),
            Some(Delivery::Connected)
        );
    }

    #[test]
    fn failed_open_schedules_retry_by_last_backoff_delay() {
        let mut h = harness(Subscriptions::NONE);
        let failure = TransportError::pipe_closed();
        h.script.lock().unwrap().opens.extend([Err(failure.clone()), Err(failure)]);

        h.supervisor.tick(h.start);
        assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(h.supervisor.next_connect_at(), h.start + BASE);

        // Too early: no new attempt.
        h.supervisor.tick(h.start + BASE - Duration::from_millis(1));
        assert_eq!(h.script.lock().unwrap().open_calls, 1);

        let second = h.start + BASE;
        h.supervisor.tick(second);
        assert_eq!(h.script.lock().unwrap().open_calls, 2);
        assert_eq!(h.supervisor.next_connect_at(), second + BASE * 2);

        // A plain failed open is not a disconnect.
        assert_eq!(h.shared.mailbox.take_if_ready(MailboxKind::Disconnected), None);
    }

    #[test]
    fn pending_handshake_completes_on_a_later_attempt() {
        let mut h = harness(Subscriptions::NONE);
        h.script.lock().unwrap().opens.push_back(Ok(OpenStatus::Pending));

        h.supervisor.tick(h.start);
        assert_eq!(h.supervisor.state(), ConnectionState::Connecting);

        h.supervisor.tick(h.start + Duration::from_millis(10));
        assert_eq!(h.script.lock().unwrap().open_calls, 1);

        h.supervisor.tick(h.start + BASE);
        assert_eq!(h.supervisor.state(), ConnectionState::Connected);
    }

    #[test]
    fn failed_handshake_publishes_disconnect() {
        let mut h = harness(Subscriptions::NONE);
        h.script.lock().unwrap().opens.extend([
            Ok(OpenStatus::Pending),
            Err(TransportError::new(4000, "Invalid client ID")),
        ]);
        h.supervisor.tick(h.start);
        h.supervisor.tick(h.start + BASE);

        assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(
            h.shared.mailbox.take_if_ready(MailboxKind::Disconnected),
            Some(Delivery::Disconnected(ErrorInfo::new(4000, "Invalid client ID")))
        );
        assert!(h.supervisor.next_connect_at() > h.start + BASE);
    }

    #[test]
    fn connect_queues_one_subscription_per_handled_event() {
        let mut h = harness(Subscriptions::NONE.with(Subscription::JoinGame));
        h.supervisor.tick(h.start);

        assert_eq!(h.shared.queue.pending(), 1);
        let message = h.shared.queue.drain_one().expect("subscription");
        let value: serde_json::Value = serde_json::from_slice(&message).unwrap();
        assert_eq!(value["cmd"], "SUBSCRIBE");
        assert_eq!(value["evt"], "JOIN_GAME");
        drop(message);
        assert!(h.shared.queue.drain_one().is_none());
    }

    #[test]
    fn successful_connect_resets_backoff() {
        let mut h = harness(Subscriptions::NONE);
        let failure = TransportError::pipe_closed();
        h.script.lock().unwrap().opens.extend([Err(failure.clone()), Err(failure)]);

        h.supervisor.tick(h.start);
        h.supervisor.tick(h.start + BASE);
        let connect_at = h.supervisor.next_connect_at();
        h.supervisor.tick(connect_at);
        assert_eq!(h.supervisor.state(), ConnectionState::Connected);

        h.script.lock().unwrap().inbound.push_back(Err(TransportError::pipe_closed()));
        let lost_at = connect_at + Duration::from_secs(5);
        h.supervisor.tick(lost_at);
        assert_eq!(h.supervisor.next_connect_at(), lost_at + BASE);
    }

    #[test]
    fn uncapped_backoff_never_overflows_the_schedule() {
        let script = Arc::new(StdMutex::new(Script::default()));
        let failure = TransportError::pipe_closed();
        script
            .lock()
            .unwrap()
            .opens
            .extend(std::iter::repeat_n(Err(failure), 100));
        let shared = Arc::new(Shared::new(8, 4096, 1234));
        let transport = MockTransport {
            script: Arc::clone(&script),
            current: Vec::new(),
        };
        let start = Instant::now();
        let mut supervisor = ConnectionSupervisor::new(
            Box::new(transport),
            shared,
            Backoff::new(Duration::from_secs(1), Duration::MAX),
            start,
        );

        let mut at = start;
        for _ in 0..100 {
            supervisor.tick(at);
            assert!(supervisor.next_connect_at() > at);
            at = supervisor.next_connect_at();
        }
        assert_eq!(script.lock().unwrap().open_calls, 100);
        assert_eq!(supervisor.state(), ConnectionState::Disconnected);
    }

    // ── Connected ───────────────────────────────────────────────────

    #[test]
    fn join_game_secret_reaches_the_mailbox() {
        let mut h = connected(Subscriptions::NONE);
        push_inbound(
            &h,
            serde_json::json!({"cmd": "DISPATCH", "evt": "JOIN_GAME", "data": {"secret": "abc123"}}),
        );
        h.supervisor.tick(h.start);

        match h.shared.mailbox.take_if_ready(MailboxKind::JoinGame) {
            Some(Delivery::JoinGame(secret)) => assert_eq!(secret, "abc123"),
            other => panic!("unexpected delivery: {other:?}"),
        }
    }

    #[test]
    fn error_response_is_captured_without_disconnecting() {
        let mut h = connected(Subscriptions::NONE);
        push_inbound(
            &h,
            serde_json::json!({
                "cmd": "SET_ACTIVITY", "evt": "ERROR", "nonce": "4",
                "data": {"code": 4000, "message": "child \"activity\" fails"}
            }),
        );
        h.supervisor.tick(h.start);

        assert_eq!(h.supervisor.state(), ConnectionState::Connected);
        assert_eq!(
            h.shared.mailbox.take_if_ready(MailboxKind::Errored),
            Some(Delivery::Errored(ErrorInfo::new(4000, "child \"activity\" fails")))
        );
    }

    #[test]
    fn malformed_messages_are_skipped() {
        let mut h = connected(Subscriptions::NONE);
        h.script
            .lock()
            .unwrap()
            .inbound
            .push_back(Ok(b"{not json".to_vec()));
        push_inbound(&h, serde_json::json!({"evt": "JOIN_GAME", "data": {}}));
        push_inbound(&h, serde_json::json!({"evt": "PRESENCE_REQUESTED"}));
        h.supervisor.tick(h.start);

        assert_eq!(h.supervisor.state(), ConnectionState::Connected);
        assert_eq!(h.shared.mailbox.take_if_ready(MailboxKind::JoinGame), None);
        assert_eq!(
            h.shared.mailbox.take_if_ready(MailboxKind::PresenceRequested),
            Some(Delivery::PresenceRequested)
        );
    }

    #[test]
    fn queued_messages_are_written_in_fifo_order() {
        let mut h = connected(Subscriptions::NONE);
        for details in ["A", "B", "C"] {
            assert!(h
                .shared
                .set_activity(Some(&RichPresence::new().with_details(details))));
        }
        h.supervisor.tick(h.start);

        let details: Vec<String> = written_json(&h)
            .iter()
            .map(|v| v["args"]["activity"]["details"].as_str().unwrap().to_owned())
            .collect();
        assert_eq!(details, ["A", "B", "C"]);
        assert_eq!(h.shared.queue.pending(), 0);
    }

    #[test]
    fn messages_queued_while_disconnected_wait_for_the_connection() {
        let mut h = harness(Subscriptions::NONE);
        h.script
            .lock()
            .unwrap()
            .opens
            .push_back(Err(TransportError::pipe_closed()));
        h.supervisor.tick(h.start);
        assert!(h.shared.set_activity(None));

        h.supervisor.tick(h.start + Duration::from_millis(1));
        assert!(written_json(&h).is_empty());

        h.supervisor.tick(h.start + BASE);
        assert_eq!(h.supervisor.state(), ConnectionState::Connected);
        h.supervisor.tick(h.start + BASE);
        assert_eq!(written_json(&h).len(), 1);
    }

    #[test]
    fn peer_close_transitions_to_disconnected() {
        let mut h = connected(Subscriptions::NONE);
        h.shared.mailbox.take_if_ready(MailboxKind::Connected);
        h.script
            .lock()
            .unwrap()
            .inbound
            .push_back(Err(TransportError::new(1000, "closed")));

        let now = h.start + Duration::from_secs(1);
        h.supervisor.tick(now);

        assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
        assert!(!h.shared.is_connected());
        assert_eq!(
            h.shared.mailbox.take_if_ready(MailboxKind::Disconnected),
            Some(Delivery::Disconnected(ErrorInfo::new(1000, "closed")))
        );
        assert!(h.supervisor.next_connect_at() >= now + BASE);
        assert_eq!(h.script.lock().unwrap().close_calls, 1);

        // No reconnect before the scheduled time.
        h.supervisor.tick(now + BASE - Duration::from_millis(1));
        assert_eq!(h.script.lock().unwrap().open_calls, 1);
        h.supervisor.tick(now + BASE);
        assert_eq!(h.script.lock().unwrap().open_calls, 2);
    }

    #[test]
    fn reads_happen_before_writes() {
        let mut h = connected(Subscriptions::NONE);
        push_inbound(&h, serde_json::json!({"evt": "SPECTATE_GAME", "data": {"secret": "s"}}));
        h.script
            .lock()
            .unwrap()
            .inbound
            .push_back(Err(TransportError::pipe_closed()));
        assert!(h.shared.set_activity(None));

        h.supervisor.tick(h.start);

        assert!(written_json(&h).is_empty());
        assert!(h.shared.mailbox.take_if_ready(MailboxKind::SpectateGame).is_some());
        assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
        // The message stays queued for the next connection.
        assert_eq!(h.shared.queue.pending(), 1);
    }

    #[test]
    fn write_failure_is_a_connection_loss() {
        let mut h = connected(Subscriptions::NONE);
        h.script.lock().unwrap().write_error = Some(TransportError::new(1, "Pipe closed"));
        assert!(h.shared.set_activity(None));
        h.supervisor.tick(h.start);

        assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
        assert_eq!(
            h.shared.mailbox.take_if_ready(MailboxKind::Disconnected),
            Some(Delivery::Disconnected(ErrorInfo::new(1, "Pipe closed")))
        );
    }

    #[test]
    fn transport_closed_underneath_is_detected() {
        let mut h = connected(Subscriptions::NONE);
        h.script.lock().unwrap().is_open = false;
        h.supervisor.tick(h.start);

        assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
        let Some(Delivery::Disconnected(info)) =
            h.shared.mailbox.take_if_ready(MailboxKind::Disconnected)
        else {
            panic!("expected a disconnect");
        };
        assert_eq!(info.code, crate::ErrorCode::PipeClosed.code());
    }

    #[test]
    fn close_publishes_nothing() {
        let mut h = connected(Subscriptions::NONE);
        h.shared.mailbox.take_if_ready(MailboxKind::Connected);
        h.supervisor.close();

        assert_eq!(h.supervisor.state(), ConnectionState::Disconnected);
        assert!(!h.shared.is_connected());
        assert_eq!(h.shared.mailbox.take_if_ready(MailboxKind::Disconnected), None);
        assert_eq!(h.script.lock().unwrap().close_calls, 1);
    }
}
