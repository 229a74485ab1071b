//! State shared between the embedder threads and the I/O thread.
//!
//! Everything here is reachable through `&self` only and is made of atomics,
//! the lock-free [`SendQueue`] and the [`Mailbox`].

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};

use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::mailbox::Mailbox;
use crate::protocol::{self, ActivityArgs, Command, Nonce, RichPresence, Subscription, Subscriptions};
use crate::send_queue::SendQueue;

pub(crate) struct Shared {
    pub(crate) queue: SendQueue,
    pub(crate) mailbox: Mailbox,
    /// Wakes the I/O loop early when outbound work is queued.
    pub(crate) wake: Notify,
    next_nonce: AtomicU64,
    pid: u32,
    subscriptions: AtomicU8,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl Shared {
    pub(crate) fn new(queue_slots: usize, max_message_size: usize, pid: u32) -> Self {
        Self {
            queue: SendQueue::new(queue_slots, max_message_size),
            mailbox: Mailbox::new(),
            wake: Notify::new(),
            next_nonce: AtomicU64::new(1),
            pid,
            subscriptions: AtomicU8::new(0),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Encode `build(nonce)` into a free slot and wake the I/O loop.
    ///
    /// Returns `false` if the queue is full, the client is shut down, or the
    /// command does not fit into a slot.
    pub(crate) fn enqueue<'a>(&self, build: impl FnOnce(Nonce) -> Command<'a>) -> bool {
        if self.closed.load(Ordering::Acquire) {
            debug!("client shut down, dropping outbound command");
            return false;
        }
        let Some(mut slot) = self.queue.try_reserve() else {
            warn!("send queue full, dropping outbound command");
            return false;
        };
        let command = build(Nonce(self.next_nonce.fetch_add(1, Ordering::Relaxed)));
        match protocol::encode_into(slot.buffer_mut(), &command) {
            Ok(len) => {
                slot.commit(len);
                self.wake.notify_one();
                true
            }
            Err(e) => {
                warn!(nonce = %command.nonce(), "failed to encode outbound command: {e}");
                false
            }
        }
    }

    pub(crate) fn set_activity(&self, presence: Option<&RichPresence>) -> bool {
        let pid = self.pid;
        self.enqueue(|nonce| Command::SetActivity {
            nonce,
            args: ActivityArgs {
                pid,
                activity: presence,
            },
        })
    }

    pub(crate) fn subscribe(&self, evt: Subscription) -> bool {
        self.enqueue(|nonce| Command::Subscribe { nonce, evt })
    }

    /// Subscribe to `kind` unless the handler mask already covers it; those
    /// kinds are subscribed on every connect.
    pub(crate) fn register_for_event(&self, kind: Subscription) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        if self.subscriptions().contains(kind) {
            debug!(event = kind.as_str(), "already subscribed through a handler");
            return true;
        }
        self.subscribe(kind)
    }

    pub(crate) fn unsubscribe(&self, evt: Subscription) -> bool {
        self.enqueue(|nonce| Command::Unsubscribe { nonce, evt })
    }

    pub(crate) fn subscriptions(&self) -> Subscriptions {
        Subscriptions::from_bits(self.subscriptions.load(Ordering::Acquire))
    }

    /// Replace the subscription set, returning the previous one.
    pub(crate) fn swap_subscriptions(&self, subscriptions: Subscriptions) -> Subscriptions {
        Subscriptions::from_bits(self.subscriptions.swap(subscriptions.bits(), Ordering::AcqRel))
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    /// Refuse all further outbound work.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Shared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shared")
            .field("queue", &self.queue)
            .field("connected", &self.is_connected())
            .field("subscriptions", &self.subscriptions())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn drained(shared: &Shared) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Some(msg) = shared.queue.drain_one() {
            out.push(serde_json::from_slice(&msg).unwrap());
        }
        out
    }

    #[test]
    fn nonces_strictly_increase() {
        let shared = Shared::new(8, 1024, 99);
        assert!(shared.subscribe(Subscription::JoinGame));
        assert!(shared.set_activity(None));
        assert!(shared.unsubscribe(Subscription::JoinGame));

        let nonces: Vec<u64> = drained(&shared)
            .iter()
            .map(|v| v["nonce"].as_str().unwrap().parse().unwrap())
            .collect();
        assert_eq!(nonces, vec![1, 2, 3]);
    }

    #[test]
    fn activity_carries_pid() {
        let shared = Shared::new(8, 1024, 4321);
        let presence = RichPresence::new().with_details("Menu");
        assert!(shared.set_activity(Some(&presence)));
        let msg = drained(&shared).remove(0);
        assert_eq!(msg["args"]["pid"], 4321);
        assert_eq!(msg["args"]["activity"]["details"], "Menu");
    }

    #[test]
    fn oversized_command_is_rejected_without_leaking_a_slot() {
        let shared = Shared::new(2, 64, 1);
        let presence = RichPresence::new().with_details("x".repeat(200));
        assert!(!shared.set_activity(Some(&presence)));
        assert!(shared.subscribe(Subscription::SpectateGame));
        assert_eq!(drained(&shared).len(), 1);
        assert!(shared.subscribe(Subscription::JoinGame));
        assert!(shared.subscribe(Subscription::PresenceRequested));
    }

    #[test]
    fn closed_shared_refuses_work() {
        let shared = Shared::new(8, 1024, 1);
        shared.close();
        assert!(!shared.subscribe(Subscription::JoinGame));
        assert_eq!(shared.queue.pending(), 0);
    }

    #[test]
    fn subscriptions_swap_returns_previous() {
        let shared = Shared::new(8, 1024, 1);
        let first = Subscriptions::NONE.with(Subscription::JoinGame);
        assert_eq!(shared.swap_subscriptions(first), Subscriptions::NONE);
        assert_eq!(shared.swap_subscriptions(Subscriptions::NONE), first);
    }
}
