//! Last-value-wins handoff of inbound events from the I/O thread to the
//! consumer thread.
//!
//! Every [`MailboxKind`] has exactly one cell. Publishing overwrites any unread
//! value of the same kind; taking atomically tests-and-clears the ready flag.
//! Neither side ever blocks on the other, and no cell allocates after
//! construction.
//!
//! Payload-carrying kinds use a triple buffer: the producer and the consumer
//! each own one buffer and exchange the third ("back") buffer together with
//! the ready bit in a single atomic swap. Publishing therefore never waits for
//! a slow reader and a reader never sees a half-written payload.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use tracing::warn;

use crate::fixed_str::FixedStr;

/// Capacity of secret and error-message payloads in bytes.
pub const PAYLOAD_CAPACITY: usize = 256;

/// A join or spectate secret.
pub type Secret = FixedStr<PAYLOAD_CAPACITY>;

/// Error code and message captured from the peer or the transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    pub code: i32,
    pub message: FixedStr<PAYLOAD_CAPACITY>,
}

impl ErrorInfo {
    pub fn new(code: i32, message: &str) -> Self {
        Self {
            code,
            message: FixedStr::from_str_truncated(message),
        }
    }
}

/// The distinct event kinds the mailbox holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MailboxKind {
    Connected,
    Disconnected,
    Errored,
    PresenceRequested,
    JoinGame,
    SpectateGame,
}

/// An event to publish, borrowing its payload from the inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxEvent<'a> {
    Connected,
    Disconnected { code: i32, message: &'a str },
    Errored { code: i32, message: &'a str },
    PresenceRequested,
    JoinGame { secret: &'a str },
    SpectateGame { secret: &'a str },
}

impl MailboxEvent<'_> {
    pub fn kind(&self) -> MailboxKind {
        match self {
            Self::Connected => MailboxKind::Connected,
            Self::Disconnected { .. } => MailboxKind::Disconnected,
            Self::Errored { .. } => MailboxKind::Errored,
            Self::PresenceRequested => MailboxKind::PresenceRequested,
            Self::JoinGame { .. } => MailboxKind::JoinGame,
            Self::SpectateGame { .. } => MailboxKind::SpectateGame,
        }
    }
}

/// A snapshot taken out of the mailbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Connected,
    Disconnected(ErrorInfo),
    Errored(ErrorInfo),
    PresenceRequested,
    JoinGame(Secret),
    SpectateGame(Secret),
}

/// The set of per-kind cells shared between the I/O and consumer threads.
#[derive(Debug, Default)]
pub struct Mailbox {
    connected: Signal,
    disconnected: LatestCell<ErrorInfo>,
    errored: LatestCell<ErrorInfo>,
    presence_requested: Signal,
    join_game: LatestCell<Secret>,
    spectate_game: LatestCell<Secret>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `event`, replacing any unread value of the same kind.
    pub fn publish(&self, event: MailboxEvent<'_>) {
        let stored = match event {
            MailboxEvent::Connected => {
                self.connected.raise();
                true
            }
            MailboxEvent::Disconnected { code, message } => self.disconnected.publish(|info| {
                info.code = code;
                info.message.set(message);
            }),
            MailboxEvent::Errored { code, message } => self.errored.publish(|info| {
                info.code = code;
                info.message.set(message);
            }),
            MailboxEvent::PresenceRequested => {
                self.presence_requested.raise();
                true
            }
            MailboxEvent::JoinGame { secret } => self.join_game.publish(|s| {
                s.set(secret);
            }),
            MailboxEvent::SpectateGame { secret } => self.spectate_game.publish(|s| {
                s.set(secret);
            }),
        };
        if !stored {
            warn!(kind = ?event.kind(), "concurrent mailbox publish, event dropped");
        }
    }

    /// Take the pending value of `kind`, clearing its ready flag.
    pub fn take_if_ready(&self, kind: MailboxKind) -> Option<Delivery> {
        match kind {
            MailboxKind::Connected => self.connected.take().then_some(Delivery::Connected),
            MailboxKind::Disconnected => self.disconnected.take().map(Delivery::Disconnected),
            MailboxKind::Errored => self.errored.take().map(Delivery::Errored),
            MailboxKind::PresenceRequested => self
                .presence_requested
                .take()
                .then_some(Delivery::PresenceRequested),
            MailboxKind::JoinGame => self.join_game.take().map(Delivery::JoinGame),
            MailboxKind::SpectateGame => self.spectate_game.take().map(Delivery::SpectateGame),
        }
    }
}

/// Ready flag for payload-less kinds.
#[derive(Debug, Default)]
struct Signal(AtomicBool);

impl Signal {
    fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

const INDEX_MASK: u8 = 0b011;
const DIRTY: u8 = 0b100;

/// Single-slot, last-value-wins cell.
struct LatestCell<T> {
    buffers: [UnsafeCell<T>; 3],
    /// Index of the shared back buffer, plus [`DIRTY`] when it holds an
    /// unread value.
    back: AtomicU8,
    write_index: AtomicU8,
    read_index: AtomicU8,
    writing: AtomicBool,
    reading: AtomicBool,
}

// SAFETY: at any time each of the three buffers is owned by exactly one of
// producer (`write_index`), consumer (`read_index`) or the shared `back`
// slot. Ownership only changes through the atomic swap on `back`, and the
// `writing`/`reading` flags admit one producer and one consumer at a time.
unsafe impl<T: Send> Sync for LatestCell<T> {}

impl<T: Default> Default for LatestCell<T> {
    fn default() -> Self {
        Self {
            buffers: [
                UnsafeCell::new(T::default()),
                UnsafeCell::new(T::default()),
                UnsafeCell::new(T::default()),
            ],
            write_index: AtomicU8::new(0),
            back: AtomicU8::new(1),
            read_index: AtomicU8::new(2),
            writing: AtomicBool::new(false),
            reading: AtomicBool::new(false),
        }
    }
}

impl<T> LatestCell<T> {
    fn buffer(&self, index: u8) -> &UnsafeCell<T> {
        let [first, second, third] = &self.buffers;
        match index & INDEX_MASK {
            0 => first,
            1 => second,
            _ => third,
        }
    }

    /// Fill the producer buffer with `fill` and swap it in as the newest value.
    ///
    /// Returns `false` if another producer is mid-publish.
    fn publish(&self, fill: impl FnOnce(&mut T)) -> bool {
        if self.writing.swap(true, Ordering::Acquire) {
            return false;
        }
        let index = self.write_index.load(Ordering::Relaxed);
        // SAFETY: `index` is the producer-owned buffer and `writing` is held.
        fill(unsafe { &mut *self.buffer(index).get() });
        let previous = self.back.swap(index | DIRTY, Ordering::AcqRel);
        self.write_index.store(previous & INDEX_MASK, Ordering::Relaxed);
        self.writing.store(false, Ordering::Release);
        true
    }
}

impl<T: Clone> LatestCell<T> {
    /// Take a copy of the newest unread value, if any.
    fn take(&self) -> Option<T> {
        if self.reading.swap(true, Ordering::Acquire) {
            return None;
        }
        let value = if self.back.load(Ordering::Acquire) & DIRTY == 0 {
            None
        } else {
            let index = self.read_index.load(Ordering::Relaxed);
            let fresh = self.back.swap(index, Ordering::AcqRel) & INDEX_MASK;
            self.read_index.store(fresh, Ordering::Relaxed);
            // SAFETY: the swap handed buffer `fresh` to the consumer and
            // `reading` is held.
            Some(unsafe { (*self.buffer(fresh).get()).clone() })
        };
        self.reading.store(false, Ordering::Release);
        value
    }
}

impl<T> std::fmt::Debug for LatestCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatestCell")
            .field("ready", &(self.back.load(Ordering::Relaxed) & DIRTY != 0))
            .finish()
    }
}
