//! Bounded, pre-allocated outbound message ring.
//!
//! Producers on any thread reserve a slot with [`SendQueue::try_reserve`],
//! fill its buffer in place and [`commit`](SlotHandle::commit) it. A single
//! consumer (the I/O thread) drains committed slots in reservation order with
//! [`SendQueue::drain_one`].
//!
//! Backpressure is explicit: when every slot is reserved or waiting to be
//! sent, `try_reserve` returns `None` instead of blocking or growing.
//!
//! # Slot ownership
//!
//! ```text
//!   Empty ──try_reserve──► Writing ──commit──► Ready ──drain_one──► (borrowed) ──drop──► Empty
//!                             │
//!                             └──handle dropped──► Abandoned ──skipped by drain_one──► Empty
//! ```
//!
//! A slot is only ever touched by the producer that reserved it (while
//! `Writing`) or by the consumer (while `Ready`/`Abandoned`), so the buffers
//! live in `UnsafeCell`s without locks.

use std::cell::UnsafeCell;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};

/// Default number of slots.
pub const DEFAULT_QUEUE_SLOTS: usize = 8;

/// Default capacity of one slot in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024;

const EMPTY: u8 = 0;
const WRITING: u8 = 1;
const READY: u8 = 2;
const ABANDONED: u8 = 3;

struct Slot {
    state: AtomicU8,
    len: UnsafeCell<usize>,
    buffer: UnsafeCell<Box<[u8]>>,
}

impl Slot {
    fn new(capacity: usize) -> Self {
        Self {
            state: AtomicU8::new(EMPTY),
            len: UnsafeCell::new(0),
            buffer: UnsafeCell::new(vec![0u8; capacity].into_boxed_slice()),
        }
    }
}

/// Fixed-size ring of outbound message buffers.
pub struct SendQueue {
    slots: Box<[Slot]>,
    slot_capacity: usize,
    next_add: AtomicUsize,
    next_send: AtomicUsize,
    /// Committed (or abandoned) slots not yet drained.
    pending: AtomicUsize,
    /// Slots reserved by a producer and not yet released by the consumer.
    occupied: AtomicUsize,
    draining: AtomicBool,
}

// SAFETY: slot buffers are accessed exclusively by the reserving producer
// until it publishes with a release store on `state`, and afterwards only by
// the single consumer admitted through `draining`. `occupied` guarantees a
// slot is not handed out again until the consumer has released it.
unsafe impl Sync for SendQueue {}

impl SendQueue {
    /// Create a queue of `slots` buffers, each `slot_capacity` bytes long.
    ///
    /// Both values are clamped to at least 1.
    pub fn new(slots: usize, slot_capacity: usize) -> Self {
        let slot_capacity = slot_capacity.max(1);
        let slots: Box<[Slot]> = (0..slots.max(1)).map(|_| Slot::new(slot_capacity)).collect();
        Self {
            slots,
            slot_capacity,
            next_add: AtomicUsize::new(0),
            next_send: AtomicUsize::new(0),
            pending: AtomicUsize::new(0),
            occupied: AtomicUsize::new(0),
            draining: AtomicBool::new(false),
        }
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Size of each slot buffer in bytes.
    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    /// Number of committed messages waiting to be drained.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Claim the next free slot, or `None` if the queue is full.
    pub fn try_reserve(&self) -> Option<SlotHandle<'_>> {
        let mut occupied = self.occupied.load(Ordering::Acquire);
        loop {
            if occupied >= self.slots.len() {
                return None;
            }
            match self.occupied.compare_exchange_weak(
                occupied,
                occupied + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(current) => occupied = current,
            }
        }

        let index = self.next_add.fetch_add(1, Ordering::Relaxed) % self.slots.len();
        let slot = self.slots.get(index)?;
        slot.state.store(WRITING, Ordering::Relaxed);
        Some(SlotHandle {
            queue: self,
            slot,
            committed: false,
        })
    }

    /// Borrow the oldest committed message.
    ///
    /// Only one consumer can drain at a time; a concurrent call returns
    /// `None`. The slot is released when the returned guard is dropped.
    /// Returns `None` as well while the oldest reserved slot is still being
    /// written, which keeps sends in reservation order.
    pub fn drain_one(&self) -> Option<DrainedMessage<'_>> {
        if self.draining.swap(true, Ordering::Acquire) {
            return None;
        }
        loop {
            if self.pending.load(Ordering::Acquire) == 0 {
                break;
            }
            let index = self.next_send.load(Ordering::Relaxed) % self.slots.len();
            let Some(slot) = self.slots.get(index) else {
                break;
            };
            match slot.state.load(Ordering::Acquire) {
                READY => {
                    return Some(DrainedMessage { queue: self, slot });
                }
                ABANDONED => self.release(slot),
                _ => break,
            }
        }
        self.draining.store(false, Ordering::Release);
        None
    }

    fn release(&self, slot: &Slot) {
        slot.state.store(EMPTY, Ordering::Relaxed);
        self.next_send.fetch_add(1, Ordering::Relaxed);
        self.pending.fetch_sub(1, Ordering::AcqRel);
        self.occupied.fetch_sub(1, Ordering::Release);
    }
}

impl std::fmt::Debug for SendQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendQueue")
            .field("capacity", &self.capacity())
            .field("slot_capacity", &self.slot_capacity)
            .field("pending", &self.pending())
            .finish()
    }
}

/// Exclusive write access to a reserved slot.
///
/// Dropping the handle without committing abandons the slot; the consumer
/// skips it.
pub struct SlotHandle<'a> {
    queue: &'a SendQueue,
    slot: &'a Slot,
    committed: bool,
}

impl SlotHandle<'_> {
    /// The slot buffer to encode the message into.
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        // SAFETY: the slot is in the `Writing` state and this handle is its
        // only owner until `commit` or drop.
        unsafe { &mut *self.slot.buffer.get() }
    }

    /// Publish the first `len` bytes of the buffer to the consumer.
    pub fn commit(mut self, len: usize) {
        let len = len.min(self.queue.slot_capacity);
        // SAFETY: still exclusively owned, see `buffer_mut`.
        unsafe { *self.slot.len.get() = len };
        self.slot.state.store(READY, Ordering::Release);
        self.queue.pending.fetch_add(1, Ordering::AcqRel);
        self.committed = true;
    }
}

impl Drop for SlotHandle<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.slot.state.store(ABANDONED, Ordering::Release);
            self.queue.pending.fetch_add(1, Ordering::AcqRel);
        }
    }
}

/// A committed message borrowed by the consumer. Dereferences to its bytes.
pub struct DrainedMessage<'a> {
    queue: &'a SendQueue,
    slot: &'a Slot,
}

impl Deref for DrainedMessage<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // SAFETY: the slot is `Ready` and the consumer holds `draining`, so
        // no producer can reserve it until this guard releases it.
        let (buffer, len) = unsafe { (&*self.slot.buffer.get(), *self.slot.len.get()) };
        buffer.get(..len).unwrap_or_default()
    }
}

impl Drop for DrainedMessage<'_> {
    fn drop(&mut self) {
        self.queue.release(self.slot);
        self.queue.draining.store(false, Ordering::Release);
    }
}
