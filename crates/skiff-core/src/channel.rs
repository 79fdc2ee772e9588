//! Shared per-session regions between the controller and the worker.
//!
//! Two regions, both allocated fresh for every session and discarded on
//! teardown: a single-slot input mailbox ([`InputChannel`]) carrying one text
//! line at a time, and a one-byte interrupt flag ([`InterruptFlag`]).
//!
//! The mailbox keeps the wire discipline of a length header plus a
//! fixed-capacity payload, but the blocking itself is a Mutex/Condvar pair:
//! one side blocks until woken, the other stores state and notifies.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, Result};

/// Default capacity of the input payload region in bytes.
pub const INPUT_CAPACITY: usize = 4096;

/// Interrupt flag value meaning no interrupt is requested.
pub const INTERRUPT_CLEAR: u8 = 0;

/// Cooperative interrupt request, aligned with the SIGINT signal number.
pub const INTERRUPT_SIGINT: u8 = 2;

/// Single-slot mailbox for one pending input line.
///
/// Layout follows the channel contract: a length header (0 = empty) followed
/// by a `capacity`-byte payload. The writer stores the header exactly once
/// per line; the reader copies the payload out, resets the header to 0 and
/// signals the line as consumed. There is no queue: a second write while the
/// header is non-zero is rejected with [`Error::ChannelBusy`].
pub struct InputChannel {
    slot: Mutex<Slot>,
    /// Signalled when a line lands, the channel closes, or [`wake`] kicks
    /// blocked readers so they re-check the interrupt flag.
    ///
    /// [`wake`]: InputChannel::wake
    readable: Condvar,
    /// Signalled when the pending line has been consumed.
    consumed: Condvar,
    capacity: usize,
}

struct Slot {
    /// Length header: 0 = empty, 1..=capacity = pending line length.
    len: u32,
    payload: Box<[u8]>,
    closed: bool,
}

impl InputChannel {
    /// Allocate a channel with a `capacity`-byte payload region.
    pub fn new(capacity: usize) -> Self {
        Self {
            slot: Mutex::new(Slot {
                len: 0,
                payload: vec![0u8; capacity].into_boxed_slice(),
                closed: false,
            }),
            readable: Condvar::new(),
            consumed: Condvar::new(),
            capacity,
        }
    }

    /// Payload capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Deposit one line for the blocked reader and wake it.
    ///
    /// Fails without touching the slot if the channel is closed, a previous
    /// line has not been consumed yet, or `bytes` exceeds the capacity.
    pub fn write_line(&self, bytes: &[u8]) -> Result<()> {
        let mut slot = self.lock();
        if slot.closed {
            return Err(Error::ChannelClosed);
        }
        if slot.len != 0 {
            return Err(Error::ChannelBusy);
        }
        if bytes.len() > self.capacity {
            return Err(Error::LineTooLong {
                len: bytes.len(),
                capacity: self.capacity,
            });
        }
        slot.payload.fill(0);
        slot.payload[..bytes.len()].copy_from_slice(bytes);
        slot.len = bytes.len() as u32;
        drop(slot);
        self.readable.notify_one();
        Ok(())
    }

    /// Block until a line arrives, then consume and return it.
    ///
    /// This call blocks the calling thread; it exists to present synchronous
    /// stdin semantics to interpreted code and must only run on the worker
    /// thread. Returns `None` when woken by [`close`] or by an interrupt
    /// (the blocking-or-null stdin contract).
    ///
    /// [`close`]: InputChannel::close
    pub fn read_line(&self, interrupt: &InterruptFlag) -> Option<String> {
        let mut slot = self.lock();
        while slot.len == 0 {
            if slot.closed || interrupt.is_raised() {
                return None;
            }
            slot = recover(self.readable.wait(slot));
        }
        let len = slot.len as usize;
        let text = String::from_utf8_lossy(&slot.payload[..len]).into_owned();
        slot.len = 0;
        drop(slot);
        self.consumed.notify_all();
        Some(text)
    }

    /// Whether a line is deposited and not yet consumed.
    pub fn has_pending(&self) -> bool {
        self.lock().len != 0
    }

    /// Block until the pending line (if any) is consumed, up to `timeout`.
    ///
    /// Returns `true` if the slot is empty when this call returns.
    pub fn wait_consumed(&self, timeout: Duration) -> bool {
        let slot = self.lock();
        let (slot, _) = recover_timeout(
            self.consumed
                .wait_timeout_while(slot, timeout, |slot| slot.len != 0 && !slot.closed),
        );
        slot.len == 0
    }

    /// Wake blocked readers without depositing a line.
    ///
    /// Used after raising the interrupt flag so a reader blocked in
    /// [`read_line`] observes it instead of waiting forever.
    ///
    /// [`read_line`]: InputChannel::read_line
    pub fn wake(&self) {
        let _slot = self.lock();
        self.readable.notify_all();
    }

    /// Close the channel, waking everyone. Further writes fail and blocked
    /// reads return `None`.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        drop(slot);
        self.readable.notify_all();
        self.consumed.notify_all();
    }

    /// Whether [`close`](InputChannel::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        recover(self.slot.lock())
    }
}

impl Default for InputChannel {
    fn default() -> Self {
        Self::new(INPUT_CAPACITY)
    }
}

/// A poisoned slot mutex only means another thread panicked mid-write; the
/// slot data itself stays structurally valid.
fn recover<T>(result: std::result::Result<T, std::sync::PoisonError<T>>) -> T {
    result.unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn recover_timeout<'a>(
    result: std::result::Result<
        (MutexGuard<'a, Slot>, std::sync::WaitTimeoutResult),
        std::sync::PoisonError<(MutexGuard<'a, Slot>, std::sync::WaitTimeoutResult)>,
    >,
) -> (MutexGuard<'a, Slot>, std::sync::WaitTimeoutResult) {
    result.unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared one-byte interrupt flag.
///
/// Written only by the controller; the worker and the interpreter observe it
/// at safepoints. The worker never resets it: every session gets a fresh
/// flag, so stale interrupt state cannot leak into a new run.
#[derive(Clone, Debug)]
pub struct InterruptFlag(Arc<AtomicU8>);

impl InterruptFlag {
    /// Allocate a cleared flag.
    pub fn new() -> Self {
        Self(Arc::new(AtomicU8::new(INTERRUPT_CLEAR)))
    }

    /// Request an interrupt with the given signal code.
    pub fn raise(&self, code: u8) {
        self.0.store(code, Ordering::SeqCst);
    }

    /// Reset to the cleared state.
    pub fn clear(&self) {
        self.0.store(INTERRUPT_CLEAR, Ordering::SeqCst);
    }

    /// Current signal code.
    pub fn value(&self) -> u8 {
        self.0.load(Ordering::SeqCst)
    }

    /// Whether any interrupt is requested.
    pub fn is_raised(&self) -> bool {
        self.value() != INTERRUPT_CLEAR
    }
}

impl Default for InterruptFlag {
    fn default() -> Self {
        Self::new()
    }
}
