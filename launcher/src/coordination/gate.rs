//! Acknowledgment gate: a single-slot rendezvous between the rendering thread
//! (which signals "continue") and the install worker (which waits for it).
//!
//! - `signal()` never blocks. It deposits one token if the slot is empty and drops the
//!   signal otherwise, so a double click cannot skip past the next prompt.
//! - `wait()` blocks until a token is present and consumes it. A token deposited before
//!   `wait()` is called is kept, so an early click is not lost.
//! - Only one waiter at a time. A second concurrent `wait()` fails with
//!   [`GateError::AlreadyWaiting`] instead of racing the first one.

use log::debug;
use std::sync::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum GateError {
    #[error("another thread is already waiting on the acknowledgment gate")]
    AlreadyWaiting,
    #[error("acknowledgment gate closed")]
    Closed,
}

#[derive(Debug, Default)]
struct Slot {
    token: bool,
    waiting: bool,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct AckGate {
    slot: Mutex<Slot>,
    cond: Condvar,
}

impl AckGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns true if the token was deposited, false if it was discarded.
    pub fn signal(&self) -> bool {
        let mut slot = self.lock();
        if slot.closed || slot.token {
            debug!("[PHASE: coordination] [STEP: ack] signal discarded (slot occupied or closed)");
            return false;
        }
        slot.token = true;
        self.cond.notify_one();
        true
    }

    pub fn wait(&self) -> Result<(), GateError> {
        let mut slot = self.lock();
        if slot.waiting {
            return Err(GateError::AlreadyWaiting);
        }
        slot.waiting = true;
        while !slot.token && !slot.closed {
            slot = self.cond.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
        slot.waiting = false;
        if slot.token {
            slot.token = false;
            return Ok(());
        }
        Err(GateError::Closed)
    }

    /// Release any waiter with [`GateError::Closed`] and refuse further tokens.
    /// A token already sitting in the slot is still handed to the next `wait()`.
    pub fn close(&self) {
        let mut slot = self.lock();
        slot.closed = true;
        self.cond.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn has_pending_signal(&self) -> bool {
        self.lock().token
    }

    pub fn is_waiting(&self) -> bool {
        self.lock().waiting
    }
}
