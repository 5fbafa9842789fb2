//! Concurrency limit with priority-ordered admission.
//!
//! When all slots are taken, waiters are served High before Medium before
//! Low, and first-come first-served within a priority. A released slot is
//! handed directly to the next waiter so a newcomer can never jump the queue.

use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tokio::sync::oneshot;

use skycast_core::Priority;

struct Waiter {
    priority: Priority,
    seq: u64,
    tx: oneshot::Sender<()>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // Max-heap: most urgent priority first, then the earliest arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct GateState {
    available: usize,
    next_seq: u64,
    waiters: BinaryHeap<Waiter>,
}

/// Cloneable handle to a shared concurrency limit.
#[derive(Clone)]
pub struct PriorityGate {
    capacity: usize,
    state: Arc<Mutex<GateState>>,
}

impl std::fmt::Debug for PriorityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("PriorityGate")
            .field("capacity", &self.capacity)
            .field("available", &state.available)
            .field("waiting", &state.waiters.len())
            .finish()
    }
}

impl PriorityGate {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: Arc::new(Mutex::new(GateState {
                available: capacity,
                next_seq: 0,
                waiters: BinaryHeap::new(),
            })),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.state.lock().available
    }

    /// Number of queued waiters, including ones whose callers gave up.
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Wait for a slot. Dropping the future before it resolves gives up the
    /// place in line, and any slot handed over in the meantime is passed on.
    pub async fn acquire(&self, priority: Priority) -> GatePermit {
        loop {
            let rx = {
                let mut state = self.state.lock();
                if state.available > 0 && state.waiters.is_empty() {
                    state.available -= 1;
                    return GatePermit { gate: self.clone() };
                }
                let (tx, rx) = oneshot::channel();
                let seq = state.next_seq;
                state.next_seq += 1;
                state.waiters.push(Waiter { priority, seq, tx });
                rx
            };

            tracing::trace!(%priority, "Waiting for a request slot");
            let mut slot = WaitingSlot {
                gate: self.clone(),
                rx,
                granted: false,
            };
            if (&mut slot.rx).await.is_ok() {
                slot.granted = true;
                return GatePermit { gate: self.clone() };
            }
        }
    }

    fn release(&self) {
        let mut state = self.state.lock();
        while let Some(waiter) = state.waiters.pop() {
            if waiter.tx.send(()).is_ok() {
                return;
            }
        }
        state.available = (state.available + 1).min(self.capacity);
    }
}

/// A held slot; released on drop.
#[derive(Debug)]
pub struct GatePermit {
    gate: PriorityGate,
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.release();
    }
}

struct WaitingSlot {
    gate: PriorityGate,
    rx: oneshot::Receiver<()>,
    granted: bool,
}

impl Drop for WaitingSlot {
    fn drop(&mut self) {
        if self.granted {
            return;
        }
        self.rx.close();
        if self.rx.try_recv().is_ok() {
            self.gate.release();
        }
    }
}
