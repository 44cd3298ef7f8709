//! Global backpressure on queued response bytes (`spec.md` §3, §4.4).
//!
//! `parking_lot::{Mutex, Condvar}` in place of the `std::sync` equivalents —
//! grounded in the Kudu RPC client (`andygrove-kudu-rs` in the reference
//! pack), which reaches for `parking_lot` on exactly this kind of hot,
//! short-held connection-state lock.

use parking_lot::{Condvar, Mutex};

/// Counts total bytes currently queued across all per-connection Response
/// Queues, enforcing a configured ceiling.
pub struct Throttler {
    ceiling: u64,
    current: Mutex<u64>,
    has_room: Condvar,
}

impl Throttler {
    /// Create a throttler with the given ceiling in bytes.
    pub fn new(ceiling: u64) -> Self {
        Self {
            ceiling,
            current: Mutex::new(0),
            has_room: Condvar::new(),
        }
    }

    /// The configured ceiling.
    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    /// Current queued byte count. For tests and metrics.
    pub fn current(&self) -> u64 {
        *self.current.lock()
    }

    /// Block until `current + n <= ceiling`, then account for `n` bytes.
    ///
    /// A single request larger than the ceiling still gets admitted once the
    /// queue fully drains to zero — otherwise it could never be sent at all.
    pub fn increase(&self, n: u64) {
        let mut current = self.current.lock();
        loop {
            let fits = *current + n <= self.ceiling;
            let queue_empty = *current == 0;
            if fits || queue_empty {
                *current += n;
                return;
            }
            self.has_room.wait(&mut current);
        }
    }

    /// Return `n` bytes to the ceiling, waking any waiters that might now fit.
    pub fn decrease(&self, n: u64) {
        let mut current = self.current.lock();
        debug_assert!(*current >= n, "throttler underflow: {} - {}", *current, n);
        *current = current.saturating_sub(n);
        self.has_room.notify_all();
    }
}
