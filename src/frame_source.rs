//! Host frame-callback abstraction and clocks.
//!
//! The engine never talks to a windowing system directly. It asks a
//! [`FrameScheduler`] for "one callback before the next repaint" and the
//! host answers by calling [`PerformanceEngine::tick`] with a monotonic
//! timestamp. [`FrameRequestSlot`] is the in-process implementation: the
//! host loop drains it once per vsync (or per timer tick) and delivers the
//! ticks.
//!
//! [`PerformanceEngine::tick`]: crate::engine::PerformanceEngine::tick

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Instant;

/// Identifies one outstanding frame request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHandle(pub u64);

/// "Call me once before the next repaint."
pub trait FrameScheduler {
    /// Register for the next frame callback.
    fn request_frame(&self) -> FrameHandle;

    /// Withdraw a request that has not fired yet. Unknown handles are ignored.
    fn cancel_frame(&self, handle: FrameHandle);
}

/// Monotonic time source in milliseconds.
pub trait Clock {
    fn now_ms(&self) -> f64;
}

#[derive(Debug, Default)]
struct SlotState {
    pending: Vec<FrameHandle>,
    next_id: u64,
    total_requests: u64,
}

/// Frame requests parked until the host loop delivers them.
///
/// Cheap to clone; clones share the same slot.
#[derive(Debug, Clone, Default)]
pub struct FrameRequestSlot {
    state: Rc<RefCell<SlotState>>,
}

impl FrameRequestSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests registered and not yet fired or cancelled.
    pub fn pending_count(&self) -> usize {
        self.state.borrow().pending.len()
    }

    pub fn has_pending(&self) -> bool {
        self.pending_count() > 0
    }

    /// Requests ever registered.
    pub fn total_requests(&self) -> u64 {
        self.state.borrow().total_requests
    }

    /// Fire all pending requests: returns them and empties the slot.
    ///
    /// The host calls `tick` once per returned handle.
    pub fn take_pending(&self) -> Vec<FrameHandle> {
        std::mem::take(&mut self.state.borrow_mut().pending)
    }
}

impl FrameScheduler for FrameRequestSlot {
    fn request_frame(&self) -> FrameHandle {
        let mut state = self.state.borrow_mut();
        let handle = FrameHandle(state.next_id);
        state.next_id += 1;
        state.total_requests += 1;
        state.pending.push(handle);
        handle
    }

    fn cancel_frame(&self, handle: FrameHandle) {
        self.state.borrow_mut().pending.retain(|h| *h != handle);
    }
}

/// Milliseconds since construction, from [`Instant`].
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Hand-driven clock for simulations and tests. Clones share the time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<f64>>,
}

impl ManualClock {
    pub fn new(start_ms: f64) -> Self {
        Self {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn set(&self, now_ms: f64) {
        self.now.set(now_ms);
    }

    /// Move forward and return the new time.
    pub fn advance(&self, delta_ms: f64) -> f64 {
        let now = self.now.get() + delta_ms;
        self.now.set(now);
        now
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_request_and_take() {
        let slot = FrameRequestSlot::new();
        assert!(!slot.has_pending());

        let a = slot.request_frame();
        let b = slot.request_frame();
        assert_ne!(a, b);
        assert_eq!(slot.pending_count(), 2);

        assert_eq!(slot.take_pending(), vec![a, b]);
        assert_eq!(slot.pending_count(), 0);
        assert_eq!(slot.total_requests(), 2);
    }

    #[test]
    fn test_slot_cancel() {
        let slot = FrameRequestSlot::new();
        let a = slot.request_frame();
        let shared = slot.clone();
        shared.cancel_frame(a);
        assert_eq!(slot.pending_count(), 0);

        // Cancelling twice or after firing is harmless
        shared.cancel_frame(a);
        let b = slot.request_frame();
        slot.take_pending();
        slot.cancel_frame(b);
        assert_eq!(slot.total_requests(), 2);
    }

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(100.0);
        let other = clock.clone();
        assert_eq!(other.advance(16.0), 116.0);
        assert_eq!(clock.now_ms(), 116.0);
        clock.set(5.0);
        assert_eq!(other.now_ms(), 5.0);
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let clock = MonotonicClock::new();
        let a = clock.now_ms();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let b = clock.now_ms();
        assert!(b > a);
        assert!(a >= 0.0);
    }
}
