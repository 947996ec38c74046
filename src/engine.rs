//! The performance engine: one master frame loop shared by every client.
//!
//! A single outstanding [`FrameScheduler`] request drives the loop. On each
//! tick the engine re-arms the request, feeds the tick delta through the
//! [`FeedbackController`], asks the gate whether this tick should render
//! and, if so, invokes a snapshot of the registered subscribers with the
//! delta since the previous rendered tick and a metrics snapshot.
//!
//! Everything runs on the thread that owns the engine. Subscriber callbacks
//! run synchronously inside [`PerformanceEngine::tick`]; a slow callback
//! stalls the whole shared loop for that tick and there is no preemption.
//! A panicking callback is caught and logged, and dispatch continues with
//! the next subscriber.

use crate::capability::{CapabilityProbe, DeviceCapabilities, SystemEnvironment};
use crate::config::Config;
use crate::controller::{Adjustment, FeedbackController};
use crate::frame_source::{Clock, FrameHandle, FrameRequestSlot, FrameScheduler, MonotonicClock};
use crate::gate;
use crate::metrics::PerformanceMetrics;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, OnceCell, RefCell};
use std::panic::AssertUnwindSafe;
use std::rc::{Rc, Weak};
use tracing::{debug, error, info, warn};

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    #[default]
    Uninitialized,
    Running,
    Stopped,
}

type FrameCallback = Box<dyn FnMut(f64, &PerformanceMetrics)>;

struct SubscriberEntry {
    id: u64,
    /// Cleared on unsubscribe so an in-flight snapshot skips the entry
    active: Cell<bool>,
    callback: RefCell<FrameCallback>,
}

#[derive(Default)]
struct Registry {
    entries: Vec<Rc<SubscriberEntry>>,
    next_id: u64,
}

impl Registry {
    fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }
}

/// Handle returned by [`PerformanceEngine::on_frame`].
///
/// Dropping it does not unsubscribe; call [`unsubscribe`](Self::unsubscribe).
pub struct Subscription {
    id: u64,
    entry: Weak<SubscriberEntry>,
    registry: Weak<RefCell<Registry>>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the callback is still registered with a live engine.
    pub fn is_active(&self) -> bool {
        self.registry.strong_count() > 0
            && self.entry.upgrade().is_some_and(|entry| entry.active.get())
    }

    /// Remove the callback. Idempotent, and safe after the engine stopped,
    /// was dropped, or from inside the callback itself.
    pub fn unsubscribe(&self) {
        if let Some(entry) = self.entry.upgrade() {
            entry.active.set(false);
        }
        if let Some(registry) = self.registry.upgrade() {
            if registry.borrow_mut().remove(self.id) {
                debug!(subscriber = self.id, "Frame subscriber removed");
            }
        }
    }
}

struct EngineCore {
    lifecycle: EngineState,
    controller: FeedbackController,
    pending_frame: Option<FrameHandle>,
    last_render_timestamp: Option<f64>,
    rendered_frames: u64,
    skipped_frames: u64,
}

impl EngineCore {
    fn snapshot(&self) -> PerformanceMetrics {
        PerformanceMetrics::capture(&self.controller, self.rendered_frames, self.skipped_frames)
    }
}

struct EngineInner {
    capabilities: DeviceCapabilities,
    gate_margin: f64,
    core: RefCell<EngineCore>,
    registry: Rc<RefCell<Registry>>,
    scheduler: Box<dyn FrameScheduler>,
    clock: Box<dyn Clock>,
    dispatching: Cell<bool>,
}

/// Shared handle to an engine instance. Clones refer to the same engine.
#[derive(Clone)]
pub struct PerformanceEngine {
    inner: Rc<EngineInner>,
}

impl PerformanceEngine {
    /// Build an independent engine in the `Uninitialized` state.
    ///
    /// `config.reduced_motion`, when set, overrides the probed signal.
    pub fn new(
        capabilities: DeviceCapabilities,
        config: &Config,
        scheduler: impl FrameScheduler + 'static,
        clock: impl Clock + 'static,
    ) -> Self {
        let capabilities = match config.reduced_motion {
            Some(flag) => capabilities.with_reduced_motion(flag),
            None => capabilities,
        };
        let policy = config.tiers.policy(capabilities.tier);
        let controller = FeedbackController::new(
            capabilities.tier,
            policy,
            config.controller,
            config.sensitivity,
            capabilities.reduced_motion,
        );

        debug!(
            tier = %capabilities.tier,
            target_fps = policy.target_fps,
            floor_fps = policy.floor_fps,
            "Performance engine created"
        );

        Self {
            inner: Rc::new(EngineInner {
                capabilities,
                gate_margin: config.gate_margin,
                core: RefCell::new(EngineCore {
                    lifecycle: EngineState::Uninitialized,
                    controller,
                    pending_frame: None,
                    last_render_timestamp: None,
                    rendered_frames: 0,
                    skipped_frames: 0,
                }),
                registry: Rc::new(RefCell::new(Registry::default())),
                scheduler: Box::new(scheduler),
                clock: Box::new(clock),
                dispatching: Cell::new(false),
            }),
        }
    }

    pub fn state(&self) -> EngineState {
        self.inner.core.borrow().lifecycle
    }

    pub fn is_running(&self) -> bool {
        self.state() == EngineState::Running
    }

    /// Start the master loop. No-op while already running; otherwise the
    /// effective target is re-seeded to the tier's nominal target.
    pub fn start(&self) {
        let mut core = self.inner.core.borrow_mut();
        if core.lifecycle == EngineState::Running {
            return;
        }

        core.controller.reset();
        core.last_render_timestamp = None;
        core.lifecycle = EngineState::Running;
        core.pending_frame = Some(self.inner.scheduler.request_frame());

        info!(
            tier = %core.controller.tier(),
            target_fps = core.controller.effective_target_fps(),
            subscribers = self.inner.registry.borrow().entries.len(),
            "Performance engine started"
        );
    }

    /// Detach from the host frame callback. Metrics freeze at their last
    /// values and subscriptions stay registered for a later `start()`.
    pub fn stop(&self) {
        let mut core = self.inner.core.borrow_mut();
        if core.lifecycle != EngineState::Running {
            return;
        }

        if let Some(handle) = core.pending_frame.take() {
            self.inner.scheduler.cancel_frame(handle);
        }
        core.lifecycle = EngineState::Stopped;

        info!(
            effective_target_fps = core.controller.effective_target_fps(),
            display_fps = core.controller.display_fps(),
            rendered = core.rendered_frames,
            skipped = core.skipped_frames,
            "Performance engine stopped"
        );
    }

    /// Register a per-frame callback receiving `(delta_ms, metrics)`.
    ///
    /// Callbacks run in registration order. One registered during a tick is
    /// first invoked on the next tick.
    pub fn on_frame<F>(&self, callback: F) -> Subscription
    where
        F: FnMut(f64, &PerformanceMetrics) + 'static,
    {
        let mut registry = self.inner.registry.borrow_mut();
        let id = registry.next_id;
        registry.next_id += 1;

        let entry = Rc::new(SubscriberEntry {
            id,
            active: Cell::new(true),
            callback: RefCell::new(Box::new(callback)),
        });
        let subscription = Subscription {
            id,
            entry: Rc::downgrade(&entry),
            registry: Rc::downgrade(&self.inner.registry),
        };
        registry.entries.push(entry);

        debug!(subscriber = id, "Frame subscriber added");
        subscription
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.borrow().entries.len()
    }

    /// Pull gate: has enough time passed since `last_render_timestamp` (ms,
    /// same clock as the engine) to justify another render pass?
    pub fn should_render_frame(&self, last_render_timestamp: f64) -> bool {
        let effective = self.inner.core.borrow().controller.effective_target_fps();
        gate::should_render(
            self.inner.clock.now_ms(),
            last_render_timestamp,
            effective,
            self.inner.gate_margin,
        )
    }

    /// Current permitted frame interval in milliseconds.
    pub fn target_frame_time(&self) -> f64 {
        gate::target_frame_time(self.inner.core.borrow().controller.effective_target_fps())
    }

    /// Copy of the current metrics.
    pub fn metrics(&self) -> PerformanceMetrics {
        self.inner.core.borrow().snapshot()
    }

    pub fn capabilities(&self) -> DeviceCapabilities {
        self.inner.capabilities
    }

    /// Current time on the engine's clock, for pull-gate callers.
    pub fn now_ms(&self) -> f64 {
        self.inner.clock.now_ms()
    }

    /// Host frame callback. Called with the monotonic timestamp (ms) when
    /// the request made through the [`FrameScheduler`] fires.
    pub fn tick(&self, timestamp_ms: f64) {
        if self.inner.dispatching.get() {
            warn!("Tick delivered during dispatch, ignoring");
            return;
        }

        let Some((delta, metrics)) = self.advance(timestamp_ms) else {
            return;
        };

        self.inner.dispatching.set(true);
        self.dispatch(delta, &metrics);
        self.inner.dispatching.set(false);
    }

    /// Bookkeeping half of a tick. Returns the render delta and snapshot
    /// when subscribers should be invoked.
    fn advance(&self, timestamp_ms: f64) -> Option<(f64, PerformanceMetrics)> {
        let mut core = self.inner.core.borrow_mut();
        if core.lifecycle != EngineState::Running {
            debug!(timestamp_ms, "Tick while not running, ignoring");
            return None;
        }

        // Re-arm first: the loop continues whether or not this tick renders
        core.pending_frame = Some(self.inner.scheduler.request_frame());

        // Never let a bad timestamp into controller or render state
        if !timestamp_ms.is_finite() {
            debug!(timestamp_ms, "Non-finite tick timestamp, skipping tick");
            core.skipped_frames += 1;
            return None;
        }

        let (_, adjustment) = core.controller.observe_tick(timestamp_ms);
        match adjustment {
            Some(Adjustment::Decreased { from, to }) => {
                info!(from_fps = from, to_fps = to, "Lowered effective target FPS")
            }
            Some(Adjustment::Increased { from, to }) => {
                info!(from_fps = from, to_fps = to, "Raised effective target FPS")
            }
            None => {}
        }

        let effective = core.controller.effective_target_fps();
        let render = match core.last_render_timestamp {
            None => true,
            // Clock went backwards; restart the render cadence
            Some(last) if timestamp_ms < last => true,
            Some(last) => gate::should_render(timestamp_ms, last, effective, self.inner.gate_margin),
        };

        if !render {
            core.skipped_frames += 1;
            return None;
        }

        let delta = core
            .controller
            .sanitize_delta(core.last_render_timestamp.map(|last| timestamp_ms - last));
        core.last_render_timestamp = Some(timestamp_ms);
        core.rendered_frames += 1;

        Some((delta, core.snapshot()))
    }

    fn dispatch(&self, delta: f64, metrics: &PerformanceMetrics) {
        let snapshot: Vec<Rc<SubscriberEntry>> = self.inner.registry.borrow().entries.clone();

        for entry in snapshot {
            if !entry.active.get() {
                continue;
            }
            let Ok(mut callback) = entry.callback.try_borrow_mut() else {
                continue;
            };

            let result = std::panic::catch_unwind(AssertUnwindSafe(|| (*callback)(delta, metrics)));
            if result.is_err() {
                error!(subscriber = entry.id, "Frame subscriber panicked, continuing dispatch");
            }
        }
    }
}

thread_local! {
    static SHARED_ENGINE: OnceCell<(PerformanceEngine, FrameRequestSlot)> = OnceCell::new();
}

fn shared_engine() -> (PerformanceEngine, FrameRequestSlot) {
    SHARED_ENGINE.with(|cell| {
        cell.get_or_init(|| {
            let capabilities = CapabilityProbe::new(SystemEnvironment::new()).detect();
            let slot = FrameRequestSlot::new();
            let engine = PerformanceEngine::new(
                capabilities,
                &Config::default(),
                slot.clone(),
                MonotonicClock::new(),
            );
            (engine, slot)
        })
        .clone()
    })
}

/// The render thread's shared engine. The first call probes the system and
/// builds the engine in the `Uninitialized` state.
///
/// The engine is `!Send`, so the instance is per thread: each thread that
/// calls this gets its own engine and its own frame slot.
pub fn performance_engine() -> PerformanceEngine {
    shared_engine().0
}

/// Frame requests of the shared engine, for the host loop to deliver.
pub fn performance_engine_slot() -> FrameRequestSlot {
    shared_engine().1
}
