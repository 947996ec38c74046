//! Feedback controller implementing the hysteresis algorithm for the
//! effective target frame rate.
//!
//! Every tick's delta is turned into an instantaneous FPS sample. A run of
//! consecutive slow samples lowers the effective target towards the rate
//! the device actually sustains; a run of consecutive samples at or above
//! the effective target lets it climb back, one step at a time, to the
//! tier's nominal target. Any sample that breaks a run resets it, so a
//! single noisy frame never moves the target.

use crate::config::ControllerTuning;
use crate::frame_window::{FrameSample, FrameWindow};
use crate::tier::{Tier, TierPolicy};
use tracing::debug;

/// Algorithm state for hysteresis control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlgorithmState {
    /// No run in progress
    #[default]
    Stable,
    /// Consecutive ticks below the slow threshold
    Dropping { ticks: u32 },
    /// Consecutive ticks at or above the effective target
    Increasing { ticks: u32 },
}

/// Sensitivity presets for the hysteresis algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Sensitivity {
    /// Conservative: 5 slow ticks to drop, 10 fast ticks to recover
    Conservative,
    /// Balanced: 3 slow ticks to drop, 5 fast ticks to recover
    #[default]
    Balanced,
    /// Aggressive: 2 slow ticks to drop, 3 fast ticks to recover
    Aggressive,
}

impl Sensitivity {
    /// Number of consecutive slow ticks before the target is lowered.
    pub fn drop_window(&self) -> u32 {
        match self {
            Sensitivity::Conservative => 5,
            Sensitivity::Balanced => 3,
            Sensitivity::Aggressive => 2,
        }
    }

    /// Number of consecutive fast ticks before the target is raised.
    pub fn recover_window(&self) -> u32 {
        match self {
            Sensitivity::Conservative => 10,
            Sensitivity::Balanced => 5,
            Sensitivity::Aggressive => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Conservative => "conservative",
            Sensitivity::Balanced => "balanced",
            Sensitivity::Aggressive => "aggressive",
        }
    }
}

/// A committed change of the effective target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    Decreased { from: f64, to: f64 },
    Increased { from: f64, to: f64 },
}

/// Hysteresis controller for the effective target FPS.
///
/// Invariant: `policy.floor_fps <= effective_target_fps <= policy.target_fps`
/// after construction and after every update.
#[derive(Debug, Clone)]
pub struct FeedbackController {
    tier: Tier,
    policy: TierPolicy,
    tuning: ControllerTuning,
    sensitivity: Sensitivity,
    /// Disables upward recovery
    reduced_motion: bool,
    state: AlgorithmState,
    /// Samples of the current run
    run: FrameWindow,
    effective_target_fps: f64,
    display_fps: f64,
    instant_fps: f64,
    last_tick_timestamp: Option<f64>,
    frame_count: u64,
    decrease_count: u64,
    increase_count: u64,
}

impl FeedbackController {
    pub fn new(
        tier: Tier,
        policy: TierPolicy,
        tuning: ControllerTuning,
        sensitivity: Sensitivity,
        reduced_motion: bool,
    ) -> Self {
        Self {
            tier,
            policy,
            tuning,
            sensitivity,
            reduced_motion,
            state: AlgorithmState::Stable,
            run: FrameWindow::new(),
            effective_target_fps: policy.target_fps,
            display_fps: policy.target_fps,
            instant_fps: policy.target_fps,
            last_tick_timestamp: None,
            frame_count: 0,
            decrease_count: 0,
            increase_count: 0,
        }
    }

    /// Re-seed to the tier's nominal target, as on a fresh start.
    ///
    /// Adjustment counters are kept; they describe the engine's lifetime.
    pub fn reset(&mut self) {
        self.state = AlgorithmState::Stable;
        self.run.clear();
        self.effective_target_fps = self.policy.target_fps;
        self.display_fps = self.policy.target_fps;
        self.instant_fps = self.policy.target_fps;
        self.last_tick_timestamp = None;
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn policy(&self) -> TierPolicy {
        self.policy
    }

    pub fn state(&self) -> AlgorithmState {
        self.state
    }

    pub fn sensitivity(&self) -> Sensitivity {
        self.sensitivity
    }

    pub fn reduced_motion(&self) -> bool {
        self.reduced_motion
    }

    pub fn effective_target_fps(&self) -> f64 {
        self.effective_target_fps
    }

    pub fn display_fps(&self) -> f64 {
        self.display_fps
    }

    pub fn instant_fps(&self) -> f64 {
        self.instant_fps
    }

    pub fn last_tick_timestamp(&self) -> Option<f64> {
        self.last_tick_timestamp
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn decrease_count(&self) -> u64 {
        self.decrease_count
    }

    pub fn increase_count(&self) -> u64 {
        self.increase_count
    }

    /// Current effective frame interval in milliseconds.
    pub fn target_frame_time_ms(&self) -> f64 {
        1000.0 / self.effective_target_fps
    }

    /// Update sensitivity. Resets any run in progress.
    pub fn set_sensitivity(&mut self, sensitivity: Sensitivity) {
        self.sensitivity = sensitivity;
        self.state = AlgorithmState::Stable;
        self.run.clear();
    }

    /// Turn a raw delta into one the controller can use.
    ///
    /// `None` (first tick), non-finite and non-positive deltas become the
    /// tier's nominal frame interval; everything else is clamped to
    /// `[min_delta_ms, max_delta_ms]`.
    pub fn sanitize_delta(&self, raw_delta_ms: Option<f64>) -> f64 {
        let nominal = self.policy.frame_interval_ms();
        match raw_delta_ms {
            None => nominal,
            Some(delta) if !delta.is_finite() || delta <= 0.0 => {
                debug!(delta_ms = delta, "Irregular tick delta, using nominal interval");
                nominal
            }
            Some(delta) if delta > self.tuning.max_delta_ms => {
                debug!(
                    delta_ms = delta,
                    ceiling_ms = self.tuning.max_delta_ms,
                    "Clamping stalled tick delta"
                );
                self.tuning.max_delta_ms
            }
            Some(delta) => delta.max(self.tuning.min_delta_ms),
        }
    }

    /// Process a tick at `timestamp_ms`, deriving the delta from the
    /// previous tick. Returns the sanitized delta and any adjustment made.
    pub fn observe_tick(&mut self, timestamp_ms: f64) -> (f64, Option<Adjustment>) {
        let raw = self.last_tick_timestamp.map(|last| timestamp_ms - last);
        self.last_tick_timestamp = Some(timestamp_ms);
        let delta = self.sanitize_delta(raw);
        (delta, self.process_delta(delta))
    }

    /// Feed one delta (milliseconds) through smoothing and the hysteresis
    /// state machine.
    pub fn process_delta(&mut self, delta_ms: f64) -> Option<Adjustment> {
        let delta = self.sanitize_delta(Some(delta_ms));
        let sample = FrameSample::from_delta(delta);

        self.frame_count += 1;
        self.instant_fps = sample.fps;
        self.display_fps = (self.display_fps
            + (sample.fps - self.display_fps) * self.tuning.smoothing_alpha)
            .max(0.0);

        let slow = sample.fps < self.effective_target_fps * self.tuning.slow_ratio;
        let fast = sample.fps >= self.effective_target_fps;

        self.state = match self.state {
            AlgorithmState::Dropping { ticks } if slow => AlgorithmState::Dropping { ticks: ticks + 1 },
            _ if slow => {
                self.run.clear();
                AlgorithmState::Dropping { ticks: 1 }
            }
            AlgorithmState::Increasing { ticks } if fast && self.can_recover() => {
                AlgorithmState::Increasing { ticks: ticks + 1 }
            }
            _ if fast && self.can_recover() => {
                self.run.clear();
                AlgorithmState::Increasing { ticks: 1 }
            }
            _ => {
                self.run.clear();
                AlgorithmState::Stable
            }
        };

        match self.state {
            AlgorithmState::Dropping { ticks } => {
                self.run.push(sample);
                if ticks >= self.sensitivity.drop_window() {
                    return self.decrease();
                }
            }
            AlgorithmState::Increasing { ticks } => {
                self.run.push(sample);
                if ticks >= self.sensitivity.recover_window() {
                    return self.increase();
                }
            }
            AlgorithmState::Stable => {}
        }

        None
    }

    fn can_recover(&self) -> bool {
        !self.reduced_motion && self.effective_target_fps < self.policy.target_fps
    }

    fn finish_run(&mut self) {
        self.state = AlgorithmState::Stable;
        self.run.clear();
    }

    fn decrease(&mut self) -> Option<Adjustment> {
        let from = self.effective_target_fps;
        let gap = (from - self.run.mean_fps()).max(0.0);
        let step = (gap * self.tuning.decrease_gain).max(self.tuning.min_decrease_step);
        let to = self.policy.clamp(from - step);
        self.finish_run();

        if to < from {
            self.effective_target_fps = to;
            self.decrease_count += 1;
            Some(Adjustment::Decreased { from, to })
        } else {
            debug!(fps = from, "Sustained overload at tier floor, holding");
            None
        }
    }

    fn increase(&mut self) -> Option<Adjustment> {
        let from = self.effective_target_fps;
        let to = self.policy.clamp(from + self.tuning.increase_step);
        self.finish_run();

        if to > from {
            self.effective_target_fps = to;
            self.increase_count += 1;
            Some(Adjustment::Increased { from, to })
        } else {
            None
        }
    }
}
