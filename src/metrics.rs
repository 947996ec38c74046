//! Read-only metrics snapshot exposed to clients.
//!
//! Snapshots are plain `Copy` values; nothing handed out here aliases the
//! engine's internal state.

use crate::controller::FeedbackController;
use crate::tier::Tier;
use serde::{Deserialize, Serialize};

/// Per-tick engine metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub tier: Tier,
    /// Tier's nominal target
    pub target_fps: f64,
    /// Tier's lowest allowed target
    pub floor_fps: f64,
    /// Live, feedback-adjusted target
    pub effective_target_fps: f64,
    /// Smoothed FPS for on-screen readouts
    pub display_fps: f64,
    /// FPS derived from the latest tick delta
    pub instant_fps: f64,
    /// Monotonic timestamp (ms) of the most recent processed tick
    pub last_tick_timestamp: Option<f64>,
    /// Ticks processed
    pub frame_count: u64,
    /// Ticks on which subscribers were invoked
    pub rendered_frames: u64,
    /// Ticks skipped by the gate
    pub skipped_frames: u64,
    /// Times the effective target was lowered
    pub decrease_count: u64,
    /// Times the effective target was raised
    pub increase_count: u64,
}

impl PerformanceMetrics {
    pub(crate) fn capture(
        controller: &FeedbackController,
        rendered_frames: u64,
        skipped_frames: u64,
    ) -> Self {
        let policy = controller.policy();
        Self {
            tier: controller.tier(),
            target_fps: policy.target_fps,
            floor_fps: policy.floor_fps,
            effective_target_fps: controller.effective_target_fps(),
            display_fps: controller.display_fps(),
            instant_fps: controller.instant_fps(),
            last_tick_timestamp: controller.last_tick_timestamp(),
            frame_count: controller.frame_count(),
            rendered_frames,
            skipped_frames,
            decrease_count: controller.decrease_count(),
            increase_count: controller.increase_count(),
        }
    }

    /// Effective frame interval in milliseconds.
    pub fn target_frame_time_ms(&self) -> f64 {
        1000.0 / self.effective_target_fps
    }

    /// Share of processed ticks that were skipped, in `[0, 1]`.
    pub fn skip_ratio(&self) -> f64 {
        let total = self.rendered_frames + self.skipped_frames;
        if total == 0 {
            0.0
        } else {
            self.skipped_frames as f64 / total as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ControllerTuning;
    use crate::controller::Sensitivity;
    use crate::tier::TierPolicyTable;

    fn controller() -> FeedbackController {
        FeedbackController::new(
            Tier::Medium,
            TierPolicyTable::default().policy(Tier::Medium),
            ControllerTuning::default(),
            Sensitivity::Balanced,
            false,
        )
    }

    #[test]
    fn test_capture_initial_values() {
        let metrics = PerformanceMetrics::capture(&controller(), 0, 0);
        assert_eq!(metrics.tier, Tier::Medium);
        assert_eq!(metrics.target_fps, 45.0);
        assert_eq!(metrics.floor_fps, 24.0);
        assert_eq!(metrics.effective_target_fps, 45.0);
        assert_eq!(metrics.display_fps, 45.0);
        assert!(metrics.last_tick_timestamp.is_none());
        assert_eq!(metrics.skip_ratio(), 0.0);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut c = controller();
        let before = PerformanceMetrics::capture(&c, 0, 0);
        for _ in 0..6 {
            c.process_delta(100.0);
        }
        assert_eq!(before.effective_target_fps, 45.0);
        assert!(PerformanceMetrics::capture(&c, 0, 0).effective_target_fps < 45.0);
    }

    #[test]
    fn test_skip_ratio() {
        let metrics = PerformanceMetrics::capture(&controller(), 3, 1);
        assert!((metrics.skip_ratio() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_metrics_serialize() {
        let metrics = PerformanceMetrics::capture(&controller(), 0, 0);
        let json = serde_json::to_value(metrics).unwrap();
        assert_eq!(json["tier"], "medium");
        assert_eq!(json["effective_target_fps"], 45.0);
    }
}
