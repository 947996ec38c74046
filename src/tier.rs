//! Device performance tiers and the policy table mapping each tier to
//! its frame-rate bounds.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Discrete device performance classification.
///
/// Ordered: `Low < Medium < High` in allowed workload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Low,
    #[default]
    Medium,
    High,
}

impl Tier {
    pub const ALL: [Tier; 3] = [Tier::Low, Tier::Medium, Tier::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Low => "low",
            Tier::Medium => "medium",
            Tier::High => "high",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Frame-rate bounds for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPolicy {
    /// Nominal target frame rate.
    pub target_fps: f64,
    /// Lowest frame rate the feedback controller may settle on.
    pub floor_fps: f64,
}

impl TierPolicy {
    pub const fn new(target_fps: f64, floor_fps: f64) -> Self {
        Self {
            target_fps,
            floor_fps,
        }
    }

    /// Nominal frame interval in milliseconds.
    pub fn frame_interval_ms(&self) -> f64 {
        1000.0 / self.target_fps
    }

    /// Clamp a frame rate into `[floor_fps, target_fps]`.
    pub fn clamp(&self, fps: f64) -> f64 {
        fps.clamp(self.floor_fps, self.target_fps)
    }
}

/// Pure `tier -> policy` lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TierPolicyTable {
    pub low: TierPolicy,
    pub medium: TierPolicy,
    pub high: TierPolicy,
}

impl Default for TierPolicyTable {
    fn default() -> Self {
        Self {
            low: TierPolicy::new(30.0, 15.0),
            medium: TierPolicy::new(45.0, 24.0),
            high: TierPolicy::new(60.0, 30.0),
        }
    }
}

impl TierPolicyTable {
    pub fn policy(&self, tier: Tier) -> TierPolicy {
        match tier {
            Tier::Low => self.low,
            Tier::Medium => self.medium,
            Tier::High => self.high,
        }
    }

    pub fn target_fps(&self, tier: Tier) -> f64 {
        self.policy(tier).target_fps
    }

    pub fn floor_fps(&self, tier: Tier) -> f64 {
        self.policy(tier).floor_fps
    }
}
