//! render-pacer: adaptive frame pacing for rendering clients.
//!
//! One shared engine classifies the device into a performance tier, runs a
//! single master frame loop, adapts the effective target FPS to observed
//! frame times and tells subscribed clients when to render.

pub mod capability;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod frame_source;
pub mod frame_window;
pub mod gate;
pub mod host;
pub mod logging;
pub mod metrics;
pub mod tier;

pub use capability::{CapabilityProbe, DeviceCapabilities, HostEnvironment, Signal};
pub use config::{Config, ConfigManager};
pub use controller::Sensitivity;
pub use engine::{
    performance_engine, performance_engine_slot, EngineState, PerformanceEngine, Subscription,
};
pub use error::PacerError;
pub use frame_source::{Clock, FrameHandle, FrameRequestSlot, FrameScheduler, ManualClock, MonotonicClock};
pub use metrics::PerformanceMetrics;
pub use tier::{Tier, TierPolicy, TierPolicyTable};
