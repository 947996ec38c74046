//! Capability probe: classifies the running device into a [`Tier`].
//!
//! Raw signals are read once through a [`HostEnvironment`]. Every signal is
//! a [`Signal`], so a value that cannot be read is `Unknown` and weighs
//! nothing instead of failing the probe. The worst case is `Medium`.

use crate::tier::Tier;
use serde::{Deserialize, Serialize};
use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// DRM class directory scanned for GPU vendor ids
const DRM_PATH: &str = "/sys/class/drm";

const VENDOR_INTEL: &str = "0x8086";
const VENDOR_NVIDIA: &str = "0x10de";
const VENDOR_AMD: &str = "0x1002";

pub const ENV_PIXEL_RATIO: &str = "RENDER_PACER_PIXEL_RATIO";
pub const ENV_REFRESH_HZ: &str = "RENDER_PACER_REFRESH_HZ";
pub const ENV_INPUT: &str = "RENDER_PACER_INPUT";
pub const ENV_REDUCED_MOTION: &str = "RENDER_PACER_REDUCED_MOTION";

/// A best-effort probe value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "status", content = "value")]
pub enum Signal<T> {
    Known(T),
    Unknown,
}

impl<T> Default for Signal<T> {
    fn default() -> Self {
        Signal::Unknown
    }
}

impl<T: Copy> Signal<T> {
    pub fn known(&self) -> Option<T> {
        match self {
            Signal::Known(v) => Some(*v),
            Signal::Unknown => None,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Signal::Known(_))
    }
}

impl<T> From<Option<T>> for Signal<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Signal::Known(v),
            None => Signal::Unknown,
        }
    }
}

/// Coarse GPU class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpuClass {
    Integrated,
    Discrete,
}

/// Primary input surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Touch,
    Pointer,
}

/// Raw signals the tier is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct CapabilitySignals {
    pub logical_cores: Signal<u32>,
    pub memory_gb: Signal<f64>,
    pub pixel_ratio: Signal<f64>,
    pub refresh_hz: Signal<f64>,
    pub gpu: Signal<GpuClass>,
    pub input: Signal<InputKind>,
    pub reduced_motion: Signal<bool>,
}

/// Result of the probe. Immutable once created.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    pub tier: Tier,
    pub reduced_motion: bool,
    pub signals: CapabilitySignals,
}

impl DeviceCapabilities {
    /// Classify a set of signals.
    pub fn from_signals(signals: CapabilitySignals) -> Self {
        let reduced_motion = signals.reduced_motion.known().unwrap_or(false);
        Self {
            tier: classify(&signals),
            reduced_motion,
            signals,
        }
    }

    /// Capabilities of a device with nothing readable.
    pub fn unknown() -> Self {
        Self::from_signals(CapabilitySignals::default())
    }

    /// Apply a reduced-motion override (from configuration).
    pub fn with_reduced_motion(self, reduced_motion: bool) -> Self {
        let mut signals = self.signals;
        signals.reduced_motion = Signal::Known(reduced_motion);
        Self::from_signals(signals)
    }

    /// Native refresh rate, when the host reported one.
    pub fn refresh_hz(&self) -> Option<f64> {
        self.signals.refresh_hz.known()
    }
}

/// Weighted score over the known signals. Negative leans low, positive high.
pub fn score(signals: &CapabilitySignals) -> i32 {
    let mut score = 0;

    if let Some(cores) = signals.logical_cores.known() {
        score += match cores {
            0..=2 => -2,
            3..=4 => -1,
            5..=7 => 0,
            8..=11 => 1,
            _ => 2,
        };
    }

    if let Some(memory) = signals.memory_gb.known() {
        if memory <= 2.0 {
            score -= 2;
        } else if memory <= 4.0 {
            score -= 1;
        } else if memory >= 8.0 {
            score += 1;
        }
    }

    // More pixels to shade per frame
    if signals.pixel_ratio.known().is_some_and(|ratio| ratio >= 3.0) {
        score -= 1;
    }

    if signals.refresh_hz.known().is_some_and(|hz| hz >= 100.0) {
        score += 1;
    }

    score += match signals.gpu.known() {
        Some(GpuClass::Integrated) => -1,
        Some(GpuClass::Discrete) => 1,
        None => 0,
    };

    score += match signals.input.known() {
        Some(InputKind::Touch) => -1,
        Some(InputKind::Pointer) => 1,
        None => 0,
    };

    score
}

/// Map signals to a tier. Reduced motion short-circuits to `Low`.
pub fn classify(signals: &CapabilitySignals) -> Tier {
    if signals.reduced_motion.known() == Some(true) {
        return Tier::Low;
    }

    match score(signals) {
        s if s <= -2 => Tier::Low,
        s if s >= 3 => Tier::High,
        _ => Tier::Medium,
    }
}

/// Source of raw capability signals.
pub trait HostEnvironment {
    fn logical_cores(&self) -> Signal<u32>;
    fn memory_gb(&self) -> Signal<f64>;
    fn pixel_ratio(&self) -> Signal<f64>;
    fn refresh_hz(&self) -> Signal<f64>;
    fn gpu(&self) -> Signal<GpuClass>;
    fn input(&self) -> Signal<InputKind>;
    fn reduced_motion(&self) -> Signal<bool>;

    fn signals(&self) -> CapabilitySignals {
        CapabilitySignals {
            logical_cores: self.logical_cores(),
            memory_gb: self.memory_gb(),
            pixel_ratio: self.pixel_ratio(),
            refresh_hz: self.refresh_hz(),
            gpu: self.gpu(),
            input: self.input(),
            reduced_motion: self.reduced_motion(),
        }
    }
}

/// Fixed signals, for embedding hosts that already know them and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticEnvironment(pub CapabilitySignals);

impl HostEnvironment for StaticEnvironment {
    fn logical_cores(&self) -> Signal<u32> {
        self.0.logical_cores
    }
    fn memory_gb(&self) -> Signal<f64> {
        self.0.memory_gb
    }
    fn pixel_ratio(&self) -> Signal<f64> {
        self.0.pixel_ratio
    }
    fn refresh_hz(&self) -> Signal<f64> {
        self.0.refresh_hz
    }
    fn gpu(&self) -> Signal<GpuClass> {
        self.0.gpu
    }
    fn input(&self) -> Signal<InputKind> {
        self.0.input
    }
    fn reduced_motion(&self) -> Signal<bool> {
        self.0.reduced_motion
    }
}

/// Reads signals from the operating system and environment variables.
pub struct SystemEnvironment {
    drm_path: PathBuf,
}

impl SystemEnvironment {
    pub fn new() -> Self {
        Self {
            drm_path: PathBuf::from(DRM_PATH),
        }
    }

    /// Scan a different DRM directory.
    pub fn with_drm_path(path: impl Into<PathBuf>) -> Self {
        Self {
            drm_path: path.into(),
        }
    }
}

impl Default for SystemEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

fn env_f64(name: &str) -> Option<f64> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "reduce" => Some(true),
        "0" | "false" | "no" | "off" | "no-preference" => Some(false),
        _ => None,
    }
}

fn parse_input(value: &str) -> Option<InputKind> {
    match value.trim().to_lowercase().as_str() {
        "touch" | "coarse" => Some(InputKind::Touch),
        "pointer" | "mouse" | "fine" => Some(InputKind::Pointer),
        _ => None,
    }
}

/// Classify the GPUs found under a DRM class directory.
///
/// Any discrete vendor wins over an integrated one.
fn scan_gpu_vendors(drm_path: &Path) -> Option<GpuClass> {
    let entries = std::fs::read_dir(drm_path).ok()?;
    let mut found = None;

    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        // card0, card1, ... but not connectors like card0-HDMI-A-1
        if !name.starts_with("card") || name.contains('-') {
            continue;
        }

        let vendor_path = entry.path().join("device").join("vendor");
        let Ok(vendor) = std::fs::read_to_string(&vendor_path) else {
            continue;
        };

        match vendor.trim().to_lowercase().as_str() {
            VENDOR_NVIDIA | VENDOR_AMD => return Some(GpuClass::Discrete),
            VENDOR_INTEL => found = Some(GpuClass::Integrated),
            other => debug!("Unrecognised GPU vendor {} at {:?}", other, vendor_path),
        }
    }

    found
}

#[cfg(unix)]
fn physical_memory_gb() -> Option<f64> {
    // SAFETY: sysconf has no preconditions and only reads system constants.
    let (pages, page_size) = unsafe {
        (
            libc::sysconf(libc::_SC_PHYS_PAGES),
            libc::sysconf(libc::_SC_PAGESIZE),
        )
    };
    if pages <= 0 || page_size <= 0 {
        return None;
    }
    Some(pages as f64 * page_size as f64 / (1024.0 * 1024.0 * 1024.0))
}

#[cfg(not(unix))]
fn physical_memory_gb() -> Option<f64> {
    None
}

impl HostEnvironment for SystemEnvironment {
    fn logical_cores(&self) -> Signal<u32> {
        std::thread::available_parallelism()
            .ok()
            .and_then(|n| u32::try_from(n.get()).ok())
            .into()
    }

    fn memory_gb(&self) -> Signal<f64> {
        physical_memory_gb().into()
    }

    fn pixel_ratio(&self) -> Signal<f64> {
        env_f64(ENV_PIXEL_RATIO)
            .or_else(|| env_f64("GDK_SCALE"))
            .or_else(|| env_f64("QT_SCALE_FACTOR"))
            .into()
    }

    fn refresh_hz(&self) -> Signal<f64> {
        env_f64(ENV_REFRESH_HZ).into()
    }

    fn gpu(&self) -> Signal<GpuClass> {
        scan_gpu_vendors(&self.drm_path).into()
    }

    fn input(&self) -> Signal<InputKind> {
        std::env::var(ENV_INPUT)
            .ok()
            .and_then(|v| parse_input(&v))
            .into()
    }

    fn reduced_motion(&self) -> Signal<bool> {
        if let Some(flag) = std::env::var(ENV_REDUCED_MOTION)
            .ok()
            .and_then(|v| parse_flag(&v))
        {
            return Signal::Known(flag);
        }
        // GTK's global animation switch
        match std::env::var("GTK_ENABLE_ANIMATIONS").ok().and_then(|v| parse_flag(&v)) {
            Some(animations) => Signal::Known(!animations),
            None => Signal::Unknown,
        }
    }
}

/// Runs a [`HostEnvironment`] at most once and caches the result.
pub struct CapabilityProbe<E: HostEnvironment> {
    environment: E,
    cached: OnceCell<DeviceCapabilities>,
}

impl<E: HostEnvironment> CapabilityProbe<E> {
    pub fn new(environment: E) -> Self {
        Self {
            environment,
            cached: OnceCell::new(),
        }
    }

    /// Probe on first call; later calls return the cached result.
    pub fn detect(&self) -> DeviceCapabilities {
        *self.cached.get_or_init(|| {
            let capabilities = DeviceCapabilities::from_signals(self.environment.signals());
            info!(
                tier = %capabilities.tier,
                reduced_motion = capabilities.reduced_motion,
                score = score(&capabilities.signals),
                "Device capabilities detected"
            );
            capabilities
        })
    }
}
