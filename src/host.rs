//! Headless host driver.
//!
//! Stands in for a windowing system's paint callback: a tokio interval at
//! the display refresh rate drains the engine's [`FrameRequestSlot`] and
//! delivers one tick per vsync while a request is pending. Also provides
//! the demo clients the binary attaches.

use crate::engine::{PerformanceEngine, Subscription};
use crate::error::HostError;
use crate::frame_source::FrameRequestSlot;
use std::cell::Cell;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Refresh rate assumed when the probe cannot read one.
pub const DEFAULT_REFRESH_HZ: f64 = 60.0;

/// Demo client settings, read from the environment by the binary.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HostOptions {
    /// Milliseconds of CPU the synthetic workload burns per frame
    pub workload_ms: f64,
    /// Interval between FPS readout log lines
    pub readout_interval_ms: f64,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            workload_ms: 0.0,
            readout_interval_ms: 1000.0,
        }
    }
}

impl HostOptions {
    /// `RENDER_PACER_WORKLOAD_MS` and `RENDER_PACER_READOUT_MS`, falling
    /// back to defaults for missing or malformed values.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workload_ms: env_f64("RENDER_PACER_WORKLOAD_MS")
                .filter(|ms| *ms >= 0.0)
                .unwrap_or(defaults.workload_ms),
            readout_interval_ms: env_f64("RENDER_PACER_READOUT_MS")
                .filter(|ms| *ms > 0.0)
                .unwrap_or(defaults.readout_interval_ms),
        }
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
}

/// Interval between vsyncs for a refresh rate. Invalid rates use
/// [`DEFAULT_REFRESH_HZ`].
pub fn vsync_period(refresh_hz: f64) -> Duration {
    let hz = if refresh_hz.is_finite() && refresh_hz > 0.0 {
        refresh_hz
    } else {
        DEFAULT_REFRESH_HZ
    };
    Duration::from_secs_f64(1.0 / hz)
}

/// One vsync: fire the pending frame requests with a single tick.
///
/// Returns the number of requests that were pending.
pub fn deliver_frames(engine: &PerformanceEngine, slot: &FrameRequestSlot) -> usize {
    let fired = slot.take_pending().len();
    if fired > 0 {
        engine.tick(engine.now_ms());
    }
    fired
}

/// Drive `engine` until `shutdown_rx` reports `true` or its sender is gone.
///
/// Starts the engine, ticks it at `refresh_hz` and stops it on the way out.
pub async fn run_host(
    engine: &PerformanceEngine,
    slot: &FrameRequestSlot,
    refresh_hz: f64,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), HostError> {
    let period = vsync_period(refresh_hz);
    let mut vsync = tokio::time::interval(period);
    vsync.set_missed_tick_behavior(MissedTickBehavior::Skip);

    engine.start();
    info!(period_ms = period.as_secs_f64() * 1000.0, "Host loop running");

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        tokio::select! {
            changed = shutdown_rx.changed() => {
                if changed.is_err() {
                    debug!("Shutdown sender dropped");
                    break;
                }
            }
            _ = vsync.tick() => {
                deliver_frames(engine, slot);
            }
        }
    }

    engine.stop();

    let metrics = engine.metrics();
    info!(
        tier = %metrics.tier,
        effective_target_fps = metrics.effective_target_fps,
        display_fps = metrics.display_fps,
        frames = metrics.frame_count,
        rendered = metrics.rendered_frames,
        skipped = metrics.skipped_frames,
        decreases = metrics.decrease_count,
        increases = metrics.increase_count,
        "Host loop finished"
    );

    Ok(())
}

/// Wait for SIGINT or SIGTERM, then signal shutdown.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) -> Result<(), HostError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).map_err(HostError::Signal)?;
    let mut sigint = signal(SignalKind::interrupt()).map_err(HostError::Signal)?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Wait for Ctrl+C, then signal shutdown.
#[cfg(not(unix))]
pub async fn wait_for_shutdown_signal(shutdown_tx: watch::Sender<bool>) -> Result<(), HostError> {
    tokio::signal::ctrl_c().await.map_err(HostError::Signal)?;
    info!("Received Ctrl+C");
    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Synthetic client that busy-waits `burn_ms` on every rendered frame.
pub fn attach_workload(engine: &PerformanceEngine, burn_ms: f64) -> Subscription {
    let burn = Duration::from_secs_f64(burn_ms.max(0.0) / 1000.0);
    engine.on_frame(move |_, _| {
        let started = Instant::now();
        while started.elapsed() < burn {
            std::hint::spin_loop();
        }
    })
}

/// Client that logs the smoothed FPS about every `interval_ms` of frame time.
pub fn attach_fps_readout(engine: &PerformanceEngine, interval_ms: f64) -> Subscription {
    let elapsed = Cell::new(0.0);
    engine.on_frame(move |delta_ms, metrics| {
        let total = elapsed.get() + delta_ms;
        if total < interval_ms {
            elapsed.set(total);
            return;
        }
        elapsed.set(0.0);
        info!(
            display_fps = round_tenth(metrics.display_fps),
            effective_target_fps = round_tenth(metrics.effective_target_fps),
            skipped = metrics.skipped_frames,
            "FPS"
        );
    })
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::DeviceCapabilities;
    use crate::config::Config;
    use crate::frame_source::{ManualClock, MonotonicClock};
    use std::rc::Rc;

    #[test]
    fn test_vsync_period() {
        assert_eq!(vsync_period(4.0), Duration::from_millis(250));
        assert_eq!(vsync_period(0.0), vsync_period(DEFAULT_REFRESH_HZ));
        assert_eq!(vsync_period(f64::NAN), vsync_period(DEFAULT_REFRESH_HZ));
    }

    #[test]
    fn test_host_options_default() {
        let options = HostOptions::default();
        assert_eq!(options.workload_ms, 0.0);
        assert_eq!(options.readout_interval_ms, 1000.0);
    }

    #[test]
    fn test_deliver_frames_only_when_requested() {
        let slot = FrameRequestSlot::new();
        let clock = ManualClock::new(0.0);
        let engine = PerformanceEngine::new(
            DeviceCapabilities::unknown(),
            &Config::default(),
            slot.clone(),
            clock.clone(),
        );

        // Not started: nothing pending, nothing ticks
        assert_eq!(deliver_frames(&engine, &slot), 0);
        assert_eq!(engine.metrics().frame_count, 0);

        engine.start();
        for _ in 0..3 {
            clock.advance(16.0);
            assert_eq!(deliver_frames(&engine, &slot), 1);
        }
        assert_eq!(engine.metrics().frame_count, 3);

        engine.stop();
        assert_eq!(deliver_frames(&engine, &slot), 0);
        assert_eq!(engine.metrics().frame_count, 3);
    }

    #[test]
    fn test_fps_readout_accumulates() {
        let slot = FrameRequestSlot::new();
        let clock = ManualClock::new(0.0);
        let engine = PerformanceEngine::new(
            DeviceCapabilities::unknown(),
            &Config::default(),
            slot.clone(),
            clock.clone(),
        );
        let readout = attach_fps_readout(&engine, 100.0);
        let workload = attach_workload(&engine, 0.0);
        assert_eq!(engine.subscriber_count(), 2);

        engine.start();
        for _ in 0..20 {
            clock.advance(25.0);
            deliver_frames(&engine, &slot);
        }
        assert_eq!(engine.metrics().rendered_frames, 20);

        readout.unsubscribe();
        workload.unsubscribe();
        assert_eq!(engine.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_run_host_until_shutdown() {
        let slot = FrameRequestSlot::new();
        let engine = PerformanceEngine::new(
            DeviceCapabilities::unknown(),
            &Config::default(),
            slot.clone(),
            MonotonicClock::new(),
        );
        let frames = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&frames);
        engine.on_frame(move |_, _| counter.set(counter.get() + 1));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(120)).await;
            let _ = shutdown_tx.send(true);
        });

        run_host(&engine, &slot, 120.0, shutdown_rx).await.unwrap();

        assert_eq!(engine.state(), crate::engine::EngineState::Stopped);
        assert!(frames.get() > 0);
        assert_eq!(slot.pending_count(), 0);
    }

    #[tokio::test]
    async fn test_run_host_exits_when_sender_dropped() {
        let slot = FrameRequestSlot::new();
        let engine = PerformanceEngine::new(
            DeviceCapabilities::unknown(),
            &Config::default(),
            slot.clone(),
            MonotonicClock::new(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        drop(shutdown_tx);

        run_host(&engine, &slot, 60.0, shutdown_rx).await.unwrap();
        assert_eq!(engine.state(), crate::engine::EngineState::Stopped);
    }
}
