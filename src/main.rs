//! render-pacer host - drives the performance engine headlessly.
//!
//! Probes the device, ticks the engine at the display refresh rate and
//! attaches the demo clients until SIGINT/SIGTERM.

use render_pacer::capability::{CapabilityProbe, SystemEnvironment};
use render_pacer::config::{Config, ConfigManager};
use render_pacer::error::{HostError, PacerError};
use render_pacer::host::{self, HostOptions, DEFAULT_REFRESH_HZ};
use render_pacer::logging;
use render_pacer::{FrameRequestSlot, MonotonicClock, PerformanceEngine};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), PacerError> {
    let config_path = ConfigManager::default_path();
    let config_manager = ConfigManager::load_or_default(&config_path).map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        e
    })?;
    let config = config_manager.get();

    // Logging with JSON to a rotating file and stderr
    let _log_guard = logging::init_logging(&config.logging).map_err(|e| {
        eprintln!("Failed to initialize logging: {}", e);
        e
    })?;

    info!(path = ?config_path, "render-pacer starting");

    let result = run(config).await;

    match &result {
        Ok(()) => info!("render-pacer shut down gracefully"),
        Err(e) => error!("render-pacer error: {}", e),
    }

    result
}

async fn run(config: Config) -> Result<(), PacerError> {
    let capabilities = CapabilityProbe::new(SystemEnvironment::new()).detect();
    let refresh_hz = capabilities.refresh_hz().unwrap_or(DEFAULT_REFRESH_HZ);

    let slot = FrameRequestSlot::new();
    let engine = PerformanceEngine::new(capabilities, &config, slot.clone(), MonotonicClock::new());

    let options = HostOptions::from_env();
    info!(
        workload_ms = options.workload_ms,
        readout_interval_ms = options.readout_interval_ms,
        refresh_hz,
        "Attaching demo clients"
    );
    let _workload = host::attach_workload(&engine, options.workload_ms);
    let _readout = host::attach_fps_readout(&engine, options.readout_interval_ms);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let signal_task = tokio::spawn(host::wait_for_shutdown_signal(shutdown_tx));

    host::run_host(&engine, &slot, refresh_hz, shutdown_rx).await?;

    // The loop only ends once the signal task has finished or failed
    match signal_task.await {
        Ok(result) => result?,
        Err(e) => return Err(HostError::Runtime(e.to_string()).into()),
    }

    Ok(())
}
