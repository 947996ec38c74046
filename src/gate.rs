//! Pull-style render gate for clients that run their own loop.

/// Default tolerance for scheduler jitter.
pub const DEFAULT_MARGIN: f64 = 0.9;

/// Frame interval in milliseconds for a frame rate.
pub fn target_frame_time(effective_target_fps: f64) -> f64 {
    1000.0 / effective_target_fps
}

/// Whether enough time has passed since `last_render_ms` to render again.
///
/// True iff `now_ms - last_render_ms >= target_frame_time * margin`.
pub fn should_render(now_ms: f64, last_render_ms: f64, effective_target_fps: f64, margin: f64) -> bool {
    now_ms - last_render_ms >= target_frame_time(effective_target_fps) * margin
}
