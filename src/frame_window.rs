//! Bounded rolling window of recent frame samples.
//!
//! The feedback controller collects the samples of the current slow or
//! fast run here and reads their mean when it decides on an adjustment.

use std::collections::VecDeque;

/// Default capacity. Larger than any sensitivity preset's run length.
pub const WINDOW_CAPACITY: usize = 32;

/// One processed tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSample {
    /// Instantaneous FPS derived from the sanitized delta.
    pub fps: f64,
    /// Sanitized delta in milliseconds.
    pub frame_time_ms: f64,
}

impl FrameSample {
    pub fn from_delta(frame_time_ms: f64) -> Self {
        Self {
            fps: 1000.0 / frame_time_ms,
            frame_time_ms,
        }
    }
}

/// Ring buffer of frame samples with fixed capacity.
#[derive(Debug, Clone)]
pub struct FrameWindow {
    samples: VecDeque<FrameSample>,
    capacity: usize,
}

impl FrameWindow {
    pub fn new() -> Self {
        Self::with_capacity(WINDOW_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Push a new sample, removing the oldest if at capacity.
    pub fn push(&mut self, sample: FrameSample) {
        if self.samples.len() >= self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Mean FPS over the window, 0.0 when empty.
    pub fn mean_fps(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.samples.iter().map(|s| s.fps).sum();
        sum / self.samples.len() as f64
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }
}

impl Default for FrameWindow {
    fn default() -> Self {
        Self::new()
    }
}
