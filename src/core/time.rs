//! Render pass timing

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Summary of recent render call durations
#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PassTimings {
    /// Mean duration in milliseconds
    pub avg_ms: f64,
    /// Shortest duration in milliseconds
    pub min_ms: f64,
    /// Longest duration in milliseconds
    pub max_ms: f64,
    /// Total number of passes ever recorded
    pub pass_count: u64,
}

/// Tracks the duration of render-into-back-buffer calls over a rolling window
pub struct PassTimer {
    started: Option<Instant>,
    last: Duration,
    pass_count: u64,
    /// Ring buffer of the most recent durations, oldest first
    history: VecDeque<Duration>,
    capacity: usize,
}

impl PassTimer {
    /// Create a timer keeping the last `capacity` passes
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            started: None,
            last: Duration::ZERO,
            pass_count: 0,
            history: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Mark the beginning of a render call
    pub fn begin(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Mark the end of a render call. Returns the measured duration.
    ///
    /// Calling `end` without a matching `begin` records nothing.
    pub fn end(&mut self) -> Option<Duration> {
        let started = self.started.take()?;
        let elapsed = started.elapsed();
        self.record(elapsed);
        Some(elapsed)
    }

    /// Record an externally measured duration
    pub fn record(&mut self, duration: Duration) {
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(duration);
        self.last = duration;
        self.pass_count += 1;
    }

    /// Duration of the most recent pass
    pub fn last(&self) -> Duration {
        self.last
    }

    /// Total number of passes recorded
    pub fn pass_count(&self) -> u64 {
        self.pass_count
    }

    /// Rolling statistics over the retained window
    pub fn timings(&self) -> PassTimings {
        if self.history.is_empty() {
            return PassTimings {
                pass_count: self.pass_count,
                ..PassTimings::default()
            };
        }

        let mut total = 0.0;
        let mut min_ms = f64::INFINITY;
        let mut max_ms = 0.0f64;
        for d in &self.history {
            let ms = d.as_secs_f64() * 1000.0;
            total += ms;
            min_ms = min_ms.min(ms);
            max_ms = max_ms.max(ms);
        }

        PassTimings {
            avg_ms: total / self.history.len() as f64,
            min_ms,
            max_ms,
            pass_count: self.pass_count,
        }
    }
}

impl Default for PassTimer {
    fn default() -> Self {
        Self::new(120)
    }
}
