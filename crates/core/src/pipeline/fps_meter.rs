use std::collections::VecDeque;
use std::time::{Duration, Instant};

pub const DEFAULT_FPS_WINDOW: usize = 30;

/// Frame rate over a sliding window of recent cycle completions.
pub struct FpsMeter {
    window: usize,
    ticks: VecDeque<Instant>,
}

impl FpsMeter {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(2),
            ticks: VecDeque::new(),
        }
    }

    pub fn tick(&mut self) -> Option<f64> {
        self.tick_at(Instant::now())
    }

    /// Records a cycle completing at `now`. `None` until two ticks exist.
    pub fn tick_at(&mut self, now: Instant) -> Option<f64> {
        if self.ticks.len() == self.window {
            self.ticks.pop_front();
        }
        self.ticks.push_back(now);
        self.fps()
    }

    pub fn fps(&self) -> Option<f64> {
        let (first, last) = (self.ticks.front()?, self.ticks.back()?);
        let span = last.saturating_duration_since(*first);
        if span == Duration::ZERO {
            return None;
        }
        Some((self.ticks.len() - 1) as f64 / span.as_secs_f64())
    }

    pub fn reset(&mut self) {
        self.ticks.clear();
    }
}

impl Default for FpsMeter {
    fn default() -> Self {
        Self::new(DEFAULT_FPS_WINDOW)
    }
}
