use std::collections::HashMap;
use std::time::Instant;

/// Observer for monitoring-loop telemetry.
///
/// The loop reports through this trait so hosts choose where the numbers go
/// without touching the loop itself.
pub trait PipelineLogger {
    /// Frames processed so far, and the source length when it is known.
    /// Live sources have no total.
    fn progress(&mut self, current: usize, total: Option<usize>);

    /// Duration of one named stage (`detect`, `fuse`, `render`) for one frame.
    fn timing(&mut self, stage: &str, duration_ms: f64);

    /// Point-in-time gauge such as `regions` or `in_flight`.
    fn metric(&mut self, name: &str, value: f64);

    fn info(&mut self, message: &str);

    /// End-of-run report. Default: no-op.
    fn summary(&self) {}
}

pub struct NullPipelineLogger;

impl PipelineLogger for NullPipelineLogger {
    fn progress(&mut self, _current: usize, _total: Option<usize>) {}
    fn timing(&mut self, _stage: &str, _duration_ms: f64) {}
    fn metric(&mut self, _name: &str, _value: f64) {}
    fn info(&mut self, _message: &str) {}
}

/// Logger for the CLI: keeps per-stage timings and gauges and prints a
/// summary when the run ends.
///
/// Progress lines are throttled to one every `throttle_frames` frames.
pub struct StdoutPipelineLogger {
    throttle_frames: usize,
    timings: HashMap<String, Vec<f64>>,
    metrics: HashMap<String, Vec<f64>>,
    start_time: Instant,
    frames: usize,
}

impl StdoutPipelineLogger {
    pub fn new(throttle_frames: usize) -> Self {
        Self {
            throttle_frames: throttle_frames.max(1),
            timings: HashMap::new(),
            metrics: HashMap::new(),
            start_time: Instant::now(),
            frames: 0,
        }
    }

    /// Formatted summary, or `None` if nothing was recorded.
    pub fn summary_string(&self) -> Option<String> {
        if self.timings.is_empty() && self.metrics.is_empty() {
            return None;
        }

        let elapsed_ms = self.start_time.elapsed().as_secs_f64() * 1000.0;
        let frames = self.frames;
        let mut lines = vec![format!(
            "Monitoring summary ({frames} frames, {:.1}s total):",
            elapsed_ms / 1000.0
        )];

        let mut stages: Vec<_> = self.timings.keys().collect();
        stages.sort();
        for stage in stages {
            let durations = &self.timings[stage];
            let total_ms: f64 = durations.iter().sum();
            let avg_ms = mean(durations);
            let worst_ms = durations.iter().copied().fold(0.0, f64::max);
            lines.push(format!(
                "  {stage:8}: avg {avg_ms:6.1}ms  max {worst_ms:6.1}ms  total {total_ms:7.0}ms"
            ));
        }

        let mut names: Vec<_> = self.metrics.keys().collect();
        names.sort();
        for name in names {
            let values = &self.metrics[name];
            let peak = values.iter().copied().fold(0.0, f64::max);
            lines.push(format!("  {name}: avg {:.1}  peak {peak:.0}", mean(values)));
        }

        if frames > 0 && elapsed_ms > 0.0 {
            let fps = frames as f64 / (elapsed_ms / 1000.0);
            lines.push(format!("  Throughput: {fps:.1} fps"));
        }

        Some(lines.join("\n"))
    }

    pub fn timings_for(&self, stage: &str) -> Option<&[f64]> {
        self.timings.get(stage).map(|v| v.as_slice())
    }

    pub fn metrics_for(&self, name: &str) -> Option<&[f64]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }

    pub fn frames(&self) -> usize {
        self.frames
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

impl Default for StdoutPipelineLogger {
    fn default() -> Self {
        Self::new(30)
    }
}

impl PipelineLogger for StdoutPipelineLogger {
    fn progress(&mut self, current: usize, total: Option<usize>) {
        self.frames = current;
        match total {
            Some(total) if total > 0 => {
                if current % self.throttle_frames == 0 || current == total {
                    let pct = current as f64 / total as f64 * 100.0;
                    log::info!("Processing: {current}/{total} frames ({pct:.1}%)");
                }
            }
            _ => {
                if current % self.throttle_frames == 0 {
                    log::info!("Monitoring: {current} frames");
                }
            }
        }
    }

    fn timing(&mut self, stage: &str, duration_ms: f64) {
        self.timings
            .entry(stage.to_string())
            .or_default()
            .push(duration_ms);
    }

    fn metric(&mut self, name: &str, value: f64) {
        self.metrics
            .entry(name.to_string())
            .or_default()
            .push(value);
    }

    fn info(&mut self, message: &str) {
        log::info!("{message}");
    }

    fn summary(&self) {
        if let Some(text) = self.summary_string() {
            log::info!("\n\n{text}");
        }
    }
}
