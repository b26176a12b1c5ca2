use log::debug;
use std::time::{Duration, Instant};

/// A running phase measurement. Created by [`PhaseTimer::begin`], consumed by
/// [`PhaseTimer::end`]; nested phases are simply nested values.
#[derive(Debug)]
#[must_use = "a phase timer does nothing unless it is ended"]
pub struct PhaseTimer {
    label: String,
    start: Instant,
}

impl PhaseTimer {
    pub fn begin(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            start: Instant::now(),
        }
    }

    /// Stop the timer, log the phase marker and return the elapsed time.
    pub fn end(self) -> Duration {
        let elapsed = self.start.elapsed();
        debug!("{}: {:.3} ms", self.label, elapsed.as_secs_f64() * 1e3);
        elapsed
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}
