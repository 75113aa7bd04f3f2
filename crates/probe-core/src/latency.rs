//! Per-call latency aggregation.

use serde::Serialize;
use std::time::Duration;

/// Convert a duration to fractional milliseconds
pub(crate) fn as_millis_f64(duration: Duration) -> f64 {
    duration.as_nanos() as f64 / 1_000_000.0
}

/// Run-level latency statistics
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RunSummary {
    pub calls_completed: u64,
    pub calls_failed: u64,
    pub total_elapsed_ms: f64,
    pub mean_elapsed_ms: f64,
    pub min_elapsed_ms: f64,
    pub max_elapsed_ms: f64,
}

/// Accumulates call latencies for a run
///
/// Only completed calls contribute to the totals. Failed calls are counted
/// separately so that a skipped call never skews the mean.
#[derive(Debug, Clone, Default)]
pub struct LatencyAggregator {
    completed: u64,
    failed: u64,
    total: Duration,
    min: Option<Duration>,
    max: Option<Duration>,
}

impl LatencyAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the round trip of a completed call
    pub fn record_call(&mut self, elapsed: Duration) {
        self.completed += 1;
        self.total += elapsed;
        self.min = Some(self.min.map_or(elapsed, |min| min.min(elapsed)));
        self.max = Some(self.max.map_or(elapsed, |max| max.max(elapsed)));
    }

    /// Record a call that was skipped after failing
    pub fn record_failure(&mut self) {
        self.failed += 1;
    }

    /// Snapshot of the statistics so far
    pub fn summary(&self) -> RunSummary {
        let total_elapsed_ms = as_millis_f64(self.total);
        let mean_elapsed_ms = if self.completed == 0 {
            0.0
        } else {
            total_elapsed_ms / self.completed as f64
        };

        RunSummary {
            calls_completed: self.completed,
            calls_failed: self.failed,
            total_elapsed_ms,
            mean_elapsed_ms,
            min_elapsed_ms: self.min.map_or(0.0, as_millis_f64),
            max_elapsed_ms: self.max.map_or(0.0, as_millis_f64),
        }
    }
}

#[cfg(test)]
#[path = "latency_tests.rs"]
mod tests;
