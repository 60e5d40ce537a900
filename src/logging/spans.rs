//! Span for one rotational search run
//!
//! Every event the search emits is parented on this span so that the run id
//! shows up on each line of console and JSON output.

use crate::pipeline::{CoordinatePair, RotationAngles};
use std::time::{Duration, Instant};
use tracing::{span, Level, Span};
use uuid::Uuid;

pub struct SearchSpan {
    span: Span,
    run_id: Uuid,
    start_time: Instant,
}

impl SearchSpan {
    pub fn new(run_id: Uuid, source: &str, target: &str) -> Self {
        let span = span!(
            Level::INFO,
            "rotational_search",
            run_id = %run_id,
            source = source,
            target = target
        );

        Self {
            span,
            run_id,
            start_time: Instant::now(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn record_seeds(&self, retained: usize, cap: usize) {
        tracing::info!(
            parent: &self.span,
            retained = retained,
            cap = cap,
            "seed pairs selected"
        );
    }

    pub fn record_seed(&self, index: usize, seed: &CoordinatePair) {
        tracing::info!(
            parent: &self.span,
            seed = index,
            source = %seed.source,
            target = %seed.target,
            delta = %seed.delta(),
            "searching rotations from seed"
        );
    }

    /// One line per evaluated grid point.
    pub fn record_candidate(&self, angles: &RotationAngles, score: f64, sequence: u64) {
        tracing::info!(
            parent: &self.span,
            sequence = sequence,
            score = score,
            "FINISHED: {} :: {}",
            angles,
            score
        );
    }

    pub fn record_new_best(&self, angles: &RotationAngles, score: f64) {
        tracing::debug!(
            parent: &self.span,
            x = angles.x,
            y = angles.y,
            z = angles.z,
            score = score,
            "new best candidate"
        );
    }

    pub fn record_result(&self, angles: &RotationAngles, score: f64, candidates: u64) {
        tracing::info!(
            parent: &self.span,
            rotation = %angles,
            score = format!("{:.5}", score),
            candidates = candidates,
            execution_time_ms = self.elapsed().as_millis() as u64,
            "rotational search completed"
        );
    }
}
