//! Metrics for publishers, replicas and links
//!
//! Metrics go through the `metrics` facade; without an installed recorder every
//! call is a no-op.

use metrics::{describe_counter, describe_gauge, describe_histogram, histogram};
use std::time::Instant;

/// Initialize metrics with descriptions
pub fn init_metrics() {
    // Publisher metrics
    describe_counter!("replica.publisher.deltas", "Number of deltas published");
    describe_gauge!("replica.publisher.subscribers", "Current number of publisher subscribers");

    // Reconciler metrics
    describe_counter!("replica.reconciler.deltas_applied", "Deltas applied to replicas");
    describe_counter!("replica.reconciler.resyncs", "Full resyncs started by replicas");
    describe_counter!("replica.reconciler.resync_failures", "Resyncs that failed to fetch a snapshot");
    describe_histogram!("replica.reconciler.resync_ms", "Resync duration in milliseconds");

    // Link metrics
    describe_counter!("replica.link.frames_sent", "Delta frames handed to the link");
    describe_counter!("replica.link.frames_dropped", "Delta frames dropped by fault injection");
    describe_counter!("replica.link.frames_reordered", "Delta frames held back by fault injection");
    describe_counter!("replica.link.frames_undecodable", "Delta frames the remote could not decode");
}

/// Timer for measuring operation duration
pub struct Timer {
    name: &'static str,
    start: Instant,
}

impl Timer {
    /// Create a new timer
    pub fn new(name: &'static str) -> Self {
        Self { name, start: Instant::now() }
    }

    /// Stop the timer and record the duration
    pub fn stop(self) -> f64 {
        let elapsed_ms = self.start.elapsed().as_secs_f64() * 1000.0;
        histogram!(self.name).record(elapsed_ms);
        elapsed_ms
    }
}
