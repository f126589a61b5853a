//! Request counters for the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use cutout_kernel::ProcessingOutcome;
use serde::Serialize;

/// Lock-free accumulator updated once per finished request.
///
/// The request total is derived from the two outcome counters, so a
/// snapshot never reports more successes than requests.
#[derive(Debug, Default)]
pub struct MetricsAccumulator {
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    total_elapsed_nanos: AtomicU64,
}

/// Point-in-time view of [`MetricsAccumulator`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_processing_time_secs: f64,
    pub average_processing_time_secs: f64,
    pub success_rate: f64,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_outcome(&self, outcome: &ProcessingOutcome) {
        self.record(outcome.is_success(), outcome.elapsed());
    }

    pub fn record(&self, success: bool, elapsed: Duration) {
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.total_elapsed_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let successful = self.successful_requests.load(Ordering::Relaxed);
        let failed = self.failed_requests.load(Ordering::Relaxed);
        let total = successful + failed;
        let elapsed = Duration::from_nanos(self.total_elapsed_nanos.load(Ordering::Relaxed));

        let (average, success_rate) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                elapsed.as_secs_f64() / total as f64,
                successful as f64 / total as f64,
            )
        };

        MetricsSnapshot {
            total_requests: total,
            successful_requests: successful,
            failed_requests: failed,
            total_processing_time_secs: elapsed.as_secs_f64(),
            average_processing_time_secs: average,
            success_rate,
        }
    }

    pub fn reset(&self) {
        self.successful_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        self.total_elapsed_nanos.store(0, Ordering::Relaxed);
    }
}
