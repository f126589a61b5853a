//! Batch Orchestrator: bounded-parallel fan-out over the executor.

use std::sync::Arc;
use std::time::Duration;

use cutout_kernel::config::BATCH_CONCURRENCY_RANGE;
use cutout_kernel::{BackendType, BatchOutcome, PipelineError, PipelineResult, ProcessingOutcome};
use futures::future::join_all;
use image::DynamicImage;
use tokio::time::Instant;
use tracing::{Instrument, debug, error, info};
use uuid::Uuid;

use crate::executor::ResilientExecutor;
use crate::metrics::MetricsAccumulator;

/// Runs a batch in chunks of at most `concurrency` images.
///
/// Every image in a chunk is processed concurrently and the whole chunk
/// finishes before the next one starts. Outcomes keep input order.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    executor: Arc<ResilientExecutor>,
    concurrency: usize,
    metrics: Option<Arc<MetricsAccumulator>>,
}

impl BatchOrchestrator {
    /// Fails with `InvalidConfiguration` when `concurrency` is out of range.
    pub fn new(executor: Arc<ResilientExecutor>, concurrency: usize) -> PipelineResult<Self> {
        if !BATCH_CONCURRENCY_RANGE.contains(&concurrency) {
            return Err(PipelineError::InvalidConfiguration(format!(
                "batch_concurrency must be within {}..={}, got {concurrency}",
                BATCH_CONCURRENCY_RANGE.start(),
                BATCH_CONCURRENCY_RANGE.end()
            )));
        }
        Ok(Self {
            executor,
            concurrency,
            metrics: None,
        })
    }

    /// Count worker faults in `metrics`. Executor outcomes are counted by the executor.
    pub fn with_metrics(mut self, metrics: Arc<MetricsAccumulator>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub async fn process_batch(
        &self,
        images: Vec<DynamicImage>,
        requested: Option<BackendType>,
        use_fallback: bool,
    ) -> BatchOutcome {
        let started = Instant::now();
        let total = images.len();
        let chunks = total.div_ceil(self.concurrency);
        info!(total, concurrency = self.concurrency, chunks, "processing batch");

        let mut outcomes = Vec::with_capacity(total);
        let mut images = images.into_iter();
        let mut chunk_index = 0;
        loop {
            let chunk: Vec<DynamicImage> = images.by_ref().take(self.concurrency).collect();
            if chunk.is_empty() {
                break;
            }
            chunk_index += 1;
            debug!(chunk = chunk_index, chunks, size = chunk.len(), "starting chunk");

            let handles: Vec<_> = chunk
                .into_iter()
                .map(|image| {
                    let executor = Arc::clone(&self.executor);
                    tokio::spawn(
                        async move { executor.execute(image, requested, use_fallback).await }
                            .in_current_span(),
                    )
                })
                .collect();

            for joined in join_all(handles).await {
                let outcome = joined.unwrap_or_else(|join_error| {
                    error!(error = %join_error, "batch worker crashed");
                    let outcome = ProcessingOutcome::failed(
                        Uuid::new_v4(),
                        format!("worker task failed: {join_error}"),
                        Duration::ZERO,
                    );
                    if let Some(metrics) = &self.metrics {
                        metrics.record_outcome(&outcome);
                    }
                    outcome
                });
                outcomes.push(outcome);
            }
        }

        let batch = BatchOutcome::from_outcomes(outcomes, started.elapsed());
        info!(
            total = batch.total,
            successful = batch.successful,
            failed = batch.failed,
            elapsed_ms = batch.total_elapsed.as_millis() as u64,
            "batch complete"
        );
        batch
    }
}
