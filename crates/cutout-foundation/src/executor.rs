//! Resilient Executor: retry, per-attempt timeout and fallback-chain walk
//! for a single image.

use std::sync::Arc;

use cutout_kernel::imaging::{coerce_output, normalize_input};
use cutout_kernel::{
    BackendFailure, BackendType, FailureChain, ImageMetadata, PipelineConfig, PipelineError,
    PipelineResult, ProcessingOutcome,
};
use image::DynamicImage;
use tokio::time::Instant;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::backends::ModelAdapter;
use crate::metrics::MetricsAccumulator;
use crate::registry::ModelRegistry;

struct Produced {
    image: DynamicImage,
    backend: BackendType,
    metadata: ImageMetadata,
}

/// Drives one image through its primary backend and, if that is exhausted,
/// through the fallback chain.
///
/// Everything inside a request is sequential: attempts against one backend
/// never overlap, and fallbacks are tried one at a time in chain order.
#[derive(Debug, Clone)]
pub struct ResilientExecutor {
    registry: ModelRegistry,
    config: Arc<PipelineConfig>,
    metrics: Option<Arc<MetricsAccumulator>>,
}

impl ResilientExecutor {
    /// Fails with `InvalidConfiguration` when `config` does not validate.
    pub fn new(registry: ModelRegistry, config: Arc<PipelineConfig>) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            registry,
            config,
            metrics: None,
        })
    }

    /// Record every finished request into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<MetricsAccumulator>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    /// Process one image. Never fails: problems come back as a `Failed` outcome.
    pub async fn execute(
        &self,
        image: DynamicImage,
        requested: Option<BackendType>,
        use_fallback: bool,
    ) -> ProcessingOutcome {
        let request_id = Uuid::new_v4();
        let span = info_span!("remove_background", %request_id, requested = ?requested);

        async move {
            let started = Instant::now();
            let outcome = match self.run(image, requested, use_fallback).await {
                Ok(produced) => ProcessingOutcome::succeeded(
                    request_id,
                    produced.image,
                    produced.backend,
                    produced.metadata,
                    started.elapsed(),
                ),
                Err(error) => {
                    warn!(%error, "request failed");
                    ProcessingOutcome::failed(request_id, error.to_string(), started.elapsed())
                }
            };

            if let Some(metrics) = &self.metrics {
                metrics.record_outcome(&outcome);
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        image: DynamicImage,
        requested: Option<BackendType>,
        use_fallback: bool,
    ) -> PipelineResult<Produced> {
        let input = if self.config.enable_preprocessing {
            normalize_input(image)
        } else {
            image
        };

        let primary = requested.unwrap_or(self.config.default_backend);
        let mut tried = vec![primary];
        let mut failures = Vec::new();

        match self.registry.try_get_model(primary).await {
            Ok(model) => match self.attempt_backend(primary, &model, &input).await {
                Ok(output) => return Ok(self.finish(&input, output, primary)),
                Err(error) => failures.push(error),
            },
            Err(error) => failures.push(error),
        }

        if use_fallback && self.config.fallback_enabled {
            loop {
                let walk = self.registry.next_fallback(&tried).await;
                for rejected in walk.rejected {
                    tried.extend(rejected.backend());
                    failures.push(rejected);
                }

                let Some((backend, model)) = walk.selected else {
                    break;
                };
                tried.push(backend);
                info!(from = %primary, to = %backend, "falling back");

                match self.attempt_backend(backend, &model, &input).await {
                    Ok(output) => return Ok(self.finish(&input, output, backend)),
                    Err(error) => failures.push(error),
                }
            }
        }

        Err(terminal_error(failures))
    }

    /// Up to `max_retries + 1` attempts, each bounded by the per-attempt timeout.
    async fn attempt_backend(
        &self,
        backend: BackendType,
        model: &ModelAdapter,
        image: &DynamicImage,
    ) -> PipelineResult<DynamicImage> {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let timeout = self.config.per_attempt_timeout();
        let mut last_error = None;

        for attempt in 0..max_attempts {
            debug!(%backend, attempt = attempt + 1, max_attempts, "attempting backend");

            let result = match tokio::time::timeout(timeout, model.remove_background(image)).await
            {
                Ok(result) => result,
                Err(_) => Err(PipelineError::AttemptTimeout { backend, timeout }),
            };

            match result {
                Ok(output) => {
                    self.registry.record_success(backend);
                    return Ok(output);
                }
                Err(error) => {
                    warn!(%backend, attempt = attempt + 1, max_attempts, %error, "attempt failed");
                    last_error = Some(error);

                    if attempt + 1 < max_attempts {
                        let delay = self.config.retry_delay();
                        debug!(
                            %backend,
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "retrying backend after delay"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        let error = last_error
            .unwrap_or_else(|| PipelineError::execution(backend, "no attempts were made"));
        warn!(
            %backend,
            max_retries = self.config.max_retries,
            %error,
            "backend exhausted all attempts"
        );
        self.registry.record_exhausted(backend, &error);
        Err(error)
    }

    fn finish(&self, input: &DynamicImage, output: DynamicImage, backend: BackendType) -> Produced {
        let image = if self.config.enable_postprocessing {
            coerce_output(output)
        } else {
            output
        };
        let metadata = ImageMetadata::describe(input, &image);
        debug!(%backend, ?metadata, "request succeeded");
        Produced {
            image,
            backend,
            metadata,
        }
    }
}

/// A lone failure is reported as is; several become a chain report.
fn terminal_error(mut failures: Vec<PipelineError>) -> PipelineError {
    if failures.len() == 1
        && let Some(error) = failures.pop()
    {
        return error;
    }
    PipelineError::ChainExhausted {
        failures: FailureChain(
            failures
                .iter()
                .filter_map(BackendFailure::from_error)
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn single_failure_is_reported_unwrapped() {
        let error = PipelineError::execution(BackendType::Baseline, "boom");
        assert_eq!(terminal_error(vec![error.clone()]), error);
    }

    #[test]
    fn several_failures_become_a_chain() {
        let error = terminal_error(vec![
            PipelineError::AttemptTimeout {
                backend: BackendType::LocalGpu,
                timeout: Duration::from_secs(2),
            },
            PipelineError::construction(BackendType::RemoteApi, "no token"),
            PipelineError::execution(BackendType::Baseline, "empty image"),
        ]);
        assert_eq!(
            error.to_string(),
            "all backends failed: primary local-gpu: attempt timed out after 2s; \
             fallback remote-api: construction failed: no token; \
             fallback baseline: empty image"
        );
    }
}
