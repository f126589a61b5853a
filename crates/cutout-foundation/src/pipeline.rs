//! The public face of the pipeline.

use std::collections::BTreeMap;
use std::sync::Arc;

use cutout_kernel::{
    BackendType, BatchOutcome, HealthStatus, PipelineConfig, PipelineResult, ProcessingOutcome,
};
use image::DynamicImage;
use serde::Serialize;
use tracing::info;

use crate::batch::BatchOrchestrator;
use crate::executor::ResilientExecutor;
use crate::loader::{BackendLoader, DefaultBackendLoader};
use crate::metrics::{MetricsAccumulator, MetricsSnapshot};
use crate::registry::ModelRegistry;

/// Configuration facts worth showing in a status report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigSummary {
    pub default_backend: BackendType,
    pub fallback_enabled: bool,
    pub fallback_chain: Vec<BackendType>,
    pub batch_concurrency: usize,
    pub max_retries: u32,
    pub per_attempt_timeout_secs: f64,
}

impl From<&PipelineConfig> for ConfigSummary {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            default_backend: config.default_backend,
            fallback_enabled: config.fallback_enabled,
            fallback_chain: config.fallback_chain.clone(),
            batch_concurrency: config.batch_concurrency,
            max_retries: config.max_retries,
            per_attempt_timeout_secs: config.per_attempt_timeout_secs,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub pipeline: &'static str,
    pub config: ConfigSummary,
    pub backends: BTreeMap<BackendType, HealthStatus>,
    pub metrics: MetricsSnapshot,
}

/// Background-removal pipeline: registry, executor and batch orchestrator
/// wired from one configuration.
#[derive(Debug, Clone)]
pub struct BackgroundRemovalPipeline {
    config: Arc<PipelineConfig>,
    registry: ModelRegistry,
    executor: Arc<ResilientExecutor>,
    batch: BatchOrchestrator,
    metrics: Arc<MetricsAccumulator>,
}

impl BackgroundRemovalPipeline {
    /// Build with the built-in backends. Fails only on invalid configuration.
    pub fn new(config: PipelineConfig) -> PipelineResult<Self> {
        Self::with_loader(config, Arc::new(DefaultBackendLoader::new()))
    }

    pub fn with_loader(
        config: PipelineConfig,
        loader: Arc<dyn BackendLoader>,
    ) -> PipelineResult<Self> {
        let config = Arc::new(config);
        let metrics = Arc::new(MetricsAccumulator::new());
        let registry = ModelRegistry::new(Arc::clone(&config), loader)?;

        let mut executor = ResilientExecutor::new(registry.clone(), Arc::clone(&config))?;
        let mut batch_metrics = None;
        if config.collect_metrics {
            executor = executor.with_metrics(Arc::clone(&metrics));
            batch_metrics = Some(Arc::clone(&metrics));
        }
        let executor = Arc::new(executor);

        let mut batch = BatchOrchestrator::new(Arc::clone(&executor), config.batch_concurrency)?;
        if let Some(metrics) = batch_metrics {
            batch = batch.with_metrics(metrics);
        }

        info!(
            default_backend = %config.default_backend,
            fallback_enabled = config.fallback_enabled,
            batch_concurrency = config.batch_concurrency,
            "background removal pipeline initialized"
        );
        Ok(Self {
            config,
            registry,
            executor,
            batch,
            metrics,
        })
    }

    /// Remove the background from one image.
    pub async fn process(
        &self,
        image: DynamicImage,
        backend: Option<BackendType>,
        use_fallback: bool,
    ) -> ProcessingOutcome {
        self.executor.execute(image, backend, use_fallback).await
    }

    /// Remove the background from every image; outcomes keep input order.
    pub async fn process_batch(
        &self,
        images: Vec<DynamicImage>,
        backend: Option<BackendType>,
        use_fallback: bool,
    ) -> BatchOutcome {
        self.batch.process_batch(images, backend, use_fallback).await
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn reset_metrics(&self) {
        self.metrics.reset();
        info!("pipeline metrics reset");
    }

    pub fn get_status(&self) -> PipelineStatus {
        PipelineStatus {
            pipeline: "active",
            config: ConfigSummary::from(self.config.as_ref()),
            backends: self.registry.all_health(),
            metrics: self.get_metrics(),
        }
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
