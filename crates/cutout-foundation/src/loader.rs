//! Backend construction.
//!
//! The registry decides *when* a backend is built and makes sure it is
//! built once; a [`BackendLoader`] decides *how*.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use cutout_kernel::{
    BackendType, InferenceTransport, PipelineConfig, PipelineError, PipelineResult,
    SegmentationModel,
};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::backends::{
    BaselineBackend, HttpInferenceTransport, LocalGpuBackend, ModelAdapter, RemoteApiBackend,
};
use crate::device::{HostAccelerators, detect_accelerators};

/// Builds backend instances from configuration.
#[async_trait]
pub trait BackendLoader: Send + Sync {
    /// Construct `backend`. Errors are `BackendConstruction`.
    async fn load(&self, backend: BackendType, config: &PipelineConfig)
    -> PipelineResult<ModelAdapter>;

    /// Cheap check for whether `load` has any chance of succeeding.
    ///
    /// The fallback walk skips unavailable backends without constructing them.
    fn availability(&self, backend: BackendType, config: &PipelineConfig) -> Result<(), String> {
        let _ = (backend, config);
        Ok(())
    }
}

/// Loader for the built-in backends.
///
/// The local backend needs a [`SegmentationModel`]; the remote backend uses
/// the given transport or, failing that, HTTP with the configured token.
#[derive(Clone, Default)]
pub struct DefaultBackendLoader {
    segmentation: Option<Arc<dyn SegmentationModel>>,
    transport: Option<Arc<dyn InferenceTransport>>,
    accelerators: Arc<OnceCell<HostAccelerators>>,
}

impl fmt::Debug for DefaultBackendLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultBackendLoader")
            .field("segmentation", &self.segmentation.as_ref().map(|m| m.name().to_string()))
            .field("transport", &self.transport.as_ref().map(|t| t.endpoint().to_string()))
            .field("accelerators", &self.accelerators.get())
            .finish()
    }
}

impl DefaultBackendLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_segmentation_model(mut self, model: Arc<dyn SegmentationModel>) -> Self {
        self.segmentation = Some(model);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn InferenceTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Skip host probing and use `accelerators` as found.
    pub fn with_accelerators(self, accelerators: HostAccelerators) -> Self {
        Self {
            accelerators: Arc::new(OnceCell::new_with(Some(accelerators))),
            ..self
        }
    }

    async fn accelerators(&self) -> HostAccelerators {
        self.accelerators
            .get_or_init(|| async {
                match tokio::task::spawn_blocking(detect_accelerators).await {
                    Ok(found) => {
                        debug!(?found, "host accelerators detected");
                        found
                    }
                    Err(error) => {
                        debug!(%error, "accelerator probe failed, assuming CPU only");
                        HostAccelerators::cpu_only()
                    }
                }
            })
            .await
            .clone()
    }

    async fn load_local(&self, config: &PipelineConfig) -> PipelineResult<ModelAdapter> {
        let model = self.segmentation.clone().ok_or_else(|| {
            PipelineError::construction(BackendType::LocalGpu, "no segmentation runtime installed")
        })?;
        let device = self
            .accelerators()
            .await
            .resolve(config.device)
            .map_err(|msg| PipelineError::construction(BackendType::LocalGpu, msg))?;

        let backend =
            LocalGpuBackend::initialize(model, device, config.local_model_path.clone()).await?;
        Ok(ModelAdapter::LocalGpu(backend))
    }

    fn load_remote(&self, config: &PipelineConfig) -> PipelineResult<ModelAdapter> {
        let transport = match &self.transport {
            Some(transport) => Arc::clone(transport),
            None => {
                let token = config.resolved_api_token().ok_or_else(|| {
                    PipelineError::construction(
                        BackendType::RemoteApi,
                        "API token required (set api_token or HF_TOKEN)",
                    )
                })?;
                Arc::new(HttpInferenceTransport::new(&config.api_endpoint, token))
            }
        };
        info!(endpoint = transport.endpoint(), model = %config.remote_model, "remote backend ready");
        Ok(ModelAdapter::RemoteApi(RemoteApiBackend::new(
            transport,
            &config.remote_model,
        )))
    }
}

#[async_trait]
impl BackendLoader for DefaultBackendLoader {
    async fn load(
        &self,
        backend: BackendType,
        config: &PipelineConfig,
    ) -> PipelineResult<ModelAdapter> {
        match backend {
            BackendType::LocalGpu => self.load_local(config).await,
            BackendType::RemoteApi => self.load_remote(config),
            BackendType::Baseline => Ok(ModelAdapter::Baseline(BaselineBackend::default())),
        }
    }

    fn availability(&self, backend: BackendType, config: &PipelineConfig) -> Result<(), String> {
        match backend {
            BackendType::LocalGpu if self.segmentation.is_none() => {
                Err("no segmentation runtime installed".to_string())
            }
            BackendType::RemoteApi
                if self.transport.is_none() && config.resolved_api_token().is_none() =>
            {
                Err("no API token configured".to_string())
            }
            _ => Ok(()),
        }
    }
}
