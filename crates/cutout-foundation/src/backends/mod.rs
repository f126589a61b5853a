//! The closed set of background-removal backends.
//!
//! Every backend exposes the same two capabilities. The set is known at
//! compile time, so it is an enum rather than a trait object; the open
//! seams are one level down, at the pretrained runtime and the transport.

mod baseline;
mod local;
mod remote;

pub use baseline::BaselineBackend;
pub use local::LocalGpuBackend;
pub use remote::{HttpInferenceTransport, RemoteApiBackend};

use cutout_kernel::{BackendType, Capability, PipelineResult};
use image::DynamicImage;
use serde::Serialize;
use tracing::{debug, warn};

/// Descriptive facts about a constructed backend, for status reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendInfo {
    pub backend: BackendType,
    pub model_name: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// A constructed backend instance. Owned by the model registry.
#[derive(Debug)]
pub enum ModelAdapter {
    LocalGpu(LocalGpuBackend),
    RemoteApi(RemoteApiBackend),
    Baseline(BaselineBackend),
}

const ALL_CAPABILITIES: &[Capability] = &[
    Capability::RemoveBackground,
    Capability::BatchRemoveBackground,
];

impl ModelAdapter {
    pub fn backend_type(&self) -> BackendType {
        match self {
            ModelAdapter::LocalGpu(_) => BackendType::LocalGpu,
            ModelAdapter::RemoteApi(_) => BackendType::RemoteApi,
            ModelAdapter::Baseline(_) => BackendType::Baseline,
        }
    }

    pub fn capabilities(&self) -> &'static [Capability] {
        ALL_CAPABILITIES
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    pub fn info(&self) -> BackendInfo {
        match self {
            ModelAdapter::LocalGpu(backend) => backend.info(),
            ModelAdapter::RemoteApi(backend) => backend.info(),
            ModelAdapter::Baseline(backend) => backend.info(),
        }
    }

    /// Return `image` with its background made transparent.
    ///
    /// Fails with `BackendExecution` on any internal failure; never hands
    /// the input back unchanged.
    pub async fn remove_background(&self, image: &DynamicImage) -> PipelineResult<DynamicImage> {
        match self {
            ModelAdapter::LocalGpu(backend) => backend.remove_background(image).await,
            ModelAdapter::RemoteApi(backend) => backend.remove_background(image).await,
            ModelAdapter::Baseline(backend) => backend.remove_background(image),
        }
    }

    /// Process each image in turn. A failed slot holds its original input.
    pub async fn batch_remove_background(&self, images: &[DynamicImage]) -> Vec<DynamicImage> {
        let backend = self.backend_type();
        let mut results = Vec::with_capacity(images.len());
        for (idx, image) in images.iter().enumerate() {
            match self.remove_background(image).await {
                Ok(output) => {
                    debug!(%backend, item = idx + 1, total = images.len(), "processed image");
                    results.push(output);
                }
                Err(error) => {
                    warn!(%backend, item = idx + 1, %error, "keeping original image after failure");
                    results.push(image.clone());
                }
            }
        }
        results
    }
}
