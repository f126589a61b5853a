//! Seams to the collaborators that actually compute masks.
//!
//! The pretrained segmentation runtime and the hosted inference service are
//! supplied from outside; the pipeline only decides which one answers and
//! how their failures are absorbed.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};

/// Error type returned across the collaborator seams.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Device a local model runs on, after `auto` has been resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cuda,
    Rocm,
    Metal,
    Cpu,
}

impl ComputeDevice {
    pub fn is_accelerated(&self) -> bool {
        !matches!(self, ComputeDevice::Cpu)
    }
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ComputeDevice::Cuda => "cuda",
            ComputeDevice::Rocm => "rocm",
            ComputeDevice::Metal => "metal",
            ComputeDevice::Cpu => "cpu",
        };
        f.write_str(name)
    }
}

/// A pretrained foreground-segmentation model.
///
/// Implementations must tolerate concurrent `predict_mask` calls from
/// several requests.
#[async_trait]
pub trait SegmentationModel: Send + Sync {
    /// Human-readable model name, e.g. `briaai/RMBG-2.0`.
    fn name(&self) -> &str;

    /// Load weights onto `device`. Called once when the backend is constructed.
    async fn load(&self, device: ComputeDevice, model_path: Option<&Path>) -> Result<(), BoxError> {
        let _ = (device, model_path);
        Ok(())
    }

    /// Predict a mask where 255 is foreground and 0 is background.
    ///
    /// The mask may come back at the model's working resolution; callers
    /// rescale it to the input size.
    async fn predict_mask(&self, image: &RgbImage) -> Result<GrayImage, BoxError>;
}

/// Raw reply from a hosted inference endpoint.
#[derive(Debug, Clone, Default)]
pub struct InferenceReply {
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl InferenceReply {
    pub fn is_image(&self) -> bool {
        self.content_type
            .as_deref()
            .is_some_and(|ct| ct.trim_start().starts_with("image/"))
    }
}

/// Transport to a hosted segmentation service.
#[async_trait]
pub trait InferenceTransport: Send + Sync {
    /// Base URL requests are sent to, for status reports.
    fn endpoint(&self) -> &str;

    /// Submit a PNG-encoded image to `model` and return the raw reply.
    async fn submit(&self, model: &str, png: Vec<u8>) -> Result<InferenceReply, BoxError>;
}
