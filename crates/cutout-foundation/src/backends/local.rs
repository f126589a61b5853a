//! Pretrained segmentation model running on the host.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use cutout_kernel::imaging::apply_alpha_mask;
use cutout_kernel::{BackendType, ComputeDevice, PipelineError, PipelineResult, SegmentationModel};
use image::DynamicImage;
use tracing::{debug, info};

use super::BackendInfo;

pub struct LocalGpuBackend {
    model: Arc<dyn SegmentationModel>,
    device: ComputeDevice,
    model_path: Option<PathBuf>,
}

impl fmt::Debug for LocalGpuBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalGpuBackend")
            .field("model", &self.model.name())
            .field("device", &self.device)
            .field("model_path", &self.model_path)
            .finish()
    }
}

impl LocalGpuBackend {
    /// Load the model onto `device`. Any failure here is a construction error.
    pub async fn initialize(
        model: Arc<dyn SegmentationModel>,
        device: ComputeDevice,
        model_path: Option<PathBuf>,
    ) -> PipelineResult<Self> {
        if let Some(path) = &model_path
            && !path.exists()
        {
            return Err(PipelineError::construction(
                BackendType::LocalGpu,
                format!("model path {} does not exist", path.display()),
            ));
        }

        model
            .load(device, model_path.as_deref())
            .await
            .map_err(|e| PipelineError::construction(BackendType::LocalGpu, e.to_string()))?;

        info!(model = model.name(), %device, "local segmentation model loaded");
        Ok(Self {
            model,
            device,
            model_path,
        })
    }

    pub fn device(&self) -> ComputeDevice {
        self.device
    }

    pub fn info(&self) -> BackendInfo {
        BackendInfo {
            backend: BackendType::LocalGpu,
            model_name: self.model.name().to_string(),
            description: "Pretrained segmentation model on local hardware".to_string(),
            device: Some(self.device.to_string()),
            endpoint: None,
        }
    }

    pub async fn remove_background(&self, image: &DynamicImage) -> PipelineResult<DynamicImage> {
        let rgb = image.to_rgb8();
        let mask = self
            .model
            .predict_mask(&rgb)
            .await
            .map_err(|e| PipelineError::execution(BackendType::LocalGpu, e.to_string()))?;

        if mask.width() == 0 || mask.height() == 0 {
            return Err(PipelineError::execution(
                BackendType::LocalGpu,
                "model returned an empty mask",
            ));
        }

        debug!(
            mask_width = mask.width(),
            mask_height = mask.height(),
            "applying predicted mask"
        );
        Ok(DynamicImage::ImageRgba8(apply_alpha_mask(image, &mask)))
    }
}
