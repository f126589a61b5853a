//! Scripted stand-ins for the pretrained runtime, the hosted service and the
//! backend loader.
//!
//! | Double | Stands in for | Observable |
//! |--------|---------------|------------|
//! | [`ScriptedModel`] | local segmentation runtime | `calls()`, `max_in_flight()` |
//! | [`ScriptedTransport`] | hosted inference API | `calls()` |
//! | [`ScriptedLoader`] | backend construction | `loads(backend)` |

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cutout_foundation::backends::{
    BaselineBackend, LocalGpuBackend, ModelAdapter, RemoteApiBackend,
};
use cutout_foundation::BackendLoader;
use cutout_kernel::{
    BackendType, BoxError, ComputeDevice, InferenceReply, InferenceTransport, PipelineConfig,
    PipelineError, PipelineResult, SegmentationModel,
};
use image::{DynamicImage, GrayImage, ImageFormat, Luma, RgbImage};
use parking_lot::Mutex;

// ─────────────────────────────────────────────────────────────────────────────
// Scripted segmentation model
// ─────────────────────────────────────────────────────────────────────────────

/// What a [`ScriptedModel`] does on each call.
#[derive(Debug, Clone, Copy)]
pub enum Script {
    /// Return a fully opaque mask.
    Succeed,
    /// Always fail.
    Fail,
    /// Fail the first `n` calls, then succeed.
    FailTimes(usize),
    /// Sleep, then succeed.
    Sleep(Duration),
    /// Sleep `unit` per pixel of image width, then succeed.
    SleepPerWidth(Duration),
}

pub struct ScriptedModel {
    script: Script,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedModel {
    pub fn new(script: Script) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of overlapping `predict_mask` calls seen.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SegmentationModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn predict_mask(&self, image: &RgbImage) -> Result<GrayImage, BoxError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = match self.script {
            Script::Succeed => Ok(()),
            Script::Fail => Err("scripted failure"),
            Script::FailTimes(n) if call < n => Err("scripted transient failure"),
            Script::FailTimes(_) => Ok(()),
            Script::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            Script::SleepPerWidth(unit) => {
                tokio::time::sleep(unit * image.width()).await;
                Ok(())
            }
        };

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result?;
        Ok(GrayImage::from_pixel(image.width(), image.height(), Luma([255])))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripted inference transport
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub enum TransportScript {
    /// Reply with a JSON segment list holding a base64 mask, left half transparent.
    JsonMask,
    /// Fail with an HTTP-style error.
    Fail,
}

pub struct ScriptedTransport {
    script: TransportScript,
    calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn new(script: TransportScript) -> Arc<Self> {
        Arc::new(Self {
            script,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl InferenceTransport for ScriptedTransport {
    fn endpoint(&self) -> &str {
        "https://inference.test/models"
    }

    async fn submit(&self, _model: &str, png: Vec<u8>) -> Result<InferenceReply, BoxError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            TransportScript::Fail => Err("HTTP 503: model is loading".into()),
            TransportScript::JsonMask => {
                let (width, height) = image::load_from_memory(&png)?.to_rgb8().dimensions();
                let mask = GrayImage::from_fn(width, height, |x, _| {
                    if x < width / 2 { Luma([0]) } else { Luma([255]) }
                });
                let mut encoded = Vec::new();
                DynamicImage::ImageLuma8(mask)
                    .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Png)?;
                let body = serde_json::json!([{
                    "label": "foreground",
                    "score": 0.99,
                    "mask": format!("data:image/png;base64,{}", STANDARD.encode(encoded)),
                }]);
                Ok(InferenceReply {
                    content_type: Some("application/json".to_string()),
                    body: serde_json::to_vec(&body)?,
                })
            }
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scripted loader
// ─────────────────────────────────────────────────────────────────────────────

/// Builds backends from scripted collaborators and counts every construction.
#[derive(Default)]
pub struct ScriptedLoader {
    local: Option<Arc<ScriptedModel>>,
    remote: Option<Arc<ScriptedTransport>>,
    construction_delay: Duration,
    failing: Vec<BackendType>,
    panic_once: AtomicBool,
    loads: Mutex<HashMap<BackendType, usize>>,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_local(mut self, model: Arc<ScriptedModel>) -> Self {
        self.local = Some(model);
        self
    }

    pub fn with_remote(mut self, transport: Arc<ScriptedTransport>) -> Self {
        self.remote = Some(transport);
        self
    }

    /// Every construction sleeps this long first.
    pub fn with_construction_delay(mut self, delay: Duration) -> Self {
        self.construction_delay = delay;
        self
    }

    /// Constructions of `backend` fail.
    pub fn failing(mut self, backend: BackendType) -> Self {
        self.failing.push(backend);
        self
    }

    /// The first construction of any backend panics.
    pub fn panicking_once(self) -> Self {
        self.panic_once.store(true, Ordering::SeqCst);
        self
    }

    pub fn loads(&self, backend: BackendType) -> usize {
        self.loads.lock().get(&backend).copied().unwrap_or(0)
    }
}

#[async_trait]
impl BackendLoader for ScriptedLoader {
    async fn load(
        &self,
        backend: BackendType,
        config: &PipelineConfig,
    ) -> PipelineResult<ModelAdapter> {
        *self.loads.lock().entry(backend).or_default() += 1;
        if self.panic_once.swap(false, Ordering::SeqCst) {
            panic!("runtime crashed while loading weights");
        }
        if !self.construction_delay.is_zero() {
            tokio::time::sleep(self.construction_delay).await;
        }
        if self.failing.contains(&backend) {
            return Err(PipelineError::construction(backend, "scripted construction failure"));
        }

        match backend {
            BackendType::LocalGpu => {
                let model = self.local.clone().ok_or_else(|| {
                    PipelineError::construction(backend, "no segmentation runtime installed")
                })?;
                let backend = LocalGpuBackend::initialize(model, ComputeDevice::Cpu, None).await?;
                Ok(ModelAdapter::LocalGpu(backend))
            }
            BackendType::RemoteApi => {
                let transport = self.remote.clone().ok_or_else(|| {
                    PipelineError::construction(backend, "API token required")
                })?;
                Ok(ModelAdapter::RemoteApi(RemoteApiBackend::new(
                    transport,
                    &config.remote_model,
                )))
            }
            BackendType::Baseline => Ok(ModelAdapter::Baseline(BaselineBackend::default())),
        }
    }

    fn availability(&self, backend: BackendType, _config: &PipelineConfig) -> Result<(), String> {
        match backend {
            BackendType::LocalGpu if self.local.is_none() => Err("no runtime".to_string()),
            BackendType::RemoteApi if self.remote.is_none() => Err("no API token".to_string()),
            _ => Ok(()),
        }
    }
}
