//! Hosted segmentation service reached over HTTP.

use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use cutout_kernel::imaging::apply_alpha_mask;
use cutout_kernel::{
    BackendType, BoxError, InferenceReply, InferenceTransport, PipelineError, PipelineResult,
};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::Deserialize;
use tracing::debug;

use super::BackendInfo;

/// One entry of a JSON segmentation reply.
#[derive(Debug, Deserialize)]
struct Segment {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    score: Option<f64>,
    mask: String,
}

pub struct RemoteApiBackend {
    transport: Arc<dyn InferenceTransport>,
    model: String,
}

impl fmt::Debug for RemoteApiBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteApiBackend")
            .field("endpoint", &self.transport.endpoint())
            .field("model", &self.model)
            .finish()
    }
}

impl RemoteApiBackend {
    pub fn new(transport: Arc<dyn InferenceTransport>, model: impl Into<String>) -> Self {
        Self {
            transport,
            model: model.into(),
        }
    }

    pub fn info(&self) -> BackendInfo {
        BackendInfo {
            backend: BackendType::RemoteApi,
            model_name: self.model.clone(),
            description: "Hosted segmentation inference API".to_string(),
            device: None,
            endpoint: Some(self.transport.endpoint().to_string()),
        }
    }

    pub async fn remove_background(&self, image: &DynamicImage) -> PipelineResult<DynamicImage> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| execution(format!("failed to encode request image: {e}")))?;

        let reply = self
            .transport
            .submit(&self.model, png)
            .await
            .map_err(|e| execution(e.to_string()))?;
        debug!(
            content_type = reply.content_type.as_deref().unwrap_or("-"),
            bytes = reply.body.len(),
            "remote inference replied"
        );

        let output = decode_reply(image, &reply)?;
        let (width, height) = image.dimensions();
        if output.dimensions() == (width, height) {
            Ok(output)
        } else {
            Ok(output.resize_exact(width, height, FilterType::Lanczos3))
        }
    }
}

fn execution(message: impl Into<String>) -> PipelineError {
    PipelineError::execution(BackendType::RemoteApi, message)
}

/// Interpret a reply as either a finished image or a list of masks.
fn decode_reply(input: &DynamicImage, reply: &InferenceReply) -> PipelineResult<DynamicImage> {
    if reply.body.is_empty() {
        return Err(execution("remote service returned an empty body"));
    }
    if reply.is_image() {
        return image::load_from_memory(&reply.body)
            .map_err(|e| execution(format!("unreadable image reply: {e}")));
    }

    match serde_json::from_slice::<Vec<Segment>>(&reply.body) {
        Ok(segments) => {
            let segment = segments
                .into_iter()
                .next()
                .ok_or_else(|| execution("remote service returned no segments"))?;
            debug!(
                label = segment.label.as_deref().unwrap_or("-"),
                score = segment.score.unwrap_or_default(),
                "using first returned segment"
            );
            let mask = decode_mask(&segment.mask)?;
            Ok(DynamicImage::ImageRgba8(apply_alpha_mask(input, &mask)))
        }
        // Some deployments reply with bare image bytes and no content type.
        Err(json_error) => image::load_from_memory(&reply.body).map_err(|_| {
            execution(format!("unrecognized reply from remote service: {json_error}"))
        }),
    }
}

fn decode_mask(encoded: &str) -> PipelineResult<image::GrayImage> {
    let payload = match encoded.split_once("base64,") {
        Some((_, data)) => data,
        None => encoded,
    };
    let bytes = STANDARD
        .decode(payload.trim())
        .map_err(|e| execution(format!("invalid base64 mask: {e}")))?;
    let mask = image::load_from_memory(&bytes)
        .map_err(|e| execution(format!("unreadable mask image: {e}")))?;
    Ok(mask.to_luma8())
}

/// [`InferenceTransport`] that posts PNG bytes with a bearer token.
pub struct HttpInferenceTransport {
    client: reqwest::Client,
    endpoint: String,
    token: String,
}

impl fmt::Debug for HttpInferenceTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpInferenceTransport")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl HttpInferenceTransport {
    pub fn new(endpoint: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url_for(&self, model: &str) -> String {
        format!("{}/{}", self.endpoint, model.trim_start_matches('/'))
    }
}

#[async_trait]
impl InferenceTransport for HttpInferenceTransport {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn submit(&self, model: &str, png: Vec<u8>) -> Result<InferenceReply, BoxError> {
        let response = self
            .client
            .post(self.url_for(model))
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(CONTENT_TYPE, "image/png")
            .body(png)
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await?.to_vec();

        if !status.is_success() {
            let text = String::from_utf8_lossy(&body);
            return Err(format!("HTTP {}: {}", status.as_u16(), text.trim()).into());
        }
        Ok(InferenceReply { content_type, body })
    }
}
