//! Pipeline configuration snapshot.

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;

use error_stack::ResultExt;
use serde::{Deserialize, Serialize};

use super::{ConfigError, ConfigResult, FileFormat};
use crate::backend::BackendType;
use crate::error::{PipelineError, PipelineResult};

pub const MAX_RETRIES_RANGE: RangeInclusive<u32> = 0..=5;
pub const RETRY_DELAY_SECS_RANGE: RangeInclusive<f64> = 0.1..=10.0;
pub const PER_ATTEMPT_TIMEOUT_SECS_RANGE: RangeInclusive<f64> = 1.0..=300.0;
pub const BATCH_CONCURRENCY_RANGE: RangeInclusive<usize> = 1..=100;

pub const DEFAULT_API_ENDPOINT: &str = "https://router.huggingface.co/hf-inference/models";
pub const DEFAULT_REMOTE_MODEL: &str = "briaai/RMBG-2.0";

/// Compute device requested for the local backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    /// Probe the host and take the best accelerator, else CPU.
    #[default]
    Auto,
    Cuda,
    Cpu,
}

/// Immutable configuration consumed when a pipeline is built.
///
/// Every field has a default, so partial files are fine. Call
/// [`PipelineConfig::validate`] (the pipeline constructor does) before use.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Backend tried first when a request names none.
    pub default_backend: BackendType,
    /// Master switch for the fallback chain.
    pub fallback_enabled: bool,
    /// Candidates consulted, in order, after the primary is exhausted.
    pub fallback_chain: Vec<BackendType>,
    /// Maximum in-flight requests per batch chunk.
    pub batch_concurrency: usize,
    pub per_attempt_timeout_secs: f64,
    /// Additional attempts against the same backend after the first.
    pub max_retries: u32,
    pub retry_delay_secs: f64,
    /// Convert input to 3-channel RGB before dispatch.
    pub enable_preprocessing: bool,
    /// Convert output to 4-channel RGBA.
    pub enable_postprocessing: bool,
    pub device: Device,
    /// Model artifact for the local backend; must exist when set.
    pub local_model_path: Option<PathBuf>,
    /// Token for the remote backend. Falls back to `HF_TOKEN`.
    #[serde(skip_serializing)]
    pub api_token: Option<String>,
    pub api_endpoint: String,
    pub remote_model: String,
    /// Whether outcomes update the metrics accumulator.
    pub collect_metrics: bool,
    pub log_level: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_backend: BackendType::Baseline,
            fallback_enabled: true,
            fallback_chain: vec![
                BackendType::LocalGpu,
                BackendType::RemoteApi,
                BackendType::Baseline,
            ],
            batch_concurrency: 10,
            per_attempt_timeout_secs: 30.0,
            max_retries: 2,
            retry_delay_secs: 1.0,
            enable_preprocessing: true,
            enable_postprocessing: true,
            device: Device::Auto,
            local_model_path: None,
            api_token: None,
            api_endpoint: DEFAULT_API_ENDPOINT.to_string(),
            remote_model: DEFAULT_REMOTE_MODEL.to_string(),
            collect_metrics: true,
            log_level: "info".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject out-of-range options. The only error allowed to stop startup.
    pub fn validate(&self) -> PipelineResult<()> {
        if !MAX_RETRIES_RANGE.contains(&self.max_retries) {
            return Err(out_of_range("max_retries", self.max_retries, &MAX_RETRIES_RANGE));
        }
        if !RETRY_DELAY_SECS_RANGE.contains(&self.retry_delay_secs) {
            return Err(out_of_range(
                "retry_delay_secs",
                self.retry_delay_secs,
                &RETRY_DELAY_SECS_RANGE,
            ));
        }
        if !PER_ATTEMPT_TIMEOUT_SECS_RANGE.contains(&self.per_attempt_timeout_secs) {
            return Err(out_of_range(
                "per_attempt_timeout_secs",
                self.per_attempt_timeout_secs,
                &PER_ATTEMPT_TIMEOUT_SECS_RANGE,
            ));
        }
        if !BATCH_CONCURRENCY_RANGE.contains(&self.batch_concurrency) {
            return Err(out_of_range(
                "batch_concurrency",
                self.batch_concurrency,
                &BATCH_CONCURRENCY_RANGE,
            ));
        }
        if self.api_endpoint.trim().is_empty() {
            return Err(PipelineError::InvalidConfiguration(
                "api_endpoint must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    pub fn per_attempt_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.per_attempt_timeout_secs)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs_f64(self.retry_delay_secs)
    }

    /// Configured token, else `HF_TOKEN`. Blank values count as absent.
    pub fn resolved_api_token(&self) -> Option<String> {
        self.api_token
            .clone()
            .or_else(|| std::env::var("HF_TOKEN").ok())
            .filter(|token| !token.trim().is_empty())
    }

    pub fn with_default_backend(mut self, backend: BackendType) -> Self {
        self.default_backend = backend;
        self
    }

    pub fn with_fallback_enabled(mut self, enabled: bool) -> Self {
        self.fallback_enabled = enabled;
        self
    }

    pub fn with_fallback_chain(mut self, chain: impl Into<Vec<BackendType>>) -> Self {
        self.fallback_chain = chain.into();
        self
    }

    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency;
        self
    }

    pub fn with_per_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.per_attempt_timeout_secs = timeout.as_secs_f64();
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_secs = delay.as_secs_f64();
        self
    }

    pub fn with_preprocessing(mut self, enabled: bool) -> Self {
        self.enable_preprocessing = enabled;
        self
    }

    pub fn with_postprocessing(mut self, enabled: bool) -> Self {
        self.enable_postprocessing = enabled;
        self
    }

    pub fn with_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    pub fn with_local_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_model_path = Some(path.into());
        self
    }

    pub fn with_api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    pub fn with_api_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.api_endpoint = endpoint.into();
        self
    }

    pub fn with_collect_metrics(mut self, collect: bool) -> Self {
        self.collect_metrics = collect;
        self
    }

    /// Load and validate a config file.
    pub fn load(path: &str) -> ConfigResult<Self> {
        super::load_config::<Self>(path)?
            .validated()
            .attach(format!("validating {path}"))
    }

    /// Load, apply `PREFIX__KEY` environment overrides, and validate.
    pub fn load_with_env(path: &str, env_prefix: &str) -> ConfigResult<Self> {
        super::load_with_env::<Self>(path, env_prefix)?
            .validated()
            .attach(format!("validating {path}"))
    }

    /// Layer several files, later ones winning, and validate the result.
    pub fn load_merged(paths: &[&str]) -> ConfigResult<Self> {
        super::load_merged::<Self>(paths)?
            .validated()
            .attach(format!("validating {}", paths.join(", ")))
    }

    pub fn from_str(content: &str, format: FileFormat) -> ConfigResult<Self> {
        super::from_str::<Self>(content, format)?.validated()
    }

    fn validated(self) -> ConfigResult<Self> {
        self.validate()
            .map_err(ConfigError::from)
            .map_err(error_stack::Report::new)?;
        Ok(self)
    }
}

fn out_of_range<T: std::fmt::Debug>(
    name: &str,
    value: T,
    range: &RangeInclusive<T>,
) -> PipelineError {
    PipelineError::InvalidConfiguration(format!(
        "{name} = {value:?} is outside {:?}..={:?}",
        range.start(),
        range.end()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.per_attempt_timeout(), Duration::from_secs(30));
        assert_eq!(config.retry_delay(), Duration::from_secs(1));
        assert_eq!(config.default_backend, BackendType::Baseline);
    }

    #[test]
    fn range_edges_are_inclusive() {
        let config = PipelineConfig::new()
            .with_max_retries(5)
            .with_retry_delay(Duration::from_millis(100))
            .with_per_attempt_timeout(Duration::from_secs(300))
            .with_batch_concurrency(100);
        assert!(config.validate().is_ok());

        let config = PipelineConfig::new()
            .with_max_retries(0)
            .with_retry_delay(Duration::from_secs(10))
            .with_per_attempt_timeout(Duration::from_secs(1))
            .with_batch_concurrency(1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn each_out_of_range_option_is_rejected() {
        let cases = [
            PipelineConfig::new().with_max_retries(6),
            PipelineConfig::new().with_retry_delay(Duration::from_millis(50)),
            PipelineConfig::new().with_retry_delay(Duration::from_secs(11)),
            PipelineConfig::new().with_per_attempt_timeout(Duration::from_millis(500)),
            PipelineConfig::new().with_per_attempt_timeout(Duration::from_secs(301)),
            PipelineConfig::new().with_batch_concurrency(0),
            PipelineConfig::new().with_batch_concurrency(101),
            PipelineConfig::new().with_api_endpoint("  "),
        ];
        for config in cases {
            let err = config.validate().unwrap_err();
            assert!(matches!(err, PipelineError::InvalidConfiguration(_)), "{err}");
        }
    }

    #[test]
    fn nan_delay_is_rejected() {
        let mut config = PipelineConfig::new();
        config.retry_delay_secs = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn explicit_token_wins_and_blank_is_absent() {
        let config = PipelineConfig::new().with_api_token("hf_abc");
        assert_eq!(config.resolved_api_token().as_deref(), Some("hf_abc"));

        let config = PipelineConfig::new().with_api_token("   ");
        assert_eq!(config.resolved_api_token(), None);
    }

    #[test]
    fn token_is_never_serialized() {
        let config = PipelineConfig::new().with_api_token("hf_secret");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hf_secret"));
    }

    #[test]
    fn yaml_accepts_legacy_names() {
        let yaml = r#"
default_backend: rmbg-2.0-local
fallback_chain: [rmbg-2.0-api, u2net]
device: cpu
"#;
        let config = PipelineConfig::from_str(yaml, FileFormat::Yaml).unwrap();
        assert_eq!(config.default_backend, BackendType::LocalGpu);
        assert_eq!(config.device, Device::Cpu);
        assert_eq!(
            config.fallback_chain,
            vec![BackendType::RemoteApi, BackendType::Baseline]
        );
    }
}
