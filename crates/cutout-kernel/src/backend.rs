//! Backend identifiers and the capability set every backend exposes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Closed set of background-removal backend kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BackendType {
    /// Pretrained segmentation model resident on a local device.
    #[serde(rename = "local-gpu", alias = "rmbg-2.0-local")]
    LocalGpu,
    /// Hosted inference API.
    #[serde(rename = "remote-api", alias = "rmbg-2.0-api")]
    RemoteApi,
    /// Dependency-free classic keying, the last-resort fallback.
    #[serde(rename = "baseline", alias = "u2net")]
    Baseline,
}

impl BackendType {
    pub const ALL: [BackendType; 3] = [
        BackendType::LocalGpu,
        BackendType::RemoteApi,
        BackendType::Baseline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::LocalGpu => "local-gpu",
            BackendType::RemoteApi => "remote-api",
            BackendType::Baseline => "baseline",
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local-gpu" | "rmbg-2.0-local" => Ok(BackendType::LocalGpu),
            "remote-api" | "rmbg-2.0-api" => Ok(BackendType::RemoteApi),
            "baseline" | "u2net" => Ok(BackendType::Baseline),
            other => Err(PipelineError::InvalidConfiguration(format!(
                "unknown backend '{other}'"
            ))),
        }
    }
}

/// Operations a backend may expose. Health probes check these, never run inference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    RemoveBackground,
    BatchRemoveBackground,
}

impl Capability {
    /// Capabilities a backend needs before the registry will serve it.
    pub const REQUIRED: [Capability; 2] = [
        Capability::RemoveBackground,
        Capability::BatchRemoveBackground,
    ];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_and_legacy_names() {
        assert_eq!("local-gpu".parse::<BackendType>().unwrap(), BackendType::LocalGpu);
        assert_eq!("rmbg-2.0-api".parse::<BackendType>().unwrap(), BackendType::RemoteApi);
        assert_eq!(" U2NET ".parse::<BackendType>().unwrap(), BackendType::Baseline);
    }

    #[test]
    fn unknown_name_is_invalid_configuration() {
        let err = "sam-2".parse::<BackendType>().unwrap_err();
        assert!(matches!(err, PipelineError::InvalidConfiguration(_)));
        assert!(err.to_string().contains("sam-2"));
    }

    #[test]
    fn serde_uses_kebab_names_and_accepts_aliases() {
        let json = serde_json::to_string(&BackendType::RemoteApi).unwrap();
        assert_eq!(json, "\"remote-api\"");

        let chain: Vec<BackendType> =
            serde_json::from_str(r#"["rmbg-2.0-local", "remote-api", "u2net"]"#).unwrap();
        assert_eq!(chain, BackendType::ALL.to_vec());
    }
}
