//! Error taxonomy shared by every pipeline component.
//!
//! Construction and execution failures for a single backend are absorbed by
//! the registry and executor and surface as health records or `Failed`
//! outcomes. Only [`PipelineError::InvalidConfiguration`] is allowed to stop
//! a pipeline from being built.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::backend::BackendType;

/// One backend's terminal failure inside a request, kept for exhaustion reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendFailure {
    pub backend: BackendType,
    pub message: String,
}

impl BackendFailure {
    pub fn new(backend: BackendType, message: impl Into<String>) -> Self {
        Self {
            backend,
            message: message.into(),
        }
    }

    /// `None` for errors not attributed to a single backend.
    pub fn from_error(error: &PipelineError) -> Option<Self> {
        error
            .backend()
            .map(|backend| Self::new(backend, error.detail()))
    }
}

/// Ordered list of per-backend failures: the primary first, then fallbacks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FailureChain(pub Vec<BackendFailure>);

impl fmt::Display for FailureChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, failure) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str("; ")?;
            }
            let role = if idx == 0 { "primary" } else { "fallback" };
            write!(f, "{role} {}: {}", failure.backend, failure.message)?;
        }
        Ok(())
    }
}

/// Errors produced by the background-removal pipeline.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum PipelineError {
    /// A backend could not be initialized (missing credentials, model artifact, device).
    #[error("failed to construct {backend} backend: {message}")]
    BackendConstruction {
        backend: BackendType,
        message: String,
    },

    /// A backend call failed at runtime.
    #[error("{backend} backend failed: {message}")]
    BackendExecution {
        backend: BackendType,
        message: String,
    },

    /// A single attempt exceeded its deadline.
    #[error("{backend} attempt timed out after {}s", .timeout.as_secs_f64())]
    AttemptTimeout {
        backend: BackendType,
        timeout: Duration,
    },

    /// Every eligible backend, fallbacks included, failed.
    #[error("all backends failed: {failures}")]
    ChainExhausted { failures: FailureChain },

    /// Unknown backend name or out-of-range option.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl PipelineError {
    pub fn execution(backend: BackendType, message: impl Into<String>) -> Self {
        Self::BackendExecution {
            backend,
            message: message.into(),
        }
    }

    pub fn construction(backend: BackendType, message: impl Into<String>) -> Self {
        Self::BackendConstruction {
            backend,
            message: message.into(),
        }
    }

    /// The message without the backend name, for chain reports.
    pub fn detail(&self) -> String {
        match self {
            Self::BackendConstruction { message, .. } => format!("construction failed: {message}"),
            Self::BackendExecution { message, .. } => message.clone(),
            Self::AttemptTimeout { timeout, .. } => {
                format!("attempt timed out after {}s", timeout.as_secs_f64())
            }
            Self::ChainExhausted { .. } | Self::InvalidConfiguration(_) => self.to_string(),
        }
    }

    /// The backend this error is attributed to, if any.
    pub fn backend(&self) -> Option<BackendType> {
        match self {
            Self::BackendConstruction { backend, .. }
            | Self::BackendExecution { backend, .. }
            | Self::AttemptTimeout { backend, .. } => Some(*backend),
            Self::ChainExhausted { .. } | Self::InvalidConfiguration(_) => None,
        }
    }
}

/// Convenience result alias for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;
