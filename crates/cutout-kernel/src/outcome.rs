//! Per-image and per-batch results.

use std::time::Duration;

use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::Serialize;
use uuid::Uuid;

use crate::backend::BackendType;
use crate::imaging::ImageMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone)]
enum OutcomeKind {
    Succeeded {
        image: DynamicImage,
        backend: BackendType,
        metadata: ImageMetadata,
    },
    Failed {
        error: String,
    },
}

/// Result of one image's trip through the executor. Immutable once built.
///
/// The output image and the backend that produced it exist only on success;
/// the error message exists only on failure.
#[derive(Debug, Clone)]
pub struct ProcessingOutcome {
    request_id: Uuid,
    elapsed: Duration,
    completed_at: DateTime<Utc>,
    kind: OutcomeKind,
}

impl ProcessingOutcome {
    pub fn succeeded(
        request_id: Uuid,
        image: DynamicImage,
        backend: BackendType,
        metadata: ImageMetadata,
        elapsed: Duration,
    ) -> Self {
        Self {
            request_id,
            elapsed,
            completed_at: Utc::now(),
            kind: OutcomeKind::Succeeded {
                image,
                backend,
                metadata,
            },
        }
    }

    pub fn failed(request_id: Uuid, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            request_id,
            elapsed,
            completed_at: Utc::now(),
            kind: OutcomeKind::Failed {
                error: error.into(),
            },
        }
    }

    pub fn status(&self) -> ProcessingStatus {
        match self.kind {
            OutcomeKind::Succeeded { .. } => ProcessingStatus::Success,
            OutcomeKind::Failed { .. } => ProcessingStatus::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == ProcessingStatus::Success
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn completed_at(&self) -> DateTime<Utc> {
        self.completed_at
    }

    pub fn image(&self) -> Option<&DynamicImage> {
        match &self.kind {
            OutcomeKind::Succeeded { image, .. } => Some(image),
            OutcomeKind::Failed { .. } => None,
        }
    }

    pub fn into_image(self) -> Option<DynamicImage> {
        match self.kind {
            OutcomeKind::Succeeded { image, .. } => Some(image),
            OutcomeKind::Failed { .. } => None,
        }
    }

    pub fn backend_used(&self) -> Option<BackendType> {
        match &self.kind {
            OutcomeKind::Succeeded { backend, .. } => Some(*backend),
            OutcomeKind::Failed { .. } => None,
        }
    }

    pub fn metadata(&self) -> Option<&ImageMetadata> {
        match &self.kind {
            OutcomeKind::Succeeded { metadata, .. } => Some(metadata),
            OutcomeKind::Failed { .. } => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.kind {
            OutcomeKind::Succeeded { .. } => None,
            OutcomeKind::Failed { error } => Some(error),
        }
    }

    /// Serializable view without pixel data.
    pub fn summary(&self) -> OutcomeSummary {
        OutcomeSummary {
            request_id: self.request_id,
            status: self.status(),
            backend_used: self.backend_used(),
            elapsed_secs: self.elapsed.as_secs_f64(),
            error: self.error_message().map(str::to_string),
            metadata: self.metadata().cloned(),
            completed_at: self.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OutcomeSummary {
    pub request_id: Uuid,
    pub status: ProcessingStatus,
    pub backend_used: Option<BackendType>,
    pub elapsed_secs: f64,
    pub error: Option<String>,
    pub metadata: Option<ImageMetadata>,
    pub completed_at: DateTime<Utc>,
}

/// Aggregate over a batch, outcomes in input order.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub outcomes: Vec<ProcessingOutcome>,
    pub total_elapsed: Duration,
    pub average_elapsed: Duration,
}

impl BatchOutcome {
    /// Aggregate `outcomes` (already in input order) measured over `total_elapsed` wall time.
    pub fn from_outcomes(outcomes: Vec<ProcessingOutcome>, total_elapsed: Duration) -> Self {
        let total = outcomes.len();
        let successful = outcomes.iter().filter(|o| o.is_success()).count();
        let average_elapsed = match u32::try_from(total) {
            Ok(0) => Duration::ZERO,
            Ok(n) => total_elapsed / n,
            Err(_) => Duration::from_secs_f64(total_elapsed.as_secs_f64() / total as f64),
        };

        Self {
            total,
            successful,
            failed: total - successful,
            outcomes,
            total_elapsed,
            average_elapsed,
        }
    }

    /// `successful / total`, or `0.0` for an empty batch.
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.successful as f64 / self.total as f64
    }

    pub fn summary(&self) -> BatchSummary {
        BatchSummary {
            total: self.total,
            successful: self.successful,
            failed: self.failed,
            success_rate: self.success_rate(),
            total_elapsed_secs: self.total_elapsed.as_secs_f64(),
            average_elapsed_secs: self.average_elapsed.as_secs_f64(),
            results: self.outcomes.iter().map(ProcessingOutcome::summary).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
    pub total_elapsed_secs: f64,
    pub average_elapsed_secs: f64,
    pub results: Vec<OutcomeSummary>,
}
