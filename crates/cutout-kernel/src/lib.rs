//! Cutout kernel: the contracts and data model of the background-removal
//! resilience pipeline.
//!
//! Engines live in `cutout-foundation`; this crate holds what they share:
//! backend identifiers, configuration, health records, outcomes, the error
//! taxonomy and the seams to the pretrained-model collaborators.

// backend identifiers and capabilities
pub mod backend;

// configuration snapshot and loaders
pub mod config;

// error taxonomy
pub mod error;

// health records
pub mod health;

// colour-mode normalization
pub mod imaging;

// logging bootstrap
pub mod logging;

// collaborator seams
pub mod model;

// processing results
pub mod outcome;

pub use backend::{BackendType, Capability};
pub use config::{ConfigError, ConfigResult, Device, PipelineConfig};
pub use error::{BackendFailure, FailureChain, PipelineError, PipelineResult};
pub use health::{HEALTH_TTL, HealthState, HealthStatus};
pub use imaging::ImageMetadata;
pub use model::{BoxError, ComputeDevice, InferenceReply, InferenceTransport, SegmentationModel};
pub use outcome::{BatchOutcome, BatchSummary, OutcomeSummary, ProcessingOutcome, ProcessingStatus};
