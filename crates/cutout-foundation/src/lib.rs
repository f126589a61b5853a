//! Cutout foundation: the engines behind resilient background removal.
//!
//! A [`BackgroundRemovalPipeline`] owns a [`ModelRegistry`] that builds each
//! backend once and tracks its health, a [`ResilientExecutor`] that retries
//! and falls back per image, and a [`BatchOrchestrator`] that fans a batch
//! out in bounded chunks.

pub mod backends;
pub mod batch;
pub mod device;
pub mod executor;
pub mod health;
pub mod loader;
pub mod metrics;
pub mod pipeline;
pub mod registry;

pub use backends::{BackendInfo, ModelAdapter};
pub use batch::BatchOrchestrator;
pub use executor::ResilientExecutor;
pub use health::HealthRegistry;
pub use loader::{BackendLoader, DefaultBackendLoader};
pub use metrics::{MetricsAccumulator, MetricsSnapshot};
pub use pipeline::{BackgroundRemovalPipeline, ConfigSummary, PipelineStatus};
pub use registry::{FallbackWalk, ModelRegistry};
