//! Health records for backend types.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::backend::BackendType;

/// A record older than this must be recomputed before it is trusted.
pub const HEALTH_TTL: Duration = Duration::from_secs(5 * 60);

/// Liveness judgment for a backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    /// Serving, but its last request exhausted every attempt.
    Degraded,
    Unhealthy,
    /// Never constructed, so never judged.
    Unknown,
}

/// A timestamped health record, one per backend type.
///
/// Every constructor stamps both the wall-clock time reported to callers and
/// the monotonic instant used for TTL checks.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub backend: BackendType,
    pub state: HealthState,
    pub message: String,
    pub last_checked: DateTime<Utc>,
    #[serde(skip)]
    checked_at: Instant,
}

impl HealthStatus {
    pub fn new(backend: BackendType, state: HealthState, message: impl Into<String>) -> Self {
        Self {
            backend,
            state,
            message: message.into(),
            last_checked: Utc::now(),
            checked_at: Instant::now(),
        }
    }

    pub fn healthy(backend: BackendType, message: impl Into<String>) -> Self {
        Self::new(backend, HealthState::Healthy, message)
    }

    pub fn degraded(backend: BackendType, message: impl Into<String>) -> Self {
        Self::new(backend, HealthState::Degraded, message)
    }

    pub fn unhealthy(backend: BackendType, message: impl Into<String>) -> Self {
        Self::new(backend, HealthState::Unhealthy, message)
    }

    pub fn unknown(backend: BackendType) -> Self {
        Self::new(backend, HealthState::Unknown, "Model not initialized")
    }

    pub fn is_healthy(&self) -> bool {
        self.state == HealthState::Healthy
    }

    pub fn is_unhealthy(&self) -> bool {
        self.state == HealthState::Unhealthy
    }

    /// Time since this record was computed.
    pub fn age(&self) -> Duration {
        self.checked_at.elapsed()
    }

    pub fn is_stale(&self, ttl: Duration) -> bool {
        self.age() >= ttl
    }
}
