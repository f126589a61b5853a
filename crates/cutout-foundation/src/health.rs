//! TTL-bounded health records, one per backend type.

use std::collections::HashMap;
use std::time::Duration;

use cutout_kernel::{BackendType, Capability, HEALTH_TTL, HealthStatus};
use parking_lot::RwLock;
use tracing::debug;

use crate::backends::ModelAdapter;

/// Health cache keyed by backend type.
///
/// A record is trusted for `ttl` after it was computed; past that the next
/// check recomputes it.
#[derive(Debug)]
pub struct HealthRegistry {
    records: RwLock<HashMap<BackendType, HealthStatus>>,
    ttl: Duration,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::with_ttl(HEALTH_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Replace the record for its backend type.
    pub fn record(&self, status: HealthStatus) {
        debug!(backend = %status.backend, state = ?status.state, message = %status.message, "health recorded");
        self.records.write().insert(status.backend, status);
    }

    /// The stored record, fresh or not.
    pub fn get(&self, backend: BackendType) -> Option<HealthStatus> {
        self.records.read().get(&backend).cloned()
    }

    fn fresh(&self, backend: BackendType) -> Option<HealthStatus> {
        self.records
            .read()
            .get(&backend)
            .filter(|status| !status.is_stale(self.ttl))
            .cloned()
    }

    /// Whether a fresh record says `backend` is unhealthy.
    pub fn is_known_unhealthy(&self, backend: BackendType) -> bool {
        self.fresh(backend).is_some_and(|status| status.is_unhealthy())
    }

    /// Return a fresh record, or probe `instance` and record the result.
    ///
    /// Without an instance the answer is `Unknown` and nothing is stored, so
    /// an old judgment cannot outlive the instance it described.
    pub fn check_health(
        &self,
        backend: BackendType,
        instance: Option<&ModelAdapter>,
    ) -> HealthStatus {
        if let Some(status) = self.fresh(backend) {
            return status;
        }

        let Some(instance) = instance else {
            self.records.write().remove(&backend);
            return HealthStatus::unknown(backend);
        };

        let status = if Capability::REQUIRED.iter().all(|c| instance.supports(*c)) {
            HealthStatus::healthy(backend, "Model is responsive")
        } else {
            HealthStatus::unhealthy(backend, "Model does not expose the required capabilities")
        };
        self.record(status.clone());
        status
    }

    /// Forget the record for `backend`, or every record.
    pub fn clear(&self, backend: Option<BackendType>) {
        let mut records = self.records.write();
        match backend {
            Some(backend) => {
                records.remove(&backend);
            }
            None => records.clear(),
        }
    }
}
