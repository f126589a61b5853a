//! Model Registry: lazy, cached, single-flight backend construction.
//!
//! Each backend type has at most one slot. A slot is either a construction
//! in flight, shared by every caller that asked for the type while it runs,
//! or a ready instance. Health records live beside the slots and are always
//! locked after them.

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use cutout_kernel::{BackendType, HealthStatus, PipelineConfig, PipelineError, PipelineResult};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::backends::ModelAdapter;
use crate::health::HealthRegistry;
use crate::loader::BackendLoader;

type Construction = Shared<BoxFuture<'static, PipelineResult<Arc<ModelAdapter>>>>;

enum Slot {
    Loading {
        generation: u64,
        construction: Construction,
    },
    Ready(Arc<ModelAdapter>),
}

/// Result of one walk down the fallback chain.
#[derive(Debug, Default)]
pub struct FallbackWalk {
    /// First candidate that could be obtained.
    pub selected: Option<(BackendType, Arc<ModelAdapter>)>,
    /// Candidates passed over on the way, with the reason.
    pub rejected: Vec<PipelineError>,
}

struct RegistryInner {
    config: Arc<PipelineConfig>,
    loader: Arc<dyn BackendLoader>,
    slots: Mutex<HashMap<BackendType, Slot>>,
    health: HealthRegistry,
    generation: AtomicU64,
    constructions: AtomicU64,
}

/// Shared handle to the backend cache. Cloning is cheap.
#[derive(Clone)]
pub struct ModelRegistry {
    inner: Arc<RegistryInner>,
}

impl fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let slots = self.inner.slots.lock();
        let cached: Vec<_> = slots
            .iter()
            .filter(|(_, slot)| matches!(slot, Slot::Ready(_)))
            .map(|(backend, _)| *backend)
            .collect();
        f.debug_struct("ModelRegistry")
            .field("cached", &cached)
            .field("constructions", &self.construction_count())
            .finish()
    }
}

impl ModelRegistry {
    /// Fails with `InvalidConfiguration` when `config` does not validate.
    pub fn new(config: Arc<PipelineConfig>, loader: Arc<dyn BackendLoader>) -> PipelineResult<Self> {
        Self::with_health(config, loader, HealthRegistry::new())
    }

    pub fn with_health(
        config: Arc<PipelineConfig>,
        loader: Arc<dyn BackendLoader>,
        health: HealthRegistry,
    ) -> PipelineResult<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(RegistryInner {
                config,
                loader,
                slots: Mutex::new(HashMap::new()),
                health,
                generation: AtomicU64::new(0),
                constructions: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Return the cached instance for `backend`, constructing it if needed.
    ///
    /// A cached instance with a fresh `Unhealthy` record is evicted and
    /// rebuilt. Concurrent callers share one construction and all receive
    /// the same instance or the same error.
    pub async fn try_get_model(&self, backend: BackendType) -> PipelineResult<Arc<ModelAdapter>> {
        let (generation, construction) = {
            let mut slots = self.inner.slots.lock();
            if let Some(Slot::Ready(model)) = slots.get(&backend) {
                let status = self.inner.health.check_health(backend, Some(model));
                if !status.is_unhealthy() {
                    debug!(%backend, "backend cache hit");
                    return Ok(Arc::clone(model));
                }
                warn!(%backend, reason = %status.message, "evicting unhealthy backend");
                slots.remove(&backend);
                self.inner.health.clear(Some(backend));
            }

            match slots.get(&backend) {
                Some(Slot::Loading {
                    generation,
                    construction,
                }) => {
                    debug!(%backend, "joining in-flight construction");
                    (*generation, construction.clone())
                }
                _ => {
                    let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
                    let construction = self.construct(backend);
                    slots.insert(
                        backend,
                        Slot::Loading {
                            generation,
                            construction: construction.clone(),
                        },
                    );
                    (generation, construction)
                }
            }
        };

        let result = construction.await;
        self.settle(backend, generation, &result);
        result
    }

    fn construct(&self, backend: BackendType) -> Construction {
        let inner = Arc::clone(&self.inner);
        async move {
            inner.constructions.fetch_add(1, Ordering::SeqCst);
            info!(%backend, "constructing backend");
            // A panicking loader must not poison the shared future for later callers.
            match AssertUnwindSafe(inner.loader.load(backend, &inner.config))
                .catch_unwind()
                .await
            {
                Ok(loaded) => loaded.map(Arc::new),
                Err(payload) => Err(PipelineError::construction(
                    backend,
                    format!("construction panicked: {}", panic_message(payload.as_ref())),
                )),
            }
        }
        .boxed()
        .shared()
    }

    /// Publish a finished construction, unless the slot was cleared or
    /// replaced while it ran.
    fn settle(
        &self,
        backend: BackendType,
        generation: u64,
        result: &PipelineResult<Arc<ModelAdapter>>,
    ) {
        let mut slots = self.inner.slots.lock();
        let current = matches!(
            slots.get(&backend),
            Some(Slot::Loading { generation: g, .. }) if *g == generation
        );
        if !current {
            return;
        }

        match result {
            Ok(model) => {
                info!(%backend, "backend ready");
                slots.insert(backend, Slot::Ready(Arc::clone(model)));
                self.inner.health.clear(Some(backend));
            }
            Err(err) => {
                error!(%backend, error = %err, "backend construction failed");
                slots.remove(&backend);
                self.inner
                    .health
                    .record(HealthStatus::unhealthy(backend, err.to_string()));
            }
        }
    }

    /// Like [`try_get_model`](Self::try_get_model), with the failure
    /// reported only through the health record.
    pub async fn get_model(&self, backend: BackendType) -> Option<Arc<ModelAdapter>> {
        self.try_get_model(backend).await.ok()
    }

    pub async fn get_default_model(&self) -> Option<Arc<ModelAdapter>> {
        self.get_model(self.inner.config.default_backend).await
    }

    /// First obtainable backend in the fallback chain not in `exclude`.
    pub async fn get_fallback_model(
        &self,
        exclude: &[BackendType],
    ) -> Option<(BackendType, Arc<ModelAdapter>)> {
        self.next_fallback(exclude).await.selected
    }

    /// Walk the fallback chain in order, skipping `exclude`, and stop at the
    /// first backend that can be obtained.
    ///
    /// Unavailable backends, backends with a fresh `Unhealthy` record and
    /// backends whose construction fails are reported in `rejected`.
    pub async fn next_fallback(&self, exclude: &[BackendType]) -> FallbackWalk {
        let config = &self.inner.config;
        let mut walk = FallbackWalk::default();
        if !config.fallback_enabled {
            debug!("fallback disabled");
            return walk;
        }

        let mut seen: Vec<BackendType> = exclude.to_vec();
        for &backend in &config.fallback_chain {
            if seen.contains(&backend) {
                continue;
            }
            seen.push(backend);

            if let Err(reason) = self.inner.loader.availability(backend, config) {
                debug!(%backend, %reason, "skipping unavailable fallback");
                walk.rejected.push(PipelineError::construction(
                    backend,
                    format!("not configured: {reason}"),
                ));
                continue;
            }

            if !self.is_cached(backend)
                && let Some(status) = self.fresh_unhealthy(backend)
            {
                debug!(%backend, reason = %status.message, "skipping unhealthy fallback");
                walk.rejected
                    .push(PipelineError::construction(backend, status.message));
                continue;
            }

            match self.try_get_model(backend).await {
                Ok(model) => {
                    info!(%backend, "selected fallback backend");
                    walk.selected = Some((backend, model));
                    break;
                }
                Err(err) => walk.rejected.push(err),
            }
        }
        walk
    }

    fn fresh_unhealthy(&self, backend: BackendType) -> Option<HealthStatus> {
        if self.inner.health.is_known_unhealthy(backend) {
            self.inner.health.get(backend)
        } else {
            None
        }
    }

    /// Health for `backend`, probing the cached instance when the record is stale.
    pub fn check_health(&self, backend: BackendType) -> HealthStatus {
        let slots = self.inner.slots.lock();
        let instance = match slots.get(&backend) {
            Some(Slot::Ready(model)) => Some(model.as_ref()),
            _ => None,
        };
        match instance {
            Some(model) => self.inner.health.check_health(backend, Some(model)),
            // Keep a recent construction failure visible.
            None => self
                .fresh_unhealthy(backend)
                .unwrap_or_else(|| self.inner.health.check_health(backend, None)),
        }
    }

    /// Health of every backend type.
    pub fn all_health(&self) -> BTreeMap<BackendType, HealthStatus> {
        BackendType::ALL
            .into_iter()
            .map(|backend| (backend, self.check_health(backend)))
            .collect()
    }

    /// Evict `backend` (or everything) together with its health record.
    ///
    /// A construction already in flight still completes for its waiters but
    /// is not cached.
    pub fn clear_cache(&self, backend: Option<BackendType>) {
        let mut slots = self.inner.slots.lock();
        match backend {
            Some(backend) => {
                slots.remove(&backend);
            }
            None => slots.clear(),
        }
        self.inner.health.clear(backend);
        info!(backend = ?backend, "backend cache cleared");
    }

    /// Record `status` only while `backend` has a ready instance.
    fn record_if_cached(&self, backend: BackendType, status: impl FnOnce() -> Option<HealthStatus>) {
        let slots = self.inner.slots.lock();
        if !matches!(slots.get(&backend), Some(Slot::Ready(_))) {
            return;
        }
        if let Some(status) = status() {
            self.inner.health.record(status);
        }
    }

    /// Mark a cached backend `Degraded` after it exhausted its attempts.
    pub fn record_exhausted(&self, backend: BackendType, error: &PipelineError) {
        self.record_if_cached(backend, || {
            Some(HealthStatus::degraded(backend, error.to_string()))
        });
    }

    /// Mark a cached backend `Healthy` after it served a request.
    pub fn record_success(&self, backend: BackendType) {
        self.record_if_cached(backend, || {
            let already_healthy = self
                .inner
                .health
                .get(backend)
                .is_some_and(|status| status.is_healthy());
            (!already_healthy).then(|| HealthStatus::healthy(backend, "Model is responsive"))
        });
    }

    /// Mark a cached backend `Unhealthy`. The next lookup evicts and rebuilds it.
    pub fn mark_unhealthy(&self, backend: BackendType, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(%backend, %reason, "backend marked unhealthy");
        self.record_if_cached(backend, || Some(HealthStatus::unhealthy(backend, reason)));
    }

    pub fn is_cached(&self, backend: BackendType) -> bool {
        matches!(self.inner.slots.lock().get(&backend), Some(Slot::Ready(_)))
    }

    /// Number of constructions started so far.
    pub fn construction_count(&self) -> u64 {
        self.inner.constructions.load(Ordering::SeqCst)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
