//! The scale-from-zero controller.
//!
//! `FunctionScaler::scale` guarantees at least one available replica
//! before returning `Ok`, holding the in-flight request while the
//! provider brings an instance up. Concurrent cold starts for the same
//! function collapse into a single wake-up through [`SingleFlight`];
//! the readiness wait is not deduplicated — every caller must observe
//! readiness for itself before its forward may proceed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tracing::{info, warn};

use faasgate_core::{FunctionStatus, FunctionTarget};

use crate::cache::ReplicaCache;
use crate::query::{ProviderQuery, QueryError};
use crate::singleflight::SingleFlight;

/// Tunables for the scaler's retry and poll loops.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    /// Upper bound on readiness poll iterations.
    pub max_poll_count: u32,
    /// Attempts to deliver the scale-up request before giving up.
    pub set_scale_retries: u32,
    /// Spacing between polls and between scale-up retries.
    pub function_poll_interval: Duration,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            max_poll_count: 1000,
            set_scale_retries: 20,
            function_poll_interval: Duration::from_millis(100),
        }
    }
}

/// Failure modes of a scale attempt.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScaleError {
    #[error("function not found")]
    NotFound,

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("timed out waiting for a ready replica after {0:?}")]
    Timeout(Duration),
}

impl From<QueryError> for ScaleError {
    fn from(err: QueryError) -> Self {
        match err {
            QueryError::NotFound => ScaleError::NotFound,
            QueryError::Unavailable(msg) => ScaleError::Unavailable(msg),
            QueryError::Invalid(msg) => ScaleError::Unavailable(msg),
        }
    }
}

/// Scale-from-zero decisions, single-flight, and the poll to ready.
pub struct FunctionScaler {
    config: ScalerConfig,
    cache: Arc<ReplicaCache>,
    query: Arc<dyn ProviderQuery>,
    inflight: SingleFlight<Result<FunctionStatus, ScaleError>>,
}

impl FunctionScaler {
    pub fn new(
        config: ScalerConfig,
        cache: Arc<ReplicaCache>,
        query: Arc<dyn ProviderQuery>,
    ) -> Self {
        Self {
            config,
            cache,
            query,
            inflight: SingleFlight::new(),
        }
    }

    /// Ensure the function has at least one available replica.
    pub async fn scale(&self, target: &FunctionTarget) -> Result<(), ScaleError> {
        let (cached, fresh) = self.cache.get(target);
        if fresh && cached.available_replicas > 0 {
            return Ok(());
        }
        if fresh && cached.replicas > 0 {
            // Instances are starting; no scale-up needed, only patience.
            return self.wait_for_ready(target).await;
        }

        let status = {
            let config = self.config.clone();
            let cache = self.cache.clone();
            let query = self.query.clone();
            let target = target.clone();
            self.inflight
                .run(&target.key(), move || {
                    async move { wake_function(&config, &cache, query.as_ref(), &target).await }
                        .boxed()
                })
                .await?
        };

        if status.available_replicas > 0 {
            return Ok(());
        }
        self.wait_for_ready(target).await
    }

    /// Poll the provider until a replica reports available, refreshing
    /// the cache on every observation so concurrent callers benefit.
    async fn wait_for_ready(&self, target: &FunctionTarget) -> Result<(), ScaleError> {
        let started = Instant::now();
        for _ in 0..self.config.max_poll_count {
            let status = self.query.function_status(target).await?;
            self.cache.set(target, &status);
            if status.available_replicas > 0 {
                info!(
                    function = %target,
                    waited = ?started.elapsed(),
                    "function ready"
                );
                return Ok(());
            }
            tokio::time::sleep(self.config.function_poll_interval).await;
        }
        Err(ScaleError::Timeout(started.elapsed()))
    }
}

/// The deduplicated portion of a cold start: one authoritative read and,
/// when the function sits at zero replicas, the scale-up request.
async fn wake_function(
    config: &ScalerConfig,
    cache: &ReplicaCache,
    query: &dyn ProviderQuery,
    target: &FunctionTarget,
) -> Result<FunctionStatus, ScaleError> {
    let status = query.function_status(target).await?;
    cache.set(target, &status);

    if status.replicas > 0 {
        // Already awake (or waking); readiness is the caller's wait.
        return Ok(status);
    }

    let desired = status.first_replica_target();
    let mut last_err = None;

    for attempt in 1..=config.set_scale_retries {
        // Re-read in case another gateway replica won the race.
        let current = query.function_status(target).await?;
        cache.set(target, &current);
        if current.replicas > 0 {
            return Ok(current);
        }

        match query.set_replicas(target, desired).await {
            Ok(()) => {
                info!(function = %target, replicas = desired, "scaled from zero");
                return Ok(current);
            }
            Err(err) => {
                warn!(
                    function = %target,
                    attempt,
                    retries = config.set_scale_retries,
                    error = %err,
                    "scale-up request failed"
                );
                last_err = Some(err);
            }
        }
        tokio::time::sleep(config.function_poll_interval).await;
    }

    Err(last_err.map(ScaleError::from).unwrap_or_else(|| {
        ScaleError::Unavailable("scale-up was never attempted".to_string())
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn target(name: &str) -> FunctionTarget {
        FunctionTarget::parse(name, "fn").unwrap()
    }

    fn fast_config() -> ScalerConfig {
        ScalerConfig {
            max_poll_count: 50,
            set_scale_retries: 3,
            function_poll_interval: Duration::from_millis(1),
        }
    }

    /// Provider fake: zero replicas until `set_replicas` lands, then a
    /// configurable number of not-yet-ready observations before the
    /// replica reports available.
    struct FakeProvider {
        status_calls: AtomicU32,
        set_calls: AtomicU32,
        state: Mutex<FakeState>,
        ready_after_polls: u32,
        fail_sets: bool,
    }

    struct FakeState {
        replicas: u64,
        polls_since_set: u32,
    }

    impl FakeProvider {
        fn cold(ready_after_polls: u32) -> Self {
            Self {
                status_calls: AtomicU32::new(0),
                set_calls: AtomicU32::new(0),
                state: Mutex::new(FakeState {
                    replicas: 0,
                    polls_since_set: 0,
                }),
                ready_after_polls,
                fail_sets: false,
            }
        }

        fn broken() -> Self {
            let mut fake = Self::cold(0);
            fake.fail_sets = true;
            fake
        }

        fn set_count(&self) -> u32 {
            self.set_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ProviderQuery for FakeProvider {
        async fn function_status(
            &self,
            _target: &FunctionTarget,
        ) -> Result<FunctionStatus, QueryError> {
            self.status_calls.fetch_add(1, Ordering::SeqCst);
            let mut state = self.state.lock().unwrap();
            let available = if state.replicas > 0 {
                state.polls_since_set += 1;
                if state.polls_since_set > self.ready_after_polls {
                    1
                } else {
                    0
                }
            } else {
                0
            };
            Ok(FunctionStatus {
                replicas: state.replicas,
                available_replicas: available,
                min_replicas: 0,
                max_replicas: 5,
                scaling_factor: 20,
                ..Default::default()
            })
        }

        async fn set_replicas(
            &self,
            _target: &FunctionTarget,
            replicas: u64,
        ) -> Result<(), QueryError> {
            self.set_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_sets {
                return Err(QueryError::Unavailable("scale endpoint down".to_string()));
            }
            self.state.lock().unwrap().replicas = replicas;
            Ok(())
        }
    }

    struct NotFoundProvider;

    #[async_trait]
    impl ProviderQuery for NotFoundProvider {
        async fn function_status(
            &self,
            _target: &FunctionTarget,
        ) -> Result<FunctionStatus, QueryError> {
            Err(QueryError::NotFound)
        }

        async fn set_replicas(
            &self,
            _target: &FunctionTarget,
            _replicas: u64,
        ) -> Result<(), QueryError> {
            Err(QueryError::NotFound)
        }
    }

    fn scaler(provider: Arc<dyn ProviderQuery>, config: ScalerConfig) -> FunctionScaler {
        FunctionScaler::new(
            config,
            Arc::new(ReplicaCache::new(Duration::from_millis(250))),
            provider,
        )
    }

    #[tokio::test]
    async fn fresh_available_replica_short_circuits() {
        let provider = Arc::new(FakeProvider::cold(0));
        let scaler = scaler(provider.clone(), fast_config());

        scaler.cache.set(
            &target("echo"),
            &FunctionStatus {
                replicas: 1,
                available_replicas: 1,
                ..Default::default()
            },
        );

        scaler.scale(&target("echo")).await.unwrap();
        assert_eq!(provider.status_calls.load(Ordering::SeqCst), 0);
        assert_eq!(provider.set_count(), 0);
    }

    #[tokio::test]
    async fn cold_start_scales_once_then_waits_for_ready() {
        let provider = Arc::new(FakeProvider::cold(2));
        let scaler = scaler(provider.clone(), fast_config());

        scaler.scale(&target("echo")).await.unwrap();

        assert_eq!(provider.set_count(), 1);
        // At least one readiness poll happened after the wake-up.
        assert!(provider.status_calls.load(Ordering::SeqCst) > 2);
    }

    #[tokio::test]
    async fn concurrent_cold_starts_issue_one_scale_request() {
        let provider = Arc::new(FakeProvider::cold(3));
        let scaler = Arc::new(scaler(provider.clone(), fast_config()));

        let mut handles = Vec::new();
        for _ in 0..50 {
            let scaler = scaler.clone();
            handles.push(tokio::spawn(async move {
                scaler.scale(&target("echo")).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(
            provider.set_count(),
            1,
            "exactly one scale-up per cold-start epoch"
        );
    }

    #[tokio::test]
    async fn unknown_function_surfaces_not_found_without_scaling() {
        let scaler = scaler(Arc::new(NotFoundProvider), fast_config());
        let err = scaler.scale(&target("nope")).await.unwrap_err();
        assert_eq!(err, ScaleError::NotFound);
    }

    #[tokio::test]
    async fn never_ready_function_times_out() {
        let provider = Arc::new(FakeProvider::cold(u32::MAX));
        let config = ScalerConfig {
            max_poll_count: 5,
            ..fast_config()
        };
        let scaler = scaler(provider.clone(), config);

        let err = scaler.scale(&target("echo")).await.unwrap_err();
        assert!(matches!(err, ScaleError::Timeout(_)));
        assert_eq!(provider.set_count(), 1);
    }

    #[tokio::test]
    async fn persistent_scale_failure_surfaces_unavailable() {
        let provider = Arc::new(FakeProvider::broken());
        let scaler = scaler(provider.clone(), fast_config());

        let err = scaler.scale(&target("echo")).await.unwrap_err();
        assert!(matches!(err, ScaleError::Unavailable(_)));
        assert_eq!(provider.set_count(), 3, "retried up to the configured bound");
    }

    #[tokio::test]
    async fn starting_function_waits_without_issuing_scale() {
        let provider = Arc::new(FakeProvider::cold(1));
        provider.state.lock().unwrap().replicas = 1;
        let scaler = scaler(provider.clone(), fast_config());

        // Fresh cache entry: replicas exist, none available yet.
        scaler.cache.set(
            &target("echo"),
            &FunctionStatus {
                replicas: 1,
                available_replicas: 0,
                ..Default::default()
            },
        );

        scaler.scale(&target("echo")).await.unwrap();
        assert_eq!(provider.set_count(), 0);
    }
}
