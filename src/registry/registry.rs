use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use thiserror::Error as ThisError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::breaker::{BreakerConfig, BreakerState, CircuitBreaker};
use crate::providers::{
    EmbedResponse, EmbeddingProvider, Error, ErrorKind, ProviderDescriptor, ProviderId,
};
use crate::resources::{OperationEstimate, ResourceMonitor};
use crate::retry::{deadline_exceeded, BackoffPolicy, RetryContext};

/// Ceiling on a single periodic health probe.
const HEALTHCHECK_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(ThisError, Debug)]
pub enum RegistryError {
    /// The caller named a provider that was never registered. This is a
    /// configuration mistake and is never retried.
    #[error("no provider registered under \"{0}\"")]
    UnknownProvider(ProviderId),

    #[error("a provider is already registered under \"{0}\"")]
    DuplicateProvider(ProviderId),

    /// The call itself failed; the classified error explains how.
    #[error(transparent)]
    Call(#[from] Error),
}

/// Rolling per-provider counters, maintained across every attempt that
/// reaches the provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProviderStats {
    pub total_requests: u64,
    pub total_errors: u64,
    /// Tokens as reported by the backend, or estimated from input
    /// length when the backend reports no usage.
    pub total_tokens: u64,
    /// Dollars, derived from tokens and the descriptor's per-token cost.
    pub total_cost: f64,
    /// Running mean over successful attempts, in milliseconds.
    pub average_latency_ms: f64,
}

/// A point-in-time view of one provider, as reported by
/// [`ProviderRegistry::provider_info`].
#[derive(Debug, Clone)]
pub struct ProviderInfo {
    pub descriptor: ProviderDescriptor,
    pub available: bool,
    pub breaker: BreakerState,
    pub last_health_check: Option<Instant>,
    pub last_error: Option<String>,
    pub stats: ProviderStats,
}

#[derive(Debug)]
struct ProviderStatus {
    available: bool,
    last_health_check: Option<Instant>,
    last_error: Option<String>,
    stats: ProviderStats,
}

struct ProviderEntry {
    descriptor: ProviderDescriptor,
    provider: Arc<dyn EmbeddingProvider>,
    status: Mutex<ProviderStatus>,
    breaker: CircuitBreaker,
    /// Registration order; the final selection tiebreaker.
    order: usize,
}

impl ProviderEntry {
    fn lock_status(&self) -> std::sync::MutexGuard<'_, ProviderStatus> {
        match self.status.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// The provider map, shared between the registry and its health-tick
/// task.
struct ProviderSet {
    providers: RwLock<HashMap<ProviderId, Arc<ProviderEntry>>>,
}

impl ProviderSet {
    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<ProviderId, Arc<ProviderEntry>>> {
        match self.providers.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Probe every provider once and update its availability flag.
    async fn run_health_checks(&self) {
        let entries: Vec<Arc<ProviderEntry>> = self.read().values().cloned().collect();

        for entry in entries {
            let result = match timeout_at(
                Instant::now() + HEALTHCHECK_TIMEOUT,
                entry.provider.healthcheck(),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(Error::from_source(
                    ErrorKind::Timeout,
                    "health check timed out".into(),
                )),
            };

            let mut status = entry.lock_status();
            let now_available = result.is_ok();

            if status.available != now_available {
                if now_available {
                    info!(provider = %entry.descriptor.id, "provider became available");
                } else {
                    warn!(provider = %entry.descriptor.id, "provider became unavailable");
                }
            }

            status.available = now_available;
            status.last_health_check = Some(Instant::now());

            if let Err(err) = result {
                status.last_error = Some(err.to_string());
            }
        }
    }
}

/// The set of registered embedding providers and the resilience
/// pipeline wrapped around calls to them.
///
/// `embed_batch` targets one provider and applies, in order: resource
/// validation, breaker admission, the timed provider call, and retry
/// under the backoff policy. Selection across providers is the fallback
/// chain's job; it asks [`ProviderRegistry::healthy_providers`] for the
/// preference-ordered candidates.
pub struct ProviderRegistry {
    set: Arc<ProviderSet>,
    backoff: BackoffPolicy,
    breaker_config: BreakerConfig,
    resources: Arc<ResourceMonitor>,
    health_interval: Duration,
    stop_tx: watch::Sender<bool>,
    health_task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry").finish_non_exhaustive()
    }
}

impl ProviderRegistry {
    pub fn new(
        backoff: BackoffPolicy,
        breaker_config: BreakerConfig,
        resources: Arc<ResourceMonitor>,
        health_interval: Duration,
    ) -> ProviderRegistry {
        let (stop_tx, _) = watch::channel(false);

        ProviderRegistry {
            set: Arc::new(ProviderSet {
                providers: RwLock::new(HashMap::new()),
            }),
            backoff,
            breaker_config,
            resources,
            health_interval,
            stop_tx,
            health_task: Mutex::new(None),
        }
    }

    /// Register a provider under its descriptor's id. Providers start
    /// out available, with a fresh breaker and zeroed statistics.
    pub fn register(
        &self,
        descriptor: ProviderDescriptor,
        provider: Arc<dyn EmbeddingProvider>,
    ) -> Result<(), RegistryError> {
        let mut providers = match self.set.providers.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if providers.contains_key(&descriptor.id) {
            return Err(RegistryError::DuplicateProvider(descriptor.id));
        }

        info!(
            provider = %descriptor.id,
            backend = %descriptor.backend,
            dimension = descriptor.dimension,
            "registering provider"
        );

        let id = descriptor.id.clone();
        let entry = Arc::new(ProviderEntry {
            breaker: CircuitBreaker::new(id.as_str(), self.breaker_config.clone()),
            descriptor,
            provider,
            status: Mutex::new(ProviderStatus {
                available: true,
                last_health_check: None,
                last_error: None,
                stats: ProviderStats::default(),
            }),
            order: providers.len(),
        });

        providers.insert(id, entry);

        Ok(())
    }

    fn entry(&self, id: &ProviderId) -> Result<Arc<ProviderEntry>, RegistryError> {
        self.set
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownProvider(id.clone()))
    }

    /// The registered descriptor for `id`.
    pub fn descriptor(&self, id: &ProviderId) -> Result<ProviderDescriptor, RegistryError> {
        Ok(self.entry(id)?.descriptor.clone())
    }

    /// Embed `texts` through the provider registered under `id`,
    /// applying the full resilience pipeline. `deadline` bounds the
    /// logical call including every retry and backoff sleep.
    pub async fn embed_batch(
        &self,
        id: &ProviderId,
        texts: &[String],
        deadline: Instant,
    ) -> Result<EmbedResponse, RegistryError> {
        let entry = self.entry(id)?;

        if texts.is_empty() {
            return Err(RegistryError::Call(
                Error::from_source(ErrorKind::InvalidInput, "empty batch".into())
                    .with_retryable(false),
            ));
        }

        self.resources
            .validate(&estimate_for(texts, entry.descriptor.dimension))?;

        let mut ctx = RetryContext::new(deadline);

        loop {
            ctx.attempt += 1;

            // Re-acquired on every attempt so a breaker tripped by this
            // very retry loop cuts the loop short.
            let admission = entry.breaker.try_acquire()?;

            let started = Instant::now();
            let outcome = match timeout_at(deadline, entry.provider.embed(texts)).await {
                Ok(result) => result,
                Err(_) => Err(deadline_exceeded()),
            };
            let outcome =
                outcome.and_then(|response| check_dimension(&entry.descriptor, response));

            match outcome {
                Ok(response) => {
                    entry.breaker.on_success(admission);
                    record_success(&entry, &response, started.elapsed(), texts);

                    return Ok(response);
                }
                Err(err) => {
                    entry.breaker.on_failure(admission);
                    record_failure(&entry, &err);

                    debug!(
                        provider = %entry.descriptor.id,
                        attempt = ctx.attempt,
                        backoff_ms = ctx.last_delay.as_millis() as u64,
                        error = %err,
                        "embed attempt failed"
                    );

                    match self.backoff.should_retry(&ctx, &err) {
                        Some(delay) => self.backoff.pause(&mut ctx, delay).await?,
                        None => return Err(err.into()),
                    }
                }
            }
        }
    }

    /// Candidate providers for a new request, most preferred first.
    ///
    /// Providers marked unavailable by the health tick and providers
    /// whose breaker is `Open` are excluded. The remainder are ordered
    /// to keep spend down: free providers before paid ones, with local
    /// backends demoted behind paid ones while host memory is under
    /// pressure. Ties fall to lower average latency, then to
    /// registration order.
    pub fn healthy_providers(&self) -> Vec<ProviderId> {
        let low_memory = self.resources.pressure().low_memory;

        let mut candidates: Vec<(u8, f64, usize, ProviderId)> = self
            .set
            .read()
            .values()
            .filter(|entry| {
                entry.lock_status().available && entry.breaker.state() != BreakerState::Open
            })
            .map(|entry| {
                let mut rank = u8::from(!entry.descriptor.is_free());

                if low_memory && entry.descriptor.backend.is_local() {
                    rank += 2;
                }

                let latency = entry.lock_status().stats.average_latency_ms;

                (rank, latency, entry.order, entry.descriptor.id.clone())
            })
            .collect();

        candidates.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.2.cmp(&b.2))
        });

        candidates.into_iter().map(|(_, _, _, id)| id).collect()
    }

    /// A snapshot of every registered provider, in registration order.
    pub fn provider_info(&self) -> Vec<ProviderInfo> {
        let mut entries: Vec<Arc<ProviderEntry>> = self.set.read().values().cloned().collect();
        entries.sort_by_key(|entry| entry.order);

        entries
            .iter()
            .map(|entry| {
                let status = entry.lock_status();

                ProviderInfo {
                    descriptor: entry.descriptor.clone(),
                    available: status.available,
                    breaker: entry.breaker.state(),
                    last_health_check: status.last_health_check,
                    last_error: status.last_error.clone(),
                    stats: status.stats,
                }
            })
            .collect()
    }

    /// Start the background services: resource sampling and the
    /// periodic health tick. Idempotent; a second call is a no-op while
    /// the first loop is alive.
    pub fn start(&self) {
        self.resources.start();

        let mut task = match self.health_task.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }

        let set = Arc::clone(&self.set);
        let interval = self.health_interval;
        let mut stop_rx = self.stop_tx.subscribe();

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; registration already
            // assumed providers available, so the first real check runs
            // one interval in.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        set.run_health_checks().await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            debug!("health check loop stopped");
                            return;
                        }
                    }
                }
            }
        }));
    }

    /// Stop the background services. Safe to call without a prior
    /// `start`.
    pub fn shutdown(&self) {
        let _ = self.stop_tx.send(true);
        self.resources.shutdown();
    }

    /// Probe every provider once, off the periodic schedule.
    pub(crate) async fn run_health_checks(&self) {
        self.set.run_health_checks().await;
    }
}

impl Drop for ProviderRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The expected footprint of embedding `texts`: the inputs plus one
/// `f32` vector of the declared dimensionality per text. Embedding
/// writes nothing to disk.
fn estimate_for(texts: &[String], dimension: usize) -> OperationEstimate {
    let input_bytes: u64 = texts.iter().map(|t| t.len() as u64).sum();
    let output_bytes = (texts.len() * dimension * std::mem::size_of::<f32>()) as u64;

    OperationEstimate {
        disk_bytes: 0,
        mem_bytes: input_bytes + output_bytes,
    }
}

/// Rough token count for backends that report no usage, at the common
/// four-characters-per-token approximation.
fn estimate_tokens(texts: &[String]) -> u64 {
    texts
        .iter()
        .map(|text| (text.chars().count() as u64 + 3) / 4)
        .sum()
}

fn check_dimension(
    descriptor: &ProviderDescriptor,
    response: EmbedResponse,
) -> Result<EmbedResponse, Error> {
    match response
        .vectors
        .iter()
        .find(|vector| vector.len() != descriptor.dimension)
    {
        Some(vector) => Err(Error::from_source(
            ErrorKind::Unknown,
            format!(
                "backend returned a {}-dimensional vector, expected {}",
                vector.len(),
                descriptor.dimension
            )
            .into(),
        )),
        None => Ok(response),
    }
}

fn record_success(
    entry: &ProviderEntry,
    response: &EmbedResponse,
    elapsed: Duration,
    texts: &[String],
) {
    let tokens = response
        .usage
        .tokens
        .unwrap_or_else(|| estimate_tokens(texts));

    let mut status = entry.lock_status();
    status.available = true;

    let stats = &mut status.stats;
    stats.total_requests += 1;
    stats.total_tokens += tokens;
    stats.total_cost += tokens as f64 * entry.descriptor.cost_per_token;

    let successes = (stats.total_requests - stats.total_errors) as f64;
    let sample_ms = elapsed.as_secs_f64() * 1000.0;
    stats.average_latency_ms += (sample_ms - stats.average_latency_ms) / successes;
}

fn record_failure(entry: &ProviderEntry, err: &Error) {
    let mut status = entry.lock_status();

    status.last_error = Some(err.to_string());
    status.stats.total_requests += 1;
    status.stats.total_errors += 1;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{BackendKind, Usage};
    use crate::resources::{ResourceSampler, ResourceThresholds};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const GB: u64 = 1024 * 1024 * 1024;

    struct StaticSampler {
        disk_free: u64,
        mem_free: u64,
    }

    impl ResourceSampler for StaticSampler {
        fn sample(&self) -> (u64, u64) {
            (self.disk_free, self.mem_free)
        }
    }

    struct ScriptedProvider {
        backend: BackendKind,
        dimension: usize,
        /// Failures served before calls start succeeding.
        failures_left: AtomicUsize,
        fail_kind: ErrorKind,
        calls: AtomicUsize,
        healthy: AtomicBool,
    }

    impl ScriptedProvider {
        fn reliable(dimension: usize) -> Arc<ScriptedProvider> {
            Arc::new(ScriptedProvider {
                backend: BackendKind::CloudApi,
                dimension,
                failures_left: AtomicUsize::new(0),
                fail_kind: ErrorKind::Network,
                calls: AtomicUsize::new(0),
                healthy: AtomicBool::new(true),
            })
        }

        fn failing(dimension: usize, failures: usize, kind: ErrorKind) -> Arc<ScriptedProvider> {
            Arc::new(ScriptedProvider {
                backend: BackendKind::CloudApi,
                dimension,
                failures_left: AtomicUsize::new(failures),
                fail_kind: kind,
                calls: AtomicUsize::new(0),
                healthy: AtomicBool::new(true),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        fn backend(&self) -> BackendKind {
            self.backend
        }

        async fn embed(&self, texts: &[String]) -> Result<EmbedResponse, Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            let remaining = self.failures_left.load(Ordering::SeqCst);

            if remaining > 0 {
                self.failures_left.store(remaining - 1, Ordering::SeqCst);
                return Err(Error::from_kind(self.fail_kind));
            }

            Ok(EmbedResponse {
                vectors: vec![vec![0.0; self.dimension]; texts.len()],
                usage: Usage { tokens: Some(8) },
            })
        }

        async fn healthcheck(&self) -> Result<(), Error> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(Error::from_kind(ErrorKind::Network))
            }
        }
    }

    fn descriptor(id: &str, cost_per_token: f64, backend: BackendKind) -> ProviderDescriptor {
        ProviderDescriptor {
            id: id.into(),
            name: id.to_string(),
            backend,
            dimension: 4,
            cost_per_token,
            max_batch_size: 16,
        }
    }

    fn registry_with_headroom(mem_free: u64) -> ProviderRegistry {
        let monitor = ResourceMonitor::new(
            Arc::new(StaticSampler {
                disk_free: 10 * GB,
                mem_free,
            }),
            ResourceThresholds::default(),
        );

        ProviderRegistry::new(
            BackoffPolicy::default(),
            BreakerConfig::default(),
            Arc::new(monitor),
            Duration::from_secs(300),
        )
    }

    fn registry() -> ProviderRegistry {
        registry_with_headroom(4 * GB)
    }

    fn texts() -> Vec<String> {
        vec!["alpha".to_string(), "beta".to_string()]
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(120)
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_providers_are_a_fatal_error() {
        let registry = registry();

        let err = registry
            .embed_batch(&"missing".into(), &texts(), deadline())
            .await
            .expect_err("nothing is registered");

        assert!(matches!(err, RegistryError::UnknownProvider(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_ids_are_rejected() {
        let registry = registry();

        registry
            .register(
                descriptor("embed", 0.0, BackendKind::CloudApi),
                ScriptedProvider::reliable(4),
            )
            .unwrap();

        let err = registry
            .register(
                descriptor("embed", 0.0, BackendKind::CloudApi),
                ScriptedProvider::reliable(4),
            )
            .expect_err("the id is taken");

        assert!(matches!(err, RegistryError::DuplicateProvider(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn empty_batches_are_invalid_input() {
        let registry = registry();
        let provider = ScriptedProvider::reliable(4);

        registry
            .register(descriptor("embed", 0.0, BackendKind::CloudApi), provider.clone())
            .unwrap();

        let err = registry
            .embed_batch(&"embed".into(), &[], deadline())
            .await
            .expect_err("empty batches never reach the provider");

        match err {
            RegistryError::Call(err) => {
                assert_eq!(err.kind(), ErrorKind::InvalidInput);
                assert!(!err.retryable());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let registry = registry();
        let provider = ScriptedProvider::failing(4, 2, ErrorKind::Network);

        registry
            .register(descriptor("embed", 0.0, BackendKind::CloudApi), provider.clone())
            .unwrap();

        let response = registry
            .embed_batch(&"embed".into(), &texts(), deadline())
            .await
            .expect("the third attempt succeeds");

        assert_eq!(response.vectors.len(), 2);
        assert_eq!(provider.calls(), 3);

        let info = registry.provider_info();
        assert_eq!(info[0].stats.total_requests, 3);
        assert_eq!(info[0].stats.total_errors, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_errors_are_not_retried() {
        let registry = registry();
        let provider = ScriptedProvider::failing(4, usize::MAX, ErrorKind::Auth);

        registry
            .register(descriptor("embed", 0.0, BackendKind::CloudApi), provider.clone())
            .unwrap();

        let err = registry
            .embed_batch(&"embed".into(), &texts(), deadline())
            .await
            .expect_err("auth failures are fatal");

        match err {
            RegistryError::Call(err) => assert_eq!(err.kind(), ErrorKind::Auth),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn tripped_breakers_reject_without_calling_the_provider() {
        let monitor = ResourceMonitor::new(
            Arc::new(StaticSampler {
                disk_free: 10 * GB,
                mem_free: 4 * GB,
            }),
            ResourceThresholds::default(),
        );
        let registry = ProviderRegistry::new(
            BackoffPolicy::default(),
            BreakerConfig {
                failure_threshold: 2,
                ..BreakerConfig::default()
            },
            Arc::new(monitor),
            Duration::from_secs(300),
        );

        let provider = ScriptedProvider::failing(4, usize::MAX, ErrorKind::Network);

        registry
            .register(descriptor("embed", 0.0, BackendKind::CloudApi), provider.clone())
            .unwrap();

        // The second failure inside the retry loop trips the breaker;
        // the loop's next acquisition is rejected.
        let err = registry
            .embed_batch(&"embed".into(), &texts(), deadline())
            .await
            .expect_err("the breaker cuts the retry loop short");

        match err {
            RegistryError::Call(err) => {
                assert_eq!(err.kind(), ErrorKind::ProviderUnavailable);
                assert!(!err.retryable());
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.calls(), 2);

        // Subsequent calls are rejected without any provider attempt.
        registry
            .embed_batch(&"embed".into(), &texts(), deadline())
            .await
            .expect_err("the breaker is open");
        assert_eq!(provider.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dimension_mismatches_surface_as_errors() {
        let registry = registry();
        let provider = ScriptedProvider::reliable(3);

        registry
            .register(descriptor("embed", 0.0, BackendKind::CloudApi), provider.clone())
            .unwrap();

        let err = registry
            .embed_batch(&"embed".into(), &texts(), deadline())
            .await
            .expect_err("3-dimensional vectors against a 4-dimensional descriptor");

        match err {
            RegistryError::Call(err) => assert_eq!(err.kind(), ErrorKind::Unknown),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn resource_exhaustion_rejects_before_any_call() {
        let registry = registry_with_headroom(100 * 1024 * 1024);
        let provider = ScriptedProvider::reliable(4);

        registry
            .register(descriptor("embed", 0.0, BackendKind::CloudApi), provider.clone())
            .unwrap();

        let err = registry
            .embed_batch(&"embed".into(), &texts(), deadline())
            .await
            .expect_err("the host is under the memory floor");

        match err {
            RegistryError::Call(err) => assert_eq!(err.kind(), ErrorKind::ResourceExhausted),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn free_providers_rank_ahead_of_paid_ones() {
        let registry = registry();

        registry
            .register(
                descriptor("cloud", 0.00000013, BackendKind::CloudApi),
                ScriptedProvider::reliable(4),
            )
            .unwrap();
        registry
            .register(
                descriptor("minilm", 0.0, BackendKind::LocalAccelerated),
                ScriptedProvider::reliable(4),
            )
            .unwrap();

        let order = registry.healthy_providers();

        assert_eq!(order, vec!["minilm".into(), "cloud".into()]);
    }

    #[tokio::test(start_paused = true)]
    async fn memory_pressure_demotes_local_providers() {
        let registry = registry_with_headroom(100 * 1024 * 1024);

        registry
            .register(
                descriptor("cloud", 0.00000013, BackendKind::CloudApi),
                ScriptedProvider::reliable(4),
            )
            .unwrap();
        registry
            .register(
                descriptor("minilm", 0.0, BackendKind::LocalAccelerated),
                ScriptedProvider::reliable(4),
            )
            .unwrap();

        let order = registry.healthy_providers();

        assert_eq!(order, vec!["cloud".into(), "minilm".into()]);
    }

    #[tokio::test(start_paused = true)]
    async fn open_breakers_are_excluded_from_selection() {
        let registry = registry();

        registry
            .register(
                descriptor("flaky", 0.0, BackendKind::LocalServer),
                ScriptedProvider::failing(4, usize::MAX, ErrorKind::Network),
            )
            .unwrap();
        registry
            .register(
                descriptor("cloud", 0.00000013, BackendKind::CloudApi),
                ScriptedProvider::reliable(4),
            )
            .unwrap();

        // Trip the flaky provider's breaker.
        for _ in 0..2 {
            let _ = registry
                .embed_batch(&"flaky".into(), &texts(), deadline())
                .await;
        }

        let order = registry.healthy_providers();

        assert_eq!(order, vec!["cloud".into()]);
    }

    #[tokio::test(start_paused = true)]
    async fn health_checks_flip_availability() {
        let registry = registry();
        let provider = ScriptedProvider::reliable(4);

        registry
            .register(descriptor("embed", 0.0, BackendKind::CloudApi), provider.clone())
            .unwrap();

        provider.healthy.store(false, Ordering::SeqCst);
        registry.run_health_checks().await;

        assert!(!registry.provider_info()[0].available);
        assert!(registry.healthy_providers().is_empty());

        provider.healthy.store(true, Ordering::SeqCst);
        registry.run_health_checks().await;

        assert!(registry.provider_info()[0].available);
        assert_eq!(registry.healthy_providers(), vec!["embed".into()]);
    }
}
