use super::shutdown;
use crate::config::{ConfigError, MonitorConfig, OrchestratorConfig};
use crate::engine::recovery::FallbackTable;
use crate::engine::{InitializationEngine, ServiceDefinition};
use crate::health::monitor::HealthMonitor;
use crate::health::HealthChecker;
use crate::model::{HealthRecord, RecoveryPolicy, ServiceStatus, ServiceSummary};
use crate::registry::{RegistryActor, RegistryClient};
use crate::service::{ManagedService, ServiceFactory, ServiceHandle};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

/// The service lifecycle orchestrator.
///
/// `Orchestrator` is responsible for:
/// - **Initialization**: building services through their factories with deadlines, retries and
///   fallbacks, in dependency order
/// - **Health**: on-demand checks backed by a TTL cache, plus an optional background monitor
/// - **Shutdown**: single services or everything, in reverse initialization order
///
/// Cloning is cheap; all clones share one registry. Every operation reports failure through its
/// return value and the service's [`HealthRecord`], never through an error.
///
/// # Example
///
/// ```rust
/// use service_orchestrator::{ManagedService, Orchestrator, RecoveryPolicy, ServiceFactory};
///
/// struct Db;
/// impl ManagedService for Db {}
///
/// # #[tokio::main]
/// # async fn main() {
/// let orchestrator = Orchestrator::new();
/// let db = ServiceFactory::from_fn(|| Ok(Db));
///
/// assert!(orchestrator.initialize("db", db, Vec::<String>::new(), RecoveryPolicy::Fail).await);
/// assert!(orchestrator.is_healthy("db").await);
/// assert!(orchestrator.get_as::<Db>("db").await.is_some());
///
/// orchestrator.shutdown_all().await;
/// # }
/// ```
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    config: OrchestratorConfig,
    registry: RegistryClient,
    engine: InitializationEngine,
    checker: HealthChecker,
    monitor: HealthMonitor,
}

/// Configures an [`Orchestrator`] before it starts.
#[derive(Debug, Default)]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    fallbacks: FallbackTable,
}

impl OrchestratorBuilder {
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers the factory used when `service` runs under [`RecoveryPolicy::Fallback`] and
    /// its primary factory or dependencies fail.
    pub fn fallback(mut self, service: impl Into<String>, factory: ServiceFactory) -> Self {
        self.fallbacks.insert(service, factory);
        self
    }

    /// Validates the configuration and spawns the registry task. Must be called inside a Tokio
    /// runtime.
    pub fn build(self) -> Result<Orchestrator, ConfigError> {
        self.config.validate()?;
        Ok(Orchestrator::start(self.config, self.fallbacks))
    }
}

impl Default for Orchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Orchestrator {
    /// An orchestrator with the default configuration and no fallbacks.
    pub fn new() -> Self {
        Self::start(OrchestratorConfig::default(), FallbackTable::new())
    }

    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    fn start(config: OrchestratorConfig, fallbacks: FallbackTable) -> Self {
        let (actor, registry) = RegistryActor::new(config.registry_capacity);
        tokio::spawn(actor.run());

        let fallbacks_len = fallbacks.len();
        let engine = InitializationEngine::new(registry.clone(), Arc::new(fallbacks), &config);
        let checker = HealthChecker::new(registry.clone(), config.probe_timeout);
        let monitor = HealthMonitor::new(checker.clone(), registry.clone(), config.monitor);
        info!(
            construction_timeout_secs = config.construction_timeout.as_secs_f64(),
            probe_timeout_secs = config.probe_timeout.as_secs_f64(),
            fallbacks = fallbacks_len,
            "Orchestrator ready"
        );
        Self {
            inner: Arc::new(Inner {
                config,
                registry,
                engine,
                checker,
                monitor,
            }),
        }
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    // =========================================================================
    // Initialization
    // =========================================================================

    /// Brings `name` up. Returns `true` if it is committed afterwards, including when it already
    /// was (the factory is then not called).
    pub async fn initialize<I, S>(
        &self,
        name: impl Into<String>,
        factory: ServiceFactory,
        dependencies: I,
        policy: RecoveryPolicy,
    ) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let definition = ServiceDefinition::new(name, factory)
            .depends_on(dependencies)
            .policy(policy);
        self.initialize_definition(&definition).await
    }

    pub async fn initialize_definition(&self, definition: &ServiceDefinition) -> bool {
        self.inner.engine.initialize(definition).await
    }

    /// Initializes a batch in dependency order and reports the outcome per service.
    pub async fn initialize_all(&self, definitions: &[ServiceDefinition]) -> BTreeMap<String, bool> {
        self.inner.engine.initialize_all(definitions).await
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    pub async fn get(&self, name: &str) -> Option<ServiceHandle> {
        self.inner.registry.get(name).await.unwrap_or_else(|e| {
            warn!(service = name, error = %e, "Lookup failed");
            None
        })
    }

    /// [`get`](Self::get) plus a downcast to the concrete service type.
    pub async fn get_as<S: ManagedService>(&self, name: &str) -> Option<Arc<S>> {
        self.get(name).await?.downcast::<S>()
    }

    /// `true` iff the last recorded status is `Healthy` or `Degraded`. Does not probe.
    pub async fn is_healthy(&self, name: &str) -> bool {
        self.status(name)
            .await
            .is_some_and(ServiceStatus::is_available)
    }

    pub async fn status(&self, name: &str) -> Option<ServiceStatus> {
        self.health_record(name).await.map(|record| record.status)
    }

    /// The last recorded health of `name`, including failed initializations.
    pub async fn health_record(&self, name: &str) -> Option<HealthRecord> {
        self.inner.registry.record(name).await.unwrap_or_else(|e| {
            warn!(service = name, error = %e, "Record lookup failed");
            None
        })
    }

    /// Committed service names, sorted.
    pub async fn list_services(&self) -> Vec<String> {
        self.inner.registry.list().await.unwrap_or_else(|e| {
            warn!(error = %e, "Listing failed");
            Vec::new()
        })
    }

    /// Committed service names in the order they were committed.
    pub async fn initialization_order(&self) -> Vec<String> {
        self.inner.registry.order().await.unwrap_or_else(|e| {
            warn!(error = %e, "Order lookup failed");
            Vec::new()
        })
    }

    /// Roll-up over every known record, committed or not.
    pub async fn summary(&self) -> ServiceSummary {
        let records = self.inner.registry.records().await.unwrap_or_else(|e| {
            warn!(error = %e, "Record listing failed");
            Vec::new()
        });
        ServiceSummary::from_records(&records)
    }

    // =========================================================================
    // Health
    // =========================================================================

    /// Checks `name`, answering from the cache when `use_cache` is set and the cached record is
    /// younger than the configured TTL.
    ///
    /// A service running on its fallback is reported `Degraded` even when its health check passes.
    #[instrument(skip(self))]
    pub async fn check_health(&self, name: &str, use_cache: bool) -> HealthRecord {
        self.inner.checker.check_one(name, self.ttl(use_cache)).await
    }

    #[instrument(skip(self))]
    pub async fn check_all_health(&self, use_cache: bool) -> BTreeMap<String, HealthRecord> {
        self.inner.checker.check_all(self.ttl(use_cache)).await
    }

    fn ttl(&self, use_cache: bool) -> Option<Duration> {
        use_cache.then(|| self.inner.monitor.config().cache_ttl)
    }

    /// Starts the background monitor. Returns `false` if it is already running or disabled.
    pub async fn start_monitoring(&self) -> bool {
        self.inner.monitor.start().await
    }

    /// Stops the background monitor and waits for the loop to exit.
    pub async fn stop_monitoring(&self) -> bool {
        self.inner.monitor.stop().await
    }

    pub async fn is_monitoring(&self) -> bool {
        self.inner.monitor.is_running().await
    }

    /// Changes monitor settings. `None` leaves a setting as is. Disabling stops a running
    /// monitor; a running monitor picks up a new interval immediately.
    pub async fn configure_monitoring(
        &self,
        interval: Option<Duration>,
        cache_ttl: Option<Duration>,
        enabled: Option<bool>,
    ) -> MonitorConfig {
        let config = self.inner.monitor.configure(interval, cache_ttl, enabled);
        if !config.enabled {
            self.inner.monitor.stop().await;
        }
        config
    }

    // =========================================================================
    // Shutdown
    // =========================================================================

    /// Unregisters `name` and runs its shutdown hook. Returns `false` if the name was not
    /// committed or the hook failed; the service is unregistered either way.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, name: &str) -> bool {
        shutdown::shutdown_one(&self.inner.registry, name, self.inner.config.probe_timeout).await
    }

    /// Stops monitoring and shuts every service down in reverse initialization order.
    #[instrument(skip(self))]
    pub async fn shutdown_all(&self) -> bool {
        shutdown::shutdown_all(
            &self.inner.registry,
            &self.inner.monitor,
            self.inner.config.probe_timeout,
        )
        .await
    }
}
