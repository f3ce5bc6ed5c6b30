//! # Initialization Engine
//!
//! Brings one service up: name check, in-flight claim, dependency gate, then the attempt loop
//! (build under a deadline, validate, commit). Failed attempts go through the
//! [`recovery`] executor, which may back off, substitute a fallback, or stop.
//!
//! ## Outcome records
//!
//! | Situation | Record written |
//! |-----------|----------------|
//! | blank name | `Failed`, not retried |
//! | dependency missing or unhealthy | `Failed` (or a `Degraded` fallback under `Fallback`) |
//! | attempt loop running | `Initializing` |
//! | attempt succeeded | `Healthy` with duration and earlier failed attempts |
//! | attempts exhausted | `Failed` with the full attempt history |

pub mod recovery;
pub mod validation;

use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, ResolveError};
use crate::model::{AttemptFailure, HealthRecord, RecoveryPolicy, ServiceStatus};
use crate::registry::{Claim, RegistryClient, ServiceEntry};
use crate::resolver;
use crate::service::ServiceFactory;
use recovery::{FailedAttempt, FallbackTable, RecoveryExecutor};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};
use validation::build_validated;

/// Everything needed to initialize one service.
///
/// ```rust
/// use std::time::Duration;
/// use service_orchestrator::{RecoveryPolicy, ServiceDefinition, ServiceFactory, ManagedService};
///
/// struct Index;
/// impl ManagedService for Index {}
///
/// let search = ServiceDefinition::new("search", ServiceFactory::from_fn(|| Ok(Index)))
///     .depends_on(["db"])
///     .policy(RecoveryPolicy::retry(5, Duration::from_millis(500)))
///     .heavy();
/// assert_eq!(search.dependencies(), ["db"]);
/// ```
#[derive(Debug, Clone)]
pub struct ServiceDefinition {
    name: String,
    factory: ServiceFactory,
    dependencies: Vec<String>,
    policy: RecoveryPolicy,
    construction_timeout: Option<Duration>,
    probe_timeout: Option<Duration>,
    heavy: bool,
}

impl ServiceDefinition {
    /// A definition with no dependencies and the default `Retry` policy.
    pub fn new(name: impl Into<String>, factory: ServiceFactory) -> Self {
        Self {
            name: name.into(),
            factory,
            dependencies: Vec::new(),
            policy: RecoveryPolicy::default(),
            construction_timeout: None,
            probe_timeout: None,
            heavy: false,
        }
    }

    pub fn depends_on<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies
            .extend(dependencies.into_iter().map(Into::into));
        self
    }

    pub fn policy(mut self, policy: RecoveryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Overrides the configured construction deadline for this service.
    pub fn construction_timeout(mut self, timeout: Duration) -> Self {
        self.construction_timeout = Some(timeout);
        self
    }

    /// Overrides the configured probe deadline for this service.
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    /// Uses the heavy construction deadline (60s by default) for slow-loading services such as
    /// model runners. An explicit [`construction_timeout`](Self::construction_timeout) wins.
    pub fn heavy(mut self) -> Self {
        self.heavy = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependencies(&self) -> &[String] {
        &self.dependencies
    }

    pub fn recovery_policy(&self) -> RecoveryPolicy {
        self.policy
    }

    pub fn factory(&self) -> &ServiceFactory {
        &self.factory
    }
}

/// Effective deadlines for one initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Timeouts {
    pub construction: Duration,
    pub probe: Duration,
}

/// Clears an in-flight claim, and fails the `Initializing` record, if initialization is abandoned
/// before it can release normally.
struct ClaimGuard<'a> {
    registry: &'a RegistryClient,
    name: &'a str,
    armed: bool,
}

impl ClaimGuard<'_> {
    async fn release(mut self, outcome: bool) -> Result<(), OrchestratorError> {
        self.armed = false;
        self.registry.release(self.name, outcome).await
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(service = self.name, "Initialization abandoned");
            self.registry.abandon_detached(self.name);
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct InitializationEngine {
    registry: RegistryClient,
    recovery: RecoveryExecutor,
    defaults: Timeouts,
    heavy_construction_timeout: Duration,
}

impl InitializationEngine {
    pub fn new(
        registry: RegistryClient,
        fallbacks: Arc<FallbackTable>,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            recovery: RecoveryExecutor::new(registry.clone(), fallbacks, config.max_retry_delay),
            registry,
            defaults: Timeouts {
                construction: config.construction_timeout,
                probe: config.probe_timeout,
            },
            heavy_construction_timeout: config.heavy_construction_timeout,
        }
    }

    fn timeouts_for(&self, definition: &ServiceDefinition) -> Timeouts {
        let construction = match (definition.construction_timeout, definition.heavy) {
            (Some(timeout), _) => timeout,
            (None, true) => self.heavy_construction_timeout,
            (None, false) => self.defaults.construction,
        };
        Timeouts {
            construction,
            probe: definition.probe_timeout.unwrap_or(self.defaults.probe),
        }
    }

    /// Returns `true` once the service is committed (`Healthy`, or `Degraded` on a fallback).
    #[instrument(
        name = "initialize",
        skip(self, definition),
        fields(service = %definition.name(), policy = definition.recovery_policy().name())
    )]
    pub async fn initialize(&self, definition: &ServiceDefinition) -> bool {
        match self.try_initialize(definition).await {
            Ok(initialized) => initialized,
            Err(e) => {
                error!(error = %e, "Initialization aborted");
                false
            }
        }
    }

    async fn try_initialize(&self, definition: &ServiceDefinition) -> Result<bool, OrchestratorError> {
        let name = definition.name();
        if name.trim().is_empty() {
            let err = OrchestratorError::InvalidName(name.to_string());
            error!(error = %err, "Rejected");
            self.record_failure(definition, &err.to_string(), Vec::new(), Duration::ZERO)
                .await?;
            return Ok(false);
        }

        match self.registry.claim(name).await? {
            Claim::Committed => {
                debug!("Already initialized");
                return Ok(true);
            }
            Claim::InFlight(outcome) => {
                info!("Waiting for in-flight initialization");
                return Ok(outcome.await.unwrap_or(false));
            }
            Claim::Acquired => {}
        }

        let guard = ClaimGuard {
            registry: &self.registry,
            name,
            armed: true,
        };
        let result = self.run(definition).await;
        guard.release(matches!(result, Ok(true))).await?;
        result
    }

    async fn run(&self, definition: &ServiceDefinition) -> Result<bool, OrchestratorError> {
        let name = definition.name();
        let policy = definition.recovery_policy();
        let timeouts = self.timeouts_for(definition);
        let started = Instant::now();

        let check = resolver::validate(&self.registry, definition.dependencies()).await?;
        if !check.ok() {
            let err = check.into_error(name);
            if policy.allows_fallback() {
                warn!(error = %err, "Dependencies not ready, trying fallback");
                if self
                    .recovery
                    .substitute(definition, timeouts, &err.to_string(), &[], started.elapsed())
                    .await
                {
                    return Ok(true);
                }
            }
            error!(error = %err, "Dependencies not ready");
            self.record_failure(definition, &err.to_string(), Vec::new(), started.elapsed())
                .await?;
            return Ok(false);
        }

        self.registry
            .set_pending(HealthRecord::new(
                name,
                ServiceStatus::Initializing,
                definition.dependencies().to_vec(),
            ))
            .await?;

        let max_attempts = policy.max_attempts();
        let mut delay = policy.initial_delay();
        let mut history = Vec::new();
        info!(max_attempts, "Initializing");

        for attempt in 1..=max_attempts {
            let err = match build_validated(name, definition.factory(), timeouts).await {
                Ok((instance, verdict)) => {
                    let elapsed = started.elapsed();
                    let probe_status = verdict.probe_status().map(str::to_string);
                    let record = HealthRecord::new(
                        name,
                        ServiceStatus::Healthy,
                        definition.dependencies().to_vec(),
                    )
                    .with_duration(elapsed)
                    .with_attempts(history)
                    .with_diagnostics(verdict.status);
                    if !self
                        .registry
                        .commit(ServiceEntry::new(instance, record, false))
                        .await?
                    {
                        warn!("Already committed, discarding new instance");
                    }
                    info!(
                        attempt,
                        elapsed_ms = elapsed.as_millis() as u64,
                        probe = probe_status.as_deref(),
                        validation = %verdict.detail,
                        "Initialized"
                    );
                    return Ok(true);
                }
                Err(err) => err,
            };

            warn!(attempt, max_attempts, kind = %err.kind(), error = %err, "Attempt failed");
            history.push(AttemptFailure::new(attempt, &err));
            if !err.kind().is_retryable() {
                break;
            }

            let outcome = self
                .recovery
                .apply(
                    definition,
                    timeouts,
                    FailedAttempt {
                        attempt,
                        delay,
                        error: &err,
                        history: &history,
                        elapsed: started.elapsed(),
                    },
                )
                .await;
            if outcome.handled {
                return Ok(true);
            }
            delay = outcome.next_delay;
        }

        let message = history
            .last()
            .map(|failure| failure.message.clone())
            .unwrap_or_else(|| "initialization failed".to_string());
        error!(attempts = history.len(), error = %message, "Initialization failed");
        self.record_failure(definition, &message, history.clone(), started.elapsed())
            .await?;

        if policy.allows_fallback()
            && self
                .recovery
                .substitute(definition, timeouts, &message, &history, started.elapsed())
                .await
        {
            return Ok(true);
        }
        Ok(false)
    }

    async fn record_failure(
        &self,
        definition: &ServiceDefinition,
        message: &str,
        history: Vec<AttemptFailure>,
        elapsed: Duration,
    ) -> Result<(), OrchestratorError> {
        let record = HealthRecord::new(
            definition.name(),
            ServiceStatus::Failed,
            definition.dependencies().to_vec(),
        )
        .with_error(message)
        .with_duration(elapsed)
        .with_attempts(history);
        self.registry.set_pending(record).await
    }

    /// Initializes a batch in dependency order.
    ///
    /// Dependencies already committed in the registry count as defined. If the batch cannot be
    /// planned (a cycle, an undefined dependency, a name defined twice), every definition is
    /// recorded `Failed` and nothing is built.
    #[instrument(name = "initialize_all", skip_all, fields(services = definitions.len()))]
    pub async fn initialize_all(&self, definitions: &[ServiceDefinition]) -> BTreeMap<String, bool> {
        let mut results = BTreeMap::new();

        let known: HashSet<String> = match self.registry.list().await {
            Ok(names) => names.into_iter().collect(),
            Err(e) => {
                error!(error = %e, "Registry unavailable");
                return definitions
                    .iter()
                    .map(|d| (d.name().to_string(), false))
                    .collect();
            }
        };

        let (by_name, order) = match plan(definitions, &known) {
            Ok(planned) => planned,
            Err(e) => {
                error!(error = %e, "Cannot plan batch");
                for definition in definitions {
                    if let Err(record_err) = self
                        .record_failure(definition, &e.to_string(), Vec::new(), Duration::ZERO)
                        .await
                    {
                        warn!(service = definition.name(), error = %record_err, "Could not record failure");
                    }
                    results.insert(definition.name().to_string(), false);
                }
                return results;
            }
        };

        info!(order = ?order, "Planned batch");
        for name in order {
            if let Some(definition) = by_name.get(name.as_str()) {
                let initialized = self.initialize(definition).await;
                results.insert(name, initialized);
            }
        }
        results
    }
}

/// Indexes `definitions` by name and orders them so every service follows its dependencies.
fn plan<'a>(
    definitions: &'a [ServiceDefinition],
    known: &HashSet<String>,
) -> Result<(HashMap<&'a str, &'a ServiceDefinition>, Vec<String>), ResolveError> {
    let mut by_name = HashMap::with_capacity(definitions.len());
    for definition in definitions {
        if by_name.insert(definition.name(), definition).is_some() {
            return Err(ResolveError::DuplicateDefinition {
                service: definition.name().to_string(),
            });
        }
    }
    let graph: HashMap<String, Vec<String>> = by_name
        .iter()
        .map(|(name, d)| (name.to_string(), d.dependencies().to_vec()))
        .collect();
    let order = resolver::resolve_order_with_known(&graph, known)?;
    Ok((by_name, order))
}
