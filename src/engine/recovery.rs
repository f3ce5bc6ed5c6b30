//! # Recovery Strategy Executor
//!
//! Decides what happens after a failed construction attempt: wait and retry, substitute a
//! fallback instance, or stop.

use super::validation::build_validated;
use super::{ServiceDefinition, Timeouts};
use crate::error::OrchestratorError;
use crate::model::{AttemptFailure, HealthRecord, RecoveryPolicy, ServiceStatus};
use crate::registry::{RegistryClient, ServiceEntry};
use crate::service::ServiceFactory;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Fallback factories keyed by the name of the service they stand in for.
#[derive(Debug, Clone, Default)]
pub struct FallbackTable {
    factories: HashMap<String, ServiceFactory>,
}

impl FallbackTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` as the fallback for `service`, replacing any earlier one.
    pub fn insert(&mut self, service: impl Into<String>, factory: ServiceFactory) {
        self.factories.insert(service.into(), factory);
    }

    pub fn get(&self, service: &str) -> Option<&ServiceFactory> {
        self.factories.get(service)
    }

    pub fn contains(&self, service: &str) -> bool {
        self.factories.contains_key(service)
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// What the engine should do after [`RecoveryExecutor::apply`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// A fallback instance was committed; initialization is over.
    pub handled: bool,
    /// Delay to use after the next failed attempt.
    pub next_delay: Duration,
}

/// One failed attempt as seen by the executor.
pub(crate) struct FailedAttempt<'a> {
    pub attempt: u32,
    pub delay: Duration,
    pub error: &'a OrchestratorError,
    pub history: &'a [AttemptFailure],
    pub elapsed: Duration,
}

/// Grows `delay` by 1.5x, never exceeding `cap`.
pub fn next_backoff(delay: Duration, cap: Duration) -> Duration {
    (delay.saturating_mul(3) / 2).min(cap)
}

#[derive(Debug, Clone)]
pub(crate) struct RecoveryExecutor {
    registry: RegistryClient,
    fallbacks: Arc<FallbackTable>,
    max_delay: Duration,
}

impl RecoveryExecutor {
    pub fn new(registry: RegistryClient, fallbacks: Arc<FallbackTable>, max_delay: Duration) -> Self {
        Self {
            registry,
            fallbacks,
            max_delay,
        }
    }

    /// Reacts to a failed attempt according to the definition's policy.
    ///
    /// Never sleeps after the final attempt, and leaves the final fallback attempt to the caller.
    pub async fn apply(
        &self,
        definition: &ServiceDefinition,
        timeouts: Timeouts,
        failed: FailedAttempt<'_>,
    ) -> RecoveryOutcome {
        let policy = definition.recovery_policy();
        let last_attempt = failed.attempt >= policy.max_attempts();

        match policy {
            RecoveryPolicy::Fail => {
                return RecoveryOutcome {
                    handled: false,
                    next_delay: Duration::ZERO,
                }
            }
            RecoveryPolicy::Fallback { .. } if !last_attempt => {
                let cause = failed.error.to_string();
                if self
                    .substitute(definition, timeouts, &cause, failed.history, failed.elapsed)
                    .await
                {
                    return RecoveryOutcome {
                        handled: true,
                        next_delay: failed.delay,
                    };
                }
            }
            _ => {}
        }

        let delay = failed.delay.min(self.max_delay);
        if !last_attempt && !delay.is_zero() {
            debug!(
                service = definition.name(),
                attempt = failed.attempt,
                delay_ms = delay.as_millis() as u64,
                "Backing off"
            );
            tokio::time::sleep(delay).await;
        }

        RecoveryOutcome {
            handled: false,
            next_delay: next_backoff(delay, self.max_delay),
        }
    }

    /// Builds, validates and commits the registered fallback for `definition` as `Degraded`.
    ///
    /// Returns `false` when no fallback is registered or it could not be brought up.
    pub async fn substitute(
        &self,
        definition: &ServiceDefinition,
        timeouts: Timeouts,
        cause: &str,
        history: &[AttemptFailure],
        elapsed: Duration,
    ) -> bool {
        let service = definition.name();
        let Some(factory) = self.fallbacks.get(service) else {
            debug!(service, "No fallback registered");
            return false;
        };

        let (instance, verdict) = match build_validated(service, factory, timeouts).await {
            Ok(built) => built,
            Err(e) => {
                warn!(service, error = %e, "Fallback failed");
                return false;
            }
        };

        let record = HealthRecord::new(
            service,
            ServiceStatus::Degraded,
            definition.dependencies().to_vec(),
        )
        .with_error(format!("running on fallback after: {}", cause))
        .with_duration(elapsed)
        .with_attempts(history.to_vec())
        .with_diagnostics(verdict.status);

        match self
            .registry
            .commit(ServiceEntry::new(instance, record, true))
            .await
        {
            Ok(committed) => {
                if committed {
                    info!(service, cause, "Running on fallback");
                }
                committed
            }
            Err(e) => {
                warn!(service, error = %e, "Could not commit fallback");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{CountingFactory, MockService};
    use crate::registry::RegistryActor;

    fn executor(fallbacks: FallbackTable) -> (RecoveryExecutor, RegistryClient) {
        let (actor, registry) = RegistryActor::new(16);
        tokio::spawn(actor.run());
        let executor = RecoveryExecutor::new(
            registry.clone(),
            Arc::new(fallbacks),
            Duration::from_millis(100),
        );
        (executor, registry)
    }

    fn timeouts() -> Timeouts {
        Timeouts {
            construction: Duration::from_secs(1),
            probe: Duration::from_secs(1),
        }
    }

    fn failure(attempt: u32, delay: Duration, error: &OrchestratorError) -> FailedAttempt<'_> {
        FailedAttempt {
            attempt,
            delay,
            error,
            history: &[],
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn test_backoff_is_capped() {
        let cap = Duration::from_secs(60);
        assert_eq!(
            next_backoff(Duration::from_secs(2), cap),
            Duration::from_secs(3)
        );
        assert_eq!(next_backoff(Duration::from_secs(50), cap), cap);
        assert_eq!(next_backoff(Duration::ZERO, cap), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_fail_policy_never_waits() {
        let (executor, _) = executor(FallbackTable::new());
        let definition =
            ServiceDefinition::new("db", CountingFactory::failing().factory()).policy(RecoveryPolicy::Fail);
        let error = OrchestratorError::FactoryReturnedNothing("db".into());

        let outcome = executor
            .apply(&definition, timeouts(), failure(1, Duration::from_secs(5), &error))
            .await;
        assert_eq!(
            outcome,
            RecoveryOutcome {
                handled: false,
                next_delay: Duration::ZERO
            }
        );
    }

    #[tokio::test]
    async fn test_retry_grows_delay_up_to_cap() {
        let (executor, _) = executor(FallbackTable::new());
        let definition = ServiceDefinition::new("db", CountingFactory::failing().factory())
            .policy(RecoveryPolicy::retry(5, Duration::from_millis(80)));
        let error = OrchestratorError::FactoryReturnedNothing("db".into());

        let outcome = executor
            .apply(&definition, timeouts(), failure(1, Duration::from_millis(80), &error))
            .await;
        assert!(!outcome.handled);
        assert_eq!(outcome.next_delay, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_no_sleep_after_final_attempt() {
        let (executor, _) = executor(FallbackTable::new());
        let definition = ServiceDefinition::new("db", CountingFactory::failing().factory())
            .policy(RecoveryPolicy::retry(2, Duration::from_secs(30)));
        let error = OrchestratorError::FactoryReturnedNothing("db".into());

        let started = tokio::time::Instant::now();
        executor
            .apply(&definition, timeouts(), failure(2, Duration::from_secs(30), &error))
            .await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_fallback_commits_degraded_instance() {
        let mut fallbacks = FallbackTable::new();
        fallbacks.insert("llm", ServiceFactory::from_fn(|| Ok(MockService::new())));
        let (executor, registry) = executor(fallbacks);
        let definition = ServiceDefinition::new("llm", CountingFactory::failing().factory())
            .policy(RecoveryPolicy::fallback(3, Duration::from_secs(30)));
        let error = OrchestratorError::FactoryReturnedNothing("llm".into());

        let outcome = executor
            .apply(&definition, timeouts(), failure(1, Duration::from_secs(30), &error))
            .await;
        assert!(outcome.handled);

        let record = registry.record("llm").await.unwrap().unwrap();
        assert_eq!(record.status, ServiceStatus::Degraded);
        assert!(record
            .error_message
            .unwrap()
            .starts_with("running on fallback after:"));
    }

    #[tokio::test]
    async fn test_fallback_without_entry_behaves_like_retry() {
        let (executor, registry) = executor(FallbackTable::new());
        let definition = ServiceDefinition::new("llm", CountingFactory::failing().factory())
            .policy(RecoveryPolicy::fallback(3, Duration::from_millis(10)));
        let error = OrchestratorError::FactoryReturnedNothing("llm".into());

        let outcome = executor
            .apply(&definition, timeouts(), failure(1, Duration::from_millis(10), &error))
            .await;
        assert!(!outcome.handled);
        assert_eq!(outcome.next_delay, Duration::from_millis(15));
        assert!(registry.get("llm").await.unwrap().is_none());
    }
}
