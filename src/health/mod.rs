//! # Health Monitoring
//!
//! [`HealthChecker`] runs one check: it asks the registry for a fresh cached record and, on a
//! miss, probes the instance and stores the new record (which also refreshes the cache).
//! [`monitor::HealthMonitor`] runs the checker over every committed service in the background.
//!
//! A check only ever produces `Healthy` or `Degraded`. Probe errors, probe timeouts and any
//! status other than `ok`/`healthy` degrade the service; a fallback instance is always
//! `Degraded`. `Failed` is left to the initialization engine.

pub(crate) mod cache;
pub mod monitor;

use crate::error::OrchestratorError;
use crate::model::{HealthRecord, ServiceStatus};
use crate::registry::{Inspection, RegistryClient};
use crate::service::ServiceHandle;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Probes committed instances and writes the result back to the registry.
///
/// A primary instance whose probe succeeds (or that has no probe) is written `Healthy`. A
/// fallback instance is written `Degraded` even when its probe reports `ok`: it is a stand-in,
/// and only re-initializing the primary clears the degradation.
#[derive(Debug, Clone)]
pub(crate) struct HealthChecker {
    registry: RegistryClient,
    probe_timeout: Duration,
}

impl HealthChecker {
    pub fn new(registry: RegistryClient, probe_timeout: Duration) -> Self {
        Self {
            registry,
            probe_timeout,
        }
    }

    /// Current health of `name`. `ttl` of `None` bypasses the cache.
    ///
    /// Names that never committed return their stored record; unknown names return a
    /// not-found record.
    pub async fn check_one(&self, name: &str, ttl: Option<Duration>) -> HealthRecord {
        match self.try_check_one(name, ttl).await {
            Ok(record) => record,
            Err(e) => {
                error!(service = name, error = %e, "Health check failed");
                HealthRecord::new(name, ServiceStatus::Unhealthy, Vec::new()).with_error(e.to_string())
            }
        }
    }

    async fn try_check_one(
        &self,
        name: &str,
        ttl: Option<Duration>,
    ) -> Result<HealthRecord, OrchestratorError> {
        let (instance, previous, fallback) = match self.registry.inspect(name, ttl).await? {
            Inspection::Cached(record) | Inspection::Pending(record) => return Ok(record),
            Inspection::NotFound => return Ok(HealthRecord::not_found(name)),
            Inspection::Live {
                instance,
                record,
                fallback,
            } => (instance, record, fallback),
        };

        let fresh = self.probe(&instance, &previous, fallback).await;
        if fresh.status != previous.status {
            info!(service = name, from = %previous.status, to = %fresh.status, "Health changed");
        }

        if self.registry.store_health(fresh.clone()).await? {
            Ok(fresh)
        } else {
            // Shut down while the probe was running.
            Ok(HealthRecord::not_found(name))
        }
    }

    async fn probe(
        &self,
        instance: &ServiceHandle,
        previous: &HealthRecord,
        fallback: bool,
    ) -> HealthRecord {
        let service = previous.name.as_str();
        let (status, message) = match instance.service().health_probe() {
            None => (ServiceStatus::Healthy, None),
            Some(probe) => match tokio::time::timeout(self.probe_timeout, probe.health_check()).await {
                Ok(Ok(report)) if report.is_ok() => (ServiceStatus::Healthy, None),
                Ok(Ok(report)) => (
                    ServiceStatus::Degraded,
                    Some(format!("health probe reported '{}'", report.status)),
                ),
                Ok(Err(e)) => {
                    warn!(service, error = %e, "Health probe errored");
                    (
                        ServiceStatus::Degraded,
                        Some(format!("health probe errored: {}", e)),
                    )
                }
                Err(_) => {
                    warn!(service, timeout_ms = self.probe_timeout.as_millis() as u64, "Health probe timed out");
                    (
                        ServiceStatus::Degraded,
                        Some(format!("health probe timed out after {:?}", self.probe_timeout)),
                    )
                }
            },
        };

        if fallback {
            // A substitute stays degraded until the primary is brought back.
            let message = message.or_else(|| previous.error_message.clone());
            return previous.refreshed(ServiceStatus::Degraded, message);
        }
        debug!(service, status = %status, "Checked");
        previous.refreshed(status, message)
    }

    /// Checks every committed service, one after another.
    pub async fn check_all(&self, ttl: Option<Duration>) -> BTreeMap<String, HealthRecord> {
        let names = match self.registry.list().await {
            Ok(names) => names,
            Err(e) => {
                error!(error = %e, "Cannot list services");
                return BTreeMap::new();
            }
        };

        let mut records = BTreeMap::new();
        for name in names {
            let record = self.check_one(&name, ttl).await;
            records.insert(name, record);
        }
        records
    }
}
