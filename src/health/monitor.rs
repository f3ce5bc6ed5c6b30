//! Background health pass over every committed service.
//!
//! The loop runs a pass immediately, then sleeps for the configured interval. Cancellation is
//! observed while sleeping and between services; a probe already in flight is allowed to finish
//! (it is bounded by the probe timeout). Changing the configuration restarts the current sleep
//! with the new interval.

use super::HealthChecker;
use crate::config::MonitorConfig;
use crate::registry::RegistryClient;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

struct MonitorTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub(crate) struct HealthMonitor {
    checker: HealthChecker,
    registry: RegistryClient,
    config: watch::Sender<MonitorConfig>,
    task: Mutex<Option<MonitorTask>>,
}

impl HealthMonitor {
    pub fn new(checker: HealthChecker, registry: RegistryClient, config: MonitorConfig) -> Self {
        let (config, _) = watch::channel(config);
        Self {
            checker,
            registry,
            config,
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> MonitorConfig {
        *self.config.borrow()
    }

    /// Starts the loop. Returns `false` if it is already running or monitoring is disabled.
    pub async fn start(&self) -> bool {
        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            debug!("Health monitor already running");
            return false;
        }
        if !self.config().enabled {
            warn!("Health monitoring is disabled");
            return false;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(
            self.checker.clone(),
            self.registry.clone(),
            self.config.subscribe(),
            cancel.clone(),
        ));
        *task = Some(MonitorTask { cancel, handle });
        true
    }

    /// Cancels the loop and waits for it to finish. Returns `false` if it was not running.
    pub async fn stop(&self) -> bool {
        let Some(task) = self.task.lock().await.take() else {
            return false;
        };
        task.cancel.cancel();
        if let Err(e) = task.handle.await {
            error!(error = %e, "Health monitor task failed");
        }
        true
    }

    pub async fn is_running(&self) -> bool {
        self.task
            .lock()
            .await
            .as_ref()
            .is_some_and(|t| !t.handle.is_finished())
    }

    /// Applies the given changes. Zero durations are ignored.
    pub fn configure(
        &self,
        interval: Option<Duration>,
        cache_ttl: Option<Duration>,
        enabled: Option<bool>,
    ) -> MonitorConfig {
        self.config.send_modify(|config| {
            match interval {
                Some(interval) if interval.is_zero() => warn!("Ignoring zero monitor interval"),
                Some(interval) => config.interval = interval,
                None => {}
            }
            match cache_ttl {
                Some(ttl) if ttl.is_zero() => warn!("Ignoring zero cache TTL"),
                Some(ttl) => config.cache_ttl = ttl,
                None => {}
            }
            if let Some(enabled) = enabled {
                config.enabled = enabled;
            }
        });
        let config = self.config();
        info!(
            interval_secs = config.interval.as_secs_f64(),
            cache_ttl_secs = config.cache_ttl.as_secs_f64(),
            enabled = config.enabled,
            "Monitoring configured"
        );
        config
    }
}

impl Drop for HealthMonitor {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.cancel.cancel();
        }
    }
}

async fn run(
    checker: HealthChecker,
    registry: RegistryClient,
    mut config: watch::Receiver<MonitorConfig>,
    cancel: CancellationToken,
) {
    info!(interval_secs = config.borrow().interval.as_secs_f64(), "Health monitor started");

    'monitor: loop {
        let ttl = config.borrow().cache_ttl;
        let names = match registry.list().await {
            Ok(names) => names,
            Err(e) => {
                error!(error = %e, "Registry unavailable, stopping health monitor");
                break;
            }
        };

        let mut degraded = 0;
        for name in &names {
            if cancel.is_cancelled() {
                break 'monitor;
            }
            if !checker.check_one(name, Some(ttl)).await.is_available() {
                degraded += 1;
            }
        }
        debug!(services = names.len(), unavailable = degraded, "Health pass complete");

        loop {
            let interval = config.borrow_and_update().interval;
            tokio::select! {
                _ = cancel.cancelled() => break 'monitor,
                _ = tokio::time::sleep(interval) => break,
                changed = config.changed() => {
                    if changed.is_err() {
                        break 'monitor;
                    }
                }
            }
        }
    }

    info!("Health monitor stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockService, ProbeBehavior};
    use crate::model::{HealthRecord, ServiceStatus};
    use crate::registry::{RegistryActor, ServiceEntry};
    use crate::service::ServiceHandle;
    use std::sync::Arc;

    fn monitor(config: MonitorConfig) -> (HealthMonitor, RegistryClient) {
        let (actor, registry) = RegistryActor::new(16);
        tokio::spawn(actor.run());
        let checker = HealthChecker::new(registry.clone(), Duration::from_millis(50));
        (HealthMonitor::new(checker, registry.clone(), config), registry)
    }

    fn fast() -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_millis(20),
            cache_ttl: Duration::from_millis(1),
            enabled: true,
        }
    }

    #[tokio::test]
    async fn test_start_stop_restart() {
        let (monitor, _) = monitor(fast());
        assert!(monitor.start().await);
        assert!(!monitor.start().await);
        assert!(monitor.is_running().await);

        assert!(monitor.stop().await);
        assert!(!monitor.is_running().await);
        assert!(!monitor.stop().await);

        assert!(monitor.start().await);
        assert!(monitor.stop().await);
    }

    #[tokio::test]
    async fn test_disabled_monitor_does_not_start() {
        let (monitor, _) = monitor(MonitorConfig {
            enabled: false,
            ..fast()
        });
        assert!(!monitor.start().await);
        monitor.configure(None, None, Some(true));
        assert!(monitor.start().await);
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_loop_refreshes_records() {
        let (monitor, registry) = monitor(fast());
        let service = Arc::new(MockService::new().with_probe(ProbeBehavior::Report("ok".into())));
        registry
            .commit(ServiceEntry::new(
                ServiceHandle::from_arc(service.clone()),
                HealthRecord::new("db", ServiceStatus::Healthy, vec![]),
                false,
            ))
            .await
            .unwrap();

        monitor.start().await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        monitor.stop().await;

        assert!(service.probe_calls() >= 2);
        let calls = service.probe_calls();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(service.probe_calls(), calls);
    }

    #[tokio::test]
    async fn test_configure_ignores_zero() {
        let (monitor, _) = monitor(fast());
        let config = monitor.configure(Some(Duration::ZERO), Some(Duration::from_secs(5)), None);
        assert_eq!(config.interval, Duration::from_millis(20));
        assert_eq!(config.cache_ttl, Duration::from_secs(5));
    }
}
