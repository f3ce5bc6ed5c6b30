use crate::health::monitor::HealthMonitor;
use crate::registry::RegistryClient;
use std::time::Duration;
use tracing::{error, info, warn};

/// Removes `name` from the registry, then runs its shutdown hook under `hook_timeout`.
///
/// The instance and its record leave the registry before the hook runs, so a failing hook still
/// unregisters the service. Returns `false` if the name was not committed or the hook failed.
pub(crate) async fn shutdown_one(registry: &RegistryClient, name: &str, hook_timeout: Duration) -> bool {
    let entry = match registry.remove(name).await {
        Ok(Some(entry)) => entry,
        Ok(None) => {
            warn!(service = name, "Shutdown of unregistered service");
            return false;
        }
        Err(e) => {
            error!(service = name, error = %e, "Shutdown failed");
            return false;
        }
    };

    let Some(hook) = entry.instance.service().shutdown_hook() else {
        info!(service = name, "Shut down");
        return true;
    };
    match tokio::time::timeout(hook_timeout, hook.shutdown()).await {
        Ok(Ok(())) => {
            info!(service = name, "Shut down");
            true
        }
        Ok(Err(e)) => {
            warn!(service = name, error = %e, "Shutdown hook failed");
            false
        }
        Err(_) => {
            warn!(service = name, timeout_ms = hook_timeout.as_millis() as u64, "Shutdown hook timed out");
            false
        }
    }
}

/// Stops monitoring, shuts services down in reverse initialization order, then drops the
/// records of services that never committed. Returns `true` iff every shutdown succeeded.
pub(crate) async fn shutdown_all(
    registry: &RegistryClient,
    monitor: &HealthMonitor,
    hook_timeout: Duration,
) -> bool {
    monitor.stop().await;

    let order = match registry.order().await {
        Ok(order) => order,
        Err(e) => {
            error!(error = %e, "Registry unavailable during shutdown");
            return false;
        }
    };

    info!(services = order.len(), "Shutting down all services");
    let mut all_ok = true;
    for name in order.iter().rev() {
        all_ok &= shutdown_one(registry, name, hook_timeout).await;
    }

    match registry.clear_pending().await {
        Ok(cleared) if cleared > 0 => info!(cleared, "Cleared records of uncommitted services"),
        Ok(_) => {}
        Err(e) => {
            error!(error = %e, "Could not clear pending records");
            all_ok = false;
        }
    }

    if all_ok {
        info!("All services shut down");
    } else {
        warn!("Shutdown finished with failures");
    }
    all_ok
}
