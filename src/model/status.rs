use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a single service.
///
/// Initialization writes `Initializing`, `Healthy`, `Degraded` and `Failed`. The health monitor
/// only ever writes `Healthy` or `Degraded`; `Failed` is reserved for terminal initialization
/// failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    Initializing,
    Healthy,
    Degraded,
    Unhealthy,
    Failed,
}

impl ServiceStatus {
    /// `true` for `Healthy` and `Degraded`: the service can be used by callers and dependents.
    pub fn is_available(self) -> bool {
        matches!(self, ServiceStatus::Healthy | ServiceStatus::Degraded)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceStatus::Initializing => "initializing",
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Degraded => "degraded",
            ServiceStatus::Unhealthy => "unhealthy",
            ServiceStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
