use crate::error::{FailureKind, OrchestratorError};
use crate::model::ServiceStatus;
use crate::service::StatusReport;
use serde::Serialize;
use std::time::{Duration, SystemTime};

/// One failed construction attempt, kept in [`HealthRecord::attempt_history`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptFailure {
    pub attempt: u32,
    pub kind: FailureKind,
    pub message: String,
}

impl AttemptFailure {
    pub fn new(attempt: u32, error: &OrchestratorError) -> Self {
        Self {
            attempt,
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// The latest known status snapshot for a service.
///
/// Records are never patched in place. Every status-affecting event (an initialization step, a
/// live health check) builds a new record and hands it to the registry, which replaces the old
/// one. Readers therefore always hold a consistent snapshot.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthRecord {
    pub name: String,
    pub status: ServiceStatus,
    pub last_check: SystemTime,
    pub error_message: Option<String>,
    pub dependencies: Vec<String>,
    pub initialization_duration_seconds: Option<f64>,
    pub attempt_history: Vec<AttemptFailure>,
    /// What the instance's status probe returned when it was validated.
    pub diagnostics: Option<StatusReport>,
    #[serde(skip)]
    not_found: bool,
}

impl HealthRecord {
    /// Creates a record stamped with the current wall-clock time.
    pub fn new(name: impl Into<String>, status: ServiceStatus, dependencies: Vec<String>) -> Self {
        Self {
            name: name.into(),
            status,
            last_check: SystemTime::now(),
            error_message: None,
            dependencies,
            initialization_duration_seconds: None,
            attempt_history: Vec::new(),
            diagnostics: None,
            not_found: false,
        }
    }

    /// Record returned for names the registry has never heard of (or has shut down).
    pub fn not_found(name: impl Into<String>) -> Self {
        let name = name.into();
        let message = format!("service '{}' not found", name);
        let mut record = Self::new(name, ServiceStatus::Unhealthy, Vec::new()).with_error(message);
        record.not_found = true;
        record
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = Some(message.into());
        self
    }

    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.initialization_duration_seconds = Some(elapsed.as_secs_f64());
        self
    }

    pub fn with_attempts(mut self, attempts: Vec<AttemptFailure>) -> Self {
        self.attempt_history = attempts;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Option<StatusReport>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Builds the successor of this record after a live check.
    ///
    /// Dependencies, initialization duration, attempt history and diagnostics carry over; status,
    /// error and timestamp are fresh.
    pub fn refreshed(&self, status: ServiceStatus, error_message: Option<String>) -> Self {
        Self {
            name: self.name.clone(),
            status,
            last_check: SystemTime::now(),
            error_message,
            dependencies: self.dependencies.clone(),
            initialization_duration_seconds: self.initialization_duration_seconds,
            attempt_history: self.attempt_history.clone(),
            diagnostics: self.diagnostics.clone(),
            not_found: false,
        }
    }

    pub fn is_available(&self) -> bool {
        self.status.is_available()
    }

    /// `true` only for records built by [`not_found`](Self::not_found).
    pub fn is_not_found(&self) -> bool {
        self.not_found
    }
}

/// Roll-up of every known service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallHealth {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Aggregate counts returned by [`Orchestrator::summary`](crate::Orchestrator::summary).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceSummary {
    pub total: usize,
    pub healthy_count: usize,
    pub degraded_count: usize,
    pub failed_count: usize,
    pub overall_health: OverallHealth,
}

impl ServiceSummary {
    /// `failed_count` covers `Failed` and `Unhealthy`. Any such service makes the whole process
    /// unhealthy; otherwise any degraded or still-initializing service makes it degraded.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a HealthRecord>) -> Self {
        let (mut total, mut healthy, mut degraded, mut failed, mut pending) = (0, 0, 0, 0, 0);
        for record in records {
            total += 1;
            match record.status {
                ServiceStatus::Healthy => healthy += 1,
                ServiceStatus::Degraded => degraded += 1,
                ServiceStatus::Failed | ServiceStatus::Unhealthy => failed += 1,
                ServiceStatus::Initializing => pending += 1,
            }
        }

        let overall_health = if failed > 0 {
            OverallHealth::Unhealthy
        } else if degraded > 0 || pending > 0 {
            OverallHealth::Degraded
        } else {
            OverallHealth::Healthy
        };

        Self {
            total,
            healthy_count: healthy,
            degraded_count: degraded,
            failed_count: failed,
            overall_health,
        }
    }
}
