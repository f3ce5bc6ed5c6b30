//! # Orchestrator Errors
//!
//! This module defines the error types used inside the orchestrator. None of them cross the
//! public [`Orchestrator`](crate::Orchestrator) boundary: every public operation returns a
//! boolean or a [`HealthRecord`](crate::HealthRecord), and the failure detail recorded here ends
//! up in `HealthRecord::error_message` and `HealthRecord::attempt_history`.
//!
//! ## Taxonomy
//!
//! | Kind | Raised when | Retried |
//! |------|-------------|---------|
//! | `Validation` | the service name is unusable | never |
//! | `Dependency` | a declared dependency is missing or unhealthy | never |
//! | `Construction` | the factory errored or returned no instance | per policy |
//! | `Timeout` | a factory or probe exceeded its deadline | per policy |
//! | `ValidationFailure` | the new instance's own health probe reported failure | per policy |
//! | `Unexpected` | a factory panicked or the registry task is gone | never |

use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Boxed error returned by service factories, probes and shutdown hooks.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Coarse classification of an [`OrchestratorError`], recorded in attempt history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    Dependency,
    Construction,
    Timeout,
    ValidationFailure,
    Unexpected,
}

impl FailureKind {
    /// Whether a fresh construction attempt can plausibly fix this failure.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            FailureKind::Construction | FailureKind::Timeout | FailureKind::ValidationFailure
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::Dependency => "dependency",
            FailureKind::Construction => "construction",
            FailureKind::Timeout => "timeout",
            FailureKind::ValidationFailure => "validation_failure",
            FailureKind::Unexpected => "unexpected",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors produced while bringing a service up or talking to the registry.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("invalid service name {0:?}")]
    InvalidName(String),

    #[error("dependencies not ready for '{service}': {}", dependency_detail(.missing, .unhealthy))]
    Dependency {
        service: String,
        missing: Vec<String>,
        unhealthy: Vec<String>,
    },

    #[error("factory for '{0}' returned no instance")]
    FactoryReturnedNothing(String),

    #[error("factory for '{service}' failed: {source}")]
    Construction {
        service: String,
        #[source]
        source: BoxError,
    },

    #[error("{operation} for '{service}' timed out after {timeout:?}")]
    Timeout {
        service: String,
        operation: &'static str,
        timeout: Duration,
    },

    #[error("instance validation failed for '{service}': {detail}")]
    ValidationFailure { service: String, detail: String },

    #[error("unexpected failure for '{service}': {detail}")]
    Unexpected { service: String, detail: String },

    #[error("Registry closed")]
    RegistryClosed,

    #[error("Registry dropped response channel")]
    RegistryDropped,
}

impl OrchestratorError {
    pub fn kind(&self) -> FailureKind {
        match self {
            OrchestratorError::InvalidName(_) => FailureKind::Validation,
            OrchestratorError::Dependency { .. } => FailureKind::Dependency,
            OrchestratorError::FactoryReturnedNothing(_) | OrchestratorError::Construction { .. } => {
                FailureKind::Construction
            }
            OrchestratorError::Timeout { .. } => FailureKind::Timeout,
            OrchestratorError::ValidationFailure { .. } => FailureKind::ValidationFailure,
            OrchestratorError::Unexpected { .. }
            | OrchestratorError::RegistryClosed
            | OrchestratorError::RegistryDropped => FailureKind::Unexpected,
        }
    }
}

/// Renders the missing/unhealthy lists the way they appear in health records.
pub(crate) fn dependency_detail(missing: &[String], unhealthy: &[String]) -> String {
    let mut parts = Vec::with_capacity(2);
    if !missing.is_empty() {
        parts.push(format!("missing [{}]", missing.join(", ")));
    }
    if !unhealthy.is_empty() {
        parts.push(format!("unhealthy [{}]", unhealthy.join(", ")));
    }
    if parts.is_empty() {
        "none".to_string()
    } else {
        parts.join("; ")
    }
}

/// Errors from planning a batch with [`resolve_order`](crate::resolver::resolve_order).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// The path starts and ends with the service that closed the cycle.
    #[error("cyclic dependency: {}", .path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("'{service}' depends on undefined service '{dependency}'")]
    MissingDependency { service: String, dependency: String },

    #[error("'{service}' is defined more than once")]
    DuplicateDefinition { service: String },
}
