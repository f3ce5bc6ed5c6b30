//! Instance validation run after every successful factory call.
//!
//! Two tiers: a health probe that reports `error`, `failed` or `unhealthy` is fatal; everything
//! else (a slow probe, a probe that errors, the status probe) is advisory and only ends up in the
//! detail string and the logs.

use super::Timeouts;
use crate::error::OrchestratorError;
use crate::service::{ProbeReport, ServiceFactory, ServiceHandle, StatusReport};
use std::time::Duration;
use tracing::{debug, warn};

/// Verdict on a freshly built instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validation {
    pub ok: bool,
    pub detail: String,
    pub probe: Option<ProbeReport>,
    pub status: Option<StatusReport>,
}

pub async fn validate_instance(
    service: &str,
    instance: &ServiceHandle,
    probe_timeout: Duration,
) -> Validation {
    let mut ok = true;
    let mut notes = Vec::new();
    let mut probe = None;
    let mut status = None;

    if let Some(health) = instance.service().health_probe() {
        match tokio::time::timeout(probe_timeout, health.health_check()).await {
            Ok(Ok(report)) => {
                if report.is_failing() {
                    ok = false;
                    notes.push(format!("health probe reported '{}'", report.status));
                } else {
                    debug!(service, status = %report.status, "Health probe passed");
                }
                probe = Some(report);
            }
            Ok(Err(e)) => {
                warn!(service, error = %e, "Health probe errored during validation");
                notes.push(format!("health probe errored: {}", e));
            }
            Err(_) => {
                warn!(service, timeout_ms = probe_timeout.as_millis() as u64, "Health probe timed out during validation");
                notes.push(format!("health probe timed out after {:?}", probe_timeout));
            }
        }
    }

    if let Some(diagnostics) = instance.service().status_probe() {
        match diagnostics.status() {
            Ok(report) => {
                debug!(service, fields = report.len(), "Status probe recorded");
                status = Some(report);
            }
            Err(e) => {
                warn!(service, error = %e, "Status probe errored");
                notes.push(format!("status probe errored: {}", e));
            }
        }
    }

    Validation {
        ok,
        detail: if notes.is_empty() {
            "ok".to_string()
        } else {
            notes.join("; ")
        },
        probe,
        status,
    }
}

/// One construction attempt: invoke `factory` under the construction deadline, then validate the
/// instance it produced. The verdict comes back with the instance so its diagnostics can be
/// recorded at commit.
pub(crate) async fn build_validated(
    service: &str,
    factory: &ServiceFactory,
    timeouts: Timeouts,
) -> Result<(ServiceHandle, Validation), OrchestratorError> {
    let instance = factory.build(service, timeouts.construction).await?;
    let verdict = validate_instance(service, &instance, timeouts.probe).await;
    if !verdict.ok {
        return Err(OrchestratorError::ValidationFailure {
            service: service.to_string(),
            detail: verdict.detail,
        });
    }
    Ok((instance, verdict))
}

impl Validation {
    /// Status reported by the health probe, if one answered.
    pub fn probe_status(&self) -> Option<&str> {
        self.probe.as_ref().map(|report| report.status.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockService, ProbeBehavior};

    #[tokio::test]
    async fn test_no_capabilities_passes() {
        let handle = ServiceHandle::new(MockService::new());
        let verdict = validate_instance("plain", &handle, Duration::from_secs(1)).await;
        assert!(verdict.ok);
        assert_eq!(verdict.detail, "ok");
        assert!(verdict.probe.is_none());
    }

    #[tokio::test]
    async fn test_failing_status_is_fatal() {
        let handle =
            ServiceHandle::new(MockService::new().with_probe(ProbeBehavior::Report("FAILED".into())));
        let verdict = validate_instance("db", &handle, Duration::from_secs(1)).await;
        assert!(!verdict.ok);
        assert!(verdict.detail.contains("FAILED"));
    }

    #[tokio::test]
    async fn test_probe_timeout_is_advisory() {
        let handle = ServiceHandle::new(MockService::new().with_probe(ProbeBehavior::Hang));
        let verdict = validate_instance("slow", &handle, Duration::from_millis(20)).await;
        assert!(verdict.ok);
        assert!(verdict.detail.contains("timed out"));
    }

    #[tokio::test]
    async fn test_probe_error_is_advisory() {
        let handle =
            ServiceHandle::new(MockService::new().with_probe(ProbeBehavior::Error("disk".into())));
        let verdict = validate_instance("db", &handle, Duration::from_secs(1)).await;
        assert!(verdict.ok);
        assert!(verdict.detail.contains("disk"));
    }

    #[tokio::test]
    async fn test_status_probe_is_recorded() {
        let handle = ServiceHandle::new(MockService::new().with_status_probe());
        let verdict = validate_instance("db", &handle, Duration::from_secs(1)).await;
        assert!(verdict.ok);
        assert!(verdict.status.is_some());
        assert!(verdict.probe_status().is_none());
    }

    #[tokio::test]
    async fn test_build_returns_verdict_with_instance() {
        let factory = crate::mock::CountingFactory::new(|| {
            Ok(Some(ServiceHandle::new(
                MockService::new()
                    .with_probe(ProbeBehavior::Report("warming_up".into()))
                    .with_status_probe(),
            )))
        });
        let timeouts = Timeouts {
            construction: Duration::from_secs(1),
            probe: Duration::from_secs(1),
        };
        let (_, verdict) = build_validated("db", &factory.factory(), timeouts)
            .await
            .unwrap();
        assert_eq!(verdict.probe_status(), Some("warming_up"));
        assert_eq!(verdict.status.unwrap()["probe_calls"], "1");
    }
}
