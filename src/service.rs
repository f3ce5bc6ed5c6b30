//! # Managed Services
//!
//! The orchestrator treats every service as an opaque instance produced by a factory. The only
//! things it ever asks of an instance are the optional capabilities defined here:
//!
//! - [`HealthProbe`] - an async self-check returning a [`ProbeReport`]
//! - [`StatusProbe`] - a synchronous diagnostic snapshot, never used to decide health
//! - [`ShutdownHook`] - async cleanup invoked when the service is shut down
//!
//! A type opts into a capability by implementing the trait and returning `Some(self)` from the
//! matching accessor on [`ManagedService`]. The accessors default to `None`, so a service with no
//! capabilities is a one-line impl:
//!
//! ```rust
//! use service_orchestrator::ManagedService;
//!
//! struct Cache;
//! impl ManagedService for Cache {}
//! ```
//!
//! ## Factories
//!
//! A [`ServiceFactory`] is a zero-argument constructor. It may be asynchronous
//! ([`ServiceFactory::new`]) or blocking ([`ServiceFactory::blocking`]). Blocking factories run on
//! Tokio's blocking pool so the construction deadline applies to both kinds alike.

use crate::error::{BoxError, OrchestratorError};
use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Statuses a health probe may report that mark the instance as broken.
const FAILING_STATUSES: [&str; 3] = ["error", "failed", "unhealthy"];

/// Statuses a health probe may report that mark the instance as fully healthy.
const OK_STATUSES: [&str; 2] = ["ok", "healthy"];

/// Result of a [`HealthProbe`] call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub status: String,
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl ProbeReport {
    pub fn ok() -> Self {
        Self::with_status("ok")
    }

    pub fn with_status(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// `error`, `failed` or `unhealthy` (any case). Fatal during instance validation.
    pub fn is_failing(&self) -> bool {
        FAILING_STATUSES
            .iter()
            .any(|s| self.status.eq_ignore_ascii_case(s))
    }

    /// `ok` or `healthy` (any case). Anything else degrades a running service.
    pub fn is_ok(&self) -> bool {
        OK_STATUSES.iter().any(|s| self.status.eq_ignore_ascii_case(s))
    }
}

/// Diagnostic snapshot returned by a [`StatusProbe`].
pub type StatusReport = BTreeMap<String, String>;

/// Async self-check. May suspend; callers always wrap it in a deadline.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn health_check(&self) -> Result<ProbeReport, BoxError>;
}

/// Synchronous diagnostics. Recorded for operators, never fatal.
pub trait StatusProbe: Send + Sync {
    fn status(&self) -> Result<StatusReport, BoxError>;
}

/// Cleanup run when the service is shut down. May suspend.
#[async_trait]
pub trait ShutdownHook: Send + Sync {
    async fn shutdown(&self) -> Result<(), BoxError>;
}

/// Capability discovery for a service instance.
///
/// # Provided Methods
/// All three accessors default to `None`. Override the ones your type supports:
///
/// ```rust
/// use async_trait::async_trait;
/// use service_orchestrator::{BoxError, HealthProbe, ManagedService, ProbeReport};
///
/// struct SearchIndex;
///
/// #[async_trait]
/// impl HealthProbe for SearchIndex {
///     async fn health_check(&self) -> Result<ProbeReport, BoxError> {
///         Ok(ProbeReport::ok().detail("documents", "42"))
///     }
/// }
///
/// impl ManagedService for SearchIndex {
///     fn health_probe(&self) -> Option<&dyn HealthProbe> {
///         Some(self)
///     }
/// }
/// ```
pub trait ManagedService: Send + Sync + 'static {
    fn health_probe(&self) -> Option<&dyn HealthProbe> {
        None
    }

    fn status_probe(&self) -> Option<&dyn StatusProbe> {
        None
    }

    fn shutdown_hook(&self) -> Option<&dyn ShutdownHook> {
        None
    }
}

/// A committed (or about to be committed) service instance.
///
/// Cloning is cheap: the handle holds two views of the same `Arc`, one for capability dispatch
/// and one for typed access through [`downcast`](ServiceHandle::downcast).
#[derive(Clone)]
pub struct ServiceHandle {
    service: Arc<dyn ManagedService>,
    any: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl ServiceHandle {
    pub fn new<S: ManagedService>(service: S) -> Self {
        Self::from_arc(Arc::new(service))
    }

    pub fn from_arc<S: ManagedService>(service: Arc<S>) -> Self {
        Self {
            service: service.clone(),
            any: service,
            type_name: std::any::type_name::<S>(),
        }
    }

    pub fn service(&self) -> &dyn ManagedService {
        self.service.as_ref()
    }

    /// Returns the concrete instance if it is an `S`.
    pub fn downcast<S: ManagedService>(&self) -> Option<Arc<S>> {
        Arc::clone(&self.any).downcast::<S>().ok()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }
}

impl fmt::Debug for ServiceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("type", &self.type_name)
            .finish()
    }
}

/// What a factory produces: an instance, nothing, or an error.
pub type FactoryResult = Result<Option<ServiceHandle>, BoxError>;

#[derive(Clone)]
enum FactoryKind {
    Async(Arc<dyn Fn() -> BoxFuture<'static, FactoryResult> + Send + Sync>),
    Blocking(Arc<dyn Fn() -> FactoryResult + Send + Sync>),
}

/// Caller-supplied constructor for a service instance.
#[derive(Clone)]
pub struct ServiceFactory {
    kind: FactoryKind,
}

impl ServiceFactory {
    /// Wraps an async constructor.
    pub fn new<F, Fut>(factory: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FactoryResult> + Send + 'static,
    {
        Self {
            kind: FactoryKind::Async(Arc::new(move || factory().boxed())),
        }
    }

    /// Wraps a synchronous constructor that may block.
    pub fn blocking<F>(factory: F) -> Self
    where
        F: Fn() -> FactoryResult + Send + Sync + 'static,
    {
        Self {
            kind: FactoryKind::Blocking(Arc::new(factory)),
        }
    }

    /// Async constructor that always produces an `S` (or an error).
    pub fn from_async<S, F, Fut>(factory: F) -> Self
    where
        S: ManagedService,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<S, BoxError>> + Send + 'static,
    {
        Self::new(move || factory().map(|built| built.map(|s| Some(ServiceHandle::new(s)))))
    }

    /// Synchronous constructor that always produces an `S` (or an error).
    pub fn from_fn<S, F>(factory: F) -> Self
    where
        S: ManagedService,
        F: Fn() -> Result<S, BoxError> + Send + Sync + 'static,
    {
        Self::blocking(move || factory().map(|s| Some(ServiceHandle::new(s))))
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self.kind, FactoryKind::Blocking(_))
    }

    /// Invokes the factory under `deadline`.
    ///
    /// A timed-out blocking factory keeps running on the blocking pool; its eventual result is
    /// discarded.
    pub(crate) async fn build(
        &self,
        service: &str,
        deadline: Duration,
    ) -> Result<ServiceHandle, OrchestratorError> {
        let timed_out = || OrchestratorError::Timeout {
            service: service.to_string(),
            operation: "construction",
            timeout: deadline,
        };
        let panicked = |detail: String| OrchestratorError::Unexpected {
            service: service.to_string(),
            detail: format!("factory panicked: {}", detail),
        };

        let result = match &self.kind {
            FactoryKind::Async(factory) => {
                let factory = Arc::clone(factory);
                let call = AssertUnwindSafe(async move { factory().await }).catch_unwind();
                match tokio::time::timeout(deadline, call).await {
                    Err(_) => return Err(timed_out()),
                    Ok(Err(payload)) => return Err(panicked(panic_message(payload.as_ref()))),
                    Ok(Ok(result)) => result,
                }
            }
            FactoryKind::Blocking(factory) => {
                let factory = Arc::clone(factory);
                let task = tokio::task::spawn_blocking(move || factory());
                match tokio::time::timeout(deadline, task).await {
                    Err(_) => return Err(timed_out()),
                    Ok(Err(join_error)) => return Err(panicked(join_error.to_string())),
                    Ok(Ok(result)) => result,
                }
            }
        };

        match result {
            Ok(Some(handle)) => Ok(handle),
            Ok(None) => Err(OrchestratorError::FactoryReturnedNothing(service.to_string())),
            Err(source) => Err(OrchestratorError::Construction {
                service: service.to_string(),
                source,
            }),
        }
    }
}

impl fmt::Debug for ServiceFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_blocking() { "blocking" } else { "async" };
        f.debug_struct("ServiceFactory").field("kind", &kind).finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
