//! # Test Services
//!
//! Scriptable stand-ins for real services, used by this crate's tests and handy in downstream
//! ones.
//!
//! | Type | Use it to |
//! |------|-----------|
//! | [`MockService`] | control what the health probe, status probe and shutdown hook do |
//! | [`CountingFactory`] | count factory calls and script failures before success |
//!
//! ```rust
//! use service_orchestrator::mock::{CountingFactory, MockService, ProbeBehavior};
//!
//! let flaky = CountingFactory::failing_then_healthy(2);
//! let factory = flaky.factory();
//! assert_eq!(flaky.calls(), 0);
//!
//! let service = MockService::new().with_probe(ProbeBehavior::Report("warming_up".into()));
//! assert_eq!(service.probe_calls(), 0);
//! ```

use crate::error::BoxError;
use crate::service::{
    FactoryResult, HealthProbe, ManagedService, ProbeReport, ServiceFactory, ServiceHandle,
    ShutdownHook, StatusProbe, StatusReport,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

/// What [`MockService`]'s health probe does when called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeBehavior {
    /// Returns a report with this status.
    Report(String),
    /// Returns an error with this message.
    Error(String),
    /// Never completes.
    Hang,
}

/// What [`MockService`]'s shutdown hook does when called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownBehavior {
    Succeed,
    Error(String),
    Hang,
}

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct MockError(pub String);

#[derive(Debug, Default)]
pub struct MockService {
    probe: Mutex<Option<ProbeBehavior>>,
    status_probe: bool,
    shutdown: Option<ShutdownBehavior>,
    probe_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
}

impl MockService {
    /// A service with no capabilities.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_probe(self, behavior: ProbeBehavior) -> Self {
        self.set_probe(behavior);
        self
    }

    pub fn with_status_probe(mut self) -> Self {
        self.status_probe = true;
        self
    }

    pub fn with_shutdown(mut self, behavior: ShutdownBehavior) -> Self {
        self.shutdown = Some(behavior);
        self
    }

    /// Changes the probe behaviour of a running instance.
    pub fn set_probe(&self, behavior: ProbeBehavior) {
        *self.probe.lock().unwrap_or_else(PoisonError::into_inner) = Some(behavior);
    }

    pub fn probe_calls(&self) -> usize {
        self.probe_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.shutdown_calls.load(Ordering::SeqCst)
    }

    fn probe_behavior(&self) -> Option<ProbeBehavior> {
        self.probe
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl HealthProbe for MockService {
    async fn health_check(&self) -> Result<ProbeReport, BoxError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        match self.probe_behavior() {
            None => Ok(ProbeReport::ok()),
            Some(ProbeBehavior::Report(status)) => Ok(ProbeReport::with_status(status)),
            Some(ProbeBehavior::Error(message)) => Err(MockError(message).into()),
            Some(ProbeBehavior::Hang) => std::future::pending().await,
        }
    }
}

impl StatusProbe for MockService {
    fn status(&self) -> Result<StatusReport, BoxError> {
        Ok(StatusReport::from([(
            "probe_calls".to_string(),
            self.probe_calls().to_string(),
        )]))
    }
}

#[async_trait]
impl ShutdownHook for MockService {
    async fn shutdown(&self) -> Result<(), BoxError> {
        self.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        match &self.shutdown {
            None | Some(ShutdownBehavior::Succeed) => Ok(()),
            Some(ShutdownBehavior::Error(message)) => Err(MockError(message.clone()).into()),
            Some(ShutdownBehavior::Hang) => std::future::pending().await,
        }
    }
}

impl ManagedService for MockService {
    fn health_probe(&self) -> Option<&dyn HealthProbe> {
        self.probe_behavior().map(|_| self as &dyn HealthProbe)
    }

    fn status_probe(&self) -> Option<&dyn StatusProbe> {
        self.status_probe.then_some(self as &dyn StatusProbe)
    }

    fn shutdown_hook(&self) -> Option<&dyn ShutdownHook> {
        self.shutdown.as_ref().map(|_| self as &dyn ShutdownHook)
    }
}

type Build = Arc<dyn Fn(usize) -> FactoryResult + Send + Sync>;

/// A blocking factory that counts its calls.
#[derive(Clone)]
pub struct CountingFactory {
    calls: Arc<AtomicUsize>,
    build: Build,
}

impl CountingFactory {
    pub fn new<F>(build: F) -> Self
    where
        F: Fn() -> FactoryResult + Send + Sync + 'static,
    {
        Self::with_call_number(move |_| build())
    }

    /// `build` receives the 1-based number of the current call.
    pub fn with_call_number<F>(build: F) -> Self
    where
        F: Fn(usize) -> FactoryResult + Send + Sync + 'static,
    {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            build: Arc::new(build),
        }
    }

    /// Always builds a capability-free [`MockService`].
    pub fn healthy() -> Self {
        Self::new(|| Ok(Some(ServiceHandle::new(MockService::new()))))
    }

    /// Always errors.
    pub fn failing() -> Self {
        Self::new(|| Err(MockError("factory failure".into()).into()))
    }

    /// Errors on the first `failures` calls, then builds a [`MockService`].
    pub fn failing_then_healthy(failures: usize) -> Self {
        Self::with_call_number(move |call| {
            if call <= failures {
                Err(MockError(format!("factory failure #{call}")).into())
            } else {
                Ok(Some(ServiceHandle::new(MockService::new())))
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn factory(&self) -> ServiceFactory {
        let calls = Arc::clone(&self.calls);
        let build = Arc::clone(&self.build);
        ServiceFactory::blocking(move || {
            let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
            build(call)
        })
    }
}
