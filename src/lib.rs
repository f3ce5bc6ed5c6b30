//! # Service Orchestrator
//!
//! > **Bring up, watch over and tear down the subsystems of a long-running process.**
//!
//! A backend that glues together a vector store, a model runner and a document store needs to
//! start them in the right order, survive the ones that fail, and keep track of which are still
//! usable. This crate does that without knowing what any of them are: every service is an opaque
//! instance produced by a factory, optionally exposing a health probe, a status probe and a
//! shutdown hook.
//!
//! ## Core Concepts
//!
//! ### Services and Factories
//! A service is any type implementing [`ManagedService`]. A [`ServiceFactory`] builds it, either
//! asynchronously or on the blocking pool, always under a deadline.
//!
//! ### Recovery Policies
//! Each initialization picks a [`RecoveryPolicy`]:
//! - **Retry** - back off (1.5x per attempt, capped) and call the factory again
//! - **Fallback** - like `Retry`, but substitute a registered fallback instance (`Degraded`)
//!   as soon as one can be built
//! - **Fail** - one attempt
//!
//! ### Health
//! Every service has a [`HealthRecord`]. Records are replaced, never patched. Live checks are
//! cached for a configurable TTL and a background monitor can refresh every service periodically.
//!
//! ## Architecture Notes
//!
//! ### 1. One Owner for All State
//! The registry (instances, records, initialization order, health cache, in-flight claims) lives
//! in a single actor task. Everything else talks to it through a cloneable client, so registry
//! updates are atomic without locks and callers only interleave at factory calls, probes and
//! backoff sleeps.
//!
//! ### 2. No Errors Across the Public Boundary
//! Public operations return `bool` or a record. Failure detail (including the kind and message of
//! every failed attempt) lives in [`HealthRecord::error_message`] and
//! [`HealthRecord::attempt_history`].
//!
//! ### 3. Observability
//! `tracing` everywhere, with `service` as a structured field on every lifecycle event. See
//! [`setup_tracing`].
//!
//! ## Module Tour
//!
//! | Module | Role |
//! |--------|------|
//! | [`lifecycle`] | the [`Orchestrator`] facade and shutdown |
//! | [`engine`] | the attempt loop, instance validation and recovery |
//! | [`resolver`] | dependency checks and batch ordering |
//! | `health` | live checks and the background monitor |
//! | [`model`] | statuses, records and policies |
//! | [`service`] | the capability traits and factories |
//! | [`config`] | timeouts and monitor settings, loadable from TOML |
//! | [`mock`] | scriptable services for tests |
//!
//! ## Quick Start
//!
//! ```rust
//! use service_orchestrator::{ManagedService, Orchestrator, RecoveryPolicy, ServiceFactory};
//!
//! struct Db;
//! impl ManagedService for Db {}
//! struct Search;
//! impl ManagedService for Search {}
//!
//! # #[tokio::main]
//! # async fn main() {
//! let orchestrator = Orchestrator::new();
//! orchestrator
//!     .initialize("db", ServiceFactory::from_fn(|| Ok(Db)), Vec::<String>::new(), RecoveryPolicy::Fail)
//!     .await;
//! orchestrator
//!     .initialize("search", ServiceFactory::from_fn(|| Ok(Search)), ["db"], RecoveryPolicy::Fail)
//!     .await;
//!
//! assert_eq!(orchestrator.initialization_order().await, vec!["db", "search"]);
//! # }
//! ```
//!
//! ### Running the Demo
//!
//! ```bash
//! RUST_LOG=info cargo run -p research-backend
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub(crate) mod health;
pub mod lifecycle;
pub mod mock;
pub mod model;
pub(crate) mod registry;
pub mod resolver;
pub mod service;
mod telemetry;

pub use config::{ConfigError, MonitorConfig, OrchestratorConfig};
pub use engine::recovery::{next_backoff, FallbackTable};
pub use engine::ServiceDefinition;
pub use error::{BoxError, FailureKind, OrchestratorError, ResolveError};
pub use lifecycle::{Orchestrator, OrchestratorBuilder};
pub use model::{
    AttemptFailure, HealthRecord, OverallHealth, RecoveryPolicy, ServiceStatus, ServiceSummary,
};
pub use service::{
    FactoryResult, HealthProbe, ManagedService, ProbeReport, ServiceFactory, ServiceHandle,
    ShutdownHook, StatusProbe, StatusReport,
};
pub use telemetry::setup_tracing;
