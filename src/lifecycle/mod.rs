//! Lifecycle management.
//!
//! - [`Orchestrator`] - the public entry point that wires the registry, the initialization
//!   engine and the health monitor together
//! - [`OrchestratorBuilder`] - configuration and fallback registration before start-up
//! - shutdown of single services and of everything, in reverse initialization order

pub mod orchestrator;
mod shutdown;

pub use orchestrator::*;
