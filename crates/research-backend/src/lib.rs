//! # Research Backend
//!
//! A small research assistant backend built on [`service_orchestrator`]: a document store, a
//! search index over it and an answer generator. It exists to show the orchestrator driving real
//! services, including the fallback path when an external backend is missing.
//!
//! - **[services]**: the service types and their health, status and shutdown capabilities
//! - **[startup]**: [`BackendServices`](startup::BackendServices), which starts them in order and
//!   answers questions

pub mod services;
pub mod startup;
