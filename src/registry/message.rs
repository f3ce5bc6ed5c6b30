//! # Registry Messages
//!
//! Requests sent from [`RegistryClient`](super::RegistryClient) to the
//! [`RegistryActor`](super::RegistryActor). Each request that expects an answer carries a
//! one-shot `respond_to` channel.

use crate::model::{HealthRecord, ServiceStatus};
use crate::service::ServiceHandle;
use std::time::Duration;
use tokio::sync::oneshot;

/// Type alias for the one-shot response channel used by the registry.
pub type Response<T> = oneshot::Sender<T>;

/// A committed service: its instance plus its current health record.
#[derive(Debug, Clone)]
pub struct ServiceEntry {
    pub name: String,
    pub instance: ServiceHandle,
    pub record: HealthRecord,
    /// The instance came from a fallback factory rather than the primary one.
    pub fallback: bool,
}

impl ServiceEntry {
    pub fn new(instance: ServiceHandle, record: HealthRecord, fallback: bool) -> Self {
        Self {
            name: record.name.clone(),
            instance,
            record,
            fallback,
        }
    }
}

/// Outcome of claiming a name before initializing it.
#[derive(Debug)]
pub enum Claim {
    /// The name is already committed; nothing to do.
    Committed,
    /// The caller now owns the name and must send `Release` when done.
    Acquired,
    /// Another caller is initializing the name; its outcome arrives here.
    InFlight(oneshot::Receiver<bool>),
}

/// What the health monitor needs to check one service.
#[derive(Debug)]
pub enum Inspection {
    /// A cache entry younger than the requested TTL.
    Cached(HealthRecord),
    /// A committed service that needs a live check.
    Live {
        instance: ServiceHandle,
        record: HealthRecord,
        fallback: bool,
    },
    /// A name with a record but no instance (initializing or failed).
    Pending(HealthRecord),
    NotFound,
}

#[derive(Debug)]
pub enum RegistryRequest {
    Claim {
        name: String,
        respond_to: Response<Claim>,
    },
    /// Ends an in-flight claim. `abandoned` marks an initialization whose caller went away; an
    /// `Initializing` record it left behind becomes `Failed`.
    Release {
        name: String,
        outcome: bool,
        abandoned: bool,
    },
    /// Stores a record for a name that has no committed instance.
    SetPending {
        record: HealthRecord,
        respond_to: Response<()>,
    },
    Commit {
        entry: ServiceEntry,
        respond_to: Response<bool>,
    },
    Get {
        name: String,
        respond_to: Response<Option<ServiceHandle>>,
    },
    Record {
        name: String,
        respond_to: Response<Option<HealthRecord>>,
    },
    Statuses {
        names: Vec<String>,
        respond_to: Response<Vec<(String, Option<ServiceStatus>)>>,
    },
    Inspect {
        name: String,
        /// `None` bypasses the cache.
        ttl: Option<Duration>,
        respond_to: Response<Inspection>,
    },
    /// Replaces the record of a committed service after a live check and caches it.
    StoreHealth {
        record: HealthRecord,
        respond_to: Response<bool>,
    },
    List {
        respond_to: Response<Vec<String>>,
    },
    Order {
        respond_to: Response<Vec<String>>,
    },
    Records {
        respond_to: Response<Vec<HealthRecord>>,
    },
    Remove {
        name: String,
        respond_to: Response<Option<ServiceEntry>>,
    },
    /// Drops every record that has no committed instance.
    ClearPending {
        respond_to: Response<usize>,
    },
}
