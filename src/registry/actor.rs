//! # Registry Actor
//!
//! The `RegistryActor` is the single source of truth for committed services, their health
//! records, the initialization order and the health cache. It runs in its own Tokio task and
//! processes requests one at a time, so none of its state needs a lock: every mutation is atomic
//! with respect to every other orchestrator operation.

use super::message::{Claim, Inspection, RegistryRequest, ServiceEntry};
use super::RegistryClient;
use crate::health::cache::HealthCache;
use crate::model::{HealthRecord, ServiceStatus};
use std::collections::HashMap;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Server half of the registry.
///
/// # State
///
/// * `entries` - committed services (instance + current record)
/// * `pending` - records for names without an instance (`Initializing` or `Failed`)
/// * `order` - committed names in commit order, each exactly once
/// * `cache` - health records from the most recent live checks
/// * `in_flight` - names currently being initialized, with callers waiting on the outcome
///
/// A name is never in both `entries` and `pending`.
pub struct RegistryActor {
    receiver: mpsc::Receiver<RegistryRequest>,
    entries: HashMap<String, ServiceEntry>,
    pending: HashMap<String, HealthRecord>,
    order: Vec<String>,
    cache: HealthCache,
    in_flight: HashMap<String, Vec<oneshot::Sender<bool>>>,
}

impl RegistryActor {
    /// Creates the actor and its client. The actor must be driven with `.run()`.
    pub fn new(buffer_size: usize) -> (Self, RegistryClient) {
        let (sender, receiver) = mpsc::channel(buffer_size.max(1));
        let actor = Self {
            receiver,
            entries: HashMap::new(),
            pending: HashMap::new(),
            order: Vec::new(),
            cache: HealthCache::new(),
            in_flight: HashMap::new(),
        };
        (actor, RegistryClient::new(sender))
    }

    /// Processes requests until every client has been dropped.
    pub async fn run(mut self) {
        info!("Registry started");

        while let Some(msg) = self.receiver.recv().await {
            self.handle(msg);
        }

        info!(services = self.entries.len(), "Registry shutdown");
    }

    fn handle(&mut self, msg: RegistryRequest) {
        match msg {
            RegistryRequest::Claim { name, respond_to } => {
                let claim = if self.entries.contains_key(&name) {
                    Claim::Committed
                } else if let Some(waiters) = self.in_flight.get_mut(&name) {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    debug!(service = %name, waiters = waiters.len(), "Waiting on in-flight initialization");
                    Claim::InFlight(rx)
                } else {
                    self.in_flight.insert(name.clone(), Vec::new());
                    Claim::Acquired
                };
                let _ = respond_to.send(claim);
            }
            RegistryRequest::Release {
                name,
                outcome,
                abandoned,
            } => {
                // An abandoned caller may have committed before it went away.
                let outcome = outcome || (abandoned && self.entries.contains_key(&name));
                if abandoned {
                    self.abandon(&name);
                }
                if let Some(waiters) = self.in_flight.remove(&name) {
                    for waiter in waiters {
                        let _ = waiter.send(outcome);
                    }
                }
            }
            RegistryRequest::SetPending { record, respond_to } => {
                if self.entries.contains_key(&record.name) {
                    warn!(service = %record.name, status = %record.status, "Ignoring pending record for committed service");
                } else {
                    debug!(service = %record.name, status = %record.status, "Record");
                    self.pending.insert(record.name.clone(), record);
                }
                let _ = respond_to.send(());
            }
            RegistryRequest::Commit { entry, respond_to } => {
                if self.entries.contains_key(&entry.name) {
                    warn!(service = %entry.name, "Already committed");
                    let _ = respond_to.send(false);
                    return;
                }
                let name = entry.name.clone();
                self.pending.remove(&name);
                self.cache.invalidate(&name);
                self.order.push(name.clone());
                info!(
                    service = %name,
                    status = %entry.record.status,
                    fallback = entry.fallback,
                    size = self.entries.len() + 1,
                    "Committed"
                );
                self.entries.insert(name, entry);
                let _ = respond_to.send(true);
            }
            RegistryRequest::Get { name, respond_to } => {
                let instance = self.entries.get(&name).map(|e| e.instance.clone());
                debug!(service = %name, found = instance.is_some(), "Get");
                let _ = respond_to.send(instance);
            }
            RegistryRequest::Record { name, respond_to } => {
                let _ = respond_to.send(self.record(&name).cloned());
            }
            RegistryRequest::Statuses { names, respond_to } => {
                let statuses = names
                    .into_iter()
                    .map(|name| {
                        let status = self.record(&name).map(|r| r.status);
                        (name, status)
                    })
                    .collect();
                let _ = respond_to.send(statuses);
            }
            RegistryRequest::Inspect {
                name,
                ttl,
                respond_to,
            } => {
                let inspection = match self.entries.get(&name) {
                    Some(entry) => {
                        let cached = ttl.and_then(|ttl| {
                            self.cache.get_fresh(&name, ttl, Instant::now()).cloned()
                        });
                        match cached {
                            Some(record) => {
                                debug!(service = %name, "Cache hit");
                                Inspection::Cached(record)
                            }
                            None => Inspection::Live {
                                instance: entry.instance.clone(),
                                record: entry.record.clone(),
                                fallback: entry.fallback,
                            },
                        }
                    }
                    None => match self.pending.get(&name) {
                        Some(record) => Inspection::Pending(record.clone()),
                        None => Inspection::NotFound,
                    },
                };
                let _ = respond_to.send(inspection);
            }
            RegistryRequest::StoreHealth { record, respond_to } => {
                // The service may have been shut down while its probe was running.
                let stored = match self.entries.get_mut(&record.name) {
                    Some(entry) => {
                        debug!(service = %record.name, status = %record.status, "Health stored");
                        self.cache.insert(record.clone(), Instant::now());
                        entry.record = record;
                        true
                    }
                    None => {
                        debug!(service = %record.name, "Dropping health for removed service");
                        false
                    }
                };
                let _ = respond_to.send(stored);
            }
            RegistryRequest::List { respond_to } => {
                let mut names: Vec<String> = self.entries.keys().cloned().collect();
                names.sort();
                let _ = respond_to.send(names);
            }
            RegistryRequest::Order { respond_to } => {
                let _ = respond_to.send(self.order.clone());
            }
            RegistryRequest::Records { respond_to } => {
                let mut records: Vec<HealthRecord> = self
                    .entries
                    .values()
                    .map(|e| e.record.clone())
                    .chain(self.pending.values().cloned())
                    .collect();
                records.sort_by(|a, b| a.name.cmp(&b.name));
                let _ = respond_to.send(records);
            }
            RegistryRequest::Remove { name, respond_to } => {
                let removed = self.entries.remove(&name);
                self.pending.remove(&name);
                self.cache.invalidate(&name);
                self.order.retain(|n| n != &name);
                if removed.is_some() {
                    info!(service = %name, size = self.entries.len(), "Removed");
                } else {
                    debug!(service = %name, "Remove of unknown service");
                }
                let _ = respond_to.send(removed);
            }
            RegistryRequest::ClearPending { respond_to } => {
                let cleared = self.pending.len();
                self.pending.clear();
                if self.entries.is_empty() {
                    self.cache.clear();
                }
                let _ = respond_to.send(cleared);
            }
        }
    }

    fn abandon(&mut self, name: &str) {
        let Some(record) = self.pending.get_mut(name) else {
            return;
        };
        if record.status == ServiceStatus::Initializing {
            warn!(service = %name, "Initialization abandoned, marking failed");
            *record = record.refreshed(
                ServiceStatus::Failed,
                Some("initialization abandoned".to_string()),
            );
        }
    }

    fn record(&self, name: &str) -> Option<&HealthRecord> {
        self.entries
            .get(name)
            .map(|e| &e.record)
            .or_else(|| self.pending.get(name))
    }
}
