//! # Registry Client
//!
//! Cloneable handle used by the engine, the recovery executor, the health monitor and the
//! lifecycle controller to talk to the [`RegistryActor`](super::RegistryActor).

use super::message::{Claim, Inspection, RegistryRequest, Response, ServiceEntry};
use crate::error::OrchestratorError;
use crate::model::{HealthRecord, ServiceStatus};
use crate::service::ServiceHandle;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// Async API over the registry's request channel.
///
/// Every method fails with [`OrchestratorError::RegistryClosed`] once the registry task has
/// stopped, and with [`OrchestratorError::RegistryDropped`] if it stopped mid-request.
#[derive(Clone, Debug)]
pub struct RegistryClient {
    sender: mpsc::Sender<RegistryRequest>,
}

impl RegistryClient {
    pub fn new(sender: mpsc::Sender<RegistryRequest>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Response<T>) -> RegistryRequest,
    ) -> Result<T, OrchestratorError> {
        let (respond_to, response) = oneshot::channel();
        self.sender
            .send(build(respond_to))
            .await
            .map_err(|_| OrchestratorError::RegistryClosed)?;
        response.await.map_err(|_| OrchestratorError::RegistryDropped)
    }

    pub async fn claim(&self, name: &str) -> Result<Claim, OrchestratorError> {
        let name = name.to_string();
        self.request(|respond_to| RegistryRequest::Claim { name, respond_to })
            .await
    }

    pub async fn release(&self, name: &str, outcome: bool) -> Result<(), OrchestratorError> {
        self.sender
            .send(RegistryRequest::Release {
                name: name.to_string(),
                outcome,
                abandoned: false,
            })
            .await
            .map_err(|_| OrchestratorError::RegistryClosed)
    }

    /// Releases a claim whose initialization was dropped mid-way. Callable from `Drop`: when the
    /// channel is full the request is sent from a spawned task instead.
    pub fn abandon_detached(&self, name: &str) {
        let request = RegistryRequest::Release {
            name: name.to_string(),
            outcome: false,
            abandoned: true,
        };
        match self.sender.try_send(request) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(request)) => {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let sender = self.sender.clone();
                    runtime.spawn(async move {
                        let _ = sender.send(request).await;
                    });
                }
            }
        }
    }

    pub async fn set_pending(&self, record: HealthRecord) -> Result<(), OrchestratorError> {
        self.request(|respond_to| RegistryRequest::SetPending { record, respond_to })
            .await
    }

    pub async fn commit(&self, entry: ServiceEntry) -> Result<bool, OrchestratorError> {
        self.request(|respond_to| RegistryRequest::Commit { entry, respond_to })
            .await
    }

    pub async fn get(&self, name: &str) -> Result<Option<ServiceHandle>, OrchestratorError> {
        let name = name.to_string();
        self.request(|respond_to| RegistryRequest::Get { name, respond_to })
            .await
    }

    pub async fn record(&self, name: &str) -> Result<Option<HealthRecord>, OrchestratorError> {
        let name = name.to_string();
        self.request(|respond_to| RegistryRequest::Record { name, respond_to })
            .await
    }

    /// Current status for each name, `None` for names the registry does not know.
    pub async fn statuses(
        &self,
        names: &[String],
    ) -> Result<Vec<(String, Option<ServiceStatus>)>, OrchestratorError> {
        let names = names.to_vec();
        self.request(|respond_to| RegistryRequest::Statuses { names, respond_to })
            .await
    }

    pub async fn inspect(
        &self,
        name: &str,
        ttl: Option<Duration>,
    ) -> Result<Inspection, OrchestratorError> {
        let name = name.to_string();
        self.request(|respond_to| RegistryRequest::Inspect {
            name,
            ttl,
            respond_to,
        })
        .await
    }

    pub async fn store_health(&self, record: HealthRecord) -> Result<bool, OrchestratorError> {
        self.request(|respond_to| RegistryRequest::StoreHealth { record, respond_to })
            .await
    }

    /// Committed names, sorted.
    pub async fn list(&self) -> Result<Vec<String>, OrchestratorError> {
        self.request(|respond_to| RegistryRequest::List { respond_to })
            .await
    }

    /// Committed names in commit order.
    pub async fn order(&self) -> Result<Vec<String>, OrchestratorError> {
        self.request(|respond_to| RegistryRequest::Order { respond_to })
            .await
    }

    /// Every known record, committed or not, sorted by name.
    pub async fn records(&self) -> Result<Vec<HealthRecord>, OrchestratorError> {
        self.request(|respond_to| RegistryRequest::Records { respond_to })
            .await
    }

    pub async fn remove(&self, name: &str) -> Result<Option<ServiceEntry>, OrchestratorError> {
        let name = name.to_string();
        self.request(|respond_to| RegistryRequest::Remove { name, respond_to })
            .await
    }

    pub async fn clear_pending(&self) -> Result<usize, OrchestratorError> {
        self.request(|respond_to| RegistryRequest::ClearPending { respond_to })
            .await
    }
}
