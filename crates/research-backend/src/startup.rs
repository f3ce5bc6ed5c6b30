//! Brings the backend's services up in dependency order and exposes them to request handlers.
//!
//! ```text
//! documents ──► search ──┐
//!                        ├──► answer()
//! llm (heavy) ───────────┘
//! ```
//!
//! `search` and `llm` both run under [`RecoveryPolicy::Fallback`]: when the vector store or the
//! model runner is unreachable the backend keeps serving with the in-memory index or the template
//! responder, and the summary reports it as degraded.

use crate::services::{
    Document, DocumentStore, InMemoryIndex, LlmRunner, Responder, SearchService, TemplateResponder,
    VectorIndex,
};
use service_orchestrator::{
    BoxError, ConfigError, Orchestrator, OrchestratorConfig, RecoveryPolicy, ServiceDefinition,
    ServiceFactory, ServiceSummary,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

pub const DOCUMENTS: &str = "documents";
pub const SEARCH: &str = "search";
pub const LLM: &str = "llm";

const CONTEXT_DOCUMENTS: usize = 3;

/// Where the external backends live. `None` means "not deployed".
#[derive(Debug, Clone, Default)]
pub struct BackendSettings {
    pub vector_endpoint: Option<String>,
    pub llm_endpoint: Option<String>,
    pub llm_model: String,
}

impl BackendSettings {
    pub const VECTOR_ENV_VAR: &'static str = "RESEARCH_VECTOR_ENDPOINT";
    pub const LLM_ENV_VAR: &'static str = "RESEARCH_LLM_ENDPOINT";

    pub fn from_env() -> Self {
        Self {
            vector_endpoint: std::env::var(Self::VECTOR_ENV_VAR).ok(),
            llm_endpoint: std::env::var(Self::LLM_ENV_VAR).ok(),
            llm_model: "mistral-7b".to_string(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid orchestrator configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("required services failed to start: {0:?}")]
    Unavailable(Vec<String>),
}

/// The running backend.
#[derive(Clone)]
pub struct BackendServices {
    orchestrator: Orchestrator,
}

impl BackendServices {
    /// Starts every service. Fails only if a service with no fallback could not be brought up.
    #[instrument(skip_all)]
    pub async fn start(
        settings: BackendSettings,
        config: OrchestratorConfig,
    ) -> Result<Self, StartupError> {
        let orchestrator = Orchestrator::builder()
            .config(config)
            .fallback(
                SEARCH,
                ServiceFactory::from_fn(|| Ok(SearchService::new(InMemoryIndex::default()))),
            )
            .fallback(
                LLM,
                ServiceFactory::from_fn(|| Ok(Responder::new(TemplateResponder))),
            )
            .build()?;

        let results = orchestrator.initialize_all(&definitions(&settings)).await;
        let failed: Vec<String> = results
            .into_iter()
            .filter_map(|(name, ok)| (!ok).then_some(name))
            .collect();
        if !failed.is_empty() {
            orchestrator.shutdown_all().await;
            return Err(StartupError::Unavailable(failed));
        }

        let order = orchestrator.initialization_order().await;
        info!(order = ?order, "Backend started");
        Ok(Self { orchestrator })
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub async fn documents(&self) -> Option<Arc<DocumentStore>> {
        self.orchestrator.get_as(DOCUMENTS).await
    }

    pub async fn search(&self) -> Option<Arc<SearchService>> {
        self.orchestrator.get_as(SEARCH).await
    }

    pub async fn responder(&self) -> Option<Arc<Responder>> {
        self.orchestrator.get_as(LLM).await
    }

    /// Stores a document and indexes it for search.
    pub async fn add_document(
        &self,
        title: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<Document, BoxError> {
        let documents = self.documents().await.ok_or("document store is not running")?;
        let document = documents.add(title, text);
        match self.search().await {
            Some(search) => search.index(&document),
            None => warn!(document_id = document.id, "Search is not running, document not indexed"),
        }
        Ok(document)
    }

    /// Retrieves the best matching documents and asks the responder to answer from them.
    #[instrument(skip(self))]
    pub async fn answer(&self, question: &str) -> Result<String, BoxError> {
        let search = self.search().await.ok_or("search is not running")?;
        let documents = self.documents().await.ok_or("document store is not running")?;
        let responder = self.responder().await.ok_or("llm is not running")?;

        let context: Vec<Document> = search
            .search(question, CONTEXT_DOCUMENTS)
            .into_iter()
            .filter_map(|hit| documents.get(hit.document_id))
            .collect();
        info!(
            hits = context.len(),
            search = search.backend_kind(),
            generator = responder.kind(),
            "Answering"
        );
        responder.answer(question, &context).await
    }

    pub async fn summary(&self) -> ServiceSummary {
        self.orchestrator.summary().await
    }

    pub async fn statuses(&self) -> BTreeMap<String, String> {
        let mut statuses = BTreeMap::new();
        for name in self.orchestrator.list_services().await {
            if let Some(status) = self.orchestrator.status(&name).await {
                statuses.insert(name, status.as_str().to_string());
            }
        }
        statuses
    }

    pub async fn shutdown(&self) -> bool {
        self.orchestrator.shutdown_all().await
    }
}

fn definitions(settings: &BackendSettings) -> Vec<ServiceDefinition> {
    let vector_endpoint = settings.vector_endpoint.clone();
    let llm_endpoint = settings.llm_endpoint.clone();
    let llm_model = settings.llm_model.clone();

    vec![
        ServiceDefinition::new(DOCUMENTS, ServiceFactory::from_fn(|| Ok(DocumentStore::new())))
            .policy(RecoveryPolicy::retry(3, Duration::from_millis(200))),
        ServiceDefinition::new(
            SEARCH,
            ServiceFactory::from_fn(move || {
                let index = VectorIndex::connect(vector_endpoint.as_deref())?;
                Ok(SearchService::new(index))
            }),
        )
        .depends_on([DOCUMENTS])
        .policy(RecoveryPolicy::fallback(2, Duration::from_millis(200))),
        ServiceDefinition::new(
            LLM,
            ServiceFactory::from_fn(move || {
                let runner = LlmRunner::connect(llm_endpoint.as_deref(), llm_model.clone())?;
                Ok(Responder::new(runner))
            }),
        )
        .policy(RecoveryPolicy::fallback(2, Duration::from_millis(500)))
        .heavy(),
    ]
}
