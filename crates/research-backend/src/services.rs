//! Stand-ins for the backend's subsystems.
//!
//! | Service | Primary | Fallback |
//! |---------|---------|----------|
//! | `documents` | [`DocumentStore`] | none |
//! | `search` | [`VectorIndex`] | [`InMemoryIndex`] |
//! | `llm` | [`LlmRunner`] | [`TemplateResponder`] |
//!
//! The primaries "connect" to an endpoint; without one they fail to construct, which is how the
//! demo and the tests exercise the fallbacks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use service_orchestrator::{
    BoxError, HealthProbe, ManagedService, ProbeReport, ShutdownHook, StatusProbe, StatusReport,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{service} unavailable: no endpoint configured")]
    NoEndpoint { service: &'static str },

    #[error("{service} rejected endpoint '{endpoint}'")]
    BadEndpoint {
        service: &'static str,
        endpoint: String,
    },
}

fn connect(service: &'static str, endpoint: Option<&str>) -> Result<String, BackendError> {
    match endpoint {
        None => Err(BackendError::NoEndpoint { service }),
        Some(endpoint) if !endpoint.contains("://") => Err(BackendError::BadEndpoint {
            service,
            endpoint: endpoint.to_string(),
        }),
        Some(endpoint) => Ok(endpoint.to_string()),
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

// =============================================================================
// Documents
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: u64,
    pub title: String,
    pub text: String,
}

/// Extracted paper text, keyed by id.
#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: RwLock<BTreeMap<u64, Document>>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, title: impl Into<String>, text: impl Into<String>) -> Document {
        let mut documents = self.documents.write().unwrap_or_else(PoisonError::into_inner);
        let id = documents.keys().next_back().map_or(1, |last| last + 1);
        let document = Document {
            id,
            title: title.into(),
            text: text.into(),
        };
        documents.insert(id, document.clone());
        document
    }

    pub fn get(&self, id: u64) -> Option<Document> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn all(&self) -> Vec<Document> {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.documents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl HealthProbe for DocumentStore {
    async fn health_check(&self) -> Result<ProbeReport, BoxError> {
        Ok(ProbeReport::ok().detail("documents", self.len().to_string()))
    }
}

impl StatusProbe for DocumentStore {
    fn status(&self) -> Result<StatusReport, BoxError> {
        Ok(StatusReport::from([(
            "documents".to_string(),
            self.len().to_string(),
        )]))
    }
}

#[async_trait]
impl ShutdownHook for DocumentStore {
    async fn shutdown(&self) -> Result<(), BoxError> {
        info!(documents = self.len(), "Document store closed");
        Ok(())
    }
}

impl ManagedService for DocumentStore {
    fn health_probe(&self) -> Option<&dyn HealthProbe> {
        Some(self)
    }

    fn status_probe(&self) -> Option<&dyn StatusProbe> {
        Some(self)
    }

    fn shutdown_hook(&self) -> Option<&dyn ShutdownHook> {
        Some(self)
    }
}

// =============================================================================
// Search
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub document_id: u64,
    pub score: f32,
}

/// Something that can index documents and rank them against a query.
pub trait SearchBackend: Send + Sync {
    fn kind(&self) -> &'static str;
    fn index(&self, document: &Document);
    fn search(&self, query: &str, limit: usize) -> Vec<SearchHit>;
}

/// Term-frequency index shared by both search backends.
#[derive(Debug, Default)]
struct TermIndex {
    terms: RwLock<BTreeMap<u64, Vec<String>>>,
}

impl TermIndex {
    fn index(&self, document: &Document) {
        let terms = tokens(&document.title).chain(tokens(&document.text)).collect();
        self.terms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(document.id, terms);
    }

    fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        let query: Vec<String> = tokens(query).collect();
        if query.is_empty() {
            return Vec::new();
        }
        let terms = self.terms.read().unwrap_or_else(PoisonError::into_inner);
        let mut hits: Vec<SearchHit> = terms
            .iter()
            .filter_map(|(id, document_terms)| {
                let matches = document_terms.iter().filter(|t| query.contains(t)).count();
                (matches > 0).then(|| SearchHit {
                    document_id: *id,
                    score: matches as f32 / document_terms.len().max(1) as f32,
                })
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.document_id.cmp(&b.document_id)));
        hits.truncate(limit);
        hits
    }
}

/// Client for the external vector store.
#[derive(Debug)]
pub struct VectorIndex {
    endpoint: String,
    terms: TermIndex,
}

impl VectorIndex {
    pub fn connect(endpoint: Option<&str>) -> Result<Self, BackendError> {
        let endpoint = connect("vector store", endpoint)?;
        info!(endpoint = %endpoint, "Connected to vector store");
        Ok(Self {
            endpoint,
            terms: TermIndex::default(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl SearchBackend for VectorIndex {
    fn kind(&self) -> &'static str {
        "vector"
    }

    fn index(&self, document: &Document) {
        self.terms.index(document);
    }

    fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        self.terms.search(query, limit)
    }
}

/// Keyword index kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryIndex {
    terms: TermIndex,
}

impl SearchBackend for InMemoryIndex {
    fn kind(&self) -> &'static str {
        "in_memory"
    }

    fn index(&self, document: &Document) {
        self.terms.index(document);
    }

    fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        self.terms.search(query, limit)
    }
}

/// The `search` service, whichever backend it ended up with.
pub struct SearchService {
    backend: Box<dyn SearchBackend>,
    indexed: AtomicUsize,
}

impl SearchService {
    pub fn new(backend: impl SearchBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            indexed: AtomicUsize::new(0),
        }
    }

    pub fn backend_kind(&self) -> &'static str {
        self.backend.kind()
    }

    pub fn index(&self, document: &Document) {
        self.backend.index(document);
        self.indexed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        self.backend.search(query, limit)
    }

    pub fn indexed(&self) -> usize {
        self.indexed.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl HealthProbe for SearchService {
    async fn health_check(&self) -> Result<ProbeReport, BoxError> {
        Ok(ProbeReport::ok()
            .detail("backend", self.backend_kind())
            .detail("indexed", self.indexed().to_string()))
    }
}

impl ManagedService for SearchService {
    fn health_probe(&self) -> Option<&dyn HealthProbe> {
        Some(self)
    }
}

// =============================================================================
// Answer generation
// =============================================================================

/// Turns a question plus retrieved context into an answer.
#[async_trait]
pub trait Generator: Send + Sync {
    fn kind(&self) -> &'static str;
    async fn generate(&self, question: &str, context: &[Document]) -> Result<String, BoxError>;
}

/// Client for the local model runner.
#[derive(Debug)]
pub struct LlmRunner {
    endpoint: String,
    model: String,
}

impl LlmRunner {
    pub fn connect(endpoint: Option<&str>, model: impl Into<String>) -> Result<Self, BackendError> {
        let endpoint = connect("llm runner", endpoint)?;
        let model = model.into();
        info!(endpoint = %endpoint, model = %model, "Connected to llm runner");
        Ok(Self { endpoint, model })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Generator for LlmRunner {
    fn kind(&self) -> &'static str {
        "llm"
    }

    async fn generate(&self, question: &str, context: &[Document]) -> Result<String, BoxError> {
        let sources: Vec<&str> = context.iter().map(|d| d.title.as_str()).collect();
        Ok(format!(
            "[{}] {} (grounded in: {})",
            self.model,
            question,
            sources.join(", ")
        ))
    }
}

/// Canned answers that quote the retrieved documents.
#[derive(Debug, Default)]
pub struct TemplateResponder;

#[async_trait]
impl Generator for TemplateResponder {
    fn kind(&self) -> &'static str {
        "template"
    }

    async fn generate(&self, question: &str, context: &[Document]) -> Result<String, BoxError> {
        if context.is_empty() {
            return Ok(format!("No documents match \"{}\".", question));
        }
        let titles: Vec<&str> = context.iter().map(|d| d.title.as_str()).collect();
        Ok(format!(
            "The model is unavailable. Relevant documents for \"{}\": {}",
            question,
            titles.join("; ")
        ))
    }
}

/// The `llm` service, whichever generator it ended up with.
pub struct Responder {
    generator: Box<dyn Generator>,
}

impl Responder {
    pub fn new(generator: impl Generator + 'static) -> Self {
        Self {
            generator: Box::new(generator),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.generator.kind()
    }

    pub async fn answer(&self, question: &str, context: &[Document]) -> Result<String, BoxError> {
        self.generator.generate(question, context).await
    }
}

#[async_trait]
impl HealthProbe for Responder {
    async fn health_check(&self) -> Result<ProbeReport, BoxError> {
        Ok(ProbeReport::ok().detail("generator", self.kind()))
    }
}

impl ManagedService for Responder {
    fn health_probe(&self) -> Option<&dyn HealthProbe> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_requires_endpoint() {
        assert!(matches!(
            VectorIndex::connect(None),
            Err(BackendError::NoEndpoint { .. })
        ));
        assert!(matches!(
            LlmRunner::connect(Some("localhost"), "mistral"),
            Err(BackendError::BadEndpoint { .. })
        ));
        assert!(VectorIndex::connect(Some("http://localhost:6333")).is_ok());
    }

    #[test]
    fn test_search_ranks_by_term_overlap() {
        let store = DocumentStore::new();
        let search = SearchService::new(InMemoryIndex::default());
        let a = store.add("Attention", "attention is all you need");
        let b = store.add("Retrieval", "retrieval augmented generation with attention");
        search.index(&a);
        search.index(&b);

        let hits = search.search("attention", 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].document_id, a.id);
        assert!(search.search("graphs", 10).is_empty());
        assert_eq!(search.indexed(), 2);
    }

    #[tokio::test]
    async fn test_template_responder_lists_titles() {
        let responder = Responder::new(TemplateResponder);
        let context = vec![Document {
            id: 1,
            title: "Attention".into(),
            text: String::new(),
        }];
        let answer = responder.answer("what is attention?", &context).await.unwrap();
        assert!(answer.contains("Attention"));
        assert_eq!(responder.kind(), "template");
    }
}
