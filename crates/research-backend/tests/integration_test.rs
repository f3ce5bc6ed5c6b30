use research_backend::services::DocumentStore;
use research_backend::startup::{BackendServices, BackendSettings, DOCUMENTS, LLM, SEARCH};
use service_orchestrator::{OrchestratorConfig, OverallHealth, ServiceStatus};

fn connected() -> BackendSettings {
    BackendSettings {
        vector_endpoint: Some("http://localhost:6333".to_string()),
        llm_endpoint: Some("http://localhost:11434".to_string()),
        llm_model: "test-model".to_string(),
    }
}

async fn seed(backend: &BackendServices) {
    backend
        .add_document("Attention Is All You Need", "transformer attention")
        .await
        .expect("documents running");
    backend
        .add_document("Retrieval Augmented Generation", "retrieval generation")
        .await
        .expect("documents running");
}

/// Every backend reachable: all services healthy and the model answers.
#[tokio::test]
async fn test_connected_backend_is_healthy() {
    let backend = BackendServices::start(connected(), OrchestratorConfig::default())
        .await
        .expect("backend should start");
    seed(&backend).await;

    let summary = backend.summary().await;
    assert_eq!(summary.total, 3);
    assert_eq!(summary.overall_health, OverallHealth::Healthy);

    let order = backend.orchestrator().initialization_order().await;
    let position = |name: &str| order.iter().position(|n| n == name).unwrap();
    assert!(position(DOCUMENTS) < position(SEARCH));

    let answer = backend.answer("what is retrieval generation?").await.unwrap();
    assert!(answer.starts_with("[test-model]"));
    assert!(answer.contains("Retrieval Augmented Generation"));

    assert!(backend.shutdown().await);
}

/// Nothing deployed: search and llm come up on their fallbacks.
#[tokio::test]
async fn test_missing_endpoints_degrade_to_fallbacks() {
    let backend = BackendServices::start(BackendSettings::default(), OrchestratorConfig::default())
        .await
        .expect("fallbacks should cover missing endpoints");
    seed(&backend).await;

    let orchestrator = backend.orchestrator();
    assert_eq!(orchestrator.status(DOCUMENTS).await, Some(ServiceStatus::Healthy));
    assert_eq!(orchestrator.status(SEARCH).await, Some(ServiceStatus::Degraded));
    assert_eq!(orchestrator.status(LLM).await, Some(ServiceStatus::Degraded));
    assert_eq!(backend.summary().await.overall_health, OverallHealth::Degraded);

    let search = backend.search().await.unwrap();
    assert_eq!(search.backend_kind(), "in_memory");
    assert_eq!(search.indexed(), 2);

    let answer = backend.answer("attention").await.unwrap();
    assert!(answer.contains("Attention Is All You Need"));

    let statuses = backend.statuses().await;
    assert_eq!(statuses.get(SEARCH).map(String::as_str), Some("degraded"));

    assert!(backend.shutdown().await);
    assert!(backend.orchestrator().get_as::<DocumentStore>(DOCUMENTS).await.is_none());
    assert!(backend.answer("attention").await.is_err());
}
