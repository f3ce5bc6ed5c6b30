use research_backend::startup::{BackendServices, BackendSettings};
use service_orchestrator::{setup_tracing, OrchestratorConfig};
use tracing::{error, info, Instrument};

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let config = OrchestratorConfig::load();
    let backend = BackendServices::start(BackendSettings::from_env(), config)
        .await
        .map_err(|e| e.to_string())?;

    let papers = [
        ("Attention Is All You Need", "transformer attention encoder decoder"),
        ("Dense Passage Retrieval", "dense retrieval passage embeddings question answering"),
        ("Retrieval Augmented Generation", "retrieval generation knowledge intensive tasks"),
    ];
    for (title, text) in papers {
        let document = backend
            .add_document(title, text)
            .await
            .map_err(|e| e.to_string())?;
        info!(document_id = document.id, title, "Document added");
    }

    let span = tracing::info_span!("question");
    let answer = backend
        .answer("how does retrieval help generation?")
        .instrument(span)
        .await;
    match answer {
        Ok(answer) => info!(answer = %answer, "Answered"),
        Err(e) => error!(error = %e, "Answering failed"),
    }

    let summary = backend.summary().await;
    info!(
        total = summary.total,
        healthy = summary.healthy_count,
        degraded = summary.degraded_count,
        failed = summary.failed_count,
        overall = ?summary.overall_health,
        "Service summary"
    );
    for (name, status) in backend.statuses().await {
        info!(service = %name, status = %status, "Service status");
    }

    if !backend.shutdown().await {
        error!("Some services did not shut down cleanly");
    }
    info!("Backend stopped");
    Ok(())
}
