/// Installs the global `tracing` subscriber.
///
/// Verbosity comes from `RUST_LOG` (for example `RUST_LOG=service_orchestrator=debug`) and
/// defaults to `info`. Calling it twice is harmless; the second call is ignored.
///
/// ```ignore
/// setup_tracing();
/// tracing::info!("Application started");
/// ```
pub fn setup_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init();
}
