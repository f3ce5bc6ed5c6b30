use async_trait::async_trait;
use service_orchestrator::mock::{CountingFactory, MockService, ProbeBehavior, ShutdownBehavior};
use service_orchestrator::{
    next_backoff, BoxError, ManagedService, Orchestrator, OrchestratorConfig, OverallHealth,
    RecoveryPolicy, ServiceFactory, ServiceHandle, ServiceStatus, ShutdownHook,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const NO_DEPS: [&str; 0] = [];

fn orchestrator() -> Orchestrator {
    Orchestrator::builder()
        .config(OrchestratorConfig {
            probe_timeout: Duration::from_millis(100),
            ..OrchestratorConfig::default()
        })
        .build()
        .unwrap()
}

fn factory_for(service: &Arc<MockService>) -> ServiceFactory {
    let shared = Arc::clone(service);
    ServiceFactory::blocking(move || Ok(Some(ServiceHandle::from_arc(shared.clone()))))
}

#[tokio::test]
async fn test_shutdown_cleans_up() {
    let orchestrator = orchestrator();
    let service = Arc::new(MockService::new().with_shutdown(ShutdownBehavior::Succeed));
    orchestrator
        .initialize("db", factory_for(&service), NO_DEPS, RecoveryPolicy::Fail)
        .await;

    assert!(orchestrator.shutdown("db").await);
    assert_eq!(service.shutdown_calls(), 1);
    assert!(orchestrator.get("db").await.is_none());
    assert!(orchestrator.health_record("db").await.is_none());
    assert!(orchestrator.check_health("db", true).await.is_not_found());
    assert!(orchestrator.initialization_order().await.is_empty());

    // Unknown names report failure.
    assert!(!orchestrator.shutdown("db").await);
}

#[tokio::test]
async fn test_failing_hook_still_unregisters() {
    let orchestrator = orchestrator();
    let broken = Arc::new(MockService::new().with_shutdown(ShutdownBehavior::Error("busy".into())));
    let stuck = Arc::new(MockService::new().with_shutdown(ShutdownBehavior::Hang));
    orchestrator
        .initialize("db", factory_for(&broken), NO_DEPS, RecoveryPolicy::Fail)
        .await;
    orchestrator
        .initialize("llm", factory_for(&stuck), NO_DEPS, RecoveryPolicy::Fail)
        .await;

    assert!(!orchestrator.shutdown("db").await);
    assert!(!orchestrator.shutdown("llm").await);
    assert!(orchestrator.list_services().await.is_empty());
}

struct Recorder {
    name: &'static str,
    log: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl ShutdownHook for Recorder {
    async fn shutdown(&self) -> Result<(), BoxError> {
        self.log.lock().unwrap().push(self.name);
        Ok(())
    }
}

impl ManagedService for Recorder {
    fn shutdown_hook(&self) -> Option<&dyn ShutdownHook> {
        Some(self)
    }
}

#[tokio::test]
async fn test_shutdown_all_runs_in_reverse_order() {
    let orchestrator = orchestrator();
    let log = Arc::new(Mutex::new(Vec::new()));

    for (name, deps) in [("db", vec![]), ("search", vec!["db"]), ("rag", vec!["search"])] {
        let log = Arc::clone(&log);
        let factory = ServiceFactory::from_fn(move || {
            Ok(Recorder {
                name,
                log: Arc::clone(&log),
            })
        });
        assert!(
            orchestrator
                .initialize(name, factory, deps, RecoveryPolicy::Fail)
                .await
        );
    }
    orchestrator
        .initialize(
            "llm",
            CountingFactory::failing().factory(),
            NO_DEPS,
            RecoveryPolicy::Fail,
        )
        .await;
    orchestrator.start_monitoring().await;

    assert!(orchestrator.shutdown_all().await);
    assert_eq!(*log.lock().unwrap(), vec!["rag", "search", "db"]);
    assert!(!orchestrator.is_monitoring().await);
    assert!(orchestrator.list_services().await.is_empty());
    // Records of services that never committed are gone too.
    assert!(orchestrator.health_record("llm").await.is_none());
    assert_eq!(orchestrator.summary().await.total, 0);
}

#[tokio::test]
async fn test_shutdown_all_reports_hook_failure() {
    let orchestrator = orchestrator();
    let broken = Arc::new(MockService::new().with_shutdown(ShutdownBehavior::Error("busy".into())));
    orchestrator
        .initialize("db", factory_for(&broken), NO_DEPS, RecoveryPolicy::Fail)
        .await;
    orchestrator
        .initialize("cache", CountingFactory::healthy().factory(), NO_DEPS, RecoveryPolicy::Fail)
        .await;

    assert!(!orchestrator.shutdown_all().await);
    assert!(orchestrator.list_services().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_first_initialization_runs_factory_once() {
    let orchestrator = orchestrator();
    let factory = CountingFactory::new(|| {
        std::thread::sleep(Duration::from_millis(100));
        Ok(Some(ServiceHandle::new(MockService::new())))
    });

    let mut tasks = Vec::new();
    for _ in 0..5 {
        let orchestrator = orchestrator.clone();
        let factory = factory.factory();
        tasks.push(tokio::spawn(async move {
            orchestrator
                .initialize("llm", factory, NO_DEPS, RecoveryPolicy::Fail)
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap());
    }

    assert_eq!(factory.calls(), 1);
    assert_eq!(orchestrator.initialization_order().await, vec!["llm"]);
}

#[tokio::test]
async fn test_concurrent_waiters_share_failure() {
    let orchestrator = orchestrator();
    let factory = CountingFactory::new(|| {
        std::thread::sleep(Duration::from_millis(100));
        Err("model file missing".into())
    });

    let first = {
        let orchestrator = orchestrator.clone();
        let factory = factory.factory();
        tokio::spawn(async move {
            orchestrator
                .initialize("llm", factory, NO_DEPS, RecoveryPolicy::Fail)
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    let second = orchestrator
        .initialize("llm", factory.factory(), NO_DEPS, RecoveryPolicy::Fail)
        .await;

    assert!(!first.await.unwrap());
    assert!(!second);
    assert_eq!(factory.calls(), 1);
}

#[tokio::test]
async fn test_cancelled_initialization_does_not_stay_initializing() {
    let orchestrator = orchestrator();
    let slow = ServiceFactory::new(|| async {
        tokio::time::sleep(Duration::from_millis(500)).await;
        Ok::<_, BoxError>(Some(ServiceHandle::new(MockService::new())))
    });

    let cancelled = tokio::time::timeout(
        Duration::from_millis(50),
        orchestrator.initialize("llm", slow, NO_DEPS, RecoveryPolicy::Fail),
    )
    .await;
    assert!(cancelled.is_err());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let record = orchestrator.health_record("llm").await.unwrap();
    assert_eq!(record.status, ServiceStatus::Failed);
    assert_eq!(
        record.error_message.as_deref(),
        Some("initialization abandoned")
    );
    assert!(!orchestrator.is_healthy("llm").await);
    assert_eq!(
        orchestrator.summary().await.overall_health,
        OverallHealth::Unhealthy
    );

    // The claim was released, so a later attempt runs normally.
    assert!(
        orchestrator
            .initialize(
                "llm",
                CountingFactory::healthy().factory(),
                NO_DEPS,
                RecoveryPolicy::Fail,
            )
            .await
    );
    assert_eq!(orchestrator.status("llm").await, Some(ServiceStatus::Healthy));
}

#[tokio::test]
async fn test_monitor_refreshes_and_stops() {
    let orchestrator = orchestrator();
    let service = Arc::new(MockService::new().with_probe(ProbeBehavior::Report("ok".into())));
    orchestrator
        .initialize("db", factory_for(&service), NO_DEPS, RecoveryPolicy::Fail)
        .await;
    orchestrator
        .configure_monitoring(
            Some(Duration::from_millis(30)),
            Some(Duration::from_millis(1)),
            None,
        )
        .await;

    assert!(orchestrator.start_monitoring().await);
    assert!(orchestrator.is_monitoring().await);

    service.set_probe(ProbeBehavior::Report("warming_up".into()));
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(orchestrator.status("db").await, Some(ServiceStatus::Degraded));

    assert!(orchestrator.stop_monitoring().await);
    let calls = service.probe_calls();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(service.probe_calls(), calls);

    // Restartable.
    assert!(orchestrator.start_monitoring().await);
    assert!(orchestrator.stop_monitoring().await);
}

#[tokio::test]
async fn test_disabling_monitoring_stops_loop() {
    let orchestrator = orchestrator();
    assert!(orchestrator.start_monitoring().await);

    let config = orchestrator
        .configure_monitoring(None, None, Some(false))
        .await;
    assert!(!config.enabled);
    assert!(!orchestrator.is_monitoring().await);
    assert!(!orchestrator.start_monitoring().await);
}

#[test]
fn test_backoff_growth_is_capped() {
    let cap = Duration::from_secs(60);
    let mut delay = Duration::from_secs(1);
    for _ in 0..20 {
        delay = next_backoff(delay, cap);
        assert!(delay <= cap);
    }
    assert_eq!(delay, cap);
}

#[tokio::test]
async fn test_retry_delays_respect_configured_cap() {
    let orchestrator = Orchestrator::builder()
        .config(OrchestratorConfig {
            max_retry_delay: Duration::from_millis(20),
            ..OrchestratorConfig::default()
        })
        .build()
        .unwrap();
    let factory = CountingFactory::failing();

    // An uncapped 10s delay would make this take far longer than a second.
    let started = tokio::time::Instant::now();
    let initialized = orchestrator
        .initialize(
            "db",
            factory.factory(),
            NO_DEPS,
            RecoveryPolicy::retry(4, Duration::from_secs(10)),
        )
        .await;

    assert!(!initialized);
    assert_eq!(factory.calls(), 4);
    assert!(started.elapsed() < Duration::from_secs(1));
}
