//! # Service Registry
//!
//! The registry maps each service name to its live instance and health record, tracks the global
//! initialization order, owns the health cache, and serializes first-time initialization of a
//! name through an in-flight claim.
//!
//! It follows the actor pattern: [`RegistryActor`] owns all state inside one task and
//! [`RegistryClient`] sends it requests over a channel. The registry is never exposed for direct
//! mutation; only the engine, the recovery executor, the health monitor and the shutdown path
//! hold clients.
//!
//! ```rust,ignore
//! let (actor, client) = RegistryActor::new(32);
//! tokio::spawn(actor.run());
//!
//! client.commit(entry).await?;
//! assert_eq!(client.order().await?, vec!["db"]);
//! ```

pub mod actor;
pub mod client;
pub mod message;

pub use actor::RegistryActor;
pub use client::RegistryClient;
pub use message::{Claim, Inspection, ServiceEntry};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{HealthRecord, ServiceStatus};
    use crate::service::{ManagedService, ServiceHandle};
    use std::time::Duration;

    struct Noop;
    impl ManagedService for Noop {}

    fn spawn_registry() -> RegistryClient {
        let (actor, client) = RegistryActor::new(16);
        tokio::spawn(actor.run());
        client
    }

    fn entry(name: &str) -> ServiceEntry {
        ServiceEntry::new(
            ServiceHandle::new(Noop),
            HealthRecord::new(name, ServiceStatus::Healthy, vec![]),
            false,
        )
    }

    #[tokio::test]
    async fn test_commit_records_order_once() {
        let registry = spawn_registry();

        assert!(registry.commit(entry("db")).await.unwrap());
        assert!(registry.commit(entry("search")).await.unwrap());
        // A second commit for the same name is refused.
        assert!(!registry.commit(entry("db")).await.unwrap());

        assert_eq!(registry.order().await.unwrap(), vec!["db", "search"]);
        assert!(registry.get("db").await.unwrap().is_some());
        assert!(registry.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_replaces_pending_record() {
        let registry = spawn_registry();

        registry
            .set_pending(HealthRecord::new("db", ServiceStatus::Initializing, vec![]))
            .await
            .unwrap();
        assert_eq!(
            registry.record("db").await.unwrap().map(|r| r.status),
            Some(ServiceStatus::Initializing)
        );

        registry.commit(entry("db")).await.unwrap();
        let records = registry.records().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, ServiceStatus::Healthy);
    }

    #[tokio::test]
    async fn test_claim_serializes_same_name() {
        let registry = spawn_registry();

        assert!(matches!(
            registry.claim("db").await.unwrap(),
            Claim::Acquired
        ));
        let waiter = match registry.claim("db").await.unwrap() {
            Claim::InFlight(rx) => rx,
            other => panic!("expected in-flight claim, got {other:?}"),
        };

        registry.commit(entry("db")).await.unwrap();
        registry.release("db", true).await.unwrap();
        assert!(waiter.await.unwrap());

        assert!(matches!(
            registry.claim("db").await.unwrap(),
            Claim::Committed
        ));
    }

    #[tokio::test]
    async fn test_abandoned_claim_fails_initializing_record() {
        let registry = spawn_registry();

        assert!(matches!(
            registry.claim("llm").await.unwrap(),
            Claim::Acquired
        ));
        let waiter = match registry.claim("llm").await.unwrap() {
            Claim::InFlight(rx) => rx,
            other => panic!("expected in-flight claim, got {other:?}"),
        };
        registry
            .set_pending(HealthRecord::new("llm", ServiceStatus::Initializing, vec![]))
            .await
            .unwrap();

        registry.abandon_detached("llm");
        assert!(!waiter.await.unwrap());

        let record = registry.record("llm").await.unwrap().unwrap();
        assert_eq!(record.status, ServiceStatus::Failed);
        assert_eq!(
            record.error_message.as_deref(),
            Some("initialization abandoned")
        );
        // The name can be claimed again.
        assert!(matches!(
            registry.claim("llm").await.unwrap(),
            Claim::Acquired
        ));
    }

    #[tokio::test]
    async fn test_abandon_keeps_failed_record() {
        let registry = spawn_registry();
        registry.claim("db").await.unwrap();
        registry
            .set_pending(
                HealthRecord::new("db", ServiceStatus::Failed, vec![]).with_error("missing [disk]"),
            )
            .await
            .unwrap();

        registry.abandon_detached("db");
        let record = registry.record("db").await.unwrap().unwrap();
        assert_eq!(record.error_message.as_deref(), Some("missing [disk]"));
    }

    #[tokio::test]
    async fn test_inspect_uses_cache_only_within_ttl() {
        let registry = spawn_registry();
        registry.commit(entry("db")).await.unwrap();

        // Nothing cached yet: the monitor has to run a live check.
        let inspection = registry
            .inspect("db", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        assert!(matches!(inspection, Inspection::Live { .. }));

        let checked = HealthRecord::new("db", ServiceStatus::Degraded, vec![]);
        assert!(registry.store_health(checked).await.unwrap());

        let inspection = registry
            .inspect("db", Some(Duration::from_secs(60)))
            .await
            .unwrap();
        match inspection {
            Inspection::Cached(record) => assert_eq!(record.status, ServiceStatus::Degraded),
            other => panic!("expected cache hit, got {other:?}"),
        }

        // Bypassing the cache always asks for a live check.
        let inspection = registry.inspect("db", None).await.unwrap();
        assert!(matches!(inspection, Inspection::Live { .. }));
    }

    #[tokio::test]
    async fn test_remove_clears_everything() {
        let registry = spawn_registry();
        registry.commit(entry("db")).await.unwrap();
        registry
            .store_health(HealthRecord::new("db", ServiceStatus::Healthy, vec![]))
            .await
            .unwrap();

        let removed = registry.remove("db").await.unwrap();
        assert_eq!(removed.map(|e| e.name), Some("db".to_string()));

        assert!(registry.get("db").await.unwrap().is_none());
        assert!(registry.record("db").await.unwrap().is_none());
        assert!(registry.order().await.unwrap().is_empty());
        assert!(matches!(
            registry.inspect("db", Some(Duration::from_secs(60))).await.unwrap(),
            Inspection::NotFound
        ));
        // Health arriving after removal does not resurrect the service.
        assert!(!registry
            .store_health(HealthRecord::new("db", ServiceStatus::Healthy, vec![]))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_statuses_cover_pending_and_unknown() {
        let registry = spawn_registry();
        registry.commit(entry("db")).await.unwrap();
        registry
            .set_pending(HealthRecord::new("llm", ServiceStatus::Failed, vec![]))
            .await
            .unwrap();

        let statuses = registry
            .statuses(&["db".to_string(), "llm".to_string(), "ghost".to_string()])
            .await
            .unwrap();
        assert_eq!(
            statuses,
            vec![
                ("db".to_string(), Some(ServiceStatus::Healthy)),
                ("llm".to_string(), Some(ServiceStatus::Failed)),
                ("ghost".to_string(), None),
            ]
        );

        assert_eq!(registry.clear_pending().await.unwrap(), 1);
        assert!(registry.record("llm").await.unwrap().is_none());
    }
}
