//! Short-lived cache of health records.
//!
//! Entries are read-only snapshots: a live check always inserts a fresh record rather than
//! patching the cached one. The cache is owned by the registry task, so it needs no locking.

use crate::model::HealthRecord;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct CachedRecord {
    record: HealthRecord,
    cached_at: Instant,
}

#[derive(Debug, Default)]
pub(crate) struct HealthCache {
    entries: HashMap<String, CachedRecord>,
}

impl HealthCache {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the cached record if `now - cached_at < ttl`.
    pub(crate) fn get_fresh(&self, name: &str, ttl: Duration, now: Instant) -> Option<&HealthRecord> {
        self.entries
            .get(name)
            .filter(|entry| now.saturating_duration_since(entry.cached_at) < ttl)
            .map(|entry| &entry.record)
    }

    pub(crate) fn insert(&mut self, record: HealthRecord, now: Instant) {
        self.entries.insert(
            record.name.clone(),
            CachedRecord {
                record,
                cached_at: now,
            },
        );
    }

    pub(crate) fn invalidate(&mut self, name: &str) {
        self.entries.remove(name);
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ServiceStatus;

    fn record(name: &str) -> HealthRecord {
        HealthRecord::new(name, ServiceStatus::Healthy, vec![])
    }

    #[test]
    fn test_entry_valid_within_ttl() {
        let mut cache = HealthCache::new();
        let start = Instant::now();
        cache.insert(record("db"), start);

        let ttl = Duration::from_secs(60);
        assert!(cache.get_fresh("db", ttl, start).is_some());
        assert!(cache
            .get_fresh("db", ttl, start + Duration::from_secs(59))
            .is_some());
        // Exactly at the TTL boundary the entry is stale.
        assert!(cache
            .get_fresh("db", ttl, start + Duration::from_secs(60))
            .is_none());
    }

    #[test]
    fn test_zero_ttl_never_hits() {
        let mut cache = HealthCache::new();
        let now = Instant::now();
        cache.insert(record("db"), now);
        assert!(cache.get_fresh("db", Duration::ZERO, now).is_none());
    }

    #[test]
    fn test_insert_replaces_and_invalidate_removes() {
        let mut cache = HealthCache::new();
        let now = Instant::now();
        cache.insert(record("db"), now);
        let degraded = record("db").refreshed(ServiceStatus::Degraded, Some("slow".into()));
        cache.insert(degraded, now);
        assert_eq!(cache.len(), 1);
        assert_eq!(
            cache
                .get_fresh("db", Duration::from_secs(1), now)
                .map(|r| r.status),
            Some(ServiceStatus::Degraded)
        );

        cache.invalidate("db");
        assert!(cache.get_fresh("db", Duration::from_secs(1), now).is_none());

        cache.insert(record("a"), now);
        cache.clear();
        assert_eq!(cache.len(), 0);
    }
}
