//! In-memory record store
//!
//! Process-local implementation of [`RecordStore`] used for development and
//! tests, and as the working-tier backing in single-instance deployments.
//! The map-wide write lock serializes version checks against writes, which
//! is what makes the upsert a correct compare-and-set.

use crate::error::{PulseError, Result};
use crate::storage::RecordStore;
use crate::types::{MemoryRecord, Tier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

type RecordKey = (Tier, String, String);

/// In-memory keyed record store with version-checked upserts
#[derive(Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<RecordKey, MemoryRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn fetch(&self, tier: Tier, scope: &str, key: &str) -> Result<Option<MemoryRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(tier, scope.to_string(), key.to_string()))
            .cloned())
    }

    async fn upsert(
        &self,
        tier: Tier,
        scope: &str,
        key: &str,
        value: Value,
        expires_at: Option<DateTime<Utc>>,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        let mut records = self.records.write().await;
        let map_key = (tier, scope.to_string(), key.to_string());

        // An expired record is invisible to readers, so it must not
        // participate in the version check either; otherwise the key would
        // be unwritable until the next sweep. Its version still seeds the
        // counter so versions stay monotonic per key.
        let now = Utc::now();
        let stored_version = records.get(&map_key).map(|r| r.version);
        let live_version = records
            .get(&map_key)
            .filter(|r| !r.is_expired(now))
            .map(|r| r.version);
        if live_version != expected_version {
            return Err(PulseError::StaleWrite {
                scope: scope.to_string(),
                key: key.to_string(),
                expected: expected_version.unwrap_or(0),
                found: live_version.unwrap_or(0),
            });
        }

        let version = stored_version.unwrap_or(0).max(expected_version.unwrap_or(0)) + 1;
        records.insert(
            map_key,
            MemoryRecord {
                tier,
                scope: scope.to_string(),
                key: key.to_string(),
                value,
                created_at: Utc::now(),
                expires_at,
                version,
            },
        );
        Ok(version)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        let removed = before - records.len();
        if removed > 0 {
            debug!(removed, "swept expired memory records");
        }
        Ok(removed)
    }

    async fn purge_scope(&self, tier: Tier, scope: &str) -> Result<usize> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|(t, s, _), _| *t != tier || s != scope);
        Ok(before - records.len())
    }

    async fn count(&self, tier: Tier) -> Result<usize> {
        let records = self.records.read().await;
        Ok(records.keys().filter(|(t, _, _)| *t == tier).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;

    #[tokio::test]
    async fn test_fresh_write_gets_version_one() {
        let store = InMemoryStore::new();
        let v = store
            .upsert(Tier::Semantic, "biz-1", "insight", json!("x"), None, None)
            .await
            .unwrap();
        assert_eq!(v, 1);
    }

    #[tokio::test]
    async fn test_stale_write_rejected() {
        let store = InMemoryStore::new();
        store
            .upsert(Tier::Semantic, "biz-1", "insight", json!("a"), None, None)
            .await
            .unwrap();

        // Writer that never read the record
        let err = store
            .upsert(Tier::Semantic, "biz-1", "insight", json!("b"), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "stale_write");

        // Writer holding the current version wins and bumps it
        let v = store
            .upsert(Tier::Semantic, "biz-1", "insight", json!("b"), None, Some(1))
            .await
            .unwrap();
        assert_eq!(v, 2);
    }

    #[tokio::test]
    async fn test_expired_record_does_not_block_rewrite() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        store
            .upsert(
                Tier::Working,
                "session-1",
                "draft",
                json!("old"),
                Some(now - ChronoDuration::seconds(10)),
                None,
            )
            .await
            .unwrap();

        // The record is expired but not yet swept; a writer that read
        // nothing must be able to write the key again
        let v = store
            .upsert(
                Tier::Working,
                "session-1",
                "draft",
                json!("new"),
                Some(now + ChronoDuration::seconds(600)),
                None,
            )
            .await
            .unwrap();
        assert_eq!(v, 2);

        let record = store
            .fetch(Tier::Working, "session-1", "draft")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.value, json!("new"));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = InMemoryStore::new();
        let now = Utc::now();

        store
            .upsert(
                Tier::Working,
                "session-1",
                "draft",
                json!("old"),
                Some(now - ChronoDuration::seconds(10)),
                None,
            )
            .await
            .unwrap();
        store
            .upsert(
                Tier::Episodic,
                "thread-1",
                "note",
                json!("fresh"),
                Some(now + ChronoDuration::seconds(600)),
                None,
            )
            .await
            .unwrap();
        store
            .upsert(Tier::Semantic, "biz-1", "fact", json!("kept"), None, None)
            .await
            .unwrap();

        let removed = store.sweep_expired(now).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count(Tier::Working).await.unwrap(), 0);
        assert_eq!(store.count(Tier::Episodic).await.unwrap(), 1);
        assert_eq!(store.count(Tier::Semantic).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_purge_scope_is_tier_scoped() {
        let store = InMemoryStore::new();
        store
            .upsert(Tier::Working, "s1", "a", json!(1), None, None)
            .await
            .unwrap();
        store
            .upsert(Tier::Working, "s2", "a", json!(2), None, None)
            .await
            .unwrap();
        store
            .upsert(Tier::Episodic, "s1", "a", json!(3), None, None)
            .await
            .unwrap();

        let purged = store.purge_scope(Tier::Working, "s1").await.unwrap();
        assert_eq!(purged, 1);
        assert!(store.fetch(Tier::Working, "s1", "a").await.unwrap().is_none());
        assert!(store.fetch(Tier::Episodic, "s1", "a").await.unwrap().is_some());
    }
}
