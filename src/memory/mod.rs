//! Tiered memory manager
//!
//! Owns the three memory tiers (working, episodic, semantic) and their
//! retention policies. Workers and the supervisor read and write through
//! this API only; records are never handed out as live references across
//! calls. Expired records are invisible to `get` even before the sweeper
//! reclaims them, so reads never block on sweep.

use crate::config::MemoryConfig;
use crate::error::{PulseError, Result};
use crate::storage::RecordStore;
use crate::types::{DurableFact, MemoryRecord, Tier};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Memory manager over a durable record store
pub struct MemoryManager {
    store: Arc<dyn RecordStore>,
    config: MemoryConfig,
}

impl MemoryManager {
    pub fn new(store: Arc<dyn RecordStore>, config: MemoryConfig) -> Self {
        Self { store, config }
    }

    /// TTL for a tier in seconds; None for semantic
    fn ttl_secs(&self, tier: Tier) -> Option<u64> {
        match tier {
            Tier::Working => Some(self.config.working_ttl_secs),
            Tier::Episodic => Some(self.config.episodic_ttl_secs),
            Tier::Semantic => None,
        }
    }

    /// Read a record, filtering out anything already past its expiry
    pub async fn get(&self, tier: Tier, scope: &str, key: &str) -> Result<Option<MemoryRecord>> {
        let record = self.store.fetch(tier, scope, key).await?;
        Ok(record.filter(|r| !r.is_expired(Utc::now())))
    }

    /// Version-checked upsert; returns the new version
    ///
    /// `expected_version` is the version the caller last read (None for a
    /// fresh key). A concurrent writer that got there first causes a
    /// `StaleWrite`; callers re-read and retry.
    pub async fn put(
        &self,
        tier: Tier,
        scope: &str,
        key: &str,
        value: Value,
        expected_version: Option<u64>,
    ) -> Result<u64> {
        let now = Utc::now();
        let expires_at = self
            .ttl_secs(tier)
            .and_then(|ttl| MemoryRecord::expiry_for(tier, now, ttl));

        let version = self
            .store
            .upsert(tier, scope, key, value, expires_at, expected_version)
            .await?;
        debug!(%tier, scope, key, version, "memory record written");
        Ok(version)
    }

    /// Persist a worker's durable fact idempotently
    ///
    /// Re-applying the same fact (same scope, same key) upserts rather than
    /// appends: an unchanged value keeps its version, a changed value bumps
    /// it. One stale-write race is absorbed by re-reading; a second
    /// conflict propagates to the caller.
    pub async fn persist_fact(&self, scope: &str, fact: &DurableFact) -> Result<u64> {
        for _ in 0..2 {
            let existing = self.get(fact.tier, scope, &fact.key).await?;
            if let Some(ref record) = existing {
                if record.value == fact.value {
                    return Ok(record.version);
                }
            }

            let expected = existing.map(|r| r.version);
            match self
                .put(fact.tier, scope, &fact.key, fact.value.clone(), expected)
                .await
            {
                Ok(version) => return Ok(version),
                Err(PulseError::StaleWrite { .. }) => {
                    warn!(scope, key = %fact.key, "stale fact write, re-reading");
                    continue;
                }
                Err(err) => return Err(err),
            }
        }

        Err(PulseError::StaleWrite {
            scope: scope.to_string(),
            key: fact.key.clone(),
            expected: 0,
            found: 0,
        })
    }

    /// Remove expired working/episodic records; semantic is never touched
    pub async fn sweep(&self) -> Result<usize> {
        self.store.sweep_expired(Utc::now()).await
    }

    /// Drop all working-tier records for a finished session
    ///
    /// Working records must not outlive their owning session even if their
    /// TTL has time left.
    pub async fn end_session(&self, session_id: &str) -> Result<usize> {
        let purged = self.store.purge_scope(Tier::Working, session_id).await?;
        info!(session_id, purged, "working memory released for session");
        Ok(purged)
    }

    /// Spawn the background sweeper on the configured interval
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        let interval = Duration::from_secs(manager.config.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // first tick fires immediately
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("memory sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        match manager.sweep().await {
                            Ok(removed) if removed > 0 => {
                                info!(removed, "memory sweep reclaimed records");
                            }
                            Ok(_) => {}
                            Err(err) => warn!(error = %err, "memory sweep failed"),
                        }
                    }
                }
            }
        })
    }
}
