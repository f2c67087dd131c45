//! Storage layer for the tiered memory system
//!
//! Provides the durable-store abstraction the memory manager writes
//! through: a keyed read/write store with optional TTL support and
//! version-checked upserts. Production deployments back this with an
//! external durable store; the in-memory implementation serves
//! process-local use and tests.

pub mod memory;

pub use memory::InMemoryStore;

use crate::error::Result;
use crate::types::{MemoryRecord, Tier};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Durable store trait for memory records
///
/// `upsert` must be atomic per key: the version comparison and the write
/// happen under the implementation's own synchronization, serializing
/// concurrent writers to the same key without a global lock.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Fetch a record; expiry filtering is the caller's concern
    async fn fetch(&self, tier: Tier, scope: &str, key: &str) -> Result<Option<MemoryRecord>>;

    /// Version-checked upsert
    ///
    /// `expected_version` is the version the writer last read (None for a
    /// fresh key). On mismatch the write is rejected with `StaleWrite`.
    /// An expired record counts as absent for the version check, since
    /// readers cannot observe it, but the new version must still be
    /// strictly greater than any version ever stored for the key. The
    /// stored version is returned.
    async fn upsert(
        &self,
        tier: Tier,
        scope: &str,
        key: &str,
        value: Value,
        expires_at: Option<DateTime<Utc>>,
        expected_version: Option<u64>,
    ) -> Result<u64>;

    /// Remove expired records, returning how many were reclaimed
    ///
    /// Semantic records carry no expiry and are never touched.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// Remove every record in a (tier, scope) pair, returning the count
    async fn purge_scope(&self, tier: Tier, scope: &str) -> Result<usize>;

    /// Count live records in a tier (diagnostics)
    async fn count(&self, tier: Tier) -> Result<usize>;
}
