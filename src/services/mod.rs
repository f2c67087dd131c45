//! External collaborator interfaces
//!
//! The core consumes these as traits only; concrete adapters (Pinecone-like
//! vector stores, Neo4j-like graph stores, LLM and embedding providers,
//! data-source fetchers, delivery channels) live outside this crate. Every
//! call through one of these traits is routed through the execution runtime
//! by the caller, so implementations need no resilience logic of their own.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw hit returned by a search store, before normalization
///
/// `raw_score` is store-local and not comparable across stores; the
/// retrieval engine min-max normalizes each batch independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreHit {
    /// Back-reference to the source entity
    pub entity_id: String,

    /// Store-local relevance score
    pub raw_score: f32,

    /// Raw content
    pub content: String,
}

/// Vector-similarity search store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<StoreHit>>;
}

/// Graph-traversal search store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GraphStore: Send + Sync {
    async fn traverse<'a>(
        &self,
        seed_entities: &[String],
        relation_filter: Option<&'a str>,
        depth: usize,
    ) -> Result<Vec<StoreHit>>;
}

/// Text embedding provider
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Language-model provider
///
/// Invoked by Analyst/Reporter workers through the execution runtime with
/// the same timeout/retry/breaker discipline as any other dependency.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &str, context: &str) -> Result<String>;
}

/// Data-source adapter feeding the Collector worker
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self, request: &Value) -> Result<Value>;
}

/// Outbound delivery channel used by the Communicator worker
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send(&self, recipient: &str, subject: &str, body: &str) -> Result<()>;
}
