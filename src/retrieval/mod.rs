//! Hybrid retrieval engine
//!
//! Issues vector-similarity and graph-traversal searches concurrently,
//! fuses the candidate sets with min-max normalized weighted scores,
//! reranks against the query, and assembles a bounded context. Failure of
//! one store degrades the result instead of failing it; failure of both is
//! a typed error the caller decides how to handle.

pub mod engine;
pub mod rerank;

pub use engine::RetrievalEngine;

use serde::{Deserialize, Serialize};

/// Which search path produced a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Vector,
    Graph,
    /// Found by both paths and merged during fusion
    Both,
}

/// Transient candidate produced by one retrieval call
///
/// Not persisted; lifetime is the retrieval call that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalCandidate {
    /// Back-reference to the source entity
    pub entity_id: String,

    /// Raw content used for context assembly
    pub content: String,

    /// Which search path(s) found this candidate
    pub provenance: Provenance,

    /// Normalized relevance score in [0, 1]
    pub score: f32,
}

/// Query for one retrieval call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalQuery {
    /// Free-text query, embedded for the vector path and used for rerank
    pub text: String,

    /// Seed entities for the graph traversal path
    pub seed_entities: Vec<String>,

    /// Optional relation filter for the traversal
    pub relation_filter: Option<String>,
}

impl RetrievalQuery {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            seed_entities: Vec::new(),
            relation_filter: None,
        }
    }

    pub fn with_seeds(mut self, seeds: Vec<String>) -> Self {
        self.seed_entities = seeds;
        self
    }
}

/// Ranked candidates plus the assembled context
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalOutput {
    /// Final ranked candidates, truncated to `top_k`
    pub candidates: Vec<RetrievalCandidate>,

    /// Concatenated candidate content within the size budget
    pub context: String,

    /// True when one of the two stores failed and the result is partial
    pub degraded: bool,
}
