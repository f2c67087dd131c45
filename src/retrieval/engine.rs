//! Retrieval engine: concurrent search, fusion, rerank, context assembly

use crate::config::RetrievalConfig;
use crate::error::{PulseError, Result};
use crate::retrieval::rerank::rerank;
use crate::retrieval::{Provenance, RetrievalCandidate, RetrievalOutput, RetrievalQuery};
use crate::runtime::ExecutionRuntime;
use crate::services::{EmbeddingProvider, GraphStore, StoreHit, VectorStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Hybrid retrieval over a vector store and a graph store
///
/// Both lookups go through the execution runtime under their own dependency
/// keys, so each store gets independent breaker and rate-limit state.
pub struct RetrievalEngine {
    embedder: Arc<dyn EmbeddingProvider>,
    vector: Arc<dyn VectorStore>,
    graph: Arc<dyn GraphStore>,
    runtime: Arc<ExecutionRuntime>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        vector: Arc<dyn VectorStore>,
        graph: Arc<dyn GraphStore>,
        runtime: Arc<ExecutionRuntime>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            vector,
            graph,
            runtime,
            config,
        }
    }

    /// Retrieve the top-k fused candidates for a query
    ///
    /// The two store lookups run concurrently; the call suspends until both
    /// complete or one fails fatally. One failed store degrades the result,
    /// both failing raises `RetrievalUnavailable`.
    pub async fn retrieve(
        &self,
        query: &RetrievalQuery,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<RetrievalOutput> {
        let deadline = self.config.store_timeout();
        let fetch = self.config.fetch_limit;

        let vector_fut = async {
            let embedding = self
                .runtime
                .run("embedding", deadline, cancel, self.embedder.embed(&query.text))
                .await?;
            self.runtime
                .run(
                    "vector_store",
                    deadline,
                    cancel,
                    self.vector.search(&embedding, fetch),
                )
                .await
        };
        let graph_fut = self.runtime.run(
            "graph_store",
            deadline,
            cancel,
            self.graph.traverse(
                &query.seed_entities,
                query.relation_filter.as_deref(),
                self.config.graph_depth,
            ),
        );

        let (vector_hits, graph_hits) = tokio::join!(vector_fut, graph_fut);

        let (vector_hits, graph_hits, degraded) = match (vector_hits, graph_hits) {
            (Ok(v), Ok(g)) => (v, g, false),
            (Ok(v), Err(err)) => {
                warn!(error = %err, "graph search failed, degrading to vector-only");
                (v, Vec::new(), true)
            }
            (Err(err), Ok(g)) => {
                warn!(error = %err, "vector search failed, degrading to graph-only");
                (Vec::new(), g, true)
            }
            (Err(v_err), Err(g_err)) => {
                return Err(PulseError::RetrievalUnavailable(format!(
                    "vector: {v_err}; graph: {g_err}"
                )));
            }
        };

        let mut candidates = fuse(
            &vector_hits,
            &graph_hits,
            self.config.vector_weight,
            self.config.graph_weight,
        );
        rerank(&query.text, &mut candidates);
        candidates.truncate(top_k);

        let context = assemble_context(&candidates, self.config.context_budget_bytes);
        debug!(
            candidates = candidates.len(),
            context_bytes = context.len(),
            degraded,
            "retrieval complete"
        );

        Ok(RetrievalOutput {
            candidates,
            context,
            degraded,
        })
    }
}

/// Min-max normalize a batch of store-local scores into [0, 1]
///
/// The two stores' raw scales are not comparable, so each batch is
/// normalized independently before fusion. A batch with no spread maps
/// to 1.0 (its only signal is "the store returned it").
fn normalize(hits: &[StoreHit]) -> Vec<(String, f32, String)> {
    if hits.is_empty() {
        return Vec::new();
    }

    let min = hits.iter().map(|h| h.raw_score).fold(f32::INFINITY, f32::min);
    let max = hits
        .iter()
        .map(|h| h.raw_score)
        .fold(f32::NEG_INFINITY, f32::max);
    let spread = max - min;

    hits.iter()
        .map(|h| {
            let score = if spread > f32::EPSILON {
                (h.raw_score - min) / spread
            } else {
                1.0
            };
            (h.entity_id.clone(), score, h.content.clone())
        })
        .collect()
}

/// Weighted union of the two normalized candidate sets, keyed on entity ID
///
/// An entity found by both paths is merged: provenance becomes `Both` and
/// the fused score is the weighted combination of the two normalized
/// scores. Single-path entities contribute only their own side. The output
/// ordering is deterministic (score, then entity ID) so concurrent
/// completion order cannot change the result.
pub fn fuse(
    vector_hits: &[StoreHit],
    graph_hits: &[StoreHit],
    vector_weight: f32,
    graph_weight: f32,
) -> Vec<RetrievalCandidate> {
    let total = vector_weight + graph_weight;
    let (w_vector, w_graph) = if total > 0.0 {
        (vector_weight / total, graph_weight / total)
    } else {
        (0.5, 0.5)
    };

    struct Fused {
        content: String,
        provenance: Provenance,
        score: f32,
    }

    let mut merged: HashMap<String, Fused> = HashMap::new();

    for (entity_id, score, content) in normalize(vector_hits) {
        merged.insert(
            entity_id,
            Fused {
                content,
                provenance: Provenance::Vector,
                score: w_vector * score,
            },
        );
    }

    for (entity_id, score, content) in normalize(graph_hits) {
        match merged.get_mut(&entity_id) {
            Some(existing) => {
                // Vector-path content is kept for merged hits so the merge
                // result does not depend on arrival order
                existing.provenance = Provenance::Both;
                existing.score += w_graph * score;
            }
            None => {
                merged.insert(
                    entity_id,
                    Fused {
                        content,
                        provenance: Provenance::Graph,
                        score: w_graph * score,
                    },
                );
            }
        }
    }

    let mut candidates: Vec<RetrievalCandidate> = merged
        .into_iter()
        .map(|(entity_id, fused)| RetrievalCandidate {
            entity_id,
            content: fused.content,
            provenance: fused.provenance,
            score: fused.score.clamp(0.0, 1.0),
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    candidates
}

/// Concatenate candidate content within the byte budget
///
/// Higher-ranked candidates are preferred; once the next candidate would
/// exceed the budget, the remaining (lower-ranked) tail is dropped.
pub fn assemble_context(candidates: &[RetrievalCandidate], budget_bytes: usize) -> String {
    let mut context = String::new();
    for candidate in candidates {
        let needed = candidate.content.len() + if context.is_empty() { 0 } else { 2 };
        if context.len() + needed > budget_bytes {
            break;
        }
        if !context.is_empty() {
            context.push_str("\n\n");
        }
        context.push_str(&candidate.content);
    }
    context
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use crate::services::{MockEmbeddingProvider, MockGraphStore, MockVectorStore};
    use proptest::prelude::*;

    fn hit(entity_id: &str, raw_score: f32, content: &str) -> StoreHit {
        StoreHit {
            entity_id: entity_id.to_string(),
            raw_score,
            content: content.to_string(),
        }
    }

    fn engine(
        vector: MockVectorStore,
        graph: MockGraphStore,
        embedder: MockEmbeddingProvider,
    ) -> RetrievalEngine {
        RetrievalEngine::new(
            Arc::new(embedder),
            Arc::new(vector),
            Arc::new(graph),
            Arc::new(ExecutionRuntime::new(RuntimeConfig::default(), None)),
            RetrievalConfig::default(),
        )
    }

    fn working_embedder() -> MockEmbeddingProvider {
        let mut embedder = MockEmbeddingProvider::new();
        embedder.expect_embed().returning(|_| Ok(vec![0.1, 0.2, 0.3]));
        embedder
    }

    #[test]
    fn test_normalize_min_max() {
        let hits = vec![hit("a", 10.0, ""), hit("b", 20.0, ""), hit("c", 30.0, "")];
        let normalized = normalize(&hits);
        assert_eq!(normalized[0].1, 0.0);
        assert_eq!(normalized[1].1, 0.5);
        assert_eq!(normalized[2].1, 1.0);
    }

    #[test]
    fn test_normalize_flat_batch() {
        let hits = vec![hit("a", 7.0, ""), hit("b", 7.0, "")];
        for (_, score, _) in normalize(&hits) {
            assert_eq!(score, 1.0);
        }
    }

    #[test]
    fn test_fuse_merges_shared_entities() {
        let vector = vec![hit("shared", 1.0, "from vector"), hit("v-only", 0.5, "v")];
        let graph = vec![hit("shared", 9.0, "from graph"), hit("g-only", 3.0, "g")];

        let fused = fuse(&vector, &graph, 0.5, 0.5);
        let shared = fused.iter().find(|c| c.entity_id == "shared").unwrap();
        assert_eq!(shared.provenance, Provenance::Both);
        assert_eq!(shared.content, "from vector");
        // Both sides normalized to 1.0 (batch max), equal weights: 1.0 fused
        assert!((shared.score - 1.0).abs() < 1e-6);

        let v_only = fused.iter().find(|c| c.entity_id == "v-only").unwrap();
        assert_eq!(v_only.provenance, Provenance::Vector);
    }

    proptest! {
        /// Fusion must not depend on the order hits arrive within a batch
        #[test]
        fn prop_fusion_commutative_over_arrival_order(
            mut vector in prop::collection::vec((0u8..20, 0.0f32..100.0), 0..12),
            mut graph in prop::collection::vec((0u8..20, 0.0f32..100.0), 0..12),
        ) {
            // Deduplicate entity ids within each batch
            vector.sort_by_key(|(id, _)| *id);
            vector.dedup_by_key(|(id, _)| *id);
            graph.sort_by_key(|(id, _)| *id);
            graph.dedup_by_key(|(id, _)| *id);

            let to_hits = |pairs: &[(u8, f32)]| -> Vec<StoreHit> {
                pairs
                    .iter()
                    .map(|(id, score)| hit(&format!("e{id}"), *score, "content"))
                    .collect()
            };

            let forward = fuse(&to_hits(&vector), &to_hits(&graph), 0.5, 0.5);

            let mut v_rev = vector.clone();
            v_rev.reverse();
            let mut g_rev = graph.clone();
            g_rev.reverse();
            let reversed = fuse(&to_hits(&v_rev), &to_hits(&g_rev), 0.5, 0.5);

            let ranking = |cs: &[RetrievalCandidate]| {
                cs.iter().map(|c| c.entity_id.clone()).collect::<Vec<_>>()
            };
            prop_assert_eq!(ranking(&forward), ranking(&reversed));
        }
    }

    #[test]
    fn test_assemble_context_respects_budget() {
        let candidates = vec![
            RetrievalCandidate {
                entity_id: "a".to_string(),
                content: "x".repeat(40),
                provenance: Provenance::Vector,
                score: 0.9,
            },
            RetrievalCandidate {
                entity_id: "b".to_string(),
                content: "y".repeat(40),
                provenance: Provenance::Graph,
                score: 0.5,
            },
        ];

        // Budget fits only the top-ranked candidate; the tail is dropped
        let context = assemble_context(&candidates, 60);
        assert!(context.contains('x'));
        assert!(!context.contains('y'));
    }

    #[tokio::test]
    async fn test_graph_failure_degrades_to_vector_only() {
        let mut vector = MockVectorStore::new();
        vector
            .expect_search()
            .returning(|_, _| Ok(vec![hit("a", 0.9, "vector result")]));

        let mut graph = MockGraphStore::new();
        graph.expect_traverse().returning(|_, _, _| {
            Err(PulseError::Transient {
                dependency: "graph_store".to_string(),
                detail: "connection refused".to_string(),
            })
        });

        let engine = engine(vector, graph, working_embedder());
        let cancel = CancellationToken::new();
        let out = engine
            .retrieve(&RetrievalQuery::new("anything"), 5, &cancel)
            .await
            .unwrap();

        assert!(out.degraded);
        assert_eq!(out.candidates.len(), 1);
        assert_eq!(out.candidates[0].provenance, Provenance::Vector);
    }

    #[tokio::test]
    async fn test_both_stores_failing_is_typed_error() {
        let mut vector = MockVectorStore::new();
        vector.expect_search().returning(|_, _| {
            Err(PulseError::Transient {
                dependency: "vector_store".to_string(),
                detail: "down".to_string(),
            })
        });

        let mut graph = MockGraphStore::new();
        graph.expect_traverse().returning(|_, _, _| {
            Err(PulseError::Transient {
                dependency: "graph_store".to_string(),
                detail: "down".to_string(),
            })
        });

        let engine = engine(vector, graph, working_embedder());
        let cancel = CancellationToken::new();
        let err = engine
            .retrieve(&RetrievalQuery::new("anything"), 5, &cancel)
            .await
            .unwrap_err();
        assert_eq!(err.reason_code(), "retrieval_unavailable");
    }

    #[tokio::test]
    async fn test_retrieve_truncates_to_top_k() {
        let mut vector = MockVectorStore::new();
        vector.expect_search().returning(|_, _| {
            Ok((0..10)
                .map(|i| hit(&format!("v{i}"), i as f32, "vector content"))
                .collect())
        });

        let mut graph = MockGraphStore::new();
        graph
            .expect_traverse()
            .returning(|_, _, _| Ok(vec![hit("g0", 1.0, "graph content")]));

        let engine = engine(vector, graph, working_embedder());
        let cancel = CancellationToken::new();
        let out = engine
            .retrieve(&RetrievalQuery::new("content"), 3, &cancel)
            .await
            .unwrap();

        assert_eq!(out.candidates.len(), 3);
        assert!(!out.degraded);
    }
}
